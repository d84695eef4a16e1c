//! End-to-end tests for the gateway against a mock secret store, credential
//! issuer, and upstream API.
//!
//! The mock server speaks plain HTTP, so these tests run with the client
//! identity disabled; identity construction is covered by unit tests.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use redeban_kyc_gateway::secrets::HttpSecretFetcher;
use redeban_kyc_gateway::token::{HttpCredentialIssuer, MemoryTokenStore};
use redeban_kyc_gateway::{Gateway, GatewayConfig, KycError, MerchantQuery};

const API_PATH: &str = "/api/kyc/v3.0.0/enterprise";
const COMMERCE_PATH: &str = "/api/kyc/v3.0.0/enterprise/Commerce/10203040";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config(server: &MockServer) -> GatewayConfig {
    GatewayConfig {
        base_url: server.uri(),
        api_path: API_PATH.to_owned(),
        secret_url: format!("{}/secret", server.uri()),
        token_url: format!("{}/token", server.uri()),
        use_client_identity: false,
        request_timeout: Duration::from_secs(5),
        max_elapsed: Duration::from_secs(30),
        ..GatewayConfig::default()
    }
}

fn gateway(
    config: GatewayConfig,
) -> Gateway<HttpSecretFetcher, MemoryTokenStore, HttpCredentialIssuer> {
    let http = reqwest::Client::new();
    let fetcher = HttpSecretFetcher::new(http.clone(), config.secret_url.clone(), None);
    let issuer = HttpCredentialIssuer::new(http, config.token_url.clone());
    Gateway::new(config, fetcher, MemoryTokenStore::new(), issuer)
}

fn token_body(value: &str) -> serde_json::Value {
    json!({"token": value, "expires_in": 3600})
}

fn commerce_body() -> serde_json::Value {
    json!({
        "businessName": "Comercio Prueba S.A.S.",
        "status": "ACTIVE",
        "registrationDate": "2020-03-15",
        "contactInfo": {"email": "contacto@prueba.co"},
        "documentNumber": "900123456-7",
    })
}

async fn mount_issuer(server: &MockServer, value: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(value)))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_validation_short_circuits_before_any_network() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("unused")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));

    for bad_id in ["12AB5678", "1234567", "", "123456789"] {
        let response = gateway.lookup_response(bad_id, false).await;
        assert!(!response.success, "expected rejection for {bad_id:?}");
        assert_eq!(response.status_code(), 400);
        let error = response.error.unwrap();
        assert_eq!(error.error_type, "VALIDATION_ERROR");
    }
}

#[tokio::test]
async fn test_lookup_returns_canonical_result() {
    init_tracing();
    let server = MockServer::start().await;
    mount_issuer(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .and(bearer_token("tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commerce_body()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", false).unwrap();
    let result = gateway.lookup(&query).await.unwrap();

    assert_eq!(result.merchant_id.as_str(), "10203040");
    assert_eq!(result.business_info.name, "Comercio Prueba S.A.S.");
    assert_eq!(result.business_info.status, "ACTIVE");
    assert!(result.business_info.is_active);
    assert_eq!(result.business_info.registration_date.as_deref(), Some("2020-03-15T00:00:00Z"));
    assert_eq!(result.contact_info["email"], "contacto@prueba.co");
    assert!(result.raw_upstream_payload.is_none());
}

#[tokio::test]
async fn test_raw_payload_included_on_request() {
    init_tracing();
    let server = MockServer::start().await;
    mount_issuer(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(commerce_body()))
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", true).unwrap();
    let result = gateway.lookup(&query).await.unwrap();

    assert_eq!(result.raw_upstream_payload.unwrap(), commerce_body());
}

#[tokio::test]
async fn test_fresh_token_reused_across_lookups() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .and(bearer_token("tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commerce_body()))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", false).unwrap();

    gateway.lookup(&query).await.unwrap();
    gateway.lookup(&query).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_cached_token() {
    init_tracing();
    let server = MockServer::start().await;

    // Concurrent cold starts may each reach the issuer before the
    // conditional write settles, but never more than once each.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
        .expect(1..=3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .and(bearer_token("tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commerce_body()))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", false).unwrap();

    let (a, b, c) = tokio::join!(
        gateway.lookup(&query),
        gateway.lookup(&query),
        gateway.lookup(&query)
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
}

#[tokio::test]
async fn test_rejected_token_refreshed_and_retried_once() {
    init_tracing();
    let server = MockServer::start().await;

    // First issuance yields a token the upstream no longer accepts; the
    // forced refresh yields a working one.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("stale-token")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh-token")))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .and(bearer_token("stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .and(bearer_token("fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(commerce_body()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", false).unwrap();
    let result = gateway.lookup(&query).await.unwrap();
    assert!(result.business_info.is_active);
}

#[tokio::test]
async fn test_second_rejection_surfaces_as_401() {
    init_tracing();
    let server = MockServer::start().await;

    // One initial issuance plus exactly one forced refresh, then give up.
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("bad-token")))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let response = gateway.lookup_response("10203040", false).await;

    assert!(!response.success);
    assert_eq!(response.status_code(), 401);
    assert_eq!(response.error.unwrap().error_type, "UPSTREAM_REJECTED");
}

#[tokio::test]
async fn test_forbidden_is_terminal_without_refresh() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", false).unwrap();

    let err = gateway.lookup(&query).await.unwrap_err();
    assert!(matches!(err, KycError::UpstreamRejected { status: 403, .. }));
}

#[tokio::test]
async fn test_upstream_5xx_retried_to_attempt_bound() {
    init_tracing();
    let server = MockServer::start().await;
    mount_issuer(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let query = MerchantQuery::new("10203040", false).unwrap();

    let err = gateway.lookup(&query).await.unwrap_err();
    assert!(matches!(err, KycError::UpstreamUnavailable { .. }));
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn test_not_found_is_terminal() {
    init_tracing();
    let server = MockServer::start().await;
    mount_issuer(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let response = gateway.lookup_response("10203040", false).await;

    assert_eq!(response.status_code(), 404);
    let error = response.error.unwrap();
    assert!(error.message.contains("10203040"));
}

#[tokio::test]
async fn test_rate_limit_passes_through_as_429() {
    init_tracing();
    let server = MockServer::start().await;
    mount_issuer(&server, "tok-1").await;

    Mock::given(method("GET"))
        .and(path(COMMERCE_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let response = gateway.lookup_response("10203040", false).await;

    assert_eq!(response.status_code(), 429);
    assert_eq!(response.error.unwrap().error_type, "RATE_LIMIT_ERROR");
}

#[tokio::test]
async fn test_secret_failure_surfaces_per_request() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("unused")))
        .expect(0)
        .mount(&server)
        .await;

    let config = GatewayConfig { use_client_identity: true, ..test_config(&server) };
    let gateway = gateway(config);

    // The failed load is not memoized: every request observes the failure
    // until a load succeeds.
    for _ in 0..2 {
        let response = gateway.lookup_response("10203040", false).await;
        assert!(!response.success);
        assert_eq!(response.status_code(), 500);
        assert_eq!(response.error.unwrap().error_type, "SECRET_UNAVAILABLE");
    }
}

#[tokio::test]
async fn test_health_check_reports_upstream_status() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let gateway = gateway(test_config(&server));
    let health = gateway.health_check().await.unwrap();

    assert_eq!(health.status, "healthy");
    assert_eq!(health.status_code, Some(200));
    assert!(health.response_time_ms.is_some());
}
