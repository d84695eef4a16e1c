//! Bearer token lifecycle: caching, expiry, and stampede-safe refresh.
//!
//! The token store is the only mutable resource shared across processes, so
//! all refresh coordination goes through its conditional write - never
//! through in-process locks.

pub mod cache;
pub mod provider;

pub use cache::{CachedToken, MemoryTokenStore, TokenStore};
pub use provider::{CredentialIssuer, HttpCredentialIssuer, IssuedToken, TokenProvider};
