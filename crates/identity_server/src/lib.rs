//! identity_server: REST surface for identity reconciliation.
//!
//! Exposes `POST /identify` over an `IdentityReconciler`, backed by either
//! the in-memory store or `identity_postgres`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;

pub use config::{ConfigError, ServerConfig, StoreBackend};
pub use router::build_router;
