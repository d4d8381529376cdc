//! PostgreSQL backend for identity reconciliation.
//!
//! `PgContactStore` implements the `identity_core` port traits over a
//! `PgPool`. Each reconciliation runs in one transaction, guarded by
//! transaction-scoped advisory locks on the asserted email/phone keys.

pub mod database;
pub mod store;

pub use database::{connect, mask_database_url, DatabaseConfig};
pub use store::{IsolationLevel, PgContactStore};
