//! identity_core: identity reconciliation over a contact store.
//!
//! Pure domain types, the `ContactStore` port traits, and the
//! `IdentityReconciler` that clusters contacts sharing an email or phone
//! number under a single primary record. Persistence backends live in
//! sibling crates (`identity_postgres`) or in [`memory`] for tests and
//! local development.

pub mod closure;
pub mod error;
pub mod memory;
pub mod ports;
pub mod reconciler;
pub mod types;

pub use error::{ReconcileError, StoreError};
pub use memory::MemoryContactStore;
pub use ports::{ContactStore, ContactTx};
pub use reconciler::IdentityReconciler;
pub use types::{
    ConsolidatedIdentity, Contact, ContactId, IdentityAssertion, IdentityKeys, LinkPrecedence,
    NewContact,
};
