//! Port traits for contact persistence.
//!
//! The reconciler runs every step of one assertion through a single
//! `ContactTx`. Backends must make the transaction all-or-nothing: writes
//! become visible on `commit`, and dropping an uncommitted transaction
//! discards them.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Contact, ContactId, IdentityKeys, LinkPrecedence, NewContact};

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Open a transaction for one reconciliation. `keys` identifies the
    /// email/phone values being asserted; backends use them to exclude
    /// concurrent reconciliations of the same identity.
    async fn begin(&self, keys: &IdentityKeys) -> Result<Box<dyn ContactTx>>;
}

#[async_trait]
pub trait ContactTx: Send {
    /// Contacts whose email equals `email` OR whose phone equals
    /// `phone_number`. A `None` side matches nothing.
    async fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>>;

    /// Contacts whose `linked_id` equals `linked_id`, plus the contact `id`
    /// itself when given.
    async fn find_by_linked_id_or_id(
        &mut self,
        linked_id: ContactId,
        id: Option<ContactId>,
    ) -> Result<Vec<Contact>>;

    /// Hold the given contacts against concurrent writers until the
    /// transaction ends. Backends that already serialize whole transactions
    /// may treat this as a no-op.
    async fn lock_contacts(&mut self, ids: &[ContactId]) -> Result<()>;

    async fn insert(&mut self, contact: NewContact) -> Result<Contact>;

    async fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
