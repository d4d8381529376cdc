//! In-memory `ContactStore` for tests and local development.
//!
//! Transactions are serialized behind one async mutex. Each transaction
//! works on a private copy of the state that replaces the shared state only
//! on commit, so a dropped transaction leaves no trace.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;
use crate::ports::{ContactStore, ContactTx, Result};
use crate::types::{Contact, ContactId, IdentityKeys, LinkPrecedence, NewContact};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    contacts: BTreeMap<ContactId, Contact>,
    last_id: ContactId,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryState {
    /// Strictly increasing creation timestamps, even when the wall clock
    /// does not advance between inserts.
    fn next_created_at(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(ts);
        ts
    }

    fn sorted(mut contacts: Vec<Contact>) -> Vec<Contact> {
        contacts.sort_by_key(|c| c.precedence_key());
        contacts
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryContactStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryContactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed contacts, ordered by id.
    pub async fn contacts(&self) -> Vec<Contact> {
        self.state.lock().await.contacts.values().cloned().collect()
    }

    pub async fn get(&self, id: ContactId) -> Option<Contact> {
        self.state.lock().await.contacts.get(&id).cloned()
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn begin(&self, _keys: &IdentityKeys) -> Result<Box<dyn ContactTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl ContactTx for MemoryTx {
    async fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        let found = self
            .working
            .contacts
            .values()
            .filter(|c| {
                (email.is_some() && c.email.as_deref() == email)
                    || (phone_number.is_some() && c.phone_number.as_deref() == phone_number)
            })
            .cloned()
            .collect();
        Ok(MemoryState::sorted(found))
    }

    async fn find_by_linked_id_or_id(
        &mut self,
        linked_id: ContactId,
        id: Option<ContactId>,
    ) -> Result<Vec<Contact>> {
        let found = self
            .working
            .contacts
            .values()
            .filter(|c| c.linked_id == Some(linked_id) || Some(c.id) == id)
            .cloned()
            .collect();
        Ok(MemoryState::sorted(found))
    }

    async fn lock_contacts(&mut self, _ids: &[ContactId]) -> Result<()> {
        Ok(())
    }

    async fn insert(&mut self, contact: NewContact) -> Result<Contact> {
        if let Some(target) = contact.linked_id {
            if !self.working.contacts.contains_key(&target) {
                return Err(StoreError::NotFound(target));
            }
        }
        let created_at = self.working.next_created_at();
        self.working.last_id += 1;
        let row = Contact {
            id: self.working.last_id,
            email: contact.email,
            phone_number: contact.phone_number,
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at,
            updated_at: created_at,
        };
        self.working.contacts.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<()> {
        if let Some(target) = linked_id {
            if !self.working.contacts.contains_key(&target) {
                return Err(StoreError::NotFound(target));
            }
        }
        let row = self
            .working
            .contacts
            .get_mut(&id)
            .ok_or(StoreError::NotFound(id))?;
        row.link_precedence = precedence;
        row.linked_id = linked_id;
        row.updated_at = Utc::now().max(row.created_at);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
