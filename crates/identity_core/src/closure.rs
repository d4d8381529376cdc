//! Transitive closure over `linked_id` references.
//!
//! Expansion walks an explicit FIFO work queue with a visited set, so it
//! terminates on cycles and never recurses, however deep a link chain runs.

use std::collections::{HashSet, VecDeque};

use crate::ports::{ContactTx, Result};
use crate::types::{Contact, ContactId, LinkPrecedence};

/// Members of every cluster reachable from a seed set, in discovery order.
#[derive(Debug, Clone, Default)]
pub struct Closure {
    members: Vec<Contact>,
}

impl Closure {
    /// Expand `seeds` until no new contacts are discovered. For each visited
    /// contact the store is asked for its secondaries and, if it is itself a
    /// secondary, its primary.
    pub async fn expand(tx: &mut dyn ContactTx, seeds: Vec<Contact>) -> Result<Self> {
        let mut visited: HashSet<ContactId> = HashSet::new();
        let mut queue: VecDeque<Contact> = seeds.into();
        let mut members = Vec::new();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.id) {
                continue;
            }
            let linked = tx
                .find_by_linked_id_or_id(current.id, current.linked_id)
                .await?;
            queue.extend(linked.into_iter().filter(|c| !visited.contains(&c.id)));
            members.push(current);
        }

        tracing::debug!(members = members.len(), "closure expanded");
        Ok(Self { members })
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> &[Contact] {
        &self.members
    }

    pub fn push(&mut self, contact: Contact) {
        self.members.push(contact);
    }

    pub fn primaries(&self) -> Vec<&Contact> {
        self.members.iter().filter(|c| c.is_primary()).collect()
    }

    /// Earliest primary, by creation time then id.
    pub fn oldest_primary(&self) -> Option<&Contact> {
        self.members
            .iter()
            .filter(|c| c.is_primary())
            .min_by_key(|c| c.precedence_key())
    }

    /// Earliest member regardless of precedence.
    pub fn oldest(&self) -> Option<&Contact> {
        self.members.iter().min_by_key(|c| c.precedence_key())
    }

    pub fn has_email(&self, email: &str) -> bool {
        self.members
            .iter()
            .any(|c| c.email.as_deref() == Some(email))
    }

    pub fn has_phone_number(&self, phone_number: &str) -> bool {
        self.members
            .iter()
            .any(|c| c.phone_number.as_deref() == Some(phone_number))
    }

    pub fn contains(&self, id: ContactId) -> bool {
        self.members.iter().any(|c| c.id == id)
    }

    /// Member ids, ascending.
    pub fn ids(&self) -> Vec<ContactId> {
        let mut ids: Vec<ContactId> = self.members.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        ids
    }

    /// `(id, precedence, linked_id)` per member, sorted by id. Two reads of
    /// the same cluster agree on this exactly when no link changed between
    /// them and no member was added or removed.
    pub fn link_state(&self) -> Vec<(ContactId, LinkPrecedence, Option<ContactId>)> {
        let mut state: Vec<_> = self
            .members
            .iter()
            .map(|c| (c.id, c.link_precedence, c.linked_id))
            .collect();
        state.sort_unstable_by_key(|(id, _, _)| *id);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryContactStore;
    use crate::ports::ContactStore;
    use crate::types::{IdentityKeys, LinkPrecedence, NewContact};

    fn new_contact(
        email: Option<&str>,
        phone: Option<&str>,
        linked_id: Option<ContactId>,
    ) -> NewContact {
        NewContact {
            email: email.map(str::to_string),
            phone_number: phone.map(str::to_string),
            link_precedence: if linked_id.is_some() {
                LinkPrecedence::Secondary
            } else {
                LinkPrecedence::Primary
            },
            linked_id,
        }
    }

    #[tokio::test]
    async fn expands_from_secondary_to_siblings() {
        let store = MemoryContactStore::new();
        let mut tx = store.begin(&IdentityKeys::default()).await.unwrap();
        let p = tx.insert(new_contact(Some("a@x.com"), None, None)).await.unwrap();
        let s1 = tx
            .insert(new_contact(Some("b@x.com"), None, Some(p.id)))
            .await
            .unwrap();
        let s2 = tx
            .insert(new_contact(Some("c@x.com"), None, Some(p.id)))
            .await
            .unwrap();
        let _other = tx.insert(new_contact(Some("z@x.com"), None, None)).await.unwrap();

        let closure = Closure::expand(tx.as_mut(), vec![s2.clone()]).await.unwrap();
        let ids: Vec<ContactId> = closure.members().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![s2.id, p.id, s1.id]);
        assert_eq!(closure.oldest_primary().map(|c| c.id), Some(p.id));
    }

    #[tokio::test]
    async fn duplicate_seeds_visited_once() {
        let store = MemoryContactStore::new();
        let mut tx = store.begin(&IdentityKeys::default()).await.unwrap();
        let p = tx.insert(new_contact(Some("a@x.com"), None, None)).await.unwrap();
        let s = tx
            .insert(new_contact(None, Some("1"), Some(p.id)))
            .await
            .unwrap();

        let closure = Closure::expand(tx.as_mut(), vec![p.clone(), s.clone(), p.clone()])
            .await
            .unwrap();
        assert_eq!(closure.len(), 2);
    }

    #[tokio::test]
    async fn terminates_on_link_cycle() {
        let store = MemoryContactStore::new();
        let mut tx = store.begin(&IdentityKeys::default()).await.unwrap();
        let a = tx.insert(new_contact(Some("a@x.com"), None, None)).await.unwrap();
        let b = tx
            .insert(new_contact(Some("b@x.com"), None, Some(a.id)))
            .await
            .unwrap();
        // corrupt data: a points back at b
        tx.update_precedence_and_link(a.id, LinkPrecedence::Secondary, Some(b.id))
            .await
            .unwrap();
        let a = tx
            .find_by_email_or_phone(Some("a@x.com"), None)
            .await
            .unwrap()
            .remove(0);

        let closure = Closure::expand(tx.as_mut(), vec![a]).await.unwrap();
        assert_eq!(closure.len(), 2);
        assert!(closure.primaries().is_empty());
        assert_eq!(closure.oldest().map(|c| c.id), Some(1));
    }

    #[tokio::test]
    async fn link_state_tracks_relinks_and_new_members() {
        let store = MemoryContactStore::new();
        let mut tx = store.begin(&IdentityKeys::default()).await.unwrap();
        let p = tx.insert(new_contact(Some("a@x.com"), None, None)).await.unwrap();
        let q = tx.insert(new_contact(Some("b@x.com"), None, None)).await.unwrap();

        let before = Closure::expand(tx.as_mut(), vec![q.clone()]).await.unwrap();
        assert_eq!(before.ids(), vec![q.id]);
        let again = Closure::expand(tx.as_mut(), vec![q.clone()]).await.unwrap();
        assert_eq!(again.link_state(), before.link_state());

        tx.update_precedence_and_link(q.id, LinkPrecedence::Secondary, Some(p.id))
            .await
            .unwrap();
        let q = tx
            .find_by_email_or_phone(Some("b@x.com"), None)
            .await
            .unwrap()
            .remove(0);
        let after = Closure::expand(tx.as_mut(), vec![q.clone()]).await.unwrap();
        assert_eq!(after.ids(), vec![p.id, q.id]);
        assert_ne!(after.link_state(), before.link_state());
    }

    #[tokio::test]
    async fn empty_seeds_give_empty_closure() {
        let store = MemoryContactStore::new();
        let mut tx = store.begin(&IdentityKeys::default()).await.unwrap();
        let closure = Closure::expand(tx.as_mut(), Vec::new()).await.unwrap();
        assert!(closure.is_empty());
        assert!(closure.oldest().is_none());
    }

    #[tokio::test]
    async fn membership_queries() {
        let store = MemoryContactStore::new();
        let mut tx = store.begin(&IdentityKeys::default()).await.unwrap();
        let p = tx
            .insert(new_contact(Some("a@x.com"), Some("111"), None))
            .await
            .unwrap();
        let closure = Closure::expand(tx.as_mut(), vec![p.clone()]).await.unwrap();
        assert!(closure.has_email("a@x.com"));
        assert!(!closure.has_email("b@x.com"));
        assert!(closure.has_phone_number("111"));
        assert!(!closure.has_phone_number("222"));
        assert!(closure.contains(p.id));
    }
}
