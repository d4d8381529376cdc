//! IdentityReconciler: clusters contacts that share an email or phone.
//!
//! One reconciliation runs entirely inside one store transaction:
//!
//! 1. Seed lookup by email OR phone
//! 2. Transitive closure over `linked_id`, members locked and re-read
//! 3. No match → new primary, done
//! 4. Provisional primary selection
//! 5. New-fact detection → optional new secondary
//! 6. Multi-primary merge (oldest wins, cluster flattened onto it)
//! 7. Re-closure from the survivor and response assembly
//!
//! Any error drops the transaction, so a failed assertion leaves no writes.

use std::sync::Arc;

use crate::closure::Closure;
use crate::error::{ReconcileError, StoreError};
use crate::ports::{ContactStore, ContactTx};
use crate::types::{ConsolidatedIdentity, Contact, IdentityAssertion, LinkPrecedence, NewContact};

pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Lock-and-reread rounds before a shifting cluster is reported as a conflict.
const LOCK_ATTEMPTS: usize = 3;

pub struct IdentityReconciler {
    store: Arc<dyn ContactStore>,
}

impl IdentityReconciler {
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self { store }
    }

    /// Reconcile one assertion and return the consolidated identity of the
    /// cluster it belongs to after all writes.
    #[tracing::instrument(
        name = "reconcile",
        skip_all,
        fields(
            has_email = assertion.email().is_some(),
            has_phone = assertion.phone_number().is_some(),
        )
    )]
    pub async fn reconcile(&self, assertion: &IdentityAssertion) -> Result<ConsolidatedIdentity> {
        if assertion.is_empty() {
            return Err(ReconcileError::InvalidAssertion(
                "at least one of email or phoneNumber is required".into(),
            ));
        }

        let mut tx = self.store.begin(&assertion.keys()).await?;
        let identity = reconcile_in(tx.as_mut(), assertion).await?;
        tx.commit().await?;

        tracing::debug!(
            primary_contact_id = identity.primary_contact_id,
            secondaries = identity.secondary_contact_ids.len(),
            "reconciliation committed"
        );
        Ok(identity)
    }
}

async fn reconcile_in(
    tx: &mut dyn ContactTx,
    assertion: &IdentityAssertion,
) -> Result<ConsolidatedIdentity> {
    // 1-2. Seeds and closure, locked against concurrent writers
    let mut closure = locked_closure(tx, assertion).await?;

    // 3. No match
    if closure.is_empty() {
        let contact = tx.insert(NewContact::primary(assertion)).await?;
        tracing::info!(contact_id = contact.id, "created primary contact");
        return Ok(ConsolidatedIdentity::from_cluster(
            &contact,
            std::slice::from_ref(&contact),
        ));
    }

    // 4. Provisional primary
    let provisional = select_primary(&closure)?;

    // 5. New facts
    let email_is_new = assertion.email().is_some_and(|e| !closure.has_email(e));
    let phone_is_new = assertion
        .phone_number()
        .is_some_and(|p| !closure.has_phone_number(p));
    if email_is_new || phone_is_new {
        let secondary = tx
            .insert(NewContact::secondary_of(assertion, provisional.id))
            .await?;
        tracing::info!(
            contact_id = secondary.id,
            linked_id = provisional.id,
            email_is_new,
            phone_is_new,
            "created secondary contact"
        );
        closure.push(secondary);
    }

    // 6. Merge
    let survivor = merge_primaries(tx, &closure, provisional).await?;

    // 7. Re-closure and response
    let cluster = Closure::expand(tx, vec![survivor.clone()]).await?;
    verify_cluster(&cluster, &survivor)?;
    Ok(ConsolidatedIdentity::from_cluster(
        &survivor,
        cluster.members(),
    ))
}

async fn read_closure(tx: &mut dyn ContactTx, assertion: &IdentityAssertion) -> Result<Closure> {
    let mut seeds = tx
        .find_by_email_or_phone(assertion.email(), assertion.phone_number())
        .await?;
    seeds.sort_by_key(|c| c.precedence_key());
    Ok(Closure::expand(tx, seeds).await?)
}

/// Lock every closure member, then read the closure again. The key locks
/// taken in `begin` do not cover a cluster reached through other keys, so
/// a concurrent merge may have moved it while we waited; in that case lock
/// the new membership and repeat.
async fn locked_closure(tx: &mut dyn ContactTx, assertion: &IdentityAssertion) -> Result<Closure> {
    let mut closure = read_closure(tx, assertion).await?;
    for attempt in 1..=LOCK_ATTEMPTS {
        if closure.is_empty() {
            return Ok(closure);
        }
        tx.lock_contacts(&closure.ids()).await?;
        let current = read_closure(tx, assertion).await?;
        if current.link_state() == closure.link_state() {
            return Ok(current);
        }
        tracing::debug!(
            attempt,
            before = closure.len(),
            after = current.len(),
            "cluster changed while locking; re-reading"
        );
        closure = current;
    }
    tracing::warn!(attempts = LOCK_ATTEMPTS, "cluster kept changing while locking");
    Err(StoreError::Conflict("cluster changed concurrently".into()).into())
}

/// The oldest primary in the closure; if there is none, the oldest member.
fn select_primary(closure: &Closure) -> Result<Contact> {
    if let Some(primary) = closure.oldest_primary() {
        return Ok(primary.clone());
    }
    match closure.oldest() {
        Some(fallback) => {
            tracing::warn!(
                contact_id = fallback.id,
                members = closure.len(),
                "closure has no primary; falling back to oldest member"
            );
            Ok(fallback.clone())
        }
        None => {
            tracing::error!("closure has no members to select a primary from");
            Err(ReconcileError::InvariantViolation(
                "no primary could be selected".into(),
            ))
        }
    }
}

/// When the closure holds more than one primary, keep the oldest and point
/// every other member directly at it. Returns the surviving primary.
async fn merge_primaries(
    tx: &mut dyn ContactTx,
    closure: &Closure,
    provisional: Contact,
) -> Result<Contact> {
    let primaries = closure.primaries();
    if primaries.len() <= 1 {
        return Ok(provisional);
    }

    let survivor = primaries
        .iter()
        .min_by_key(|c| c.precedence_key())
        .map(|c| (*c).clone())
        .unwrap_or(provisional);

    let mut demoted = 0usize;
    let mut relinked = 0usize;
    for member in closure.members() {
        if member.id == survivor.id {
            continue;
        }
        if member.is_primary() {
            demoted += 1;
        } else if member.linked_id == Some(survivor.id) {
            continue;
        } else {
            relinked += 1;
        }
        tx.update_precedence_and_link(member.id, LinkPrecedence::Secondary, Some(survivor.id))
            .await?;
    }

    tracing::info!(
        survivor_id = survivor.id,
        demoted,
        relinked,
        "merged clusters"
    );
    Ok(survivor)
}

fn verify_cluster(cluster: &Closure, survivor: &Contact) -> Result<()> {
    let primaries = cluster.primaries();
    let consistent = match primaries.as_slice() {
        [] => !survivor.is_primary(),
        [only] => only.id == survivor.id,
        _ => false,
    };
    if consistent {
        return Ok(());
    }
    let ids: Vec<_> = primaries.iter().map(|c| c.id).collect();
    tracing::error!(
        survivor_id = survivor.id,
        primaries = ?ids,
        "cluster does not resolve to a single primary"
    );
    Err(ReconcileError::InvariantViolation(format!(
        "cluster of contact {} resolves to primaries {:?}",
        survivor.id, ids
    )))
}
