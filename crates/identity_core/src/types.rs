use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display, EnumString};

// ── Scalar aliases ────────────────────────────────────────────

/// Store-assigned contact identifier. Monotonic, so it doubles as a
/// recency tie-break when two rows share a `created_at`.
pub type ContactId = i64;

// ── Contact ───────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkPrecedence {
    Primary,
    Secondary,
}

/// A persisted contact row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Set only on secondaries; points at the cluster primary.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Ordering key for precedence decisions: older wins, lower id breaks ties.
    pub fn precedence_key(&self) -> (DateTime<Utc>, ContactId) {
        (self.created_at, self.id)
    }
}

/// Insert payload. The store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub link_precedence: LinkPrecedence,
    pub linked_id: Option<ContactId>,
}

impl NewContact {
    pub fn primary(assertion: &IdentityAssertion) -> Self {
        Self {
            email: assertion.email.clone(),
            phone_number: assertion.phone_number.clone(),
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
        }
    }

    pub fn secondary_of(assertion: &IdentityAssertion, primary_id: ContactId) -> Self {
        Self {
            email: assertion.email.clone(),
            phone_number: assertion.phone_number.clone(),
            link_precedence: LinkPrecedence::Secondary,
            linked_id: Some(primary_id),
        }
    }
}

// ── Assertion ─────────────────────────────────────────────────

/// A partial identity submission. Empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityAssertion {
    email: Option<String>,
    phone_number: Option<String>,
}

impl IdentityAssertion {
    pub fn new(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email: email.filter(|e| !e.is_empty()),
            phone_number: phone_number.filter(|p| !p.is_empty()),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone_number.is_none()
    }

    pub fn keys(&self) -> IdentityKeys {
        let mut keys = Vec::with_capacity(2);
        if let Some(email) = &self.email {
            keys.push(format!("email:{email}"));
        }
        if let Some(phone) = &self.phone_number {
            keys.push(format!("phone:{phone}"));
        }
        IdentityKeys { keys }
    }
}

/// Namespaced identity values of one assertion, used by stores to
/// serialize reconciliations that touch the same email or phone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityKeys {
    keys: Vec<String>,
}

impl IdentityKeys {
    pub fn as_slice(&self) -> &[String] {
        &self.keys
    }

    /// 64-bit advisory lock ids, sorted ascending and deduplicated so that
    /// every caller acquires overlapping locks in the same order.
    pub fn lock_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.keys.iter().map(|k| lock_id(k)).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

fn lock_id(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

// ── Consolidated identity ─────────────────────────────────────

/// The reconciled view of one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

impl ConsolidatedIdentity {
    /// Build the response for a cluster. `members` is in discovery order;
    /// the primary's own email and phone are always listed first.
    pub fn from_cluster(primary: &Contact, members: &[Contact]) -> Self {
        Self {
            primary_contact_id: primary.id,
            emails: ordered_values(
                primary.email.as_deref(),
                members.iter().map(|c| c.email.as_deref()),
            ),
            phone_numbers: ordered_values(
                primary.phone_number.as_deref(),
                members.iter().map(|c| c.phone_number.as_deref()),
            ),
            secondary_contact_ids: members
                .iter()
                .filter(|c| c.link_precedence == LinkPrecedence::Secondary && c.id != primary.id)
                .map(|c| c.id)
                .collect(),
        }
    }
}

fn ordered_values<'a>(
    first: Option<&'a str>,
    rest: impl Iterator<Item = Option<&'a str>>,
) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(rest.flatten())
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .map(str::to_string)
        .collect()
}
