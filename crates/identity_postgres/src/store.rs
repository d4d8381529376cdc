//! Postgres implementation of the contact store ports.
//!
//! All SQL is runtime-checked (sqlx::query, not sqlx::query!) to avoid a
//! compile-time database requirement.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use strum::{AsRefStr, Display, EnumString};

use identity_core::error::StoreError;
use identity_core::ports::{ContactStore, ContactTx, Result};
use identity_core::types::{Contact, ContactId, IdentityKeys, LinkPrecedence, NewContact};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id              BIGSERIAL PRIMARY KEY,
        email           TEXT,
        phone_number    TEXT,
        linked_id       BIGINT REFERENCES contacts(id),
        link_precedence TEXT NOT NULL CHECK (link_precedence IN ('primary', 'secondary')),
        created_at      TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
        CHECK ((link_precedence = 'primary') = (linked_id IS NULL))
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email)",
    "CREATE INDEX IF NOT EXISTS idx_contacts_phone_number ON contacts(phone_number)",
    "CREATE INDEX IF NOT EXISTS idx_contacts_linked_id ON contacts(linked_id)",
];

/// Transaction isolation for one reconciliation.
///
/// Under `ReadCommitted` the advisory key locks and closure row locks fully
/// serialize overlapping reconciliations. The stricter levels take their
/// snapshot before those locks are granted, so a reconciliation that waited
/// on one fails with `StoreError::Conflict` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn set_transaction_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

// ── Row mapping ───────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct PgContactRow {
    id: i64,
    email: Option<String>,
    phone_number: Option<String>,
    linked_id: Option<i64>,
    link_precedence: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgContactRow> for Contact {
    type Error = String;

    fn try_from(row: PgContactRow) -> std::result::Result<Self, Self::Error> {
        let link_precedence = row
            .link_precedence
            .parse::<LinkPrecedence>()
            .map_err(|_| {
                format!(
                    "contact {} has unknown link_precedence '{}'",
                    row.id, row.link_precedence
                )
            })?;
        Ok(Contact {
            id: row.id,
            email: row.email,
            phone_number: row.phone_number,
            linked_id: row.linked_id,
            link_precedence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode(rows: Vec<PgContactRow>) -> Result<Vec<Contact>> {
    rows.into_iter()
        .map(|r| {
            Contact::try_from(r).map_err(|e| StoreError::Backend(anyhow!(e)))
        })
        .collect()
}

/// Serialization failures and deadlocks become `Conflict`; everything else
/// is an opaque backend error.
fn store_error(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error() {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            return StoreError::Conflict(db.message().to_string());
        }
    }
    StoreError::Backend(anyhow!(e))
}

// ── PgContactStore ────────────────────────────────────────────

/// Postgres-backed contact store.
#[derive(Clone)]
pub struct PgContactStore {
    pool: PgPool,
    isolation: IsolationLevel,
}

impl PgContactStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            isolation: IsolationLevel::default(),
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `contacts` table and its lookup indexes if missing.
    pub async fn initialize_schema(&self) -> std::result::Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("contacts schema ready");
        Ok(())
    }
}

#[async_trait]
impl ContactStore for PgContactStore {
    async fn begin(&self, keys: &IdentityKeys) -> Result<Box<dyn ContactTx>> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        sqlx::query(self.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        // Ascending order, so overlapping assertions never deadlock on each other.
        let lock_ids = keys.lock_ids();
        for lock_id in &lock_ids {
            sqlx::query("SELECT pg_advisory_xact_lock($1)")
                .bind(lock_id)
                .execute(&mut *tx)
                .await
                .map_err(store_error)?;
        }
        tracing::debug!(
            isolation = %self.isolation,
            locks = lock_ids.len(),
            "contact transaction opened"
        );

        Ok(Box::new(PgContactTx { tx }))
    }
}

struct PgContactTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ContactTx for PgContactTx {
    async fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> Result<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, PgContactRow>(
            r#"
            SELECT id, email, phone_number, linked_id, link_precedence,
                   created_at, updated_at
            FROM contacts
            WHERE email = $1::text
               OR phone_number = $2::text
            ORDER BY created_at, id
            "#,
        )
        .bind(email)
        .bind(phone_number)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_error)?;
        decode(rows)
    }

    async fn find_by_linked_id_or_id(
        &mut self,
        linked_id: ContactId,
        id: Option<ContactId>,
    ) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, PgContactRow>(
            r#"
            SELECT id, email, phone_number, linked_id, link_precedence,
                   created_at, updated_at
            FROM contacts
            WHERE linked_id = $1
               OR id = $2::bigint
            ORDER BY created_at, id
            "#,
        )
        .bind(linked_id)
        .bind(id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(store_error)?;
        decode(rows)
    }

    async fn lock_contacts(&mut self, ids: &[ContactId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        // Ascending id order, matching every other locker.
        sqlx::query(
            r#"
            SELECT id
            FROM contacts
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(ids)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn insert(&mut self, contact: NewContact) -> Result<Contact> {
        let row = sqlx::query_as::<_, PgContactRow>(
            r#"
            INSERT INTO contacts (email, phone_number, link_precedence, linked_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, phone_number, linked_id, link_precedence,
                      created_at, updated_at
            "#,
        )
        .bind(&contact.email)
        .bind(&contact.phone_number)
        .bind(contact.link_precedence.as_ref())
        .bind(contact.linked_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(store_error)?;
        Contact::try_from(row).map_err(|e| StoreError::Backend(anyhow!(e)))
    }

    async fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET link_precedence = $2,
                linked_id = $3,
                updated_at = clock_timestamp()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(precedence.as_ref())
        .bind(linked_id)
        .execute(&mut *self.tx)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(store_error)
    }
}
