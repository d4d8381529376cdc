//! Failure handling: store errors abort the whole reconciliation and leave
//! committed state untouched; invalid assertions never reach the store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use identity_core::ports::Result as StoreResult;
use identity_core::{
    Contact, ContactId, ContactStore, ContactTx, IdentityAssertion, IdentityKeys,
    IdentityReconciler, LinkPrecedence, MemoryContactStore, NewContact, ReconcileError,
    StoreError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailAt {
    Never,
    Begin,
    Insert,
    Update,
    Commit,
    /// Never return from `commit`.
    StallCommit,
}

/// Wraps the in-memory store, counting `begin` calls and writes and failing
/// one operation on demand.
struct FaultyStore {
    inner: MemoryContactStore,
    fail_at: FailAt,
    begins: AtomicUsize,
    writes: Arc<AtomicUsize>,
}

impl FaultyStore {
    fn new(inner: MemoryContactStore, fail_at: FailAt) -> Self {
        Self {
            inner,
            fail_at,
            begins: AtomicUsize::new(0),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

fn injected() -> StoreError {
    StoreError::Backend(anyhow::anyhow!("injected failure"))
}

#[async_trait]
impl ContactStore for FaultyStore {
    async fn begin(&self, keys: &IdentityKeys) -> StoreResult<Box<dyn ContactTx>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == FailAt::Begin {
            return Err(injected());
        }
        let inner = self.inner.begin(keys).await?;
        Ok(Box::new(FaultyTx {
            inner,
            fail_at: self.fail_at,
            writes: Arc::clone(&self.writes),
        }))
    }
}

struct FaultyTx {
    inner: Box<dyn ContactTx>,
    fail_at: FailAt,
    writes: Arc<AtomicUsize>,
}

#[async_trait]
impl ContactTx for FaultyTx {
    async fn find_by_email_or_phone(
        &mut self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> StoreResult<Vec<Contact>> {
        self.inner.find_by_email_or_phone(email, phone_number).await
    }

    async fn find_by_linked_id_or_id(
        &mut self,
        linked_id: ContactId,
        id: Option<ContactId>,
    ) -> StoreResult<Vec<Contact>> {
        self.inner.find_by_linked_id_or_id(linked_id, id).await
    }

    async fn lock_contacts(&mut self, ids: &[ContactId]) -> StoreResult<()> {
        self.inner.lock_contacts(ids).await
    }

    async fn insert(&mut self, contact: NewContact) -> StoreResult<Contact> {
        if self.fail_at == FailAt::Insert {
            return Err(injected());
        }
        let row = self.inner.insert(contact).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(row)
    }

    async fn update_precedence_and_link(
        &mut self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> StoreResult<()> {
        if self.fail_at == FailAt::Update {
            return Err(injected());
        }
        self.inner
            .update_precedence_and_link(id, precedence, linked_id)
            .await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        match self.fail_at {
            FailAt::Commit => return Err(injected()),
            FailAt::StallCommit => std::future::pending::<()>().await,
            _ => {}
        }
        self.inner.commit().await
    }
}

fn assertion(email: Option<&str>, phone: Option<&str>) -> IdentityAssertion {
    IdentityAssertion::new(email.map(str::to_string), phone.map(str::to_string))
}

/// Two separate primaries: 1 (a@x.com) and 2 (999).
async fn two_primaries() -> MemoryContactStore {
    let memory = MemoryContactStore::new();
    let reconciler = IdentityReconciler::new(Arc::new(memory.clone()));
    reconciler
        .reconcile(&assertion(Some("a@x.com"), None))
        .await
        .unwrap();
    reconciler
        .reconcile(&assertion(None, Some("999")))
        .await
        .unwrap();
    memory
}

#[tokio::test]
async fn invalid_assertion_never_touches_store() {
    let store = Arc::new(FaultyStore::new(MemoryContactStore::new(), FailAt::Never));
    let reconciler = IdentityReconciler::new(store.clone());

    let err = reconciler
        .reconcile(&IdentityAssertion::new(None, Some(String::new())))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::InvalidAssertion(_)));
    assert_eq!(err.http_status(), 400);
    assert_eq!(store.begins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn begin_failure_propagates_as_store_error() {
    let store = Arc::new(FaultyStore::new(MemoryContactStore::new(), FailAt::Begin));
    let reconciler = IdentityReconciler::new(store);

    let err = reconciler
        .reconcile(&assertion(Some("a@x.com"), None))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Store(StoreError::Backend(_))));
}

#[tokio::test]
async fn insert_failure_leaves_store_empty() {
    let memory = MemoryContactStore::new();
    let store = Arc::new(FaultyStore::new(memory.clone(), FailAt::Insert));
    let reconciler = IdentityReconciler::new(store);

    let err = reconciler
        .reconcile(&assertion(Some("a@x.com"), Some("1")))
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::Store(_)));
    assert!(memory.contacts().await.is_empty());
}

#[tokio::test]
async fn update_failure_rolls_back_merge() {
    let memory = two_primaries().await;
    let before = memory.contacts().await;

    let store = Arc::new(FaultyStore::new(memory.clone(), FailAt::Update));
    let reconciler = IdentityReconciler::new(store);
    let err = reconciler
        .reconcile(&assertion(Some("a@x.com"), Some("999")))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Store(_)));
    assert_eq!(memory.contacts().await, before);
}

#[tokio::test]
async fn commit_failure_discards_every_write() {
    let memory = two_primaries().await;
    let before = memory.contacts().await;

    let store = Arc::new(FaultyStore::new(memory.clone(), FailAt::Commit));
    let reconciler = IdentityReconciler::new(store);
    reconciler
        .reconcile(&assertion(Some("a@x.com"), Some("999")))
        .await
        .unwrap_err();
    reconciler
        .reconcile(&assertion(Some("new@x.com"), None))
        .await
        .unwrap_err();

    assert_eq!(memory.contacts().await, before);
}

#[tokio::test]
async fn cancelled_merge_leaves_no_writes() {
    let memory = two_primaries().await;
    let before = memory.contacts().await;

    let store = Arc::new(FaultyStore::new(memory.clone(), FailAt::StallCommit));
    let reconciler = IdentityReconciler::new(store.clone());
    let pending = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        reconciler.reconcile(&assertion(Some("a@x.com"), Some("999"))),
    )
    .await;

    assert!(pending.is_err());
    // the demotion was written inside the transaction before it stalled
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    assert_eq!(memory.contacts().await, before);
}

#[tokio::test]
async fn cancelled_extension_leaves_no_writes() {
    let memory = two_primaries().await;
    let before = memory.contacts().await;

    let store = Arc::new(FaultyStore::new(memory.clone(), FailAt::StallCommit));
    let reconciler = IdentityReconciler::new(store.clone());
    let pending = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        reconciler.reconcile(&assertion(Some("a@x.com"), Some("123"))),
    )
    .await;

    assert!(pending.is_err());
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    assert_eq!(memory.contacts().await, before);
}
