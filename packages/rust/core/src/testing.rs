//! Fixtures shared by the core test modules.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use cardsync_shared::{
    ActorIdentity, CardSyncError, Entity, EntityId, EntityKind, EntityRef, Result,
};
use cardsync_storage::{Condition, CrmDatabase, CrmSession, EntityStore};
use uuid::Uuid;

/// Create a temp file database for testing.
pub(crate) async fn test_db() -> CrmDatabase {
    let tmp = std::env::temp_dir().join(format!("cs_core_test_{}.db", Uuid::now_v7()));
    CrmDatabase::open(&tmp).await.expect("open test db")
}

/// Insert a system user and return it as an actor.
pub(crate) async fn seed_actor(session: &CrmSession, email: &str) -> ActorIdentity {
    let user_id = session
        .insert_row(
            EntityKind::SystemUser,
            &[
                ("firstname", "Sam".into()),
                ("lastname", "Sales".into()),
                ("internalemailaddress", email.into()),
            ],
        )
        .await
        .expect("insert user");
    ActorIdentity {
        user_id,
        email: email.into(),
    }
}

pub(crate) async fn seed_named(session: &CrmSession, kind: EntityKind, name: &str) -> EntityId {
    session
        .insert_row(kind, &[("xv_name", name.into())])
        .await
        .expect("insert lookup row")
}

pub(crate) async fn seed_account(
    session: &CrmSession,
    name: &str,
    classification: Option<EntityId>,
) -> EntityId {
    let mut values = vec![("name", name.to_string())];
    if let Some(id) = classification {
        values.push(("xv_firmenklassifizierung", id.to_string()));
    }
    session
        .insert_row(EntityKind::Account, &values)
        .await
        .expect("insert account")
}

/// Store wrapper counting every call that reaches the backend.
pub(crate) struct CountingStore<S> {
    pub inner: S,
    calls: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S: EntityStore> EntityStore for CountingStore<S> {
    async fn query(&self, kind: EntityKind, conditions: &[Condition]) -> Result<Vec<EntityRef>> {
        self.tick();
        self.inner.query(kind, conditions).await
    }

    async fn retrieve(&self, reference: &EntityRef) -> Result<Option<Entity>> {
        self.tick();
        self.inner.retrieve(reference).await
    }

    async fn save(&self, entity: &Entity, caller: &ActorIdentity) -> Result<EntityId> {
        self.tick();
        self.inner.save(entity, caller).await
    }
}

/// Store wrapper whose `fail_on`-th `save` (1-based) returns a storage error.
/// Every other call, earlier saves included, reaches the backend.
pub(crate) struct FailingStore<S> {
    pub inner: S,
    fail_on: usize,
    saves: AtomicUsize,
}

impl<S> FailingStore<S> {
    pub fn new(inner: S, fail_on: usize) -> Self {
        Self {
            inner,
            fail_on,
            saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: EntityStore> EntityStore for FailingStore<S> {
    async fn query(&self, kind: EntityKind, conditions: &[Condition]) -> Result<Vec<EntityRef>> {
        self.inner.query(kind, conditions).await
    }

    async fn retrieve(&self, reference: &EntityRef) -> Result<Option<Entity>> {
        self.inner.retrieve(reference).await
    }

    async fn save(&self, entity: &Entity, caller: &ActorIdentity) -> Result<EntityId> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(CardSyncError::Storage("connection reset by peer".into()));
        }
        self.inner.save(entity, caller).await
    }
}
