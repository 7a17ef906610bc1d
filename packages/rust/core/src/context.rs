//! Per-batch store session and impersonated actor.

use cardsync_shared::{ActorIdentity, Result};
use cardsync_storage::EntityStore;
use tracing::info;

use crate::lookup;

/// Everything one import batch needs: the store session it owns and the CRM
/// user all writes are attributed to. Dropping the context releases the
/// session.
pub struct BatchContext<S> {
    store: S,
    actor: ActorIdentity,
}

impl<S: EntityStore> BatchContext<S> {
    /// Resolve the actor for `sender_email` on `store` and open the batch.
    pub async fn begin(store: S, sender_email: &str) -> Result<Self> {
        let actor = lookup::actor_by_email(&store, sender_email).await?;
        info!(actor = %actor.email, user_id = %actor.user_id, "batch opened");
        Ok(Self { store, actor })
    }

    /// Open a batch for an already resolved actor.
    pub fn with_actor(store: S, actor: ActorIdentity) -> Self {
        Self { store, actor }
    }

    pub fn store(&self) -> &dyn EntityStore {
        &self.store
    }

    /// The concrete session, for callers that need more than the store trait.
    pub fn session(&self) -> &S {
        &self.store
    }

    pub fn actor(&self) -> &ActorIdentity {
        &self.actor
    }
}
