//! The entity store contract consumed by the reconciliation core.
//!
//! Queries are conjunctions of [`Condition`]s over named attributes of one
//! [`EntityKind`]; results are references in store insertion order.

use async_trait::async_trait;
use cardsync_shared::{ActorIdentity, Entity, EntityId, EntityKind, EntityRef, Result};

/// Comparison applied by a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    /// Exact equality.
    Equal,
    /// Case-insensitive "starts with".
    BeginsWith,
}

/// One attribute filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub attribute: String,
    pub operator: ConditionOperator,
    pub value: String,
}

impl Condition {
    pub fn equals(attribute: impl Into<String>, value: impl ToString) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::Equal,
            value: value.to_string(),
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: ConditionOperator::BeginsWith,
            value: prefix.into(),
        }
    }
}

/// CRUD and filtered lookup against the CRM.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// All entities of `kind` matching every condition, in insertion order.
    async fn query(&self, kind: EntityKind, conditions: &[Condition]) -> Result<Vec<EntityRef>>;

    /// Load a full account or contact. `None` if the identifier is unknown.
    async fn retrieve(&self, reference: &EntityRef) -> Result<Option<Entity>>;

    /// Create (no identifier yet) or update the entity, attributing the write
    /// to `caller`. Returns the entity's identifier.
    async fn save(&self, entity: &Entity, caller: &ActorIdentity) -> Result<EntityId>;

    async fn find_by_equals(
        &self,
        kind: EntityKind,
        attribute: &str,
        value: &str,
    ) -> Result<Vec<EntityRef>> {
        self.query(kind, &[Condition::equals(attribute, value)])
            .await
    }

    async fn find_by_prefix(
        &self,
        kind: EntityKind,
        attribute: &str,
        prefix: &str,
        extra_equals: Option<Condition>,
    ) -> Result<Vec<EntityRef>> {
        let mut conditions = vec![Condition::begins_with(attribute, prefix)];
        conditions.extend(extra_equals);
        self.query(kind, &conditions).await
    }
}

#[async_trait]
impl<T: EntityStore + ?Sized> EntityStore for &T {
    async fn query(&self, kind: EntityKind, conditions: &[Condition]) -> Result<Vec<EntityRef>> {
        (**self).query(kind, conditions).await
    }

    async fn retrieve(&self, reference: &EntityRef) -> Result<Option<Entity>> {
        (**self).retrieve(reference).await
    }

    async fn save(&self, entity: &Entity, caller: &ActorIdentity) -> Result<EntityId> {
        (**self).save(entity, caller).await
    }
}
