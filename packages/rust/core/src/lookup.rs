//! Name and platform-id resolvers against the CRM store.
//!
//! Every resolver runs one query and classifies the result set into a
//! [`LookupOutcome`]; the match policy is then applied explicitly:
//!
//! | policy | zero matches | several matches |
//! |---|---|---|
//! | exact-required | `NotFound` error | first match |
//! | optional-exact | absent | first match |
//! | exact-or-ambiguous | `NotFound` error | `AmbiguousMatch` error |

use cardsync_shared::{ActorIdentity, CardSyncError, EntityId, EntityKind, EntityRef, Result};
use cardsync_storage::{Condition, EntityStore};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::normalize::normalize_company_name;

/// `xv_firmenklassifizierung` value marking an account as a publisher.
pub const PUBLISHER_CLASSIFICATION: EntityId =
    EntityId(Uuid::from_u128(0xa98e29b5_7b58_e311_9405_00155d028b03));

/// `xv_salutation` for "Hr.", also used for male contacts.
pub const SALUTATION_MALE: i32 = 772_600_000;
/// `xv_salutation` for "Fr.", also used for female contacts.
pub const SALUTATION_FEMALE: i32 = 772_600_001;

const SALUTATIONS: [(&str, i32); 8] = [
    ("Hr.", SALUTATION_MALE),
    ("Fr.", SALUTATION_FEMALE),
    ("Hr. Dr.", 772_600_002),
    ("Fr. Dr.", 772_600_003),
    ("Hr. Prof. Dr.", 772_600_004),
    ("Fr. Prof. Dr.", 772_600_005),
    ("Hr. Prof.", 772_600_006),
    ("Fr. Prof.", 772_600_007),
];

/// Option value for a salutation title such as `"Hr. Dr."`.
pub fn salutation_code(title: &str) -> Option<i32> {
    let title = title.trim();
    SALUTATIONS
        .iter()
        .find(|(t, _)| *t == title)
        .map(|(_, code)| *code)
}

// ---------------------------------------------------------------------------
// LookupOutcome
// ---------------------------------------------------------------------------

/// Classified result of a lookup query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(EntityRef),
    NotFound,
    Ambiguous(usize),
}

impl LookupOutcome {
    /// Classify a full result set; more than one match is ambiguous.
    pub fn from_matches(matches: &[EntityRef]) -> Self {
        match matches {
            [] => Self::NotFound,
            [only] => Self::Found(*only),
            many => Self::Ambiguous(many.len()),
        }
    }

    /// Take the first match, if any. Never ambiguous.
    pub fn first_of(matches: &[EntityRef]) -> Self {
        matches.first().map_or(Self::NotFound, |r| Self::Found(*r))
    }

    /// The reference, if exactly one was found.
    pub fn found(self) -> Option<EntityRef> {
        match self {
            Self::Found(r) => Some(r),
            _ => None,
        }
    }

    /// Turn `NotFound` and `Ambiguous` into their errors.
    pub fn require(self, not_found: impl FnOnce() -> String, term: &str) -> Result<EntityRef> {
        match self {
            Self::Found(r) => Ok(r),
            Self::NotFound => Err(CardSyncError::not_found(not_found())),
            Self::Ambiguous(count) => Err(CardSyncError::ambiguous(count, term)),
        }
    }
}

fn is_publisher() -> Condition {
    Condition::equals("xv_firmenklassifizierung", PUBLISHER_CLASSIFICATION)
}

// ---------------------------------------------------------------------------
// Actor and reference data
// ---------------------------------------------------------------------------

/// Resolve the CRM user writes are attributed to.
#[instrument(skip(store))]
pub async fn actor_by_email(store: &dyn EntityStore, email: &str) -> Result<ActorIdentity> {
    let email = email.trim();
    let matches = store
        .find_by_equals(EntityKind::SystemUser, "internalemailaddress", email)
        .await?;
    let user = LookupOutcome::first_of(&matches)
        .require(|| "User not found in CRM".to_string(), email)?;

    Ok(ActorIdentity {
        user_id: user.id,
        email: email.to_string(),
    })
}

/// Country (`xv_land`) by name; absent for blank or unknown names.
pub async fn country_by_name(
    store: &dyn EntityStore,
    name: Option<&str>,
) -> Result<Option<EntityRef>> {
    optional_by_name(store, EntityKind::Country, name).await
}

/// Industry (`xv_branche`) by name; absent for blank or unknown names.
pub async fn industry_by_name(
    store: &dyn EntityStore,
    name: Option<&str>,
) -> Result<Option<EntityRef>> {
    optional_by_name(store, EntityKind::Industry, name).await
}

async fn optional_by_name(
    store: &dyn EntityStore,
    kind: EntityKind,
    name: Option<&str>,
) -> Result<Option<EntityRef>> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    let matches = store.find_by_equals(kind, "xv_name", name).await?;
    let found = LookupOutcome::first_of(&matches).found();
    if found.is_none() {
        debug!(%kind, name, "no reference data for name");
    }
    Ok(found)
}

/// Company classification (`xv_firmenklassifizierung`) by name.
pub async fn company_classification_by_name(
    store: &dyn EntityStore,
    name: &str,
) -> Result<EntityRef> {
    required_by_name(store, EntityKind::CompanyClassification, "Company classification", name)
        .await
}

/// Product type (`xv_gattungen`) by name.
pub async fn product_type_by_name(store: &dyn EntityStore, name: &str) -> Result<EntityRef> {
    required_by_name(store, EntityKind::ProductType, "Product type", name).await
}

async fn required_by_name(
    store: &dyn EntityStore,
    kind: EntityKind,
    label: &str,
    name: &str,
) -> Result<EntityRef> {
    if name.trim().is_empty() {
        return Err(CardSyncError::validation(format!(
            "{label} name must not be empty"
        )));
    }
    let matches = store.find_by_equals(kind, "xv_name", name).await?;
    LookupOutcome::first_of(&matches).require(|| format!("{label} '{name}' was not found."), name)
}

// ---------------------------------------------------------------------------
// Accounts and users by name
// ---------------------------------------------------------------------------

/// Account with exactly this name.
pub async fn company_by_name(store: &dyn EntityStore, name: &str) -> Result<EntityRef> {
    let matches = store.find_by_equals(EntityKind::Account, "name", name).await?;
    LookupOutcome::from_matches(&matches)
        .require(|| format!("Company '{name}' was not found."), name)
}

/// System user with exactly this first and last name.
pub async fn manager_by_name(
    store: &dyn EntityStore,
    first_name: &str,
    last_name: &str,
) -> Result<EntityRef> {
    let matches = store
        .query(
            EntityKind::SystemUser,
            &[
                Condition::equals("firstname", first_name),
                Condition::equals("lastname", last_name),
            ],
        )
        .await?;
    let full_name = format!("{first_name} {last_name}");
    LookupOutcome::from_matches(&matches)
        .require(|| format!("User '{full_name}' was not found."), &full_name)
}

/// Publisher account by exact name, falling back to a fuzzy prefix search
/// when no publisher carries the name verbatim.
#[instrument(skip(store))]
pub async fn publisher_by_name(store: &dyn EntityStore, name: &str) -> Result<EntityRef> {
    let exact = store
        .query(
            EntityKind::Account,
            &[Condition::equals("name", name), is_publisher()],
        )
        .await?;

    match LookupOutcome::first_of(&exact) {
        LookupOutcome::NotFound => {
            debug!("no exact publisher match, trying fuzzy search");
            publisher_by_name_fuzzy(store, name).await
        }
        outcome => outcome.require(|| format!("Account not found with name: {name}"), name),
    }
}

/// Publisher account whose name starts with the normalized `name`.
pub async fn publisher_by_name_fuzzy(store: &dyn EntityStore, name: &str) -> Result<EntityRef> {
    fuzzy_account(store, name, Some(is_publisher())).await
}

/// Any account whose name starts with the normalized `name`.
pub async fn account_by_name_fuzzy(store: &dyn EntityStore, name: &str) -> Result<EntityRef> {
    fuzzy_account(store, name, None).await
}

async fn fuzzy_account(
    store: &dyn EntityStore,
    name: &str,
    extra: Option<Condition>,
) -> Result<EntityRef> {
    let prefix = normalize_company_name(name);
    let matches = store
        .find_by_prefix(EntityKind::Account, "name", &prefix, extra)
        .await?;
    debug!(name, prefix, matches = matches.len(), "fuzzy account search");
    LookupOutcome::from_matches(&matches)
        .require(|| format!("Account not found with name: {name}"), name)
}

// ---------------------------------------------------------------------------
// Platform ids
// ---------------------------------------------------------------------------

async fn by_platform_id(
    store: &dyn EntityStore,
    kind: EntityKind,
    platform_id: i64,
    not_found: impl FnOnce() -> String,
) -> Result<EntityRef> {
    let attribute = kind.platform_id_attribute().ok_or_else(|| {
        CardSyncError::validation(format!("entity '{kind}' has no platform id"))
    })?;
    let matches = store
        .find_by_equals(kind, attribute, &platform_id.to_string())
        .await?;
    LookupOutcome::first_of(&matches).require(not_found, &platform_id.to_string())
}

pub async fn contact_by_platform_id(store: &dyn EntityStore, platform_id: i64) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::Contact, platform_id, || "Contact not found.".into()).await
}

pub async fn publisher_by_platform_id(
    store: &dyn EntityStore,
    platform_id: i64,
) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::Account, platform_id, || {
        format!("Account not found with platform id: {platform_id}")
    })
    .await
}

pub async fn sales_order_by_platform_id(
    store: &dyn EntityStore,
    platform_id: i64,
) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::SalesOrder, platform_id, || {
        "SalesOrder not found.".into()
    })
    .await
}

pub async fn sales_order_item_by_platform_id(
    store: &dyn EntityStore,
    platform_id: i64,
) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::SalesOrderDetail, platform_id, || {
        "SalesOrderItem not found.".into()
    })
    .await
}

pub async fn opportunity_by_platform_id(
    store: &dyn EntityStore,
    platform_id: i64,
) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::Opportunity, platform_id, || {
        "Opportunity not found.".into()
    })
    .await
}

pub async fn opportunity_item_by_platform_id(
    store: &dyn EntityStore,
    platform_id: i64,
) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::OpportunityProduct, platform_id, || {
        "OpportunityItem not found.".into()
    })
    .await
}

pub async fn quote_by_platform_id(store: &dyn EntityStore, platform_id: i64) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::Quote, platform_id, || "Quote not found.".into()).await
}

pub async fn quote_item_by_platform_id(
    store: &dyn EntityStore,
    platform_id: i64,
) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::QuoteDetail, platform_id, || {
        "QuoteDetail not found.".into()
    })
    .await
}

pub async fn message_by_platform_id(store: &dyn EntityStore, platform_id: i64) -> Result<EntityRef> {
    by_platform_id(store, EntityKind::PlatformMessage, platform_id, || {
        "Message not found.".into()
    })
    .await
}

// ---------------------------------------------------------------------------
// Commerce
// ---------------------------------------------------------------------------

/// Line items of a sales order.
pub async fn sales_order_items(
    store: &dyn EntityStore,
    order: &EntityRef,
) -> Result<Vec<EntityRef>> {
    store
        .find_by_equals(EntityKind::SalesOrderDetail, "salesorderid", &order.id.to_string())
        .await
}

/// Products of an opportunity.
pub async fn opportunity_items(
    store: &dyn EntityStore,
    opportunity: &EntityRef,
) -> Result<Vec<EntityRef>> {
    store
        .find_by_equals(
            EntityKind::OpportunityProduct,
            "opportunityid",
            &opportunity.id.to_string(),
        )
        .await
}

/// Line items of a quote.
pub async fn quote_items(store: &dyn EntityStore, quote: &EntityRef) -> Result<Vec<EntityRef>> {
    store
        .find_by_equals(EntityKind::QuoteDetail, "quoteid", &quote.id.to_string())
        .await
}

/// The first configured price level.
pub async fn standard_price_level(store: &dyn EntityStore) -> Result<EntityRef> {
    let levels = store.query(EntityKind::PriceLevel, &[]).await?;
    LookupOutcome::first_of(&levels).require(|| "No price level configured.".into(), "pricelevel")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingStore, seed_account, seed_actor, seed_named, test_db};

    #[tokio::test]
    async fn company_by_name_policies() {
        let db = test_db().await;
        let session = db.session().unwrap();

        let err = company_by_name(&session, "Acme").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: Company 'Acme' was not found.");

        let only = seed_account(&session, "Acme", None).await;
        let found = company_by_name(&session, "Acme").await.unwrap();
        assert_eq!(found, EntityRef::new(EntityKind::Account, only));

        seed_account(&session, "Acme", None).await;
        let err = company_by_name(&session, "Acme").await.unwrap_err();
        match err {
            CardSyncError::AmbiguousMatch { count, term } => {
                assert_eq!(count, 2);
                assert_eq!(term, "Acme");
            }
            other => panic!("expected ambiguous match, got {other}"),
        }
    }

    #[tokio::test]
    async fn publisher_falls_back_to_fuzzy_prefix() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let publisher =
            seed_account(&session, "Acme International AG", Some(PUBLISHER_CLASSIFICATION)).await;

        let found = publisher_by_name(&session, "Acme International GmbH")
            .await
            .unwrap();
        assert_eq!(found.id, publisher);

        let err = publisher_by_name(&session, "Globex Corp").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn duplicate_exact_publishers_take_the_first() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let first = seed_account(&session, "Acme Books", Some(PUBLISHER_CLASSIFICATION)).await;
        seed_account(&session, "Acme Books", Some(PUBLISHER_CLASSIFICATION)).await;

        let found = publisher_by_name(&session, "Acme Books").await.unwrap();
        assert_eq!(found.id, first);
    }

    #[tokio::test]
    async fn publisher_search_ignores_non_publishers() {
        let db = test_db().await;
        let session = db.session().unwrap();
        seed_account(&session, "Acme International AG", None).await;

        let err = publisher_by_name_fuzzy(&session, "Acme International")
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let any = account_by_name_fuzzy(&session, "Acme International GmbH").await;
        assert!(any.is_ok());
    }

    #[tokio::test]
    async fn fuzzy_search_reports_ambiguity() {
        let db = test_db().await;
        let session = db.session().unwrap();
        seed_account(&session, "Acme Books AG", None).await;
        seed_account(&session, "Acme Books Ltd", None).await;

        let err = account_by_name_fuzzy(&session, "Acme Books GmbH")
            .await
            .unwrap_err();
        assert!(matches!(err, CardSyncError::AmbiguousMatch { count: 2, .. }));
    }

    #[tokio::test]
    async fn country_lookup_is_optional() {
        let db = test_db().await;
        let store = CountingStore::new(db.session().unwrap());
        let germany = seed_named(&store.inner, EntityKind::Country, "Germany").await;

        assert_eq!(country_by_name(&store, None).await.unwrap(), None);
        assert_eq!(country_by_name(&store, Some("  ")).await.unwrap(), None);
        assert_eq!(store.calls(), 0, "blank names must not query");

        assert_eq!(country_by_name(&store, Some("Atlantis")).await.unwrap(), None);
        let found = country_by_name(&store, Some("Germany")).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(germany));
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test]
    async fn industry_lookup_is_optional() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let publishing = seed_named(&session, EntityKind::Industry, "Publishing").await;

        assert_eq!(industry_by_name(&session, Some("")).await.unwrap(), None);
        let found = industry_by_name(&session, Some("Publishing")).await.unwrap();
        assert_eq!(found.map(|r| r.id), Some(publishing));
    }

    #[tokio::test]
    async fn classification_and_product_type_are_required() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let verlag = seed_named(&session, EntityKind::CompanyClassification, "Verlag").await;
        seed_named(&session, EntityKind::ProductType, "Zeitschrift").await;

        let found = company_classification_by_name(&session, "Verlag").await.unwrap();
        assert_eq!(found.id, verlag);

        let err = company_classification_by_name(&session, "Kunde")
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "not found: Company classification 'Kunde' was not found."
        );

        let err = company_classification_by_name(&session, " ").await.unwrap_err();
        assert!(matches!(err, CardSyncError::Validation { .. }));

        assert!(product_type_by_name(&session, "Zeitschrift").await.is_ok());
        assert!(product_type_by_name(&session, "Buch").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn manager_by_name_policies() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let actor = seed_actor(&session, "sam@example.com").await;

        let found = manager_by_name(&session, "Sam", "Sales").await.unwrap();
        assert_eq!(found, actor.reference());

        seed_actor(&session, "sam2@example.com").await;
        let err = manager_by_name(&session, "Sam", "Sales").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "ambiguous match: 2 candidates found for 'Sam Sales'"
        );

        let err = manager_by_name(&session, "Nobody", "Here").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn actor_resolution() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let actor = seed_actor(&session, "sales@example.com").await;

        let resolved = actor_by_email(&session, " sales@example.com ").await.unwrap();
        assert_eq!(resolved, actor);

        let err = actor_by_email(&session, "stranger@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not found: User not found in CRM");
    }

    #[tokio::test]
    async fn platform_ids_use_per_kind_attribute() {
        let db = test_db().await;
        let session = db.session().unwrap();
        let order = session
            .insert_row(EntityKind::SalesOrder, &[("xv_plattformid", "100".into())])
            .await
            .unwrap();
        let order_ref = EntityRef::new(EntityKind::SalesOrder, order);
        let line = session
            .insert_row(
                EntityKind::SalesOrderDetail,
                &[("xv_platformid", "101".into()), ("salesorderid", order.to_string())],
            )
            .await
            .unwrap();
        let opportunity = session
            .insert_row(EntityKind::Opportunity, &[("xv_plattformid", "200".into())])
            .await
            .unwrap();
        let message = session
            .insert_row(EntityKind::PlatformMessage, &[("xv_platformid", "300".into())])
            .await
            .unwrap();

        assert_eq!(sales_order_by_platform_id(&session, 100).await.unwrap(), order_ref);
        assert_eq!(
            sales_order_item_by_platform_id(&session, 101).await.unwrap().id,
            line
        );
        assert_eq!(
            opportunity_by_platform_id(&session, 200).await.unwrap().id,
            opportunity
        );
        assert_eq!(message_by_platform_id(&session, 300).await.unwrap().id, message);

        let quote = session
            .insert_row(EntityKind::Quote, &[("xv_plattformid", "400".into())])
            .await
            .unwrap();
        let quote_ref = EntityRef::new(EntityKind::Quote, quote);
        let quote_line = session
            .insert_row(
                EntityKind::QuoteDetail,
                &[("xv_platformid", "401".into()), ("quoteid", quote.to_string())],
            )
            .await
            .unwrap();
        assert_eq!(quote_by_platform_id(&session, 400).await.unwrap(), quote_ref);
        assert_eq!(
            quote_item_by_platform_id(&session, 401).await.unwrap().id,
            quote_line
        );
        assert_eq!(
            quote_items(&session, &quote_ref).await.unwrap(),
            vec![EntityRef::new(EntityKind::QuoteDetail, quote_line)]
        );
        let err = quote_by_platform_id(&session, 401).await.unwrap_err();
        assert_eq!(err.to_string(), "not found: Quote not found.");
        let err = quote_item_by_platform_id(&session, 400).await.unwrap_err();
        assert_eq!(err.to_string(), "not found: QuoteDetail not found.");

        let items = sales_order_items(&session, &order_ref).await.unwrap();
        assert_eq!(items.len(), 1);

        let err = opportunity_item_by_platform_id(&session, 999).await.unwrap_err();
        assert_eq!(err.to_string(), "not found: OpportunityItem not found.");
        let err = publisher_by_platform_id(&session, 7).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "not found: Account not found with platform id: 7"
        );
        assert!(contact_by_platform_id(&session, 1).await.is_err());
        assert!(
            opportunity_items(&session, &EntityRef::new(EntityKind::Opportunity, opportunity))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn standard_price_level_is_first_row() {
        let db = test_db().await;
        let session = db.session().unwrap();
        assert!(standard_price_level(&session).await.unwrap_err().is_not_found());

        let first = session
            .insert_row(EntityKind::PriceLevel, &[("name", "Standard".into())])
            .await
            .unwrap();
        session
            .insert_row(EntityKind::PriceLevel, &[("name", "Rabatt".into())])
            .await
            .unwrap();
        assert_eq!(standard_price_level(&session).await.unwrap().id, first);
    }

    #[test]
    fn salutation_table() {
        assert_eq!(salutation_code("Hr."), Some(SALUTATION_MALE));
        assert_eq!(salutation_code("Fr. Prof. Dr."), Some(772_600_005));
        assert_eq!(salutation_code(" Hr. Prof. "), Some(772_600_006));
        assert_eq!(salutation_code("Dr."), None);
    }

    #[test]
    fn outcome_classification() {
        let a = EntityRef::new(EntityKind::Account, EntityId::new());
        let b = EntityRef::new(EntityKind::Account, EntityId::new());
        assert_eq!(LookupOutcome::from_matches(&[]), LookupOutcome::NotFound);
        assert_eq!(LookupOutcome::from_matches(&[a]), LookupOutcome::Found(a));
        assert_eq!(LookupOutcome::from_matches(&[a, b]), LookupOutcome::Ambiguous(2));
        assert_eq!(LookupOutcome::first_of(&[a, b]), LookupOutcome::Found(a));
        assert_eq!(
            PUBLISHER_CLASSIFICATION.to_string(),
            "a98e29b5-7b58-e311-9405-00155d028b03"
        );
    }
}
