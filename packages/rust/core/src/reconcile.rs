//! Contact reconciliation: match or create the account and contact for one
//! parsed vCard and write both back to the CRM.
//!
//! One call walks a fixed sequence of stages (account lookup, account upsert,
//! account save, contact lookup, contact upsert, contact save). Any store
//! error aborts the record at the current stage. An account that was already
//! saved stays saved; a later import finds and reuses it.

use std::fmt;

use cardsync_shared::{
    AddressFields, CardSyncError, ContactRecord, Entity, EntityId, EntityKind, EntityRef, Gender,
    OrganizationEntity, PersonEntity, PhoneKind, Result,
};
use cardsync_storage::{Condition, EntityStore};
use tracing::{debug, info, instrument};

use crate::context::BatchContext;
use crate::lookup::{self, SALUTATION_FEMALE, SALUTATION_MALE};
use crate::normalize::normalize_company_name;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a record was skipped before touching the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingFamilyName,
    MissingGivenName,
    MissingOrganization,
    MissingEmail,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MissingFamilyName => "family name not provided",
            Self::MissingGivenName => "given name not provided",
            Self::MissingOrganization => "organization not provided",
            Self::MissingEmail => "email address not provided",
        })
    }
}

/// Result of reconciling one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Skipped(SkipReason),
    Imported {
        account_id: EntityId,
        account_created: bool,
        contact_id: EntityId,
        contact_created: bool,
    },
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped(reason) => write!(f, "Skipped: {reason}"),
            Self::Imported {
                account_created,
                contact_created,
                ..
            } => {
                let account = if *account_created {
                    "New account created"
                } else {
                    "Existing account updated"
                };
                let contact = if *contact_created {
                    "New contact created"
                } else {
                    "Existing contact updated"
                };
                write!(f, "{account}, {contact}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    OrgLookup,
    OrgUpsert,
    OrgSaved,
    PersonLookup,
    PersonUpsert,
    PersonSaved,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Self::OrgLookup => "org_lookup",
            Self::OrgUpsert => "org_upsert",
            Self::OrgSaved => "org_saved",
            Self::PersonLookup => "person_lookup",
            Self::PersonUpsert => "person_upsert",
            Self::PersonSaved => "person_saved",
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Validated required fields of a record.
struct Required<'a> {
    given_name: &'a str,
    family_name: &'a str,
    organization: &'a str,
    email: &'a str,
}

/// Reconcile one contact record into the CRM.
///
/// Skips (missing required fields) are returned as an outcome and never touch
/// the store. Lookup and store failures are returned as errors.
#[instrument(skip_all, fields(actor = %ctx.actor().email))]
pub async fn reconcile_contact<S: EntityStore>(
    ctx: &BatchContext<S>,
    record: &ContactRecord,
) -> Result<ReconcileOutcome> {
    let required = match validate(record) {
        Ok(required) => required,
        Err(reason) => {
            info!(%reason, "record skipped");
            return Ok(ReconcileOutcome::Skipped(reason));
        }
    };
    let store = ctx.store();

    // Country is resolved once and shared by account and contact.
    let work_address = record.work_address();
    let country = lookup::country_by_name(
        store,
        work_address.and_then(|a| a.country.as_deref()),
    )
    .await?;

    // --- Account ---
    stage(Stage::OrgLookup, required.organization);
    let existing_account = find_account(store, required.organization).await?;

    stage(Stage::OrgUpsert, required.organization);
    let account_created = existing_account.is_none();
    let mut account = match existing_account {
        Some(reference) => load_organization(store, &reference).await?,
        None => OrganizationEntity {
            owner: Some(ctx.actor().reference()),
            ..Default::default()
        },
    };
    let classification = match record.first_category().filter(|c| !c.trim().is_empty()) {
        Some(category) => Some(lookup::company_classification_by_name(store, category).await?),
        None => None,
    };
    map_organization(&mut account, record, country, classification);

    let account_id = store
        .save(&Entity::Organization(account), ctx.actor())
        .await?;
    stage(Stage::OrgSaved, &account_id.to_string());
    let account_ref = EntityRef::new(EntityKind::Account, account_id);

    // --- Contact ---
    stage(Stage::PersonLookup, required.email);
    let existing_contact = find_contact(store, &required, &account_ref).await?;

    stage(Stage::PersonUpsert, required.email);
    let contact_created = existing_contact.is_none();
    let mut person = match existing_contact {
        Some(reference) => load_person(store, &reference).await?,
        None => PersonEntity {
            owner: Some(ctx.actor().reference()),
            ..Default::default()
        },
    };
    map_person(&mut person, record, &required, country);
    person.organization = Some(account_ref);

    let contact_id = store.save(&Entity::Person(person), ctx.actor()).await?;
    stage(Stage::PersonSaved, &contact_id.to_string());

    let outcome = ReconcileOutcome::Imported {
        account_id,
        account_created,
        contact_id,
        contact_created,
    };
    info!(%account_id, %contact_id, %outcome, "record imported");
    Ok(outcome)
}

fn stage(stage: Stage, subject: &str) {
    debug!(stage = stage.as_str(), subject, "reconcile stage");
}

fn validate(record: &ContactRecord) -> std::result::Result<Required<'_>, SkipReason> {
    fn present(value: Option<&str>) -> Option<&str> {
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    Ok(Required {
        family_name: present(record.family_name.as_deref()).ok_or(SkipReason::MissingFamilyName)?,
        given_name: present(record.given_name.as_deref()).ok_or(SkipReason::MissingGivenName)?,
        organization: present(record.organization.as_deref())
            .ok_or(SkipReason::MissingOrganization)?,
        email: present(record.primary_email()).ok_or(SkipReason::MissingEmail)?,
    })
}

/// First account whose name begins with the normalized organization name.
/// No ambiguity check: the first match in store order wins.
async fn find_account(store: &dyn EntityStore, organization: &str) -> Result<Option<EntityRef>> {
    let prefix = normalize_company_name(organization);
    if prefix.is_empty() {
        debug!(organization, "organization normalizes to nothing, not matching");
        return Ok(None);
    }
    let matches = store
        .find_by_prefix(EntityKind::Account, "name", &prefix, None)
        .await?;
    debug!(prefix, matches = matches.len(), "account candidates");
    Ok(matches.first().copied())
}

/// Contact by name within the account, then by primary email.
/// No ambiguity check: the first match in store order wins.
async fn find_contact(
    store: &dyn EntityStore,
    required: &Required<'_>,
    account: &EntityRef,
) -> Result<Option<EntityRef>> {
    let by_name = store
        .query(
            EntityKind::Contact,
            &[
                Condition::equals("firstname", required.given_name),
                Condition::equals("lastname", required.family_name),
                Condition::equals("parentcustomerid", account.id),
            ],
        )
        .await?;
    if let Some(found) = by_name.first() {
        debug!(contact_id = %found.id, "contact matched by name");
        return Ok(Some(*found));
    }

    let by_email = store
        .find_by_equals(EntityKind::Contact, "emailaddress1", required.email)
        .await?;
    if let Some(found) = by_email.first() {
        debug!(contact_id = %found.id, "contact matched by email");
    }
    Ok(by_email.first().copied())
}

async fn load_organization(
    store: &dyn EntityStore,
    reference: &EntityRef,
) -> Result<OrganizationEntity> {
    match store.retrieve(reference).await? {
        Some(Entity::Organization(org)) => Ok(org),
        _ => Err(CardSyncError::Storage(format!(
            "{reference} matched but could not be loaded"
        ))),
    }
}

async fn load_person(store: &dyn EntityStore, reference: &EntityRef) -> Result<PersonEntity> {
    match store.retrieve(reference).await? {
        Some(Entity::Person(person)) => Ok(person),
        _ => Err(CardSyncError::Storage(format!(
            "{reference} matched but could not be loaded"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

// Mapping overwrites every mapped field, on update as on create. A value
// missing from the card clears the stored one.

fn map_organization(
    account: &mut OrganizationEntity,
    record: &ContactRecord,
    country: Option<EntityRef>,
    classification: Option<EntityRef>,
) {
    // Stored as given in the card; only matching uses the normalized form.
    account.name = record.organization.clone().unwrap_or_default();
    account.website = record.primary_website().map(str::to_string);
    account.address = AddressFields::from(record.work_address());
    account.country = country;
    account.classification = classification;
}

fn map_person(
    person: &mut PersonEntity,
    record: &ContactRecord,
    required: &Required<'_>,
    country: Option<EntityRef>,
) {
    let owned = |v: Option<&str>| v.map(str::to_string);

    person.first_name = Some(required.given_name.to_string());
    person.last_name = Some(required.family_name.to_string());
    person.telephone = owned(record.first_phone(PhoneKind::Work));
    person.fax = owned(record.first_phone(PhoneKind::Fax));
    person.mobile_phone = owned(record.first_phone(PhoneKind::Cellular));
    person.email = owned(record.primary_email());
    person.website = owned(record.primary_website());
    person.address = AddressFields::from(record.work_address());
    person.country = country;
    person.department = record.department.clone();
    person.job_title = record.job_title.clone();
    person.birth_date = record.birth_date;
    person.salutation = match record.gender {
        Gender::Male => Some(SALUTATION_MALE),
        Gender::Female => Some(SALUTATION_FEMALE),
        Gender::Unknown => None,
    };
    let description = record.description();
    person.description = (!description.is_empty()).then_some(description);
}
