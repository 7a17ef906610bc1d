//! libSQL-backed CRM entity store.
//!
//! [`CrmDatabase`] owns the database file and applies migrations once on open.
//! Each import batch takes its own [`CrmSession`] (one connection), which
//! implements [`EntityStore`] and is released when dropped.

mod migrations;
pub mod schema;
pub mod store;

use std::path::Path;

use async_trait::async_trait;
use cardsync_shared::{
    ActorIdentity, AddressFields, CardSyncError, Entity, EntityId, EntityKind, EntityRef,
    OrganizationEntity, PersonEntity, Result,
};
use chrono::{NaiveDate, Utc};
use libsql::params::Params;
use libsql::{Connection, Database, Value, params};
use tracing::{debug, instrument};

pub use store::{Condition, ConditionOperator, EntityStore};

/// Persisted account columns, in row order after `id`.
const ACCOUNT_COLUMNS: [&str; 10] = [
    "name",
    "websiteurl",
    "address1_line1",
    "address1_city",
    "address1_stateorprovince",
    "address1_country",
    "address1_postalcode",
    "xv_land",
    "xv_firmenklassifizierung",
    "ownerid",
];

/// Persisted contact columns, in row order after `id`.
const CONTACT_COLUMNS: [&str; 20] = [
    "firstname",
    "lastname",
    "telephone1",
    "fax",
    "mobilephone",
    "emailaddress1",
    "websiteurl",
    "address1_line1",
    "address1_city",
    "address1_stateorprovince",
    "address1_country",
    "address1_postalcode",
    "xv_land",
    "department",
    "jobtitle",
    "birthdate",
    "xv_salutation",
    "description",
    "parentcustomerid",
    "ownerid",
];

fn db_err(e: impl std::fmt::Display) -> CardSyncError {
    CardSyncError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// CrmDatabase
// ---------------------------------------------------------------------------

/// Handle to the CRM database file. Cheap to share; hands out sessions.
pub struct CrmDatabase {
    db: Database,
}

impl CrmDatabase {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CardSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let database = Self { db };
        database.session()?.run_migrations().await?;
        Ok(database)
    }

    /// Open a new session (connection). Dropping the session releases it.
    pub fn session(&self) -> Result<CrmSession> {
        let conn = self.db.connect().map_err(db_err)?;
        Ok(CrmSession { conn })
    }
}

// ---------------------------------------------------------------------------
// CrmSession
// ---------------------------------------------------------------------------

/// One connection to the CRM store, scoped to a batch.
pub struct CrmSession {
    conn: Connection,
}

impl CrmSession {
    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        CardSyncError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Reference data
    // -----------------------------------------------------------------------

    /// Insert a raw row of `kind`. An `id` value is honoured, otherwise a new
    /// identifier is assigned. Used for reference data and seeding.
    pub async fn insert_row(&self, kind: EntityKind, values: &[(&str, String)]) -> Result<EntityId> {
        let mut id = None;
        let mut columns = Vec::new();
        let mut params = Vec::new();

        for (attribute, value) in values {
            schema::check_attribute(kind, attribute)?;
            if *attribute == "id" {
                id = Some(value.parse::<EntityId>().map_err(|e| {
                    CardSyncError::validation(format!("invalid id '{value}': {e}"))
                })?);
                continue;
            }
            columns.push(*attribute);
            params.push(Value::Text(value.clone()));
        }

        if matches!(kind, EntityKind::Account | EntityKind::Contact) {
            let now = Utc::now().to_rfc3339();
            columns.extend(["createdon", "modifiedon"]);
            params.extend([Value::Text(now.clone()), Value::Text(now)]);
        }

        let id = id.unwrap_or_default();
        columns.insert(0, "id");
        params.insert(0, Value::Text(id.to_string()));

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            kind.logical_name(),
            columns.join(", "),
            placeholders(columns.len())
        );
        self.conn
            .execute(&sql, Params::Positional(params))
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Seed reference rows from a JSON object keyed by entity logical name:
    /// `{"xv_land": [{"xv_name": "Germany"}], ...}`. Returns the row count.
    pub async fn seed_from_json(&self, seed: &serde_json::Value) -> Result<usize> {
        let tables = seed
            .as_object()
            .ok_or_else(|| CardSyncError::parse("seed must be a JSON object"))?;

        let mut inserted = 0;
        for (name, rows) in tables {
            let kind: EntityKind = name.parse().map_err(CardSyncError::validation)?;
            let rows = rows.as_array().ok_or_else(|| {
                CardSyncError::parse(format!("seed entry '{name}' must be an array"))
            })?;

            for row in rows {
                let fields = row.as_object().ok_or_else(|| {
                    CardSyncError::parse(format!("rows of '{name}' must be objects"))
                })?;
                let values: Vec<(&str, String)> = fields
                    .iter()
                    .filter_map(|(attr, value)| {
                        let text = match value {
                            serde_json::Value::Null => return None,
                            serde_json::Value::String(s) => s.clone(),
                            serde_json::Value::Bool(b) => u8::from(*b).to_string(),
                            other => other.to_string(),
                        };
                        Some((attr.as_str(), text))
                    })
                    .collect();
                self.insert_row(kind, &values).await?;
                inserted += 1;
            }
        }
        debug!(inserted, "seeded reference data");
        Ok(inserted)
    }

    // -----------------------------------------------------------------------
    // Entity persistence
    // -----------------------------------------------------------------------

    async fn write_row(
        &self,
        kind: EntityKind,
        columns: &[&str],
        id: Option<EntityId>,
        mut values: Vec<Value>,
        caller: &ActorIdentity,
    ) -> Result<EntityId> {
        let table = kind.logical_name();
        let now = Utc::now().to_rfc3339();
        values.push(Value::Text(caller.user_id.to_string()));
        values.push(Value::Text(now.clone()));

        match id {
            None => {
                let id = EntityId::new();
                values.insert(0, Value::Text(id.to_string()));
                values.push(Value::Text(now));
                let sql = format!(
                    "INSERT INTO {table} (id, {}, modifiedby, modifiedon, createdon) VALUES ({})",
                    columns.join(", "),
                    placeholders(values.len())
                );
                self.conn
                    .execute(&sql, Params::Positional(values))
                    .await
                    .map_err(db_err)?;
                debug!(%kind, %id, "created entity");
                Ok(id)
            }
            Some(id) => {
                values.insert(0, Value::Text(id.to_string()));
                let assignments: Vec<String> = columns
                    .iter()
                    .chain(["modifiedby", "modifiedon"].iter())
                    .enumerate()
                    .map(|(i, column)| format!("{column} = ?{}", i + 2))
                    .collect();
                let sql = format!(
                    "UPDATE {table} SET {} WHERE id = ?1",
                    assignments.join(", ")
                );
                let changed = self
                    .conn
                    .execute(&sql, Params::Positional(values))
                    .await
                    .map_err(db_err)?;
                if changed == 0 {
                    return Err(CardSyncError::Storage(format!(
                        "{kind} {id} does not exist"
                    )));
                }
                debug!(%kind, %id, "updated entity");
                Ok(id)
            }
        }
    }

    async fn load_row(&self, kind: EntityKind, columns: &[&str], id: EntityId) -> Result<Option<libsql::Row>> {
        let sql = format!(
            "SELECT id, {} FROM {} WHERE id = ?1",
            columns.join(", "),
            kind.logical_name()
        );
        let mut rows = self
            .conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(db_err)?;
        rows.next().await.map_err(db_err)
    }
}

#[async_trait]
impl EntityStore for CrmSession {
    /// Equality is filtered in SQL. Prefix conditions are compared in Rust on
    /// Unicode-lowercased text, since SQLite `LIKE` only folds ASCII case.
    #[instrument(skip_all, fields(kind = %kind, conditions = conditions.len()))]
    async fn query(&self, kind: EntityKind, conditions: &[Condition]) -> Result<Vec<EntityRef>> {
        let mut columns = vec!["id".to_string()];
        let mut prefixes = Vec::new();
        let mut filters = Vec::new();
        let mut params = Vec::new();

        for condition in conditions {
            schema::check_attribute(kind, &condition.attribute)?;
            match condition.operator {
                ConditionOperator::Equal => {
                    params.push(Value::Text(condition.value.clone()));
                    filters.push(format!("{} = ?{}", condition.attribute, params.len()));
                }
                ConditionOperator::BeginsWith => {
                    columns.push(condition.attribute.clone());
                    prefixes.push(((columns.len() - 1) as i32, condition.value.to_lowercase()));
                }
            }
        }

        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), kind.logical_name());
        if !filters.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filters.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");

        let mut rows = self
            .conn
            .query(&sql, Params::Positional(params))
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let matches = prefixes.iter().all(|(idx, prefix)| {
                opt_text(&row, *idx).is_some_and(|value| value.to_lowercase().starts_with(prefix))
            });
            if matches {
                let id: String = row.get(0).map_err(db_err)?;
                results.push(EntityRef::new(kind, parse_id(&id)?));
            }
        }
        debug!(matches = results.len(), "query finished");
        Ok(results)
    }

    async fn retrieve(&self, reference: &EntityRef) -> Result<Option<Entity>> {
        match reference.kind {
            EntityKind::Account => {
                let row = self
                    .load_row(EntityKind::Account, &ACCOUNT_COLUMNS, reference.id)
                    .await?;
                row.map(|r| row_to_organization(&r).map(Entity::Organization))
                    .transpose()
            }
            EntityKind::Contact => {
                let row = self
                    .load_row(EntityKind::Contact, &CONTACT_COLUMNS, reference.id)
                    .await?;
                row.map(|r| row_to_person(&r).map(Entity::Person))
                    .transpose()
            }
            other => Err(CardSyncError::validation(format!(
                "entity kind '{other}' cannot be retrieved"
            ))),
        }
    }

    async fn save(&self, entity: &Entity, caller: &ActorIdentity) -> Result<EntityId> {
        match entity {
            Entity::Organization(org) => {
                self.write_row(
                    EntityKind::Account,
                    &ACCOUNT_COLUMNS,
                    org.id,
                    organization_values(org),
                    caller,
                )
                .await
            }
            Entity::Person(person) => {
                self.write_row(
                    EntityKind::Contact,
                    &CONTACT_COLUMNS,
                    person.id,
                    person_values(person),
                    caller,
                )
                .await
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Row <-> entity mapping
// ---------------------------------------------------------------------------

fn placeholders(count: usize) -> String {
    (1..=count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_id(value: &str) -> Result<EntityId> {
    value
        .parse()
        .map_err(|e| CardSyncError::Storage(format!("invalid identifier '{value}': {e}")))
}

fn text(value: Option<&str>) -> Value {
    match value {
        Some(v) => Value::Text(v.to_string()),
        None => Value::Null,
    }
}

fn reference(value: Option<&EntityRef>) -> Value {
    match value {
        Some(r) => Value::Text(r.id.to_string()),
        None => Value::Null,
    }
}

fn address_values(address: &AddressFields) -> [Value; 5] {
    [
        text(address.line1.as_deref()),
        text(address.city.as_deref()),
        text(address.state_or_province.as_deref()),
        text(address.country.as_deref()),
        text(address.postal_code.as_deref()),
    ]
}

fn organization_values(org: &OrganizationEntity) -> Vec<Value> {
    let mut values = vec![Value::Text(org.name.clone()), text(org.website.as_deref())];
    values.extend(address_values(&org.address));
    values.extend([
        reference(org.country.as_ref()),
        reference(org.classification.as_ref()),
        reference(org.owner.as_ref()),
    ]);
    values
}

fn person_values(person: &PersonEntity) -> Vec<Value> {
    let mut values = vec![
        text(person.first_name.as_deref()),
        text(person.last_name.as_deref()),
        text(person.telephone.as_deref()),
        text(person.fax.as_deref()),
        text(person.mobile_phone.as_deref()),
        text(person.email.as_deref()),
        text(person.website.as_deref()),
    ];
    values.extend(address_values(&person.address));
    values.extend([
        reference(person.country.as_ref()),
        text(person.department.as_deref()),
        text(person.job_title.as_deref()),
        match person.birth_date {
            Some(date) => Value::Text(date.format("%Y-%m-%d").to_string()),
            None => Value::Null,
        },
        match person.salutation {
            Some(code) => Value::Integer(i64::from(code)),
            None => Value::Null,
        },
        text(person.description.as_deref()),
        reference(person.organization.as_ref()),
        reference(person.owner.as_ref()),
    ]);
    values
}

fn opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

fn opt_ref(row: &libsql::Row, idx: i32, kind: EntityKind) -> Result<Option<EntityRef>> {
    opt_text(row, idx)
        .map(|id| parse_id(&id).map(|id| EntityRef::new(kind, id)))
        .transpose()
}

fn row_address(row: &libsql::Row, first: i32) -> AddressFields {
    AddressFields {
        line1: opt_text(row, first),
        city: opt_text(row, first + 1),
        state_or_province: opt_text(row, first + 2),
        country: opt_text(row, first + 3),
        postal_code: opt_text(row, first + 4),
    }
}

/// Convert an account row (see [`ACCOUNT_COLUMNS`]) to an [`OrganizationEntity`].
fn row_to_organization(row: &libsql::Row) -> Result<OrganizationEntity> {
    let id: String = row.get(0).map_err(db_err)?;
    Ok(OrganizationEntity {
        id: Some(parse_id(&id)?),
        name: row.get::<String>(1).map_err(db_err)?,
        website: opt_text(row, 2),
        address: row_address(row, 3),
        country: opt_ref(row, 8, EntityKind::Country)?,
        classification: opt_ref(row, 9, EntityKind::CompanyClassification)?,
        owner: opt_ref(row, 10, EntityKind::SystemUser)?,
    })
}

/// Convert a contact row (see [`CONTACT_COLUMNS`]) to a [`PersonEntity`].
fn row_to_person(row: &libsql::Row) -> Result<PersonEntity> {
    let id: String = row.get(0).map_err(db_err)?;
    let birth_date = opt_text(row, 16)
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| CardSyncError::Storage(format!("invalid birthdate: {e}")))
        })
        .transpose()?;

    Ok(PersonEntity {
        id: Some(parse_id(&id)?),
        first_name: opt_text(row, 1),
        last_name: opt_text(row, 2),
        telephone: opt_text(row, 3),
        fax: opt_text(row, 4),
        mobile_phone: opt_text(row, 5),
        email: opt_text(row, 6),
        website: opt_text(row, 7),
        address: row_address(row, 8),
        country: opt_ref(row, 13, EntityKind::Country)?,
        department: opt_text(row, 14),
        job_title: opt_text(row, 15),
        birth_date,
        salutation: row.get::<i64>(17).ok().and_then(|v| i32::try_from(v).ok()),
        description: opt_text(row, 18),
        organization: opt_ref(row, 19, EntityKind::Account)?,
        owner: opt_ref(row, 20, EntityKind::SystemUser)?,
    })
}
