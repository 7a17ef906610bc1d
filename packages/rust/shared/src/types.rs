//! Core domain types: parsed contact records, CRM entities and references.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for store-assigned entity identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generate a new time-sortable identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// EntityKind / EntityRef
// ---------------------------------------------------------------------------

/// CRM entity kinds known to the store, named by their logical names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EntityKind {
    Account,
    Contact,
    SystemUser,
    Country,
    Industry,
    CompanyClassification,
    ProductType,
    PriceLevel,
    SalesOrder,
    SalesOrderDetail,
    Opportunity,
    OpportunityProduct,
    Quote,
    QuoteDetail,
    PlatformMessage,
}

impl EntityKind {
    /// Every kind, in schema order.
    pub const ALL: [EntityKind; 15] = [
        EntityKind::Account,
        EntityKind::Contact,
        EntityKind::SystemUser,
        EntityKind::Country,
        EntityKind::Industry,
        EntityKind::CompanyClassification,
        EntityKind::ProductType,
        EntityKind::PriceLevel,
        EntityKind::SalesOrder,
        EntityKind::SalesOrderDetail,
        EntityKind::Opportunity,
        EntityKind::OpportunityProduct,
        EntityKind::Quote,
        EntityKind::QuoteDetail,
        EntityKind::PlatformMessage,
    ];

    /// The CRM logical name, which is also the store table name.
    pub fn logical_name(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Contact => "contact",
            Self::SystemUser => "systemuser",
            Self::Country => "xv_land",
            Self::Industry => "xv_branche",
            Self::CompanyClassification => "xv_firmenklassifizierung",
            Self::ProductType => "xv_gattungen",
            Self::PriceLevel => "pricelevel",
            Self::SalesOrder => "salesorder",
            Self::SalesOrderDetail => "salesorderdetail",
            Self::Opportunity => "opportunity",
            Self::OpportunityProduct => "opportunityproduct",
            Self::Quote => "quote",
            Self::QuoteDetail => "quotedetail",
            Self::PlatformMessage => "xv_platformmessage",
        }
    }

    /// The attribute holding the external platform identifier, if the kind has one.
    ///
    /// Sales orders, opportunities and quotes spell it `xv_plattformid`
    /// (double "t") in the CRM schema. That spelling is load-bearing.
    pub fn platform_id_attribute(self) -> Option<&'static str> {
        match self {
            Self::SalesOrder | Self::Opportunity | Self::Quote => Some("xv_plattformid"),
            Self::Account
            | Self::Contact
            | Self::SalesOrderDetail
            | Self::OpportunityProduct
            | Self::QuoteDetail
            | Self::PlatformMessage => Some("xv_platformid"),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.logical_name())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.logical_name() == s)
            .ok_or_else(|| format!("unknown entity kind '{s}'"))
    }
}

impl From<EntityKind> for String {
    fn from(kind: EntityKind) -> Self {
        kind.logical_name().to_string()
    }
}

impl TryFrom<String> for EntityKind {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// An opaque (kind, identifier) pair linking entities without embedding them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// The CRM user all writes of one batch are attributed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorIdentity {
    /// System user identifier.
    pub user_id: EntityId,
    /// Email address the actor was resolved from.
    pub email: String,
}

impl ActorIdentity {
    /// Reference to the system user, used as owner of created entities.
    pub fn reference(&self) -> EntityRef {
        EntityRef::new(EntityKind::SystemUser, self.user_id)
    }
}

// ---------------------------------------------------------------------------
// ContactRecord (parsed vCard)
// ---------------------------------------------------------------------------

/// Gender signal carried by a vCard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

/// Telephone number tags relevant to the CRM mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhoneKind {
    Work,
    Fax,
    Cellular,
    Home,
}

/// A telephone number with all of its tags (a number may be both work and fax).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNumber {
    pub number: String,
    #[serde(default)]
    pub kinds: Vec<PhoneKind>,
}

impl PhoneNumber {
    pub fn new(number: impl Into<String>, kinds: &[PhoneKind]) -> Self {
        Self {
            number: number.into(),
            kinds: kinds.to_vec(),
        }
    }

    pub fn is(&self, kind: PhoneKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// Postal address tag. Only work addresses are mapped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Work,
    #[default]
    Other,
}

/// A postal address as found in the vCard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub kind: AddressKind,
    pub street: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

/// One parsed contact card. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub organization: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Gender,
    /// Note fragments in card order.
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default)]
    pub phones: Vec<PhoneNumber>,
    /// Email addresses in card order; the first is primary.
    #[serde(default)]
    pub emails: Vec<String>,
    /// Websites in card order; the first is primary.
    #[serde(default)]
    pub websites: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<PostalAddress>,
    /// Category labels; the first drives company classification.
    #[serde(default)]
    pub categories: Vec<String>,
}

impl ContactRecord {
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    pub fn primary_website(&self) -> Option<&str> {
        self.websites.first().map(String::as_str)
    }

    /// First number carrying `kind`.
    pub fn first_phone(&self, kind: PhoneKind) -> Option<&str> {
        self.phones
            .iter()
            .find(|p| p.is(kind))
            .map(|p| p.number.as_str())
    }

    /// First work-tagged address; other addresses are never mapped.
    pub fn work_address(&self) -> Option<&PostalAddress> {
        self.addresses.iter().find(|a| a.kind == AddressKind::Work)
    }

    pub fn first_category(&self) -> Option<&str> {
        self.categories.first().map(String::as_str)
    }

    /// All note fragments joined by a single space.
    pub fn description(&self) -> String {
        self.notes.join(" ")
    }
}

// ---------------------------------------------------------------------------
// CRM entities
// ---------------------------------------------------------------------------

/// `address1_*` fields shared by accounts and contacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFields {
    pub line1: Option<String>,
    pub city: Option<String>,
    pub state_or_province: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

impl From<Option<&PostalAddress>> for AddressFields {
    fn from(address: Option<&PostalAddress>) -> Self {
        match address {
            Some(a) => Self {
                line1: a.street.clone(),
                city: a.city.clone(),
                state_or_province: a.region.clone(),
                country: a.country.clone(),
                postal_code: a.postal_code.clone(),
            },
            None => Self::default(),
        }
    }
}

/// An `account` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationEntity {
    /// Absent until the store creates the entity.
    pub id: Option<EntityId>,
    /// Always the card's organization text verbatim.
    pub name: String,
    pub website: Option<String>,
    pub address: AddressFields,
    /// `xv_land`
    pub country: Option<EntityRef>,
    /// `xv_firmenklassifizierung`
    pub classification: Option<EntityRef>,
    pub owner: Option<EntityRef>,
}

/// A `contact` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonEntity {
    pub id: Option<EntityId>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// `telephone1`
    pub telephone: Option<String>,
    pub fax: Option<String>,
    pub mobile_phone: Option<String>,
    /// `emailaddress1`
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: AddressFields,
    pub country: Option<EntityRef>,
    pub department: Option<String>,
    pub job_title: Option<String>,
    pub birth_date: Option<NaiveDate>,
    /// `xv_salutation` option value.
    pub salutation: Option<i32>,
    pub description: Option<String>,
    /// `parentcustomerid`
    pub organization: Option<EntityRef>,
    pub owner: Option<EntityRef>,
}

/// A persistable entity: one variant per kind with an explicit field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Organization(OrganizationEntity),
    Person(PersonEntity),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Organization(_) => EntityKind::Account,
            Self::Person(_) => EntityKind::Contact,
        }
    }

    pub fn id(&self) -> Option<EntityId> {
        match self {
            Self::Organization(o) => o.id,
            Self::Person(p) => p.id,
        }
    }
}
