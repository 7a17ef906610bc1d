//! Attribute whitelist per entity kind.
//!
//! Query and insert SQL is only ever built from names listed here.

use cardsync_shared::{CardSyncError, EntityKind, Result};

const ADDRESS_ATTRIBUTES: [&str; 5] = [
    "address1_line1",
    "address1_city",
    "address1_stateorprovince",
    "address1_country",
    "address1_postalcode",
];

/// Attributes of `kind` that may appear in conditions or seeded rows.
pub fn attributes(kind: EntityKind) -> Vec<&'static str> {
    let mut attrs = vec!["id"];
    match kind {
        EntityKind::Account => {
            attrs.extend(["name", "websiteurl"]);
            attrs.extend(ADDRESS_ATTRIBUTES);
            attrs.extend(["xv_land", "xv_firmenklassifizierung", "ownerid"]);
        }
        EntityKind::Contact => {
            attrs.extend([
                "firstname",
                "lastname",
                "telephone1",
                "fax",
                "mobilephone",
                "emailaddress1",
                "websiteurl",
            ]);
            attrs.extend(ADDRESS_ATTRIBUTES);
            attrs.extend([
                "xv_land",
                "department",
                "jobtitle",
                "birthdate",
                "xv_salutation",
                "description",
                "parentcustomerid",
                "ownerid",
            ]);
        }
        EntityKind::SystemUser => {
            attrs.extend(["firstname", "lastname", "internalemailaddress"]);
        }
        EntityKind::Country
        | EntityKind::Industry
        | EntityKind::CompanyClassification
        | EntityKind::ProductType
        | EntityKind::PlatformMessage => attrs.push("xv_name"),
        EntityKind::PriceLevel => attrs.push("name"),
        EntityKind::SalesOrder | EntityKind::Opportunity | EntityKind::Quote => {
            attrs.extend(["name", "customerid"]);
        }
        EntityKind::SalesOrderDetail => attrs.push("salesorderid"),
        EntityKind::OpportunityProduct => attrs.push("opportunityid"),
        EntityKind::QuoteDetail => attrs.push("quoteid"),
    }
    attrs.extend(kind.platform_id_attribute());
    attrs
}

/// Reject attribute names that are not columns of `kind`.
pub fn check_attribute(kind: EntityKind, attribute: &str) -> Result<()> {
    if attributes(kind).contains(&attribute) {
        Ok(())
    } else {
        Err(CardSyncError::validation(format!(
            "unknown attribute '{attribute}' on entity '{kind}'"
        )))
    }
}
