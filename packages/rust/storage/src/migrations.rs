//! SQL migration definitions for the CRM store.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: systemuser, account, contact, lookup tables",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS systemuser (
    id                   TEXT PRIMARY KEY,
    firstname            TEXT,
    lastname             TEXT,
    internalemailaddress TEXT
);

CREATE INDEX IF NOT EXISTS idx_systemuser_email ON systemuser(internalemailaddress);

-- Lookup tables referenced by name
CREATE TABLE IF NOT EXISTS xv_land (
    id      TEXT PRIMARY KEY,
    xv_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS xv_branche (
    id      TEXT PRIMARY KEY,
    xv_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS xv_firmenklassifizierung (
    id      TEXT PRIMARY KEY,
    xv_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS xv_gattungen (
    id      TEXT PRIMARY KEY,
    xv_name TEXT NOT NULL
);

-- Organizations
CREATE TABLE IF NOT EXISTS account (
    id                       TEXT PRIMARY KEY,
    name                     TEXT NOT NULL,
    websiteurl               TEXT,
    address1_line1           TEXT,
    address1_city            TEXT,
    address1_stateorprovince TEXT,
    address1_country         TEXT,
    address1_postalcode      TEXT,
    xv_land                  TEXT REFERENCES xv_land(id),
    xv_firmenklassifizierung TEXT REFERENCES xv_firmenklassifizierung(id),
    xv_platformid            INTEGER,
    ownerid                  TEXT REFERENCES systemuser(id),
    modifiedby               TEXT,
    createdon                TEXT NOT NULL,
    modifiedon               TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_account_name ON account(name);
CREATE INDEX IF NOT EXISTS idx_account_platformid ON account(xv_platformid);

-- Persons
CREATE TABLE IF NOT EXISTS contact (
    id                       TEXT PRIMARY KEY,
    firstname                TEXT,
    lastname                 TEXT,
    telephone1               TEXT,
    fax                      TEXT,
    mobilephone              TEXT,
    emailaddress1            TEXT,
    websiteurl               TEXT,
    address1_line1           TEXT,
    address1_city            TEXT,
    address1_stateorprovince TEXT,
    address1_country         TEXT,
    address1_postalcode      TEXT,
    xv_land                  TEXT REFERENCES xv_land(id),
    department               TEXT,
    jobtitle                 TEXT,
    birthdate                TEXT,
    xv_salutation            INTEGER,
    description              TEXT,
    parentcustomerid         TEXT REFERENCES account(id),
    xv_platformid            INTEGER,
    ownerid                  TEXT REFERENCES systemuser(id),
    modifiedby               TEXT,
    createdon                TEXT NOT NULL,
    modifiedon               TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_contact_name ON contact(lastname, firstname);
CREATE INDEX IF NOT EXISTS idx_contact_email ON contact(emailaddress1);
CREATE INDEX IF NOT EXISTS idx_contact_parent ON contact(parentcustomerid);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Commerce tables addressed by platform id",
            sql: r#"
CREATE TABLE IF NOT EXISTS pricelevel (
    id   TEXT PRIMARY KEY,
    name TEXT
);

-- Sales orders and opportunities spell the platform id with a double "t".
CREATE TABLE IF NOT EXISTS salesorder (
    id             TEXT PRIMARY KEY,
    name           TEXT,
    customerid     TEXT REFERENCES account(id),
    xv_plattformid INTEGER
);

CREATE TABLE IF NOT EXISTS salesorderdetail (
    id            TEXT PRIMARY KEY,
    salesorderid  TEXT REFERENCES salesorder(id),
    xv_platformid INTEGER
);

CREATE TABLE IF NOT EXISTS opportunity (
    id             TEXT PRIMARY KEY,
    name           TEXT,
    customerid     TEXT REFERENCES account(id),
    xv_plattformid INTEGER
);

CREATE TABLE IF NOT EXISTS opportunityproduct (
    id            TEXT PRIMARY KEY,
    opportunityid TEXT REFERENCES opportunity(id),
    xv_platformid INTEGER
);

CREATE TABLE IF NOT EXISTS xv_platformmessage (
    id            TEXT PRIMARY KEY,
    xv_name       TEXT,
    xv_platformid INTEGER
);

CREATE INDEX IF NOT EXISTS idx_salesorder_platformid ON salesorder(xv_plattformid);
CREATE INDEX IF NOT EXISTS idx_opportunity_platformid ON opportunity(xv_plattformid);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "Quotes and quote details",
            sql: r#"
CREATE TABLE IF NOT EXISTS quote (
    id             TEXT PRIMARY KEY,
    name           TEXT,
    customerid     TEXT REFERENCES account(id),
    xv_plattformid INTEGER
);

CREATE TABLE IF NOT EXISTS quotedetail (
    id            TEXT PRIMARY KEY,
    quoteid       TEXT REFERENCES quote(id),
    xv_platformid INTEGER
);

CREATE INDEX IF NOT EXISTS idx_quote_platformid ON quote(xv_plattformid);

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
    ]
}
