use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// A client application using the service. The API key never leaves the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub relying_party_hostname: Option<String>,
    pub relying_party_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Tenant {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            relying_party_hostname: row.try_get("relying_party_hostname")?,
            relying_party_name: row.try_get("relying_party_name")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub application_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            display_name: row.try_get("display_name")?,
            application_id: row.try_get("application_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub display_name: String,
    pub application_id: Option<Uuid>,
}

/// A passkey bound to a user. `user_id` is a plain foreign key; load the owner
/// through the store when it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub id: i64,
    pub user_id: Uuid,
    pub credential_id: String,
    pub user_handle: String,
    pub public_key: Vec<u8>,
    pub signature_count: u64,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub discoverable: bool,
    pub attestation_object: String,
    pub client_data_json: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for UserCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let signature_count: i64 = row.try_get("signature_count")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            credential_id: row.try_get("credential_id")?,
            user_handle: row.try_get("user_handle")?,
            public_key: row.try_get("public_key")?,
            signature_count: u64::try_from(signature_count).map_err(|err| {
                sqlx::Error::ColumnDecode {
                    index: "signature_count".to_string(),
                    source: Box::new(err),
                }
            })?,
            backup_eligible: row.try_get("backup_eligible")?,
            backup_state: row.try_get("backup_state")?,
            discoverable: row.try_get("discoverable")?,
            attestation_object: row.try_get("attestation_object")?,
            client_data_json: row.try_get("client_data_json")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserCredential {
    pub credential_id: String,
    pub user_handle: String,
    pub public_key: Vec<u8>,
    pub signature_count: u64,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub discoverable: bool,
    pub attestation_object: String,
    pub client_data_json: String,
}

/// Values written after a successful assertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialUsage {
    pub signature_count: u64,
    pub backup_state: bool,
    pub last_used_at: DateTime<Utc>,
}
