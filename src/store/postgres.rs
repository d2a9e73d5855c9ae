use super::{
    CredentialUsage, NewUser, NewUserCredential, Store, StoreError, Tenant, User, UserCredential,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{Connection, PgPool};
use tracing::{instrument, Instrument};
use uuid::Uuid;

const CREDENTIAL_COLUMNS: &str = r"
    uc.id, uc.user_id, uc.credential_id, uc.user_handle, uc.public_key, uc.signature_count,
    uc.backup_eligible, uc.backup_state, uc.discoverable, uc.attestation_object,
    uc.client_data_json, uc.created_at, uc.last_used_at
";

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_db_count(count: u64) -> Result<i64, StoreError> {
    i64::try_from(count).map_err(|err| {
        StoreError::Database(sqlx::Error::Encode(Box::new(err)))
    })
}

/// Map unique violations to `StoreError::UniqueViolation` carrying the constraint name.
fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation(db_err.constraint().unwrap_or_default().to_string());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip_all)]
    async fn find_tenant_by_api_key(
        &self,
        api_key: &SecretString,
    ) -> Result<Option<Tenant>, StoreError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r"
            SELECT id, name, relying_party_hostname, relying_party_name, created_at, updated_at
            FROM applications
            WHERE api_key = $1
            ",
        )
        .bind(api_key.expose_secret())
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, display_name, application_id, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, display_name, application_id, created_at FROM users WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r"
            SELECT u.id, u.name, u.display_name, u.application_id, u.created_at
            FROM users u
            JOIN user_credentials uc ON uc.user_id = u.id
            WHERE uc.user_handle = $1
            LIMIT 1
            ",
        )
        .bind(user_handle)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn first_credential_for_username(
        &self,
        name: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let query = format!(
            r"
            SELECT {CREDENTIAL_COLUMNS}
            FROM user_credentials uc
            JOIN users u ON u.id = uc.user_id
            WHERE u.name = $1
            ORDER BY uc.id ASC
            LIMIT 1
            "
        );
        let credential = sqlx::query_as::<_, UserCredential>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(credential)
    }

    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<UserCredential>, StoreError> {
        let query = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM user_credentials uc WHERE uc.user_id = $1 ORDER BY uc.id ASC"
        );
        let credentials = sqlx::query_as::<_, UserCredential>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(credentials)
    }

    async fn credentials_for_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Vec<UserCredential>, StoreError> {
        let query = format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM user_credentials uc WHERE uc.user_handle = $1 ORDER BY uc.id ASC"
        );
        let credentials = sqlx::query_as::<_, UserCredential>(&query)
            .bind(user_handle)
            .fetch_all(&self.pool)
            .await?;
        Ok(credentials)
    }

    async fn find_credential(
        &self,
        user_handle: &str,
        credential_id: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let query = format!(
            r"
            SELECT {CREDENTIAL_COLUMNS}
            FROM user_credentials uc
            WHERE uc.user_handle = $1 AND uc.credential_id = $2
            "
        );
        let credential = sqlx::query_as::<_, UserCredential>(&query)
            .bind(user_handle)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(credential)
    }

    #[instrument(skip_all, fields(user.name = %user.name))]
    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: NewUserCredential,
    ) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (id, name, display_name, application_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, name, display_name, application_id, created_at
            ",
        )
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.display_name)
        .bind(user.application_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        insert_credential(&mut tx, created.id, &credential).await?;

        tx.commit().await?;

        Ok(created)
    }

    #[instrument(skip_all, fields(user.id = %user_id))]
    async fn add_credential(
        &self,
        user_id: Uuid,
        credential: NewUserCredential,
    ) -> Result<UserCredential, StoreError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::UserNotFound(user_id));
        }

        let stored = insert_credential(&mut tx, user_id, &credential).await?;

        tx.commit().await?;

        Ok(stored)
    }

    async fn update_credential_usage(
        &self,
        user_handle: &str,
        credential_id: &str,
        usage: CredentialUsage,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE user_credentials
            SET signature_count = $1, last_used_at = $2, backup_state = $3
            WHERE user_handle = $4 AND credential_id = $5
            ",
        )
        .bind(to_db_count(usage.signature_count)?)
        .bind(usage.last_used_at)
        .bind(usage.backup_state)
        .bind(user_handle)
        .bind(credential_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self.pool.acquire().instrument(acquire_span).await?;
        let ping_span =
            tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping().instrument(ping_span).await?;
        Ok(())
    }
}

async fn insert_credential(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    credential: &NewUserCredential,
) -> Result<UserCredential, StoreError> {
    let query = format!(
        r"
        INSERT INTO user_credentials AS uc (
            user_id, credential_id, user_handle, public_key, signature_count,
            backup_eligible, backup_state, discoverable, attestation_object, client_data_json
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {CREDENTIAL_COLUMNS}
        "
    );
    sqlx::query_as::<_, UserCredential>(&query)
        .bind(user_id)
        .bind(&credential.credential_id)
        .bind(&credential.user_handle)
        .bind(&credential.public_key)
        .bind(to_db_count(credential.signature_count)?)
        .bind(credential.backup_eligible)
        .bind(credential.backup_state)
        .bind(credential.discoverable)
        .bind(&credential.attestation_object)
        .bind(&credential.client_data_json)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_insert_error)
}
