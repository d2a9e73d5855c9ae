//! Persistence for tenants, users and their passkeys.
//!
//! The ceremony flows only talk to the [`Store`] trait. Two backends exist:
//! [`PgStore`] for PostgreSQL and [`MemoryStore`] for tests and local runs.
//! Both enforce the same uniqueness rules: one user per name, and one
//! credential id per user handle.

pub mod memory;
pub mod models;
pub mod postgres;

pub use memory::MemoryStore;
pub use models::*;
pub use postgres::PgStore;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use uuid::Uuid;

/// Constraint guarding `users.name`.
pub const USERS_NAME_CONSTRAINT: &str = "users_name_key";
/// Constraint guarding `(user_handle, credential_id)`.
pub const CREDENTIALS_HANDLE_ID_CONSTRAINT: &str = "user_credentials_handle_credential_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_unique_violation_of(&self, constraint: &str) -> bool {
        matches!(self, Self::UniqueViolation(name) if name == constraint)
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve the tenant owning `api_key`.
    async fn find_tenant_by_api_key(
        &self,
        api_key: &SecretString,
    ) -> Result<Option<Tenant>, StoreError>;

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError>;

    /// The user owning any credential with `user_handle`.
    async fn find_user_by_user_handle(&self, user_handle: &str)
        -> Result<Option<User>, StoreError>;

    /// Oldest credential of the user called `name`.
    async fn first_credential_for_username(
        &self,
        name: &str,
    ) -> Result<Option<UserCredential>, StoreError>;

    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<UserCredential>, StoreError>;

    async fn credentials_for_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Vec<UserCredential>, StoreError>;

    async fn find_credential(
        &self,
        user_handle: &str,
        credential_id: &str,
    ) -> Result<Option<UserCredential>, StoreError>;

    /// Insert a user and its first credential as one unit.
    ///
    /// # Errors
    /// Returns `UniqueViolation` if the name or credential already exists; nothing is written.
    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: NewUserCredential,
    ) -> Result<User, StoreError>;

    /// Attach another credential to an existing user.
    async fn add_credential(
        &self,
        user_id: Uuid,
        credential: NewUserCredential,
    ) -> Result<UserCredential, StoreError>;

    /// Returns `false` when no credential matched.
    async fn update_credential_usage(
        &self,
        user_handle: &str,
        credential_id: &str,
        usage: CredentialUsage,
    ) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
