//! Credential store adapter.
//!
//! [`CredentialLookup`] is the read surface the ceremony verifier consults.
//! [`CredentialRepository`] implements it over a [`Store`] and also carries
//! the write path the flows use once a ceremony succeeds.

use crate::store::{
    CredentialUsage, NewUser, NewUserCredential, Store, StoreError, User, UserCredential,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Transport advertised for stored credentials.
pub const INTERNAL_TRANSPORT: &str = "internal";

/// A credential id with the transports a client may use to reach it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    pub id: String,
    pub transports: Vec<String>,
}

impl CredentialDescriptor {
    #[must_use]
    pub fn internal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transports: vec![INTERNAL_TRANSPORT.to_string()],
        }
    }
}

/// A stored credential as the verifier needs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredKey {
    pub credential_id: String,
    pub user_handle: String,
    pub public_key: Vec<u8>,
    pub signature_count: u64,
    pub backup_eligible: bool,
    pub backup_state: bool,
}

impl From<UserCredential> for RegisteredKey {
    fn from(credential: UserCredential) -> Self {
        Self {
            credential_id: credential.credential_id,
            user_handle: credential.user_handle,
            public_key: credential.public_key,
            signature_count: credential.signature_count,
            backup_eligible: credential.backup_eligible,
            backup_state: credential.backup_state,
        }
    }
}

/// Lookups used during verification. Matches are exact and case-sensitive;
/// absence is an empty result, storage faults are errors.
#[async_trait]
pub trait CredentialLookup: Send + Sync {
    async fn credential_ids_for_username(
        &self,
        username: &str,
    ) -> Result<Vec<CredentialDescriptor>, StoreError>;

    async fn user_handle_for_username(&self, username: &str) -> Result<Option<String>, StoreError>;

    async fn username_for_user_handle(&self, user_handle: &str)
        -> Result<Option<String>, StoreError>;

    async fn lookup(
        &self,
        user_handle: &str,
        credential_id: &str,
    ) -> Result<Option<RegisteredKey>, StoreError>;

    async fn lookup_all(&self, user_handle: &str) -> Result<Vec<RegisteredKey>, StoreError>;
}

#[derive(Clone)]
pub struct CredentialRepository {
    store: Arc<dyn Store>,
}

impl CredentialRepository {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.store.find_user(user_id).await
    }

    pub async fn user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.store.find_user_by_name(name).await
    }

    pub async fn user_for_handle(&self, user_handle: &str) -> Result<Option<User>, StoreError> {
        self.store.find_user_by_user_handle(user_handle).await
    }

    pub async fn credentials_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<UserCredential>, StoreError> {
        self.store.credentials_for_user(user_id).await
    }

    /// Create a user together with its first credential.
    ///
    /// # Errors
    /// Unique violations carry the constraint name, see [`StoreError`].
    pub async fn save_new_account(
        &self,
        user: NewUser,
        credential: NewUserCredential,
    ) -> Result<User, StoreError> {
        self.store.create_user_with_credential(user, credential).await
    }

    pub async fn attach_credential(
        &self,
        user_id: Uuid,
        credential: NewUserCredential,
    ) -> Result<UserCredential, StoreError> {
        self.store.add_credential(user_id, credential).await
    }

    /// Write counter, backup state and last use for one credential.
    /// Returns `false` if the credential no longer exists.
    pub async fn record_usage(
        &self,
        user_handle: &str,
        credential_id: &str,
        usage: CredentialUsage,
    ) -> Result<bool, StoreError> {
        self.store
            .update_credential_usage(user_handle, credential_id, usage)
            .await
    }
}

#[async_trait]
impl CredentialLookup for CredentialRepository {
    async fn credential_ids_for_username(
        &self,
        username: &str,
    ) -> Result<Vec<CredentialDescriptor>, StoreError> {
        let Some(user) = self.store.find_user_by_name(username).await? else {
            return Ok(Vec::new());
        };
        Ok(self
            .store
            .credentials_for_user(user.id)
            .await?
            .into_iter()
            .map(|credential| CredentialDescriptor::internal(credential.credential_id))
            .collect())
    }

    async fn user_handle_for_username(&self, username: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .first_credential_for_username(username)
            .await?
            .map(|credential| credential.user_handle))
    }

    async fn username_for_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .find_user_by_user_handle(user_handle)
            .await?
            .map(|user| user.name))
    }

    async fn lookup(
        &self,
        user_handle: &str,
        credential_id: &str,
    ) -> Result<Option<RegisteredKey>, StoreError> {
        Ok(self
            .store
            .find_credential(user_handle, credential_id)
            .await?
            .map(RegisteredKey::from))
    }

    async fn lookup_all(&self, user_handle: &str) -> Result<Vec<RegisteredKey>, StoreError> {
        Ok(self
            .store
            .credentials_for_user_handle(user_handle)
            .await?
            .into_iter()
            .map(RegisteredKey::from)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;

    fn credential(handle: &str, id: &str) -> NewUserCredential {
        NewUserCredential {
            credential_id: id.to_string(),
            user_handle: handle.to_string(),
            public_key: id.as_bytes().to_vec(),
            signature_count: 7,
            backup_eligible: true,
            backup_state: false,
            discoverable: true,
            attestation_object: "attestation".to_string(),
            client_data_json: "client-data".to_string(),
        }
    }

    async fn repository_with_alice() -> Result<(CredentialRepository, User)> {
        let repository = CredentialRepository::new(Arc::new(MemoryStore::new()));
        let alice = repository
            .save_new_account(
                NewUser {
                    name: "alice".to_string(),
                    display_name: "Alice".to_string(),
                    application_id: None,
                },
                credential("handle-a", "cred-1"),
            )
            .await?;
        repository
            .attach_credential(alice.id, credential("handle-a", "cred-2"))
            .await?;
        Ok((repository, alice))
    }

    #[tokio::test]
    async fn descriptors_list_every_credential_as_internal() -> Result<()> {
        let (repository, _) = repository_with_alice().await?;
        let descriptors = repository.credential_ids_for_username("alice").await?;
        assert_eq!(
            descriptors,
            vec![
                CredentialDescriptor::internal("cred-1"),
                CredentialDescriptor::internal("cred-2"),
            ]
        );
        assert!(repository.credential_ids_for_username("bob").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn handle_and_username_resolve_both_ways() -> Result<()> {
        let (repository, _) = repository_with_alice().await?;
        assert_eq!(
            repository.user_handle_for_username("alice").await?,
            Some("handle-a".to_string())
        );
        assert_eq!(
            repository.username_for_user_handle("handle-a").await?,
            Some("alice".to_string())
        );
        assert_eq!(repository.user_handle_for_username("Alice").await?, None);
        assert_eq!(repository.username_for_user_handle("handle-b").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_matches_handle_and_id_exactly() -> Result<()> {
        let (repository, _) = repository_with_alice().await?;
        let key = repository.lookup("handle-a", "cred-2").await?;
        assert_eq!(key.map(|key| key.public_key), Some(b"cred-2".to_vec()));
        assert!(repository.lookup("handle-a", "CRED-2").await?.is_none());
        assert!(repository.lookup("handle-b", "cred-2").await?.is_none());
        assert_eq!(repository.lookup_all("handle-a").await?.len(), 2);
        assert!(repository.lookup_all("handle-b").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn record_usage_updates_the_matched_credential() -> Result<()> {
        let (repository, alice) = repository_with_alice().await?;
        let usage = CredentialUsage {
            signature_count: 9,
            backup_state: true,
            last_used_at: chrono::Utc::now(),
        };
        assert!(repository.record_usage("handle-a", "cred-1", usage).await?);
        assert!(!repository.record_usage("handle-a", "cred-9", usage).await?);

        let credentials = repository.credentials_for_user(alice.id).await?;
        let updated: Vec<u64> = credentials
            .iter()
            .map(|credential| credential.signature_count)
            .collect();
        assert_eq!(updated, vec![9, 7]);
        Ok(())
    }
}
