//! In-process store used by tests and by `--dsn memory://` local runs.
//!
//! Every operation runs under one lock, so the uniqueness checks and the
//! inserts they guard are atomic in the same way a database transaction is.

use super::{
    CredentialUsage, NewUser, NewUserCredential, Store, StoreError, Tenant, User, UserCredential,
    CREDENTIALS_HANDLE_ID_CONSTRAINT, USERS_NAME_CONSTRAINT,
};
use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    tenants: HashMap<String, Tenant>,
    users: HashMap<Uuid, User>,
    credentials: Vec<UserCredential>,
    next_credential_id: i64,
}

impl Tables {
    fn user_by_name(&self, name: &str) -> Option<&User> {
        self.users.values().find(|user| user.name == name)
    }

    fn insert_credential(&mut self, user_id: Uuid, credential: NewUserCredential) -> UserCredential {
        self.next_credential_id += 1;
        let stored = UserCredential {
            id: self.next_credential_id,
            user_id,
            credential_id: credential.credential_id,
            user_handle: credential.user_handle,
            public_key: credential.public_key,
            signature_count: credential.signature_count,
            backup_eligible: credential.backup_eligible,
            backup_state: credential.backup_state,
            discoverable: credential.discoverable,
            attestation_object: credential.attestation_object,
            client_data_json: credential.client_data_json,
            created_at: Utc::now(),
            last_used_at: None,
        };
        self.credentials.push(stored.clone());
        stored
    }

    fn credential_exists(&self, credential: &NewUserCredential) -> bool {
        self.credentials.iter().any(|existing| {
            existing.user_handle == credential.user_handle
                && existing.credential_id == credential.credential_id
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant reachable through `api_key`.
    pub async fn insert_tenant(&self, tenant: Tenant, api_key: &SecretString) {
        let mut tables = self.tables.lock().await;
        tables
            .tenants
            .insert(api_key.expose_secret().to_string(), tenant);
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn credential_count(&self) -> usize {
        self.tables.lock().await.credentials.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_tenant_by_api_key(
        &self,
        api_key: &SecretString,
    ) -> Result<Option<Tenant>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.tenants.get(api_key.expose_secret()).cloned())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.user_by_name(name).cloned())
    }

    async fn find_user_by_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .credentials
            .iter()
            .find(|credential| credential.user_handle == user_handle)
            .and_then(|credential| tables.users.get(&credential.user_id))
            .cloned())
    }

    async fn first_credential_for_username(
        &self,
        name: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let tables = self.tables.lock().await;
        let Some(user) = tables.user_by_name(name) else {
            return Ok(None);
        };
        Ok(tables
            .credentials
            .iter()
            .find(|credential| credential.user_id == user.id)
            .cloned())
    }

    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<UserCredential>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .credentials
            .iter()
            .filter(|credential| credential.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn credentials_for_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Vec<UserCredential>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .credentials
            .iter()
            .filter(|credential| credential.user_handle == user_handle)
            .cloned()
            .collect())
    }

    async fn find_credential(
        &self,
        user_handle: &str,
        credential_id: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .credentials
            .iter()
            .find(|credential| {
                credential.user_handle == user_handle && credential.credential_id == credential_id
            })
            .cloned())
    }

    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: NewUserCredential,
    ) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.user_by_name(&user.name).is_some() {
            return Err(StoreError::UniqueViolation(USERS_NAME_CONSTRAINT.to_string()));
        }
        if tables.credential_exists(&credential) {
            return Err(StoreError::UniqueViolation(
                CREDENTIALS_HANDLE_ID_CONSTRAINT.to_string(),
            ));
        }

        let created = User {
            id: Uuid::new_v4(),
            name: user.name,
            display_name: user.display_name,
            application_id: user.application_id,
            created_at: Utc::now(),
        };
        tables.users.insert(created.id, created.clone());
        tables.insert_credential(created.id, credential);

        Ok(created)
    }

    async fn add_credential(
        &self,
        user_id: Uuid,
        credential: NewUserCredential,
    ) -> Result<UserCredential, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }
        if tables.credential_exists(&credential) {
            return Err(StoreError::UniqueViolation(
                CREDENTIALS_HANDLE_ID_CONSTRAINT.to_string(),
            ));
        }
        Ok(tables.insert_credential(user_id, credential))
    }

    async fn update_credential_usage(
        &self,
        user_handle: &str,
        credential_id: &str,
        usage: CredentialUsage,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut updated = false;
        for credential in tables.credentials.iter_mut().filter(|credential| {
            credential.user_handle == user_handle && credential.credential_id == credential_id
        }) {
            credential.signature_count = usage.signature_count;
            credential.backup_state = usage.backup_state;
            credential.last_used_at = Some(usage.last_used_at);
            updated = true;
        }
        Ok(updated)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
