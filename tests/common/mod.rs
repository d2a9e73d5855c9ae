#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use passkeys::{
    passkeys::{
        AssertedCredential, AssertionFlow, CeremonyContext, CeremonyVerifier, Challenge,
        ChallengeCache, CredentialLookup, CredentialRepository, RegisteredCredential,
        RegistrationFlow, RegistrationOptions, RelyingPartyDefaults, RelyingPartyIdentity,
        RelyingPartyResolver, UnknownAccountPolicy, UserIdentity, VerificationError,
    },
    store::{
        CredentialUsage, MemoryStore, NewUser, NewUserCredential, Store, StoreError, Tenant,
        User, UserCredential,
    },
};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use uuid::Uuid;

pub const API_KEY: &str = "tenant-key";
pub const OTHER_API_KEY: &str = "other-tenant-key";

/// A verifier that trusts the client response.
///
/// Registration responses look like `{"id": "...", "counter": 0, "rk": true}`,
/// assertion responses like `{"id": "...", "userHandle": "...", "counter": 7}`.
/// `"fail": true` makes either finish reject. The state records the relying
/// party the ceremony started with, and finishing against another one fails.
#[derive(Default)]
pub struct ScriptedVerifier {
    calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn check_rp(rp: &RelyingPartyIdentity, state: &Value) -> Result<(), VerificationError> {
    match state.get("rp").and_then(Value::as_str) {
        Some(id) if id == rp.id => Ok(()),
        _ => Err(VerificationError::RelyingParty(rp.id.clone())),
    }
}

fn rejected(response: &Value) -> bool {
    response.get("fail").and_then(Value::as_bool).unwrap_or(false)
}

fn field<'a>(response: &'a Value, name: &str) -> Result<&'a str, VerificationError> {
    response
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| VerificationError::MalformedResponse(format!("missing {name}")))
}

#[async_trait]
impl CeremonyVerifier for ScriptedVerifier {
    async fn begin_registration(
        &self,
        rp: &RelyingPartyIdentity,
        user: &UserIdentity,
        options: &RegistrationOptions,
    ) -> Result<Challenge, VerificationError> {
        self.count();
        let exclude: Vec<&str> = options
            .exclude_credentials
            .iter()
            .map(|descriptor| descriptor.id.as_str())
            .collect();
        Ok(Challenge {
            options: json!({
                "rp": {"id": rp.id, "name": rp.name},
                "user": {"id": user.user_handle, "name": user.name},
                "residentKey": options.resident_key.as_str(),
                "excludeCredentials": exclude,
            }),
            state: json!({"rp": rp.id, "userHandle": user.user_handle}),
        })
    }

    async fn complete_registration(
        &self,
        rp: &RelyingPartyIdentity,
        state: &Value,
        response: &Value,
    ) -> Result<RegisteredCredential, VerificationError> {
        self.count();
        check_rp(rp, state)?;
        let id = field(response, "id")?;
        if rejected(response) {
            return Err(VerificationError::Rejected("attestation".to_string()));
        }
        Ok(RegisteredCredential {
            credential_id: id.to_string(),
            public_key: b"public-key".to_vec(),
            signature_count: response.get("counter").and_then(Value::as_u64).unwrap_or(0),
            backup_eligible: true,
            backup_state: false,
            discoverable: response.get("rk").and_then(Value::as_bool).unwrap_or(true),
            attestation_object: "attestation".to_string(),
            client_data_json: "client-data".to_string(),
        })
    }

    async fn begin_assertion(
        &self,
        rp: &RelyingPartyIdentity,
        username: Option<&str>,
        lookup: &dyn CredentialLookup,
    ) -> Result<Challenge, VerificationError> {
        self.count();
        let allow: Vec<String> = match username {
            Some(name) => {
                let ids = lookup.credential_ids_for_username(name).await?;
                if ids.is_empty() {
                    return Err(VerificationError::UnknownUser);
                }
                ids.into_iter().map(|descriptor| descriptor.id).collect()
            }
            None => Vec::new(),
        };
        Ok(Challenge {
            options: json!({"rpId": rp.id, "allowCredentials": allow}),
            state: json!({"rp": rp.id, "username": username}),
        })
    }

    async fn complete_assertion(
        &self,
        rp: &RelyingPartyIdentity,
        state: &Value,
        response: &Value,
        lookup: &dyn CredentialLookup,
    ) -> Result<AssertedCredential, VerificationError> {
        self.count();
        check_rp(rp, state)?;
        let credential_id = field(response, "id")?;

        let user_handle = match state.get("username").and_then(Value::as_str) {
            Some(name) => lookup
                .user_handle_for_username(name)
                .await?
                .ok_or(VerificationError::UnknownUser)?,
            None => field(response, "userHandle")?.to_string(),
        };

        let key = lookup
            .lookup(&user_handle, credential_id)
            .await?
            .ok_or(VerificationError::UnknownCredential)?;

        if rejected(response) {
            return Err(VerificationError::Rejected("signature".to_string()));
        }

        let counter = response
            .get("counter")
            .and_then(Value::as_u64)
            .unwrap_or(key.signature_count);
        if counter < key.signature_count {
            return Err(VerificationError::Rejected("counter went back".to_string()));
        }

        Ok(AssertedCredential {
            user_handle,
            credential_id: key.credential_id,
            signature_count: counter,
            backup_state: key.backup_state,
        })
    }
}

/// Delegates to a [`MemoryStore`] and counts every call.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn count(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn find_tenant_by_api_key(
        &self,
        api_key: &SecretString,
    ) -> Result<Option<Tenant>, StoreError> {
        self.count();
        self.inner.find_tenant_by_api_key(api_key).await
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.count();
        self.inner.find_user(user_id).await
    }

    async fn find_user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.count();
        self.inner.find_user_by_name(name).await
    }

    async fn find_user_by_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Option<User>, StoreError> {
        self.count();
        self.inner.find_user_by_user_handle(user_handle).await
    }

    async fn first_credential_for_username(
        &self,
        name: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        self.count();
        self.inner.first_credential_for_username(name).await
    }

    async fn credentials_for_user(&self, user_id: Uuid) -> Result<Vec<UserCredential>, StoreError> {
        self.count();
        self.inner.credentials_for_user(user_id).await
    }

    async fn credentials_for_user_handle(
        &self,
        user_handle: &str,
    ) -> Result<Vec<UserCredential>, StoreError> {
        self.count();
        self.inner.credentials_for_user_handle(user_handle).await
    }

    async fn find_credential(
        &self,
        user_handle: &str,
        credential_id: &str,
    ) -> Result<Option<UserCredential>, StoreError> {
        self.count();
        self.inner.find_credential(user_handle, credential_id).await
    }

    async fn create_user_with_credential(
        &self,
        user: NewUser,
        credential: NewUserCredential,
    ) -> Result<User, StoreError> {
        self.count();
        self.inner.create_user_with_credential(user, credential).await
    }

    async fn add_credential(
        &self,
        user_id: Uuid,
        credential: NewUserCredential,
    ) -> Result<UserCredential, StoreError> {
        self.count();
        self.inner.add_credential(user_id, credential).await
    }

    async fn update_credential_usage(
        &self,
        user_handle: &str,
        credential_id: &str,
        usage: CredentialUsage,
    ) -> Result<bool, StoreError> {
        self.count();
        self.inner
            .update_credential_usage(user_handle, credential_id, usage)
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.count();
        self.inner.ping().await
    }
}

pub fn new_tenant(name: &str) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: name.to_string(),
        relying_party_hostname: None,
        relying_party_name: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Flows wired to a [`CountingStore`] and a [`ScriptedVerifier`], with two
/// tenants registered under [`API_KEY`] and [`OTHER_API_KEY`].
pub struct Harness {
    pub store: Arc<CountingStore>,
    pub verifier: Arc<ScriptedVerifier>,
    pub context: CeremonyContext,
    pub registration: RegistrationFlow,
    pub assertion: AssertionFlow,
    pub tenant: Tenant,
    pub other_tenant: Tenant,
}

impl Harness {
    pub async fn new(policy: UnknownAccountPolicy) -> anyhow::Result<Self> {
        Self::with_ttl(policy, Duration::from_secs(300)).await
    }

    pub async fn with_ttl(policy: UnknownAccountPolicy, ttl: Duration) -> anyhow::Result<Self> {
        let store = Arc::new(CountingStore::default());
        let (tenant, other_tenant) = (new_tenant("shop"), new_tenant("bank"));
        store
            .inner
            .insert_tenant(tenant.clone(), &SecretString::from(API_KEY.to_string()))
            .await;
        store
            .inner
            .insert_tenant(
                other_tenant.clone(),
                &SecretString::from(OTHER_API_KEY.to_string()),
            )
            .await;

        let verifier = Arc::new(ScriptedVerifier::default());
        let defaults =
            RelyingPartyDefaults::new("localhost".to_string(), "Passkeys".to_string(), true)?;
        let context = CeremonyContext::new(
            Arc::new(ChallengeCache::new(ttl, 1000)),
            RelyingPartyResolver::new(defaults),
            CredentialRepository::new(store.clone()),
            verifier.clone(),
        );

        Ok(Self {
            registration: RegistrationFlow::new(context.clone()),
            assertion: AssertionFlow::new(context.clone(), policy),
            store,
            verifier,
            context,
            tenant,
            other_tenant,
        })
    }

    /// Register `name` with one credential and return the user id.
    pub async fn register(&self, name: &str, credential_id: &str) -> anyhow::Result<Uuid> {
        let start = self
            .registration
            .start(name, Some(&self.tenant), &Default::default())
            .await?;
        let finish = self
            .registration
            .finish(
                &start.request_id,
                &json!({"id": credential_id, "counter": 0}).to_string(),
            )
            .await?;
        Ok(finish.user_id)
    }

    pub async fn user_handle_of(&self, user_id: Uuid) -> anyhow::Result<String> {
        let credentials = self.store.inner.credentials_for_user(user_id).await?;
        credentials
            .first()
            .map(|credential| credential.user_handle.clone())
            .ok_or_else(|| anyhow::anyhow!("user has no credentials"))
    }
}
