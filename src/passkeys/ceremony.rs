//! State shared by the registration and assertion flows.

use super::{
    cache::CorrelationCache,
    credentials::CredentialRepository,
    error::CeremonyError,
    relying_party::{RelyingPartyParams, RelyingPartyResolver},
    verifier::{CeremonyVerifier, UserIdentity},
};
use crate::store::{Tenant, User};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const REQUEST_ID_BYTES: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyKind {
    Registration,
    AddCredential,
    Assertion,
}

/// A started ceremony waiting for its finish call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingCeremony {
    pub kind: CeremonyKind,
    pub relying_party: RelyingPartyParams,
    /// Verifier state, opaque to the flows.
    pub state: serde_json::Value,
    pub user: Option<UserIdentity>,
    /// Existing account a credential is being added to.
    pub user_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
}

pub type ChallengeCache = CorrelationCache<PendingCeremony>;

/// Collaborators every flow needs.
#[derive(Clone)]
pub struct CeremonyContext {
    pub cache: Arc<ChallengeCache>,
    pub resolver: RelyingPartyResolver,
    pub credentials: CredentialRepository,
    pub verifier: Arc<dyn CeremonyVerifier>,
}

impl CeremonyContext {
    #[must_use]
    pub fn new(
        cache: Arc<ChallengeCache>,
        resolver: RelyingPartyResolver,
        credentials: CredentialRepository,
        verifier: Arc<dyn CeremonyVerifier>,
    ) -> Self {
        Self {
            cache,
            resolver,
            credentials,
            verifier,
        }
    }

    /// Store `pending` under a fresh request id.
    pub async fn remember(&self, pending: PendingCeremony) -> String {
        let request_id = new_request_id();
        debug!(request_id = %request_id, kind = ?pending.kind, "ceremony started");
        self.cache.put(request_id.clone(), pending).await;
        request_id
    }

    /// Consume the pending ceremony for `request_id`.
    ///
    /// # Errors
    /// `RequestNotFoundOrExpired` when the id is unknown, expired, already
    /// used, or belongs to a ceremony of another kind. The entry is consumed
    /// in every case.
    pub async fn take(
        &self,
        request_id: &str,
        kind: CeremonyKind,
    ) -> Result<PendingCeremony, CeremonyError> {
        let pending = self
            .cache
            .take(request_id)
            .await
            .ok_or(CeremonyError::RequestNotFoundOrExpired)?;
        if pending.kind != kind {
            debug!(request_id = %request_id, expected = ?kind, found = ?pending.kind, "ceremony kind mismatch");
            return Err(CeremonyError::RequestNotFoundOrExpired);
        }
        Ok(pending)
    }
}

/// Whether `tenant` may see `user`. Users created without a tenant are shared.
#[must_use]
pub fn visible_to(user: &User, tenant: Option<&Tenant>) -> bool {
    match (tenant, user.application_id) {
        (Some(tenant), Some(owner)) => tenant.id == owner,
        _ => true,
    }
}

/// Trim and lower-case a username; `None` when nothing is left.
#[must_use]
pub fn normalize_username(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// 32 random bytes, base64url without padding.
#[must_use]
pub fn new_request_id() -> String {
    let mut bytes = [0_u8; REQUEST_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// A fresh user handle: the bytes of a random UUID, base64url without padding.
#[must_use]
pub fn new_user_handle() -> String {
    user_handle_from_uuid(Uuid::new_v4())
}

#[must_use]
pub fn user_handle_from_uuid(id: Uuid) -> String {
    Base64UrlUnpadded::encode_string(id.as_bytes())
}

/// Inverse of [`user_handle_from_uuid`].
#[must_use]
pub fn user_handle_to_uuid(handle: &str) -> Option<Uuid> {
    let bytes = Base64UrlUnpadded::decode_vec(handle).ok()?;
    Uuid::from_slice(&bytes).ok()
}

/// Parse a client response, which must be a JSON object.
///
/// # Errors
/// `MalformedClientResponse` for anything else.
pub fn parse_client_response(response: &str) -> Result<serde_json::Value, CeremonyError> {
    let value: serde_json::Value = serde_json::from_str(response)
        .map_err(|err| CeremonyError::MalformedClientResponse(err.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(CeremonyError::MalformedClientResponse(
            "expected a JSON object".to_string(),
        ))
    }
}
