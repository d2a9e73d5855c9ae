//! The seam between the flows and WebAuthn verification.
//!
//! Flows never look inside challenge options or state; they only carry them
//! from the verifier to the client and back through the correlation cache.

use super::{
    credentials::{CredentialDescriptor, CredentialLookup},
    relying_party::RelyingPartyIdentity,
};
use crate::store::{NewUserCredential, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_handle: String,
    pub name: String,
    pub display_name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidentKeyPreference {
    Discouraged,
    #[default]
    Preferred,
    Required,
}

impl ResidentKeyPreference {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discouraged => "discouraged",
            Self::Preferred => "preferred",
            Self::Required => "required",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistrationOptions {
    pub resident_key: ResidentKeyPreference,
    pub exclude_credentials: Vec<CredentialDescriptor>,
}

/// Options for the client plus the state needed to finish.
#[derive(Clone, Debug, PartialEq)]
pub struct Challenge {
    pub options: serde_json::Value,
    pub state: serde_json::Value,
}

/// A verified new credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredCredential {
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub signature_count: u64,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub discoverable: bool,
    pub attestation_object: String,
    pub client_data_json: String,
}

impl RegisteredCredential {
    #[must_use]
    pub fn into_new_credential(self, user_handle: &str) -> NewUserCredential {
        NewUserCredential {
            credential_id: self.credential_id,
            user_handle: user_handle.to_string(),
            public_key: self.public_key,
            signature_count: self.signature_count,
            backup_eligible: self.backup_eligible,
            backup_state: self.backup_state,
            discoverable: self.discoverable,
            attestation_object: self.attestation_object,
            client_data_json: self.client_data_json,
        }
    }
}

/// The credential a successful assertion matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertedCredential {
    pub user_handle: String,
    pub credential_id: String,
    pub signature_count: u64,
    pub backup_state: bool,
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed client response: {0}")]
    MalformedResponse(String),
    #[error("invalid ceremony state: {0}")]
    InvalidState(String),
    #[error("invalid relying party: {0}")]
    RelyingParty(String),
    #[error("unknown user")]
    UnknownUser,
    #[error("unknown credential")]
    UnknownCredential,
    #[error("ceremony rejected: {0}")]
    Rejected(String),
    #[error("credential lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

#[async_trait]
pub trait CeremonyVerifier: Send + Sync {
    async fn begin_registration(
        &self,
        rp: &RelyingPartyIdentity,
        user: &UserIdentity,
        options: &RegistrationOptions,
    ) -> Result<Challenge, VerificationError>;

    async fn complete_registration(
        &self,
        rp: &RelyingPartyIdentity,
        state: &serde_json::Value,
        response: &serde_json::Value,
    ) -> Result<RegisteredCredential, VerificationError>;

    /// Without a username the assertion is discoverable: any credential the
    /// authenticator holds for this relying party may answer.
    async fn begin_assertion(
        &self,
        rp: &RelyingPartyIdentity,
        username: Option<&str>,
        lookup: &dyn CredentialLookup,
    ) -> Result<Challenge, VerificationError>;

    async fn complete_assertion(
        &self,
        rp: &RelyingPartyIdentity,
        state: &serde_json::Value,
        response: &serde_json::Value,
        lookup: &dyn CredentialLookup,
    ) -> Result<AssertedCredential, VerificationError>;
}
