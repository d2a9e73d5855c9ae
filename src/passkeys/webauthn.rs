//! [`CeremonyVerifier`] backed by `webauthn-rs`.
//!
//! A `Webauthn` instance is built per call from the relying party the
//! ceremony was started with, so one verifier serves every tenant. Stored
//! public key material is the serialized `Passkey`; the server-tracked
//! counter and backup state are applied on load.

use super::{
    ceremony::user_handle_from_uuid,
    credentials::{CredentialLookup, RegisteredKey},
    relying_party::RelyingPartyIdentity,
    verifier::{
        AssertedCredential, CeremonyVerifier, Challenge, RegisteredCredential,
        RegistrationOptions, ResidentKeyPreference, UserIdentity, VerificationError,
    },
};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use webauthn_rs::prelude::{
    AuthenticationResult, CreationChallengeResponse, Credential, CredentialID,
    DiscoverableAuthentication, DiscoverableKey, Passkey, PasskeyAuthentication,
    PasskeyRegistration, PublicKeyCredential, RegisterPublicKeyCredential, Uuid, Webauthn,
    WebauthnBuilder,
};

#[derive(Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum AssertionState {
    Passkey {
        user_handle: String,
        authentication: PasskeyAuthentication,
    },
    Discoverable {
        authentication: DiscoverableAuthentication,
    },
}

#[derive(Clone, Debug, Default)]
pub struct WebauthnVerifier;

impl WebauthnVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn webauthn_for(rp: &RelyingPartyIdentity) -> Result<Webauthn, VerificationError> {
    let origin = rp
        .origin()
        .map_err(|err| VerificationError::RelyingParty(err.to_string()))?;
    WebauthnBuilder::new(&rp.id, &origin)
        .and_then(|builder| {
            builder
                .rp_name(&rp.name)
                .allow_any_port(rp.allow_origin_port)
                .build()
        })
        .map_err(|err| VerificationError::RelyingParty(err.to_string()))
}

fn rejected(err: impl std::fmt::Display) -> VerificationError {
    VerificationError::Rejected(err.to_string())
}

fn invalid_state(err: impl std::fmt::Display) -> VerificationError {
    VerificationError::InvalidState(err.to_string())
}

fn encode_id(id: &CredentialID) -> String {
    Base64UrlUnpadded::encode_string(id.as_slice())
}

fn decode_id(id: &str) -> Result<CredentialID, VerificationError> {
    Base64UrlUnpadded::decode_vec(id)
        .map(CredentialID::from)
        .map_err(|err| invalid_state(format!("credential id {id}: {err}")))
}

fn user_uuid(user: &UserIdentity) -> Result<Uuid, VerificationError> {
    let bytes = Base64UrlUnpadded::decode_vec(&user.user_handle).map_err(invalid_state)?;
    Uuid::from_slice(&bytes).map_err(invalid_state)
}

/// Rebuild a stored passkey with the counter and backup state the server tracks.
fn load_passkey(key: &RegisteredKey) -> Result<Passkey, VerificationError> {
    let passkey: Passkey = serde_json::from_slice(&key.public_key).map_err(invalid_state)?;
    let mut credential = Credential::from(passkey);
    credential.counter = u32::try_from(key.signature_count).unwrap_or(u32::MAX);
    credential.backup_state = key.backup_state;
    Ok(Passkey::from(credential))
}

fn creation_options(
    challenge: &CreationChallengeResponse,
    resident_key: ResidentKeyPreference,
) -> Result<Value, VerificationError> {
    let mut options = serde_json::to_value(challenge).map_err(invalid_state)?;
    if let Some(public_key) = options.get_mut("publicKey").and_then(Value::as_object_mut) {
        let selection = public_key
            .entry("authenticatorSelection")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(selection) = selection.as_object_mut() {
            selection.insert("residentKey".to_string(), Value::from(resident_key.as_str()));
            selection.insert(
                "requireResidentKey".to_string(),
                Value::Bool(resident_key == ResidentKeyPreference::Required),
            );
        }
    }
    Ok(options)
}

fn response_field(response: &Value, field: &str) -> Result<String, VerificationError> {
    response
        .get("response")
        .and_then(|inner| inner.get(field))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| VerificationError::MalformedResponse(format!("missing response.{field}")))
}

fn parse<T: serde::de::DeserializeOwned>(response: &Value) -> Result<T, VerificationError> {
    serde_json::from_value(response.clone())
        .map_err(|err| VerificationError::MalformedResponse(err.to_string()))
}

fn asserted(user_handle: String, result: &AuthenticationResult) -> AssertedCredential {
    AssertedCredential {
        user_handle,
        credential_id: encode_id(result.cred_id()),
        signature_count: u64::from(result.counter()),
        backup_state: result.backup_state(),
    }
}

#[async_trait]
impl CeremonyVerifier for WebauthnVerifier {
    async fn begin_registration(
        &self,
        rp: &RelyingPartyIdentity,
        user: &UserIdentity,
        options: &RegistrationOptions,
    ) -> Result<Challenge, VerificationError> {
        let webauthn = webauthn_for(rp)?;
        let exclude = options
            .exclude_credentials
            .iter()
            .map(|descriptor| decode_id(&descriptor.id))
            .collect::<Result<Vec<_>, _>>()?;

        let (challenge, registration) = webauthn
            .start_passkey_registration(
                user_uuid(user)?,
                &user.name,
                &user.display_name,
                (!exclude.is_empty()).then_some(exclude),
            )
            .map_err(rejected)?;

        Ok(Challenge {
            options: creation_options(&challenge, options.resident_key)?,
            state: serde_json::to_value(&registration).map_err(invalid_state)?,
        })
    }

    async fn complete_registration(
        &self,
        rp: &RelyingPartyIdentity,
        state: &Value,
        response: &Value,
    ) -> Result<RegisteredCredential, VerificationError> {
        let registration: PasskeyRegistration =
            serde_json::from_value(state.clone()).map_err(invalid_state)?;
        let credential: RegisterPublicKeyCredential = parse(response)?;
        let attestation_object = response_field(response, "attestationObject")?;
        let client_data_json = response_field(response, "clientDataJSON")?;

        let passkey = webauthn_for(rp)?
            .finish_passkey_registration(&credential, &registration)
            .map_err(rejected)?;

        let discoverable = response
            .pointer("/clientExtensionResults/credProps/rk")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let public_key = serde_json::to_vec(&passkey).map_err(invalid_state)?;
        let internals = Credential::from(passkey);

        Ok(RegisteredCredential {
            credential_id: encode_id(&internals.cred_id),
            public_key,
            signature_count: u64::from(internals.counter),
            backup_eligible: internals.backup_eligible,
            backup_state: internals.backup_state,
            discoverable,
            attestation_object,
            client_data_json,
        })
    }

    async fn begin_assertion(
        &self,
        rp: &RelyingPartyIdentity,
        username: Option<&str>,
        lookup: &dyn CredentialLookup,
    ) -> Result<Challenge, VerificationError> {
        let webauthn = webauthn_for(rp)?;

        let Some(username) = username else {
            let (challenge, authentication) =
                webauthn.start_discoverable_authentication().map_err(rejected)?;
            return Ok(Challenge {
                options: serde_json::to_value(&challenge).map_err(invalid_state)?,
                state: serde_json::to_value(AssertionState::Discoverable { authentication })
                    .map_err(invalid_state)?,
            });
        };

        let user_handle = lookup
            .user_handle_for_username(username)
            .await?
            .ok_or(VerificationError::UnknownUser)?;
        let passkeys = lookup
            .lookup_all(&user_handle)
            .await?
            .iter()
            .map(load_passkey)
            .collect::<Result<Vec<_>, _>>()?;
        if passkeys.is_empty() {
            return Err(VerificationError::UnknownUser);
        }
        debug!(credentials = passkeys.len(), "assertion restricted to known credentials");

        let (challenge, authentication) = webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(rejected)?;
        Ok(Challenge {
            options: serde_json::to_value(&challenge).map_err(invalid_state)?,
            state: serde_json::to_value(AssertionState::Passkey {
                user_handle,
                authentication,
            })
            .map_err(invalid_state)?,
        })
    }

    async fn complete_assertion(
        &self,
        rp: &RelyingPartyIdentity,
        state: &Value,
        response: &Value,
        lookup: &dyn CredentialLookup,
    ) -> Result<AssertedCredential, VerificationError> {
        let state: AssertionState = serde_json::from_value(state.clone()).map_err(invalid_state)?;
        let credential: PublicKeyCredential = parse(response)?;
        let webauthn = webauthn_for(rp)?;

        match state {
            AssertionState::Passkey {
                user_handle,
                authentication,
            } => {
                let result = webauthn
                    .finish_passkey_authentication(&credential, &authentication)
                    .map_err(rejected)?;
                let asserted = asserted(user_handle, &result);
                if lookup
                    .lookup(&asserted.user_handle, &asserted.credential_id)
                    .await?
                    .is_none()
                {
                    return Err(VerificationError::UnknownCredential);
                }
                Ok(asserted)
            }
            AssertionState::Discoverable { authentication } => {
                let (user_id, _) = webauthn
                    .identify_discoverable_authentication(&credential)
                    .map_err(rejected)?;
                let user_handle = user_handle_from_uuid(user_id);

                let passkeys = lookup
                    .lookup_all(&user_handle)
                    .await?
                    .iter()
                    .map(load_passkey)
                    .collect::<Result<Vec<_>, _>>()?;
                if passkeys.is_empty() {
                    return Err(VerificationError::UnknownCredential);
                }
                let keys: Vec<DiscoverableKey> =
                    passkeys.iter().map(DiscoverableKey::from).collect();

                let result = webauthn
                    .finish_discoverable_authentication(&credential, authentication, &keys)
                    .map_err(rejected)?;
                Ok(asserted(user_handle, &result))
            }
        }
    }
}
