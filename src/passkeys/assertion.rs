//! Sign-in ceremonies.
//!
//! A blank name starts a discoverable assertion. A known name restricts the
//! assertion to that account's credentials. What happens for an unknown name
//! is set by [`UnknownAccountPolicy`].

use super::{
    ceremony::{
        normalize_username, parse_client_response, visible_to, CeremonyContext, CeremonyKind,
        PendingCeremony,
    },
    credentials::CredentialLookup,
    error::CeremonyError,
    registration::RegistrationFlow,
    relying_party::{RelyingPartyHint, RelyingPartyIdentity},
    verifier::VerificationError,
};
use crate::store::{CredentialUsage, Tenant};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::{fmt, str::FromStr};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Response to a sign-in attempt for a name with no account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownAccountPolicy {
    /// Start registering the name instead.
    #[default]
    Register,
    /// Issue a discoverable assertion anyway.
    Discoverable,
}

impl UnknownAccountPolicy {
    pub const VARIANTS: [&'static str; 2] = ["register", "discoverable"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Discoverable => "discoverable",
        }
    }
}

impl fmt::Display for UnknownAccountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnknownAccountPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "register" => Ok(Self::Register),
            "discoverable" => Ok(Self::Discoverable),
            other => Err(anyhow!("Unknown account policy: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssertionStart {
    pub request_id: String,
    pub options: serde_json::Value,
    /// `false` when no account matched the name. Under the register policy
    /// the options are then creation options for a registration ceremony.
    pub account_exists: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionFinish {
    pub request_id: String,
    pub username: String,
    pub user_id: Uuid,
}

#[derive(Clone)]
pub struct AssertionFlow {
    context: CeremonyContext,
    registration: RegistrationFlow,
    policy: UnknownAccountPolicy,
}

impl AssertionFlow {
    #[must_use]
    pub fn new(context: CeremonyContext, policy: UnknownAccountPolicy) -> Self {
        Self {
            registration: RegistrationFlow::new(context.clone()),
            context,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> UnknownAccountPolicy {
        self.policy
    }

    /// Begin a sign-in.
    ///
    /// A name owned by another tenant is treated as unknown and always gets a
    /// discoverable assertion.
    ///
    /// # Errors
    /// `InvalidRelyingParty` for a malformed hostname hint, `ChallengeFailed`
    /// or `StorageFailure`, or the registration errors when an unknown name is
    /// redirected to registration.
    #[instrument(skip_all, fields(tenant.id = ?tenant.map(|tenant| tenant.id)))]
    pub async fn start(
        &self,
        name: Option<&str>,
        tenant: Option<&Tenant>,
        hint: &RelyingPartyHint,
    ) -> Result<AssertionStart, CeremonyError> {
        let rp = self.context.resolver.resolve_hint(tenant, hint)?;

        let Some(name) = name.and_then(normalize_username) else {
            return self.begin(rp, None, tenant, true).await;
        };

        if let Some(user) = self.context.credentials.user_by_name(&name).await? {
            if !visible_to(&user, tenant) {
                warn!(user.id = %user.id, "name belongs to another tenant");
                return self.begin(rp, None, tenant, false).await;
            }
            if self
                .context
                .credentials
                .user_handle_for_username(&name)
                .await?
                .is_some()
            {
                return self.begin(rp, Some(&name), tenant, true).await;
            }
        }

        match self.policy {
            UnknownAccountPolicy::Register => {
                info!("no account for name, starting registration");
                let start = self.registration.start(&name, tenant, hint).await?;
                Ok(AssertionStart {
                    request_id: start.request_id,
                    options: start.options,
                    account_exists: false,
                })
            }
            UnknownAccountPolicy::Discoverable => self.begin(rp, None, tenant, false).await,
        }
    }

    /// Complete a sign-in and record the credential's use.
    ///
    /// # Errors
    /// `RequestNotFoundOrExpired` for unknown, expired or reused ids,
    /// `AssertionCeremonyFailed` when verification fails or the credential
    /// no longer exists.
    #[instrument(skip_all)]
    pub async fn finish(
        &self,
        request_id: &str,
        response: &str,
    ) -> Result<AssertionFinish, CeremonyError> {
        let pending = self.context.take(request_id, CeremonyKind::Assertion).await?;
        let response = parse_client_response(response)?;
        let rp = self.context.resolver.rebuild(&pending.relying_party);

        let asserted = self
            .context
            .verifier
            .complete_assertion(&rp, &pending.state, &response, &self.context.credentials)
            .await
            .map_err(CeremonyError::assertion)?;

        let user = self
            .context
            .credentials
            .user_for_handle(&asserted.user_handle)
            .await?
            .ok_or(CeremonyError::AssertionCeremonyFailed(
                VerificationError::UnknownCredential,
            ))?;
        if let (Some(tenant_id), Some(owner)) = (pending.tenant_id, user.application_id) {
            if tenant_id != owner {
                warn!(request_id = %request_id, user.id = %user.id, "credential belongs to another tenant");
                return Err(CeremonyError::AssertionCeremonyFailed(
                    VerificationError::UnknownCredential,
                ));
            }
        }

        let usage = CredentialUsage {
            signature_count: asserted.signature_count,
            backup_state: asserted.backup_state,
            last_used_at: Utc::now(),
        };
        let updated = self
            .context
            .credentials
            .record_usage(&asserted.user_handle, &asserted.credential_id, usage)
            .await?;
        if !updated {
            warn!(request_id = %request_id, "asserted credential vanished before usage update");
            return Err(CeremonyError::AssertionCeremonyFailed(
                VerificationError::UnknownCredential,
            ));
        }

        info!(request_id = %request_id, user.id = %user.id, "user signed in");

        Ok(AssertionFinish {
            request_id: request_id.to_string(),
            username: user.name,
            user_id: user.id,
        })
    }

    async fn begin(
        &self,
        rp: RelyingPartyIdentity,
        username: Option<&str>,
        tenant: Option<&Tenant>,
        account_exists: bool,
    ) -> Result<AssertionStart, CeremonyError> {
        let challenge = self
            .context
            .verifier
            .begin_assertion(&rp, username, &self.context.credentials)
            .await
            .map_err(CeremonyError::challenge)?;

        let request_id = self
            .context
            .remember(PendingCeremony {
                kind: CeremonyKind::Assertion,
                relying_party: rp.params(),
                state: challenge.state,
                user: None,
                user_id: None,
                tenant_id: tenant.map(|tenant| tenant.id),
            })
            .await;

        Ok(AssertionStart {
            request_id,
            options: challenge.options,
            account_exists,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        passkeys::{
            ceremony::ChallengeCache,
            credentials::CredentialRepository,
            relying_party::{RelyingPartyDefaults, RelyingPartyResolver},
            webauthn::WebauthnVerifier,
        },
        store::{MemoryStore, NewUser, NewUserCredential, Store},
    };
    use std::{sync::Arc, time::Duration};

    fn assertion_flow(
        store: Arc<MemoryStore>,
        policy: UnknownAccountPolicy,
    ) -> Result<AssertionFlow> {
        let defaults =
            RelyingPartyDefaults::new("localhost".to_string(), "Example".to_string(), true)?;
        let context = CeremonyContext::new(
            Arc::new(ChallengeCache::new(Duration::from_secs(60), 100)),
            RelyingPartyResolver::new(defaults),
            CredentialRepository::new(store),
            Arc::new(WebauthnVerifier::new()),
        );
        Ok(AssertionFlow::new(context, policy))
    }

    fn tenant(name: &str) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: name.to_string(),
            relying_party_hostname: None,
            relying_party_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_name_gets_discoverable_challenge() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let flow = assertion_flow(store, UnknownAccountPolicy::Discoverable)?;

        let start = flow
            .start(Some("alice"), None, &RelyingPartyHint::default())
            .await?;
        assert!(!start.account_exists);
        assert!(!start.request_id.is_empty());
        assert!(flow.context.cache.peek(&start.request_id).await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn name_of_another_tenant_is_not_disclosed() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let (owner, other) = (tenant("shop"), tenant("bank"));
        store
            .create_user_with_credential(
                NewUser {
                    name: "alice".to_string(),
                    display_name: "alice".to_string(),
                    application_id: Some(owner.id),
                },
                NewUserCredential {
                    credential_id: "cred-1".to_string(),
                    user_handle: "handle-1".to_string(),
                    public_key: Vec::new(),
                    signature_count: 0,
                    backup_eligible: false,
                    backup_state: false,
                    discoverable: true,
                    attestation_object: String::new(),
                    client_data_json: String::new(),
                },
            )
            .await?;

        // Registering the name would fail for the other tenant, so both
        // policies answer with a discoverable assertion.
        for policy in [
            UnknownAccountPolicy::Register,
            UnknownAccountPolicy::Discoverable,
        ] {
            let flow = assertion_flow(store.clone(), policy)?;
            let start = flow
                .start(Some("alice"), Some(&other), &RelyingPartyHint::default())
                .await?;
            assert!(!start.account_exists);
            let pending = flow
                .context
                .cache
                .peek(&start.request_id)
                .await
                .ok_or_else(|| anyhow!("challenge was not cached"))?;
            assert_eq!(pending.kind, CeremonyKind::Assertion);
            assert_eq!(pending.tenant_id, Some(other.id));
        }
        Ok(())
    }

    #[tokio::test]
    async fn malformed_hostname_hint_is_rejected() -> Result<()> {
        let store = Arc::new(MemoryStore::new());
        let flow = assertion_flow(store, UnknownAccountPolicy::Register)?;
        let hint = RelyingPartyHint {
            hostname: Some("example.com/evil".to_string()),
            display_name: None,
        };
        let err = flow
            .start(None, None, &hint)
            .await
            .err()
            .ok_or_else(|| anyhow!("expected an error"))?;
        assert!(matches!(err, CeremonyError::InvalidRelyingParty(_)));
        assert!(flow.context.cache.is_empty().await);
        Ok(())
    }

    #[test]
    fn policy_parses_case_insensitively() -> Result<()> {
        assert_eq!(
            "Register".parse::<UnknownAccountPolicy>()?,
            UnknownAccountPolicy::Register
        );
        assert_eq!(
            " discoverable ".parse::<UnknownAccountPolicy>()?,
            UnknownAccountPolicy::Discoverable
        );
        assert!("fallback".parse::<UnknownAccountPolicy>().is_err());
        Ok(())
    }

    #[test]
    fn policy_display_matches_variants() {
        for (policy, name) in [
            UnknownAccountPolicy::Register,
            UnknownAccountPolicy::Discoverable,
        ]
        .into_iter()
        .zip(UnknownAccountPolicy::VARIANTS)
        {
            assert_eq!(policy.to_string(), name);
        }
    }
}
