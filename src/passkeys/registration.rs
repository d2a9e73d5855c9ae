//! Registration ceremonies.
//!
//! Flow Overview:
//! 1) Normalize the name and reject names already taken (advisory).
//! 2) Resolve the relying party and ask the verifier for creation options.
//! 3) Cache the pending ceremony under a fresh request id.
//! 4) On finish, consume the entry, recheck the name, verify the response.
//! 5) Persist the user and its first credential in one unit.
//!
//! The start-time name check only saves the user a wasted ceremony. The
//! finish-time check and the `users_name_key` constraint are what hold.
//! Adding a passkey to an existing account follows the same steps but reuses
//! the account's user handle and excludes its current credentials.

use super::{
    ceremony::{
        new_user_handle, normalize_username, parse_client_response, visible_to,
        CeremonyContext, CeremonyKind, PendingCeremony,
    },
    credentials::CredentialDescriptor,
    error::CeremonyError,
    relying_party::{RelyingPartyHint, RelyingPartyIdentity},
    verifier::{RegistrationOptions, ResidentKeyPreference, UserIdentity},
};
use crate::store::{NewUser, StoreError, Tenant, User, UserCredential, USERS_NAME_CONSTRAINT};
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationStart {
    pub request_id: String,
    pub options: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationFinish {
    pub request_id: String,
    pub user_id: Uuid,
}

#[derive(Clone)]
pub struct RegistrationFlow {
    context: CeremonyContext,
}

impl RegistrationFlow {
    #[must_use]
    pub fn new(context: CeremonyContext) -> Self {
        Self { context }
    }

    /// Begin registering a new account called `name`.
    ///
    /// # Errors
    /// `InvalidUsername` for blank names, `UsernameAlreadyRegistered` when
    /// the name is taken, `ChallengeFailed` or `StorageFailure` otherwise.
    #[instrument(skip_all, fields(tenant.id = ?tenant.map(|tenant| tenant.id)))]
    pub async fn start(
        &self,
        name: &str,
        tenant: Option<&Tenant>,
        hint: &RelyingPartyHint,
    ) -> Result<RegistrationStart, CeremonyError> {
        let name = normalize_username(name).ok_or(CeremonyError::InvalidUsername)?;
        if self.context.credentials.user_by_name(&name).await?.is_some() {
            return Err(CeremonyError::UsernameAlreadyRegistered);
        }

        let user = UserIdentity {
            user_handle: new_user_handle(),
            display_name: name.clone(),
            name,
        };
        let rp = self.context.resolver.resolve_hint(tenant, hint)?;
        self.begin(CeremonyKind::Registration, rp, user, None, Vec::new(), tenant)
            .await
    }

    /// Complete a registration started with [`RegistrationFlow::start`].
    ///
    /// # Errors
    /// `RequestNotFoundOrExpired` for unknown, expired or reused ids,
    /// `UsernameAlreadyRegistered` if the name was taken in the meantime,
    /// verifier and storage failures otherwise. Nothing is written unless
    /// verification succeeds.
    #[instrument(skip_all)]
    pub async fn finish(
        &self,
        request_id: &str,
        response: &str,
    ) -> Result<RegistrationFinish, CeremonyError> {
        let pending = self
            .context
            .take(request_id, CeremonyKind::Registration)
            .await?;
        let user = pending
            .user
            .clone()
            .ok_or(CeremonyError::RequestNotFoundOrExpired)?;

        if self
            .context
            .credentials
            .user_by_name(&user.name)
            .await?
            .is_some()
        {
            return Err(CeremonyError::UsernameAlreadyRegistered);
        }

        let response = parse_client_response(response)?;
        let rp = self.context.resolver.rebuild(&pending.relying_party);
        let registered = self
            .context
            .verifier
            .complete_registration(&rp, &pending.state, &response)
            .await
            .map_err(CeremonyError::registration)?;

        let new_user = NewUser {
            name: user.name.clone(),
            display_name: user.display_name.clone(),
            application_id: pending.tenant_id,
        };
        let created = self
            .context
            .credentials
            .save_new_account(new_user, registered.into_new_credential(&user.user_handle))
            .await
            .map_err(|err| {
                if err.is_unique_violation_of(USERS_NAME_CONSTRAINT) {
                    CeremonyError::UsernameAlreadyRegistered
                } else {
                    CeremonyError::StorageFailure(err)
                }
            })?;

        info!(request_id = %request_id, user.id = %created.id, "user registered");

        Ok(RegistrationFinish {
            request_id: request_id.to_string(),
            user_id: created.id,
        })
    }

    /// Begin adding another passkey to an existing account.
    ///
    /// # Errors
    /// `UserNotFound` when the user does not exist or belongs to another tenant.
    #[instrument(skip_all, fields(user.id = %user_id))]
    pub async fn start_add_credential(
        &self,
        user_id: Uuid,
        tenant: Option<&Tenant>,
        hint: &RelyingPartyHint,
    ) -> Result<RegistrationStart, CeremonyError> {
        let user = self.visible_user(user_id, tenant).await?;
        let existing = self.context.credentials.credentials_for_user(user.id).await?;

        let user_handle = existing
            .first()
            .map_or_else(new_user_handle, |credential| credential.user_handle.clone());
        let exclude = existing
            .into_iter()
            .map(|credential| CredentialDescriptor::internal(credential.credential_id))
            .collect();

        let identity = UserIdentity {
            user_handle,
            name: user.name,
            display_name: user.display_name,
        };
        let rp = self.context.resolver.resolve_hint(tenant, hint)?;
        self.begin(
            CeremonyKind::AddCredential,
            rp,
            identity,
            Some(user.id),
            exclude,
            tenant,
        )
        .await
    }

    /// Complete a ceremony started with [`RegistrationFlow::start_add_credential`].
    ///
    /// # Errors
    /// Same as [`RegistrationFlow::finish`], plus `UserNotFound` if the
    /// account disappeared in the meantime.
    #[instrument(skip_all)]
    pub async fn finish_add_credential(
        &self,
        request_id: &str,
        response: &str,
    ) -> Result<RegistrationFinish, CeremonyError> {
        let pending = self
            .context
            .take(request_id, CeremonyKind::AddCredential)
            .await?;
        let (Some(user), Some(user_id)) = (pending.user.clone(), pending.user_id) else {
            return Err(CeremonyError::RequestNotFoundOrExpired);
        };

        let response = parse_client_response(response)?;
        let rp = self.context.resolver.rebuild(&pending.relying_party);
        let registered = self
            .context
            .verifier
            .complete_registration(&rp, &pending.state, &response)
            .await
            .map_err(CeremonyError::registration)?;

        let stored = self
            .context
            .credentials
            .attach_credential(user_id, registered.into_new_credential(&user.user_handle))
            .await
            .map_err(|err| match err {
                StoreError::UserNotFound(_) => CeremonyError::UserNotFound,
                err => CeremonyError::StorageFailure(err),
            })?;

        info!(request_id = %request_id, user.id = %user_id, credential.id = stored.id, "credential added");

        Ok(RegistrationFinish {
            request_id: request_id.to_string(),
            user_id,
        })
    }

    /// Credentials of `user_id`, oldest first.
    ///
    /// # Errors
    /// `UserNotFound` when the user does not exist or belongs to another tenant.
    pub async fn credentials(
        &self,
        user_id: Uuid,
        tenant: Option<&Tenant>,
    ) -> Result<Vec<UserCredential>, CeremonyError> {
        let user = self.visible_user(user_id, tenant).await?;
        Ok(self.context.credentials.credentials_for_user(user.id).await?)
    }

    async fn visible_user(
        &self,
        user_id: Uuid,
        tenant: Option<&Tenant>,
    ) -> Result<User, CeremonyError> {
        let user = self
            .context
            .credentials
            .user(user_id)
            .await?
            .ok_or(CeremonyError::UserNotFound)?;
        if visible_to(&user, tenant) {
            Ok(user)
        } else {
            warn!(user.id = %user_id, "user belongs to another tenant");
            Err(CeremonyError::UserNotFound)
        }
    }

    async fn begin(
        &self,
        kind: CeremonyKind,
        rp: RelyingPartyIdentity,
        user: UserIdentity,
        user_id: Option<Uuid>,
        exclude_credentials: Vec<CredentialDescriptor>,
        tenant: Option<&Tenant>,
    ) -> Result<RegistrationStart, CeremonyError> {
        let options = RegistrationOptions {
            resident_key: ResidentKeyPreference::Preferred,
            exclude_credentials,
        };
        let challenge = self
            .context
            .verifier
            .begin_registration(&rp, &user, &options)
            .await
            .map_err(CeremonyError::challenge)?;

        let request_id = self
            .context
            .remember(PendingCeremony {
                kind,
                relying_party: rp.params(),
                state: challenge.state,
                user: Some(user),
                user_id,
                tenant_id: tenant.map(|tenant| tenant.id),
            })
            .await;

        Ok(RegistrationStart {
            request_id,
            options: challenge.options,
        })
    }
}
