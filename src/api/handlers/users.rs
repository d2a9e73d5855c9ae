use super::{
    ceremony_error_response,
    credentials::StartResponse,
    tenant::require_tenant,
};
use crate::{
    passkeys::{RegistrationFlow, RelyingPartyHint},
    store::{Store, UserCredential},
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AddCredentialRequest {
    pub relying_party_hostname: Option<String>,
    pub relying_party_name: Option<String>,
}

/// A stored passkey without its key material.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub credential_id: String,
    pub signature_count: u64,
    pub backup_eligible: bool,
    pub backup_state: bool,
    pub discoverable: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<UserCredential> for CredentialSummary {
    fn from(credential: UserCredential) -> Self {
        Self {
            credential_id: credential.credential_id,
            signature_count: credential.signature_count,
            backup_eligible: credential.backup_eligible,
            backup_state: credential.backup_state,
            discoverable: credential.discoverable,
            created_at: credential.created_at,
            last_used_at: credential.last_used_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CredentialsResponse {
    pub credentials: Vec<CredentialSummary>,
}

/// Starts adding another passkey to an existing account.
#[utoipa::path(
    post,
    path = "/v1/users/{id}/credentials/add/start",
    params(("id" = Uuid, Path, description = "User id")),
    request_body(content = AddCredentialRequest, description = "Optional relying party override"),
    responses(
        (status = 200, description = "Credential creation options", body = StartResponse),
        (status = 401, description = "Missing or unknown API key"),
        (status = 404, description = "User not found")
    ),
    security(("api_key" = [])),
    tag = "users"
)]
pub async fn add_start(
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    store: Extension<Arc<dyn Store>>,
    registration: Extension<RegistrationFlow>,
    payload: Option<Json<AddCredentialRequest>>,
) -> Response {
    let tenant = match require_tenant(&headers, store.0.as_ref()).await {
        Ok(tenant) => tenant,
        Err(response) => return *response,
    };

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let hint = RelyingPartyHint {
        hostname: request.relying_party_hostname,
        display_name: request.relying_party_name,
    };

    match registration
        .start_add_credential(user_id, Some(&tenant), &hint)
        .await
    {
        Ok(start) => (
            StatusCode::OK,
            Json(StartResponse {
                request_id: start.request_id,
                options: start.options,
            }),
        )
            .into_response(),
        Err(err) => ceremony_error_response(&err, &headers),
    }
}

/// Lists the passkeys of a user, oldest first.
#[utoipa::path(
    get,
    path = "/v1/users/{id}/credentials",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Registered passkeys", body = CredentialsResponse),
        (status = 401, description = "Missing or unknown API key"),
        (status = 404, description = "User not found")
    ),
    security(("api_key" = [])),
    tag = "users"
)]
pub async fn list_credentials(
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    store: Extension<Arc<dyn Store>>,
    registration: Extension<RegistrationFlow>,
) -> Response {
    let tenant = match require_tenant(&headers, store.0.as_ref()).await {
        Ok(tenant) => tenant,
        Err(response) => return *response,
    };

    match registration.credentials(user_id, Some(&tenant)).await {
        Ok(credentials) => (
            StatusCode::OK,
            Json(CredentialsResponse {
                credentials: credentials.into_iter().map(CredentialSummary::from).collect(),
            }),
        )
            .into_response(),
        Err(err) => ceremony_error_response(&err, &headers),
    }
}
