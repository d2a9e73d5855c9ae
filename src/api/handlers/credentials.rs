use super::{ceremony_error_response, client_response_text, tenant::require_tenant};
use crate::{
    passkeys::{AssertionFlow, RegistrationFinish, RegistrationFlow, RelyingPartyHint},
    store::Store,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SignupStartRequest {
    pub name: String,
    pub relying_party_hostname: Option<String>,
    pub relying_party_name: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SigninStartRequest {
    pub name: Option<String>,
    pub relying_party_hostname: Option<String>,
    pub relying_party_name: Option<String>,
}

/// The browser's `PublicKeyCredential`, as an object or as a JSON string.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FinishRequest {
    pub request_id: String,
    #[schema(value_type = Object)]
    pub public_key_credential: Value,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub request_id: String,
    /// `PublicKeyCredentialCreationOptions` or `PublicKeyCredentialRequestOptions`.
    #[schema(value_type = Object)]
    pub options: Value,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SigninStartResponse {
    pub request_id: String,
    #[schema(value_type = Object)]
    pub options: Value,
    /// `false` when the options start a registration instead.
    pub account_exists: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub request_id: String,
    pub user_id: Uuid,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SigninFinishResponse {
    pub request_id: String,
    pub username: String,
    pub user_id: Uuid,
}

impl From<RegistrationFinish> for RegistrationResponse {
    fn from(finish: RegistrationFinish) -> Self {
        Self {
            request_id: finish.request_id,
            user_id: finish.user_id,
        }
    }
}

fn hint(hostname: Option<String>, display_name: Option<String>) -> RelyingPartyHint {
    RelyingPartyHint {
        hostname,
        display_name,
    }
}

fn missing_payload() -> Response {
    (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response()
}

/// Starts registering a new account.
#[utoipa::path(
    post,
    path = "/v1/credentials/signup/start",
    request_body = SignupStartRequest,
    responses(
        (status = 200, description = "Credential creation options", body = StartResponse),
        (status = 400, description = "Missing payload or invalid username"),
        (status = 401, description = "Missing or unknown API key"),
        (status = 409, description = "Username already registered")
    ),
    security(("api_key" = [])),
    tag = "credentials"
)]
pub async fn signup_start(
    headers: HeaderMap,
    store: Extension<Arc<dyn Store>>,
    registration: Extension<RegistrationFlow>,
    payload: Option<Json<SignupStartRequest>>,
) -> Response {
    let tenant = match require_tenant(&headers, store.0.as_ref()).await {
        Ok(tenant) => tenant,
        Err(response) => return *response,
    };

    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let hint = hint(request.relying_party_hostname, request.relying_party_name);

    match registration.start(&request.name, Some(&tenant), &hint).await {
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

/// Completes a registration and creates the account.
#[utoipa::path(
    post,
    path = "/v1/credentials/signup/finish",
    request_body = FinishRequest,
    responses(
        (status = 200, description = "Account created", body = RegistrationResponse),
        (status = 400, description = "Unknown or expired request, or rejected credential"),
        (status = 401, description = "Missing or unknown API key"),
        (status = 409, description = "Username already registered")
    ),
    security(("api_key" = [])),
    tag = "credentials"
)]
pub async fn signup_finish(
    headers: HeaderMap,
    store: Extension<Arc<dyn Store>>,
    registration: Extension<RegistrationFlow>,
    payload: Option<Json<FinishRequest>>,
) -> Response {
    if let Err(response) = require_tenant(&headers, store.0.as_ref()).await {
        return *response;
    }

    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let response = client_response_text(&request.public_key_credential);

    match registration.finish(&request.request_id, &response).await {
        Ok(finish) => (StatusCode::OK, Json(RegistrationResponse::from(finish))).into_response(),
        Err(err) => ceremony_error_response(&err, &headers),
    }
}

/// Starts a sign-in. Without a name the browser offers discoverable passkeys.
#[utoipa::path(
    post,
    path = "/v1/credentials/signin/start",
    request_body = SigninStartRequest,
    responses(
        (status = 200, description = "Credential request options", body = SigninStartResponse),
        (status = 401, description = "Missing or unknown API key")
    ),
    security(("api_key" = [])),
    tag = "credentials"
)]
pub async fn signin_start(
    headers: HeaderMap,
    store: Extension<Arc<dyn Store>>,
    assertion: Extension<AssertionFlow>,
    payload: Option<Json<SigninStartRequest>>,
) -> Response {
    let tenant = match require_tenant(&headers, store.0.as_ref()).await {
        Ok(tenant) => tenant,
        Err(response) => return *response,
    };

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let hint = hint(request.relying_party_hostname, request.relying_party_name);

    match assertion
        .start(request.name.as_deref(), Some(&tenant), &hint)
        .await
    {
        Ok(start) => (
            StatusCode::OK,
            Json(SigninStartResponse {
                request_id: start.request_id,
                options: start.options,
                account_exists: start.account_exists,
            }),
        )
            .into_response(),
        Err(err) => ceremony_error_response(&err, &headers),
    }
}

/// Completes a sign-in.
#[utoipa::path(
    post,
    path = "/v1/credentials/signin/finish",
    request_body = FinishRequest,
    responses(
        (status = 200, description = "Signed in", body = SigninFinishResponse),
        (status = 400, description = "Unknown or expired request, or rejected assertion"),
        (status = 401, description = "Missing or unknown API key")
    ),
    security(("api_key" = [])),
    tag = "credentials"
)]
pub async fn signin_finish(
    headers: HeaderMap,
    store: Extension<Arc<dyn Store>>,
    assertion: Extension<AssertionFlow>,
    payload: Option<Json<FinishRequest>>,
) -> Response {
    if let Err(response) = require_tenant(&headers, store.0.as_ref()).await {
        return *response;
    }

    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let response = client_response_text(&request.public_key_credential);

    match assertion.finish(&request.request_id, &response).await {
        Ok(finish) => (
            StatusCode::OK,
            Json(SigninFinishResponse {
                request_id: finish.request_id,
                username: finish.username,
                user_id: finish.user_id,
            }),
        )
            .into_response(),
        Err(err) => ceremony_error_response(&err, &headers),
    }
}

/// Completes adding a passkey to an existing account.
#[utoipa::path(
    post,
    path = "/v1/credentials/add/finish",
    request_body = FinishRequest,
    responses(
        (status = 200, description = "Credential added", body = RegistrationResponse),
        (status = 400, description = "Unknown or expired request, or rejected credential"),
        (status = 401, description = "Missing or unknown API key"),
        (status = 404, description = "User not found")
    ),
    security(("api_key" = [])),
    tag = "credentials"
)]
pub async fn add_finish(
    headers: HeaderMap,
    store: Extension<Arc<dyn Store>>,
    registration: Extension<RegistrationFlow>,
    payload: Option<Json<FinishRequest>>,
) -> Response {
    if let Err(response) = require_tenant(&headers, store.0.as_ref()).await {
        return *response;
    }

    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let response = client_response_text(&request.public_key_credential);

    match registration
        .finish_add_credential(&request.request_id, &response)
        .await
    {
        Ok(finish) => (StatusCode::OK, Json(RegistrationResponse::from(finish))).into_response(),
        Err(err) => ceremony_error_response(&err, &headers),
    }
}
