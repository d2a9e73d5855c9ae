pub mod credentials;
pub mod health;
pub mod tenant;
pub mod users;

pub use self::health::health;

// common functions for the handlers
use crate::{api::REQUEST_ID_HEADER, passkeys::CeremonyError};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, error, warn};

type HandlerError = Box<Response>;

fn http_request_id(headers: &HeaderMap) -> &str {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
}

/// Clients send the credential either as a JSON object or as the string
/// produced by `JSON.stringify`.
pub(crate) fn client_response_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Map a ceremony failure to a response with a fixed message. Causes stay in
/// the server logs.
pub(crate) fn ceremony_error_response(err: &CeremonyError, headers: &HeaderMap) -> Response {
    let http_request_id = http_request_id(headers);

    let (status, message) = match err {
        CeremonyError::RequestNotFoundOrExpired => {
            (StatusCode::BAD_REQUEST, "Request not found or expired")
        }
        CeremonyError::UsernameAlreadyRegistered => {
            (StatusCode::CONFLICT, "Username already registered")
        }
        CeremonyError::InvalidUsername => (StatusCode::BAD_REQUEST, "Invalid username"),
        CeremonyError::UserNotFound => (StatusCode::NOT_FOUND, "User not found"),
        CeremonyError::InvalidRelyingParty(reason) => {
            debug!(http_request_id, reason = %reason, "invalid relying party");
            (StatusCode::BAD_REQUEST, "Invalid relying party")
        }
        CeremonyError::MalformedClientResponse(reason) => {
            debug!(http_request_id, reason = %reason, "malformed client response");
            (StatusCode::BAD_REQUEST, "Malformed client response")
        }
        CeremonyError::RegistrationCeremonyFailed(source) => {
            warn!(http_request_id, error = %source, "registration ceremony failed");
            (StatusCode::BAD_REQUEST, "Registration failed")
        }
        CeremonyError::AssertionCeremonyFailed(source) => {
            warn!(http_request_id, error = %source, "assertion ceremony failed");
            (StatusCode::BAD_REQUEST, "Sign-in failed")
        }
        CeremonyError::ChallengeFailed(source) => {
            error!(http_request_id, error = %source, "failed to create challenge");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
        CeremonyError::StorageFailure(source) => {
            error!(http_request_id, error = %source, "storage failure");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    };

    (status, message.to_string()).into_response()
}
