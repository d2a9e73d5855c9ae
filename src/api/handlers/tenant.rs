use super::HandlerError;
use crate::store::{Store, Tenant};
use axum::{
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use secrecy::SecretString;
use tracing::{error, warn};

pub const API_KEY_HEADER: &str = "x-api-key";

/// Resolve the calling tenant from the `X-Api-Key` header.
///
/// # Errors
/// `401` when the header is missing or unknown, `500` when the store fails.
pub async fn require_tenant(headers: &HeaderMap, store: &dyn Store) -> Result<Tenant, HandlerError> {
    let Some(api_key) = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return Err(Box::new(
            (StatusCode::UNAUTHORIZED, "Missing API key".to_string()).into_response(),
        ));
    };

    let api_key = SecretString::from(api_key.to_string());

    match store.find_tenant_by_api_key(&api_key).await {
        Ok(Some(tenant)) => Ok(tenant),
        Ok(None) => {
            warn!("Unknown API key");
            Err(Box::new(
                (StatusCode::UNAUTHORIZED, "Invalid API key".to_string()).into_response(),
            ))
        }
        Err(err) => {
            error!("Failed to resolve tenant: {}", err);
            Err(Box::new(StatusCode::INTERNAL_SERVER_ERROR.into_response()))
        }
    }
}
