use super::handlers::{credentials, health, users};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        credentials::signup_start,
        credentials::signup_finish,
        credentials::signin_start,
        credentials::signin_finish,
        credentials::add_finish,
        users::add_start,
        users::list_credentials,
    ),
    components(schemas(
        health::Health,
        credentials::SignupStartRequest,
        credentials::SigninStartRequest,
        credentials::FinishRequest,
        credentials::StartResponse,
        credentials::SigninStartResponse,
        credentials::RegistrationResponse,
        credentials::SigninFinishResponse,
        users::AddCredentialRequest,
        users::CredentialSummary,
        users::CredentialsResponse,
    )),
    modifiers(&ApiKeyAddon),
    tags(
        (name = "credentials", description = "Passkey registration and sign-in ceremonies"),
        (name = "users", description = "Passkeys of existing users"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct ApiKeyAddon;

impl Modify for ApiKeyAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("X-Api-Key"))),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
