use crate::{
    api::handlers::{credentials, health, users},
    passkeys::{AssertionFlow, CeremonyContext, RegistrationFlow, UnknownAccountPolicy},
    store::Store,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::{openapi, ApiDoc};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with every route and shared layer.
#[must_use]
pub fn router(
    store: Arc<dyn Store>,
    context: CeremonyContext,
    policy: UnknownAccountPolicy,
) -> Router {
    let registration = RegistrationFlow::new(context.clone());
    let assertion = AssertionFlow::new(context, policy);

    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route(
            "/v1/credentials/signup/start",
            post(credentials::signup_start),
        )
        .route(
            "/v1/credentials/signup/finish",
            post(credentials::signup_finish),
        )
        .route(
            "/v1/credentials/signin/start",
            post(credentials::signin_start),
        )
        .route(
            "/v1/credentials/signin/finish",
            post(credentials::signin_finish),
        )
        .route("/v1/credentials/add/finish", post(credentials::add_finish))
        .route("/v1/users/:id/credentials", get(users::list_credentials))
        .route("/v1/users/:id/credentials/add/start", post(users::add_start))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static(REQUEST_ID_HEADER),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    REQUEST_ID_HEADER,
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(store))
                .layer(Extension(registration))
                .layer(Extension(assertion)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, app: Router) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
