use crate::{store::Store, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Store is healthy", body = [Health]),
        (status = 503, description = "Store is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(method: Method, store: Extension<Arc<dyn Store>>) -> impl IntoResponse {
    let ping_span = info_span!("db.ping", db.operation = "PING");
    let result = store.0.ping().instrument(ping_span).await.map_err(|err| {
        error!("Failed to ping store: {}", err);
    });

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);

            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_else(|err| {
            error!("Failed to parse X-App header: {}", err);
            HeaderMap::new()
        });

    let status = if result.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        CredentialUsage, MemoryStore, NewUser, NewUserCredential, StoreError, Tenant, User,
        UserCredential,
    };
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::{body::to_bytes, response::Response, routing::get, Router};
    use secrecy::SecretString;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct DownStore;

    fn down() -> StoreError {
        StoreError::Database(sqlx::Error::PoolTimedOut)
    }

    #[async_trait]
    impl Store for DownStore {
        async fn find_tenant_by_api_key(
            &self,
            _: &SecretString,
        ) -> Result<Option<Tenant>, StoreError> {
            Err(down())
        }
        async fn find_user(&self, _: Uuid) -> Result<Option<User>, StoreError> {
            Err(down())
        }
        async fn find_user_by_name(&self, _: &str) -> Result<Option<User>, StoreError> {
            Err(down())
        }
        async fn find_user_by_user_handle(&self, _: &str) -> Result<Option<User>, StoreError> {
            Err(down())
        }
        async fn first_credential_for_username(
            &self,
            _: &str,
        ) -> Result<Option<UserCredential>, StoreError> {
            Err(down())
        }
        async fn credentials_for_user(&self, _: Uuid) -> Result<Vec<UserCredential>, StoreError> {
            Err(down())
        }
        async fn credentials_for_user_handle(
            &self,
            _: &str,
        ) -> Result<Vec<UserCredential>, StoreError> {
            Err(down())
        }
        async fn find_credential(
            &self,
            _: &str,
            _: &str,
        ) -> Result<Option<UserCredential>, StoreError> {
            Err(down())
        }
        async fn create_user_with_credential(
            &self,
            _: NewUser,
            _: NewUserCredential,
        ) -> Result<User, StoreError> {
            Err(down())
        }
        async fn add_credential(
            &self,
            _: Uuid,
            _: NewUserCredential,
        ) -> Result<UserCredential, StoreError> {
            Err(down())
        }
        async fn update_credential_usage(
            &self,
            _: &str,
            _: &str,
            _: CredentialUsage,
        ) -> Result<bool, StoreError> {
            Err(down())
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Err(down())
        }
    }

    async fn call(store: Arc<dyn Store>, method: Method) -> Result<Response> {
        let app = Router::new()
            .route("/health", get(health).options(health))
            .layer(Extension(store));
        let request = axum::http::Request::builder()
            .method(method)
            .uri("/health")
            .body(Body::empty())?;
        Ok(app.oneshot(request).await?)
    }

    #[tokio::test]
    async fn healthy_store_returns_build_info() -> Result<()> {
        let response = call(Arc::new(MemoryStore::new()), Method::GET).await?;
        assert_eq!(response.status(), StatusCode::OK);

        let x_app = response
            .headers()
            .get("X-App")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(x_app.starts_with(&format!(
            "{}:{}:",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )));

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: Health = serde_json::from_slice(&body)?;
        assert_eq!(health.database, "ok");
        assert_eq!(health.name, env!("CARGO_PKG_NAME"));
        Ok(())
    }

    #[tokio::test]
    async fn options_has_empty_body() -> Result<()> {
        let response = call(Arc::new(MemoryStore::new()), Method::OPTIONS).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        assert!(body.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() -> Result<()> {
        let response = call(Arc::new(DownStore), Method::GET).await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: Health = serde_json::from_slice(&body)?;
        assert_eq!(health.database, "error");
        Ok(())
    }
}
