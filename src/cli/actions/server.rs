use crate::{
    api,
    passkeys::{
        cache, CeremonyContext, ChallengeCache, CredentialRepository, RelyingPartyDefaults,
        RelyingPartyResolver, UnknownAccountPolicy, WebauthnVerifier,
    },
    store::{MemoryStore, PgStore, Store, Tenant},
};
use anyhow::{Context, Result};
use chrono::Utc;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use uuid::Uuid;

pub const MEMORY_DSN: &str = "memory://";

/// Name of the tenant seeded into a `memory://` store.
pub const MEMORY_TENANT_NAME: &str = "local";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub memory_api_key: Option<SecretString>,
    pub rp_hostname: String,
    pub rp_display_name: String,
    pub rp_allow_origin_port: bool,
    pub challenge_ttl_seconds: u64,
    pub challenge_cache_max_entries: usize,
    pub unknown_account_policy: UnknownAccountPolicy,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the configuration is invalid, the database is
/// unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let defaults = RelyingPartyDefaults::new(
        args.rp_hostname,
        args.rp_display_name,
        args.rp_allow_origin_port,
    )
    .context("Invalid relying party configuration")?;

    let store = connect(&args.dsn, args.memory_api_key.as_ref()).await?;

    let ttl = Duration::from_secs(args.challenge_ttl_seconds);
    let cache = Arc::new(ChallengeCache::new(ttl, args.challenge_cache_max_entries));
    let purger = cache::spawn_purger(Arc::clone(&cache), purge_interval(ttl));

    let context = CeremonyContext::new(
        cache,
        RelyingPartyResolver::new(defaults),
        CredentialRepository::new(Arc::clone(&store)),
        Arc::new(WebauthnVerifier::new()),
    );

    info!(
        ttl_seconds = args.challenge_ttl_seconds,
        max_entries = args.challenge_cache_max_entries,
        unknown_account_policy = %args.unknown_account_policy,
        "ceremonies configured"
    );

    let result = api::new(
        args.port,
        api::router(store, context, args.unknown_account_policy),
    )
    .await;

    purger.abort();

    result
}

async fn connect(dsn: &str, memory_api_key: Option<&SecretString>) -> Result<Arc<dyn Store>> {
    if dsn == MEMORY_DSN {
        warn!("Using in-memory store, nothing survives a restart");
        let store = MemoryStore::new();
        match memory_api_key {
            Some(api_key) => {
                let tenant = Tenant {
                    id: Uuid::new_v4(),
                    name: MEMORY_TENANT_NAME.to_string(),
                    relying_party_hostname: None,
                    relying_party_name: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                info!(
                    tenant.id = %tenant.id,
                    tenant.name = MEMORY_TENANT_NAME,
                    "seeded in-memory tenant"
                );
                store.insert_tenant(tenant, api_key).await;
            }
            None => warn!("No --memory-api-key, every request will be rejected"),
        }
        return Ok(Arc::new(store));
    }

    if memory_api_key.is_some() {
        warn!("--memory-api-key only applies to {MEMORY_DSN}, ignoring it");
    }

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    Ok(Arc::new(PgStore::new(pool)))
}

/// Half the TTL, at least one second.
fn purge_interval(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[test]
    fn purge_runs_twice_per_ttl() {
        assert_eq!(
            purge_interval(Duration::from_secs(300)),
            Duration::from_secs(150)
        );
        assert_eq!(purge_interval(Duration::from_secs(1)), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn memory_dsn_needs_no_database() -> Result<()> {
        let store = connect(MEMORY_DSN, None).await?;
        store.ping().await?;
        let key = SecretString::from("anything".to_string());
        assert!(store.find_tenant_by_api_key(&key).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn memory_api_key_seeds_a_usable_tenant() -> Result<()> {
        let key = SecretString::from("local-key".to_string());
        let store = connect(MEMORY_DSN, Some(&key)).await?;
        let tenant = store
            .find_tenant_by_api_key(&key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("tenant was not seeded"))?;
        assert_eq!(tenant.name, MEMORY_TENANT_NAME);

        let defaults =
            RelyingPartyDefaults::new("localhost".to_string(), "Passkeys".to_string(), true)?;
        let context = CeremonyContext::new(
            Arc::new(ChallengeCache::new(Duration::from_secs(60), 100)),
            RelyingPartyResolver::new(defaults),
            CredentialRepository::new(Arc::clone(&store)),
            Arc::new(WebauthnVerifier::new()),
        );
        let app = api::router(store, context, UnknownAccountPolicy::Register);

        for (api_key, expected) in [
            (Some("local-key"), StatusCode::OK),
            (Some("other-key"), StatusCode::UNAUTHORIZED),
            (None, StatusCode::UNAUTHORIZED),
        ] {
            let mut request = Request::builder()
                .method("POST")
                .uri("/v1/credentials/signup/start")
                .header("content-type", "application/json");
            if let Some(api_key) = api_key {
                request = request.header("X-Api-Key", api_key);
            }
            let request = request.body(Body::from(r#"{"name":"alice"}"#))?;
            let response = app.clone().oneshot(request).await?;
            assert_eq!(response.status(), expected, "{api_key:?}");
        }
        Ok(())
    }
}
