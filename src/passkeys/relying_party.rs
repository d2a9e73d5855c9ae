use super::error::CeremonyError;
use crate::store::Tenant;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

pub const DEFAULT_RP_HOSTNAME: &str = "localhost";
pub const DEFAULT_RP_DISPLAY_NAME: &str = "Passkeys";

/// Server-wide relying party defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelyingPartyDefaults {
    hostname: String,
    display_name: String,
    allow_origin_port: bool,
}

impl RelyingPartyDefaults {
    /// Create relying party defaults.
    ///
    /// # Errors
    /// Returns error if the hostname is empty or not a bare host.
    pub fn new(hostname: String, display_name: String, allow_origin_port: bool) -> Result<Self> {
        let hostname = normalize_hostname(&hostname)
            .ok_or_else(|| anyhow!("Relying party hostname must not be empty"))?;
        origin_for(&hostname)?;

        let display_name = display_name.trim().to_string();
        Ok(Self {
            display_name: if display_name.is_empty() {
                hostname.clone()
            } else {
                display_name
            },
            hostname,
            allow_origin_port,
        })
    }

    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn allow_origin_port(&self) -> bool {
        self.allow_origin_port
    }
}

impl Default for RelyingPartyDefaults {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_RP_HOSTNAME.to_string(),
            display_name: DEFAULT_RP_DISPLAY_NAME.to_string(),
            allow_origin_port: true,
        }
    }
}

/// What a ceremony records about its relying party so finish can rebuild it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyParams {
    pub hostname: String,
    pub display_name: String,
}

/// Relying party parameters supplied with a single request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RelyingPartyHint {
    pub hostname: Option<String>,
    pub display_name: Option<String>,
}

/// The identity an authenticator binds credentials to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelyingPartyIdentity {
    pub id: String,
    pub name: String,
    pub allow_origin_port: bool,
}

impl RelyingPartyIdentity {
    /// Origin browsers report for this relying party.
    ///
    /// # Errors
    /// Returns error if the id does not form a valid URL host.
    pub fn origin(&self) -> Result<Url> {
        origin_for(&self.id)
    }

    #[must_use]
    pub fn params(&self) -> RelyingPartyParams {
        RelyingPartyParams {
            hostname: self.id.clone(),
            display_name: self.name.clone(),
        }
    }
}

/// Builds relying party identities. Explicit parameters win over tenant
/// overrides, which win over server defaults.
#[derive(Clone, Debug, Default)]
pub struct RelyingPartyResolver {
    defaults: RelyingPartyDefaults,
}

impl RelyingPartyResolver {
    #[must_use]
    pub fn new(defaults: RelyingPartyDefaults) -> Self {
        Self { defaults }
    }

    #[must_use]
    pub fn defaults(&self) -> &RelyingPartyDefaults {
        &self.defaults
    }

    /// Resolve the relying party for one request.
    ///
    /// # Errors
    /// `InvalidRelyingParty` when an explicit hostname is not a bare host.
    /// Invalid tenant overrides are skipped in favour of the server default.
    pub fn resolve(
        &self,
        tenant: Option<&Tenant>,
        hostname: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<RelyingPartyIdentity, CeremonyError> {
        let explicit = match hostname.and_then(normalize_hostname) {
            Some(hostname) => match origin_for(&hostname) {
                Ok(_) => Some(hostname),
                Err(err) => return Err(CeremonyError::InvalidRelyingParty(err.to_string())),
            },
            None => None,
        };

        let id = explicit
            .or_else(|| tenant.and_then(tenant_hostname))
            .unwrap_or_else(|| self.defaults.hostname.clone());

        let name = non_blank(display_name)
            .or_else(|| non_blank(tenant.and_then(|tenant| tenant.relying_party_name.as_deref())))
            .unwrap_or_else(|| self.defaults.display_name.clone());

        Ok(RelyingPartyIdentity {
            id,
            name,
            allow_origin_port: self.defaults.allow_origin_port,
        })
    }

    /// # Errors
    /// Same as [`RelyingPartyResolver::resolve`].
    pub fn resolve_hint(
        &self,
        tenant: Option<&Tenant>,
        hint: &RelyingPartyHint,
    ) -> Result<RelyingPartyIdentity, CeremonyError> {
        self.resolve(tenant, hint.hostname.as_deref(), hint.display_name.as_deref())
    }

    /// Rebuild the identity a ceremony was started with.
    #[must_use]
    pub fn rebuild(&self, params: &RelyingPartyParams) -> RelyingPartyIdentity {
        RelyingPartyIdentity {
            id: params.hostname.clone(),
            name: params.display_name.clone(),
            allow_origin_port: self.defaults.allow_origin_port,
        }
    }
}

fn tenant_hostname(tenant: &Tenant) -> Option<String> {
    let hostname = tenant
        .relying_party_hostname
        .as_deref()
        .and_then(normalize_hostname)?;
    match origin_for(&hostname) {
        Ok(_) => Some(hostname),
        Err(err) => {
            warn!(tenant.id = %tenant.id, "ignoring tenant relying party: {err}");
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
}

fn normalize_hostname(hostname: &str) -> Option<String> {
    let hostname = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    if hostname.is_empty() {
        None
    } else {
        Some(hostname)
    }
}

fn origin_for(hostname: &str) -> Result<Url> {
    let scheme = if hostname == "localhost" { "http" } else { "https" };
    let origin = Url::parse(&format!("{scheme}://{hostname}"))
        .with_context(|| format!("Invalid relying party hostname: {hostname}"))?;
    if origin.host_str() != Some(hostname) || origin.path() != "/" {
        return Err(anyhow!("Relying party hostname must be a bare host: {hostname}"));
    }
    Ok(origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn tenant(hostname: Option<&str>, name: Option<&str>) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: "Acme".to_string(),
            relying_party_hostname: hostname.map(ToString::to_string),
            relying_party_name: name.map(ToString::to_string),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn resolver() -> Result<RelyingPartyResolver> {
        Ok(RelyingPartyResolver::new(RelyingPartyDefaults::new(
            "passkeys.example".to_string(),
            "Passkeys".to_string(),
            false,
        )?))
    }

    #[test]
    fn defaults_apply_without_tenant_or_parameters() -> Result<()> {
        let identity = resolver()?.resolve(None, None, None)?;
        assert_eq!(identity.id, "passkeys.example");
        assert_eq!(identity.name, "Passkeys");
        assert!(!identity.allow_origin_port);
        Ok(())
    }

    #[test]
    fn tenant_overrides_defaults() -> Result<()> {
        let tenant = tenant(Some("Login.Acme.Test"), Some("Acme Login"));
        let identity = resolver()?.resolve(Some(&tenant), None, None)?;
        assert_eq!(identity.id, "login.acme.test");
        assert_eq!(identity.name, "Acme Login");
        Ok(())
    }

    #[test]
    fn explicit_parameters_override_tenant() -> Result<()> {
        let tenant = tenant(Some("login.acme.test"), Some("Acme Login"));
        let identity = resolver()?.resolve(Some(&tenant), Some("id.acme.test"), Some("  "))?;
        assert_eq!(identity.id, "id.acme.test");
        assert_eq!(identity.name, "Acme Login");
        Ok(())
    }

    #[test]
    fn blank_tenant_fields_fall_back() -> Result<()> {
        let tenant = tenant(Some(" "), None);
        let identity = resolver()?.resolve(Some(&tenant), None, None)?;
        assert_eq!(identity.id, "passkeys.example");
        Ok(())
    }

    #[test]
    fn rebuild_uses_recorded_params() -> Result<()> {
        let resolver = resolver()?;
        let tenant = tenant(Some("login.acme.test"), Some("Acme Login"));
        let started = resolver.resolve(Some(&tenant), None, None)?;
        let rebuilt = resolver.rebuild(&started.params());
        assert_eq!(started, rebuilt);
        Ok(())
    }

    #[test]
    fn origin_scheme_depends_on_host() -> Result<()> {
        let local = RelyingPartyResolver::default().resolve(None, None, None)?;
        assert_eq!(local.origin()?.as_str(), "http://localhost/");

        let remote = resolver()?.resolve(None, None, None)?;
        assert_eq!(remote.origin()?.as_str(), "https://passkeys.example/");
        Ok(())
    }

    #[test]
    fn defaults_reject_invalid_hostnames() {
        assert!(RelyingPartyDefaults::new(" ".to_string(), "x".to_string(), true).is_err());
        assert!(
            RelyingPartyDefaults::new("example.com/path".to_string(), "x".to_string(), true)
                .is_err()
        );
    }

    #[test]
    fn explicit_hostname_must_be_a_bare_host() -> Result<()> {
        let err = resolver()?
            .resolve(None, Some("example.com/evil"), None)
            .err()
            .ok_or_else(|| anyhow!("path accepted as hostname"))?;
        assert!(matches!(err, CeremonyError::InvalidRelyingParty(_)));

        let hint = RelyingPartyHint {
            hostname: Some("user@example.com".to_string()),
            display_name: None,
        };
        assert!(matches!(
            resolver()?.resolve_hint(None, &hint),
            Err(CeremonyError::InvalidRelyingParty(_))
        ));
        Ok(())
    }

    #[test]
    fn invalid_tenant_hostname_falls_back_to_default() -> Result<()> {
        let tenant = tenant(Some("acme.test:8443/login"), Some("Acme Login"));
        let identity = resolver()?.resolve(Some(&tenant), None, None)?;
        assert_eq!(identity.id, "passkeys.example");
        assert_eq!(identity.name, "Acme Login");
        Ok(())
    }
}
