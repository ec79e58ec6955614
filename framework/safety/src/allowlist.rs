use std::net::IpAddr;

use simcity_core::prelude::{parse_allow_list, DeployEnvironment, EnvironmentError};
use url::{Host, Url};

use crate::SafetyError;

/// Environment variable listing extra host names, comma separated, that synthetic traffic may
/// target in addition to the built-in loopback and staging rules.
pub const SIMCITY_ALLOWED_TARGET_HOSTS_ENV: &str = "SIMCITY_ALLOWED_TARGET_HOSTS";

const BUILT_IN_HOSTS: &[&str] = &["localhost", "host.docker.internal"];
const STAGING_MARKER: &str = "staging";

/// Decides whether a URL may receive synthetic traffic.
#[derive(Debug, Clone)]
pub struct TargetAllowlist {
    environment: DeployEnvironment,
    extra_hosts: Vec<String>,
}

impl TargetAllowlist {
    pub fn new(environment: DeployEnvironment, extra_hosts: Vec<String>) -> Self {
        Self {
            environment,
            extra_hosts: extra_hosts
                .into_iter()
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
        }
    }

    /// Build from `DEPLOY_ENV` and [SIMCITY_ALLOWED_TARGET_HOSTS_ENV].
    pub fn from_env() -> Self {
        let extra = std::env::var(SIMCITY_ALLOWED_TARGET_HOSTS_ENV)
            .map(|v| parse_allow_list(&v))
            .unwrap_or_default();
        Self::new(DeployEnvironment::from_env(), extra)
    }

    pub fn environment(&self) -> &DeployEnvironment {
        &self.environment
    }

    /// Check a URL, returning it parsed when it may be targeted.
    pub fn check(&self, raw: &str) -> Result<Url, SafetyError> {
        let url = Url::parse(raw.trim()).map_err(|e| SafetyError::InvalidTarget {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(SafetyError::InvalidTarget {
                url: raw.to_string(),
                reason: format!("unsupported scheme {}", url.scheme()),
            });
        }

        if !url.username().is_empty() || url.password().is_some() {
            return Err(SafetyError::InvalidTarget {
                url: redact(&url),
                reason: "credentials are not allowed in target URLs".to_string(),
            });
        }

        if self.environment.is_production() {
            return Err(SafetyError::EnvironmentNotAllowed(
                EnvironmentError::Production,
            ));
        }

        let allowed = match url.host() {
            Some(Host::Ipv4(ip)) => ip.is_loopback(),
            Some(Host::Ipv6(ip)) => ip.is_loopback(),
            Some(Host::Domain(domain)) => self.domain_allowed(domain),
            None => false,
        };

        if !allowed {
            log::error!("Refusing synthetic request to {}", redact(&url));
            return Err(SafetyError::TargetNotAllowed(redact(&url)));
        }

        Ok(url)
    }

    pub fn is_allowed(&self, raw: &str) -> bool {
        self.check(raw).is_ok()
    }

    fn domain_allowed(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return ip.is_loopback();
        }

        BUILT_IN_HOSTS.contains(&domain.as_str())
            || domain.contains(STAGING_MARKER)
            || self.extra_hosts.iter().any(|h| *h == domain)
    }
}

/// Canonical form of a target base URL: no query, no fragment, no trailing slash.
pub fn normalize_target(raw: &str) -> Result<String, SafetyError> {
    let mut url = Url::parse(raw.trim()).map_err(|e| SafetyError::InvalidTarget {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.set_query(None);
    clean.to_string()
}
