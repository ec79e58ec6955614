/// Shared secret for internal services, presented as `Authorization: Bearer <token>`.
pub const SIMCITY_INTERNAL_TOKEN_ENV: &str = "SIMCITY_INTERNAL_TOKEN";

/// Administrator secret, presented as `X-Admin-Token: <token>`.
pub const SIMCITY_ADMIN_TOKEN_ENV: &str = "SIMCITY_ADMIN_TOKEN";

/// Who is asking for a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Internal,
    Admin,
}

/// Credential header values as received, if present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub authorization: Option<String>,
    pub admin_token: Option<String>,
}

/// The configured secrets. An unset or empty secret accepts nobody.
#[derive(Debug, Clone, Default)]
pub struct PurgeAuth {
    internal_token: Option<String>,
    admin_token: Option<String>,
}

impl PurgeAuth {
    pub fn new(internal_token: Option<String>, admin_token: Option<String>) -> Self {
        let non_empty = |token: Option<String>| token.filter(|t| !t.trim().is_empty());
        Self {
            internal_token: non_empty(internal_token),
            admin_token: non_empty(admin_token),
        }
    }

    pub fn from_env() -> Self {
        Self::new(
            std::env::var(SIMCITY_INTERNAL_TOKEN_ENV).ok(),
            std::env::var(SIMCITY_ADMIN_TOKEN_ENV).ok(),
        )
    }

    pub fn authenticate(&self, credentials: &Credentials) -> Option<Caller> {
        let bearer = credentials
            .authorization
            .as_deref()
            .and_then(|value| value.trim().strip_prefix("Bearer "))
            .map(str::trim);

        if matches_secret(bearer, self.internal_token.as_deref()) {
            return Some(Caller::Internal);
        }
        if matches_secret(
            credentials.admin_token.as_deref().map(str::trim),
            self.admin_token.as_deref(),
        ) {
            return Some(Caller::Admin);
        }

        None
    }
}

fn matches_secret(presented: Option<&str>, expected: Option<&str>) -> bool {
    match (presented, expected) {
        (Some(presented), Some(expected)) => constant_time_eq(presented, expected),
        _ => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}
