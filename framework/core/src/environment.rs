use std::fmt;

/// Environment variable classifying the deployment the process runs in.
pub const DEPLOY_ENV_ENV: &str = "DEPLOY_ENV";

/// Environment variable listing, comma separated, the deployments in which SimCity may run.
pub const SIMCITY_ALLOWED_ENVS_ENV: &str = "SIMCITY_ALLOWED_ENVS";

/// How the current deployment is classified.
///
/// Anything other than [DeployEnvironment::Production] is a candidate for synthetic traffic, but
/// see [ensure_simcity_allowed] for the stricter opt-in check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployEnvironment {
    Production,
    Staging,
    Test,
    Development,
    Other(String),
    Unknown,
}

impl DeployEnvironment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "" => Self::Unknown,
            "production" | "prod" => Self::Production,
            "staging" => Self::Staging,
            "test" => Self::Test,
            "development" | "dev" | "local" => Self::Development,
            other => Self::Other(other.to_string()),
        }
    }

    /// Read the classification from [DEPLOY_ENV_ENV].
    pub fn from_env() -> Self {
        std::env::var(DEPLOY_ENV_ENV)
            .map(|v| Self::parse(&v))
            .unwrap_or(Self::Unknown)
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
            Self::Development => "development",
            Self::Other(name) => name,
            Self::Unknown => "",
        }
    }
}

impl fmt::Display for DeployEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "<unset>"),
            other => write!(f, "{}", other.name()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("SimCity is not allowed in production")]
    Production,
    #[error("DEPLOY_ENV is required to run SimCity")]
    MissingDeployEnv,
    #[error("SIMCITY_ALLOWED_ENVS is required and must be non-empty")]
    EmptyAllowList,
    #[error("SimCity is not allowed in DEPLOY_ENV=\"{0}\"")]
    NotAllowed(String),
}

/// Split a comma separated list, trimming entries and dropping empty ones.
pub fn parse_allow_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_lowercase())
        .filter(|entry| !entry.is_empty())
        .collect()
}

/// Operational invariant for anything that produces synthetic traffic: the deployment must be
/// classified, must not be production, and must be explicitly listed in
/// [SIMCITY_ALLOWED_ENVS_ENV].
pub fn ensure_simcity_allowed() -> Result<DeployEnvironment, EnvironmentError> {
    let env = DeployEnvironment::from_env();
    let allowed = std::env::var(SIMCITY_ALLOWED_ENVS_ENV)
        .map(|v| parse_allow_list(&v))
        .unwrap_or_default();

    check_allowed(&env, &allowed)?;
    Ok(env)
}

fn check_allowed(env: &DeployEnvironment, allowed: &[String]) -> Result<(), EnvironmentError> {
    if env.is_production() {
        return Err(EnvironmentError::Production);
    }
    if *env == DeployEnvironment::Unknown {
        return Err(EnvironmentError::MissingDeployEnv);
    }
    if allowed.is_empty() {
        return Err(EnvironmentError::EmptyAllowList);
    }
    if !allowed.iter().any(|a| a == env.name()) {
        return Err(EnvironmentError::NotAllowed(env.name().to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_classifications() {
        assert_eq!(DeployEnvironment::parse("PRODUCTION"), DeployEnvironment::Production);
        assert_eq!(DeployEnvironment::parse(" staging "), DeployEnvironment::Staging);
        assert_eq!(DeployEnvironment::parse(""), DeployEnvironment::Unknown);
        assert_eq!(
            DeployEnvironment::parse("recovery"),
            DeployEnvironment::Other("recovery".to_string())
        );
    }

    #[test]
    fn allow_list_parsing_drops_blanks() {
        assert_eq!(parse_allow_list(" test, ,Staging,"), vec!["test", "staging"]);
    }

    #[test]
    fn production_is_never_allowed() {
        let allowed = vec!["production".to_string()];
        assert_eq!(
            check_allowed(&DeployEnvironment::Production, &allowed),
            Err(EnvironmentError::Production)
        );
    }

    #[test]
    fn unlisted_environment_is_rejected() {
        let allowed = vec!["test".to_string()];
        assert_eq!(
            check_allowed(&DeployEnvironment::Staging, &allowed),
            Err(EnvironmentError::NotAllowed("staging".to_string()))
        );
        assert_eq!(
            check_allowed(&DeployEnvironment::Staging, &[]),
            Err(EnvironmentError::EmptyAllowList)
        );
        assert_eq!(
            check_allowed(&DeployEnvironment::Unknown, &allowed),
            Err(EnvironmentError::MissingDeployEnv)
        );
    }

    #[test]
    #[serial]
    fn ensure_allowed_reads_environment() {
        std::env::set_var(DEPLOY_ENV_ENV, "test");
        std::env::set_var(SIMCITY_ALLOWED_ENVS_ENV, "test,staging");
        assert_eq!(ensure_simcity_allowed(), Ok(DeployEnvironment::Test));

        std::env::set_var(DEPLOY_ENV_ENV, "production");
        assert_eq!(ensure_simcity_allowed(), Err(EnvironmentError::Production));

        std::env::remove_var(DEPLOY_ENV_ENV);
        std::env::remove_var(SIMCITY_ALLOWED_ENVS_ENV);
    }
}
