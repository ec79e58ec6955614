use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Run intensity class. Each tier carries its own default budgets, see the harness plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Smoke,
    Soak,
    Stress,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Smoke, Tier::Soak, Tier::Stress];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Smoke => "smoke",
            Tier::Soak => "soak",
            Tier::Stress => "stress",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(derive_more::Error, derive_more::Display, Debug, PartialEq, Eq)]
#[display("Unknown tier '{tier}', expected one of smoke, soak, stress")]
pub struct UnknownTier {
    tier: String,
}

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smoke" => Ok(Tier::Smoke),
            "soak" => Ok(Tier::Soak),
            "stress" => Ok(Tier::Stress),
            other => Err(UnknownTier {
                tier: other.to_string(),
            }),
        }
    }
}
