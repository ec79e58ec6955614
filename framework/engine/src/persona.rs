use std::fmt;

use serde::{Deserialize, Serialize};
use simcity_core::prelude::{Seed, SimRng};

const FIRST_NAMES: &[&str] = &[
    "Ada", "Bo", "Cleo", "Dev", "Eun", "Femi", "Gus", "Hana", "Ivo", "Jun", "Kai", "Lena", "Milo",
    "Nia", "Oren", "Pia",
];
const LAST_NAMES: &[&str] = &[
    "Archer", "Brook", "Castro", "Dale", "Ekwueme", "Frost", "Grove", "Holt", "Ito", "Jansen",
];

const CHATTY_CHANCE: f64 = 0.3;
const PATIENT_CHANCE: f64 = 0.5;
const STRICT_CHANCE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Customer,
    Vendor,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Customer => "customer",
            AgentKind::Vendor => "vendor",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub kind: AgentKind,
    pub index: u64,
    pub agent_id: String,
    pub display_name: String,
    pub email: String,
    pub chatty: bool,
    pub patient: bool,
    pub strict: bool,
}

/// The persona of the `index`th agent of `kind` for a seed.
///
/// Pure: each persona draws from its own PRNG stream, so it does not depend on how many other
/// agents have been generated or in which order.
pub fn generate_persona(seed: &Seed, kind: AgentKind, index: u64) -> Persona {
    let mut rng = SimRng::for_stream(seed, &format!("persona/{kind}"), index);

    let first = FIRST_NAMES[rng.below(FIRST_NAMES.len())];
    let last = LAST_NAMES[rng.below(LAST_NAMES.len())];
    let token = rng.hex_token(8);

    Persona {
        kind,
        index,
        agent_id: format!("{kind}-{index}"),
        display_name: format!("{first} {last}"),
        email: format!("simcity+{kind}-{index}-{token}@synthetic.simcity.test"),
        chatty: rng.chance(CHATTY_CHANCE),
        patient: rng.chance(PATIENT_CHANCE),
        strict: rng.chance(STRICT_CHANCE),
    }
}
