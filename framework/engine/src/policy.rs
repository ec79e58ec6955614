use serde::{Deserialize, Serialize};

pub const DEFAULT_SKIN_FEE: f64 = 1.0;
pub const DEFAULT_VENDOR_OPEN_HOUR: u32 = 8;
pub const DEFAULT_VENDOR_CLOSE_HOUR: u32 = 18;
pub const DEFAULT_CUSTOMER_PATIENCE_THRESHOLD: u32 = 10;
pub const DEFAULT_RESCHEDULE_CHANCE: f64 = 0.35;
pub const DEFAULT_CANCEL_CHANCE: f64 = 0.15;
pub const DEFAULT_MAX_CONCURRENT_AGENTS: usize = 50;
pub const DEFAULT_TICK_SPEED_MS: u64 = 3000;
pub const DEFAULT_MINUTES_PER_TICK: u32 = 10;
pub const DEFAULT_CUSTOMER_SPAWN_RATE: f64 = 0.3;
pub const DEFAULT_VENDOR_SPAWN_RATE: f64 = 0.1;
pub const DEFAULT_MAX_SPAWNS_PER_TICK: u32 = 2;
pub const DEFAULT_MAX_AGENT_TICKS: u32 = 12;
pub const DEFAULT_SLOT_POOL_SIZE: u32 = 48;

/// Hours of the simulated day, `open <= hour < close`, during which vendors act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenHours {
    pub open: u32,
    pub close: u32,
}

impl OpenHours {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.open && hour < self.close
    }
}

/// Chaos configuration of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Flat fee charged for each simulated booking.
    pub skin_fee: f64,
    pub vendor_open_hours: OpenHours,
    /// Failed actions a patient customer tolerates before giving up.
    pub customer_patience_threshold: u32,
    pub reschedule_chance: f64,
    pub cancel_chance: f64,
    /// Cap on live agents, which is also the bound on concurrently dispatched actions.
    pub max_concurrent_agents: usize,
    pub tick_speed_ms: u64,
    pub minutes_per_tick: u32,
    pub customer_spawn_rate: f64,
    pub vendor_spawn_rate: f64,
    pub max_spawns_per_tick: u32,
    pub max_agent_ticks: u32,
    pub slot_pool_size: u32,
    pub retry_rate: f64,
    pub restart_rate: f64,
    pub reorder_rate: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            skin_fee: DEFAULT_SKIN_FEE,
            vendor_open_hours: OpenHours {
                open: DEFAULT_VENDOR_OPEN_HOUR,
                close: DEFAULT_VENDOR_CLOSE_HOUR,
            },
            customer_patience_threshold: DEFAULT_CUSTOMER_PATIENCE_THRESHOLD,
            reschedule_chance: DEFAULT_RESCHEDULE_CHANCE,
            cancel_chance: DEFAULT_CANCEL_CHANCE,
            max_concurrent_agents: DEFAULT_MAX_CONCURRENT_AGENTS,
            tick_speed_ms: DEFAULT_TICK_SPEED_MS,
            minutes_per_tick: DEFAULT_MINUTES_PER_TICK,
            customer_spawn_rate: DEFAULT_CUSTOMER_SPAWN_RATE,
            vendor_spawn_rate: DEFAULT_VENDOR_SPAWN_RATE,
            max_spawns_per_tick: DEFAULT_MAX_SPAWNS_PER_TICK,
            max_agent_ticks: DEFAULT_MAX_AGENT_TICKS,
            slot_pool_size: DEFAULT_SLOT_POOL_SIZE,
            retry_rate: 0.0,
            restart_rate: 0.0,
            reorder_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("{field} must be within [0, 1], got {value}")]
    ProbabilityOutOfRange { field: &'static str, value: f64 },
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("vendor open hours must satisfy open < close <= 24")]
    InvalidOpenHours,
}

impl Policy {
    pub fn probabilities(&self) -> [(&'static str, f64); 7] {
        [
            ("rescheduleChance", self.reschedule_chance),
            ("cancelChance", self.cancel_chance),
            ("customerSpawnRate", self.customer_spawn_rate),
            ("vendorSpawnRate", self.vendor_spawn_rate),
            ("retryRate", self.retry_rate),
            ("restartRate", self.restart_rate),
            ("reorderRate", self.reorder_rate),
        ]
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        for (field, value) in self.probabilities() {
            if !(0.0..=1.0).contains(&value) {
                return Err(PolicyError::ProbabilityOutOfRange { field, value });
            }
        }
        if self.max_concurrent_agents == 0 {
            return Err(PolicyError::NotPositive("maxConcurrentAgents"));
        }
        if self.tick_speed_ms == 0 {
            return Err(PolicyError::NotPositive("tickSpeedMs"));
        }
        if self.slot_pool_size == 0 {
            return Err(PolicyError::NotPositive("slotPoolSize"));
        }
        if self.max_agent_ticks == 0 {
            return Err(PolicyError::NotPositive("maxAgentTicks"));
        }
        if self.vendor_open_hours.open >= self.vendor_open_hours.close
            || self.vendor_open_hours.close > 24
        {
            return Err(PolicyError::InvalidOpenHours);
        }
        Ok(())
    }
}

/// A partial policy, applied on top of the current one at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_open_hours: Option<OpenHours>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_patience_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reschedule_chance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_chance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_agents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick_speed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minutes_per_tick: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_spawn_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_spawn_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_spawns_per_tick: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_agent_ticks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reorder_rate: Option<f64>,
}

impl PolicyOverride {
    /// The policy that results from applying this override, rejected as a whole if invalid.
    pub fn apply_to(&self, policy: &Policy) -> Result<Policy, PolicyError> {
        let mut next = policy.clone();

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field {
                    next.$field = value;
                })*
            };
        }
        apply!(
            skin_fee,
            vendor_open_hours,
            customer_patience_threshold,
            reschedule_chance,
            cancel_chance,
            max_concurrent_agents,
            tick_speed_ms,
            minutes_per_tick,
            customer_spawn_rate,
            vendor_spawn_rate,
            max_spawns_per_tick,
            max_agent_ticks,
            slot_pool_size,
            retry_rate,
            restart_rate,
            reorder_rate,
        );

        next.validate()?;
        Ok(next)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_policy_is_sane() {
        let policy = Policy::default();
        policy.validate().unwrap();
        for (field, value) in policy.probabilities() {
            assert!((0.0..=1.0).contains(&value), "{field} = {value}");
        }
        assert!(policy.max_concurrent_agents > 0);
    }

    #[test]
    fn override_replaces_only_given_fields() {
        let policy = Policy::default();
        let next = PolicyOverride {
            cancel_chance: Some(0.9),
            tick_speed_ms: Some(5),
            ..Default::default()
        }
        .apply_to(&policy)
        .unwrap();

        assert_eq!(next.cancel_chance, 0.9);
        assert_eq!(next.tick_speed_ms, 5);
        assert_eq!(next.reschedule_chance, policy.reschedule_chance);
    }

    #[test]
    fn invalid_override_is_rejected_whole() {
        let err = PolicyOverride {
            retry_rate: Some(1.5),
            ..Default::default()
        }
        .apply_to(&Policy::default())
        .unwrap_err();
        assert_eq!(
            err,
            PolicyError::ProbabilityOutOfRange {
                field: "retryRate",
                value: 1.5
            }
        );

        assert!(PolicyOverride {
            max_concurrent_agents: Some(0),
            ..Default::default()
        }
        .apply_to(&Policy::default())
        .is_err());
    }

    #[test]
    fn override_deserializes_from_partial_json() {
        let parsed: PolicyOverride =
            serde_json::from_str(r#"{"rescheduleChance":0.5,"maxConcurrentAgents":4}"#).unwrap();
        assert_eq!(parsed.reschedule_chance, Some(0.5));
        assert_eq!(parsed.max_concurrent_agents, Some(4));
        assert!(serde_json::from_str::<PolicyOverride>(r#"{"bogus":1}"#).is_err());
    }

    #[test]
    fn open_hours_are_half_open() {
        let hours = Policy::default().vendor_open_hours;
        assert!(!hours.contains(7));
        assert!(hours.contains(8));
        assert!(hours.contains(17));
        assert!(!hours.contains(18));
    }
}
