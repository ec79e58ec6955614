use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use simcity_core::prelude::{Seed, ShutdownHandle, SimCityResult, SimRng};
use simcity_telemetry::{format_timestamp, EventType, MetricsSnapshot, Telemetry, TelemetryEvent};

use crate::agent::{PendingEvent, TurnContext};
use crate::{Agent, AgentKind, BookingApi, CapabilitySet, Policy, PolicyError, PolicyOverride};

/// Simulated instant at which a run starts unless configured otherwise: the opening of a
/// business day.
pub fn default_sim_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub seed: Seed,
    pub capabilities: CapabilitySet,
    /// Upper bound on parallel agent turns. Defaults to the policy's `max_concurrent_agents`.
    pub dispatch_workers: Option<usize>,
}

impl OrchestratorConfig {
    pub fn new(seed: Seed) -> Self {
        Self {
            seed,
            capabilities: CapabilitySet::all(),
            dispatch_workers: None,
        }
    }
}

/// Mutable state of one simulation, owned by its [Orchestrator].
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub running: bool,
    pub tick: u64,
    pub sim_time: DateTime<Utc>,
    pub policy: Policy,
    pub live_agents: usize,
    pub fatal_error: Option<String>,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new(Policy::default(), default_sim_start())
    }
}

impl SimulationState {
    pub fn new(policy: Policy, sim_start: DateTime<Utc>) -> Self {
        Self {
            running: false,
            tick: 0,
            sim_time: sim_start,
            policy,
            live_agents: 0,
            fatal_error: None,
        }
    }
}

/// Read-only view of [SimulationState].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub running: bool,
    pub tick: u64,
    pub live_agents: usize,
    pub sim_time: String,
    pub policy: Policy,
    pub fatal_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub spawned: usize,
    pub retired: usize,
    pub events: usize,
}

struct AgentPool {
    agents: Vec<Agent>,
    next_customer: u64,
    next_vendor: u64,
    rng: SimRng,
}

struct Inner {
    config: OrchestratorConfig,
    state: Mutex<SimulationState>,
    /// Held for the whole of a tick, so ticks never overlap.
    pool: Mutex<AgentPool>,
    draining: AtomicBool,
    api: Arc<dyn BookingApi>,
    telemetry: Arc<Telemetry>,
}

struct Driver {
    shutdown: ShutdownHandle,
    handle: JoinHandle<()>,
}

/// Drives agents over discrete ticks.
///
/// Ticks can be run by hand with [Orchestrator::tick], or by a background driver between
/// [Orchestrator::start] and [Orchestrator::stop] at the policy's tick speed.
pub struct Orchestrator {
    inner: Arc<Inner>,
    driver: Mutex<Option<Driver>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        state: SimulationState,
        api: Arc<dyn BookingApi>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let rng = SimRng::for_stream(&config.seed, "orchestrator", 0);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                pool: Mutex::new(AgentPool {
                    agents: Vec::new(),
                    next_customer: 0,
                    next_vendor: 0,
                    rng,
                }),
                draining: AtomicBool::new(false),
                api,
                telemetry,
            }),
            driver: Mutex::new(None),
        }
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.inner.telemetry
    }

    pub fn policy(&self) -> Policy {
        self.inner.state.lock().policy.clone()
    }

    /// Apply a partial override to the running policy. Takes effect from the next tick.
    pub fn set_policy(&self, overrides: &PolicyOverride) -> Result<Policy, PolicyError> {
        let (next, now) = {
            let mut state = self.inner.state.lock();
            let next = overrides.apply_to(&state.policy)?;
            state.policy = next.clone();
            (next, state.sim_time)
        };

        let changes = serde_json::to_value(overrides).unwrap_or_default();
        log::info!("Policy override applied: {changes}");
        self.inner
            .telemetry
            .log(EventType::PolicyChange, now, json!({ "changes": changes }));

        Ok(next)
    }

    pub fn state(&self) -> StateSnapshot {
        let state = self.inner.state.lock();
        StateSnapshot {
            running: state.running,
            tick: state.tick,
            live_agents: state.live_agents,
            sim_time: format_timestamp(state.sim_time),
            policy: state.policy.clone(),
            fatal_error: state.fatal_error.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn tick(&self) -> TickReport {
        self.inner.tick()
    }

    /// Start the tick driver. Returns `false`, doing nothing, if it is already running.
    pub fn start(&self) -> SimCityResult<bool> {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Ok(false);
        }

        let now = {
            let mut state = self.inner.state.lock();
            state.running = true;
            state.sim_time
        };
        let telemetry = &self.inner.telemetry;
        telemetry.start();
        telemetry.log(
            EventType::Start,
            now,
            json!({
                "seed": self.inner.config.seed,
                "capabilities": self.inner.config.capabilities.ids(),
                "policy": self.policy(),
            }),
        );
        log::info!("Simulation started for seed {}", self.inner.config.seed);

        let shutdown = ShutdownHandle::new();
        let mut listener = shutdown.new_listener();
        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("simcity-tick".to_string())
            .spawn(move || loop {
                if listener.should_shutdown() {
                    break;
                }

                inner.tick();

                let (fatal, tick_speed) = {
                    let state = inner.state.lock();
                    (state.fatal_error.is_some(), state.policy.tick_speed_ms)
                };
                if fatal {
                    log::error!("Tick driver halted after a fatal error");
                    break;
                }
                if listener.sleep_unless_shutdown(Duration::from_millis(tick_speed)) {
                    break;
                }
            })
            .context("Failed to spawn tick driver thread");

        match spawned {
            Ok(handle) => {
                *driver = Some(Driver { shutdown, handle });
                Ok(true)
            }
            Err(e) => {
                self.inner.state.lock().running = false;
                telemetry.stop();
                Err(e)
            }
        }
    }

    /// Stop the tick driver, waiting for the in-flight tick to finish, then retire every live
    /// agent. Returns `false` if the driver was not running.
    pub fn stop(&self) -> bool {
        let Some(driver) = self.driver.lock().take() else {
            return false;
        };

        self.inner.draining.store(true, Ordering::SeqCst);
        driver.shutdown.shutdown();
        if driver.handle.join().is_err() {
            log::error!("Tick driver panicked");
        }

        self.inner.retire_all("shutdown");

        let (tick, now) = {
            let mut state = self.inner.state.lock();
            state.running = false;
            (state.tick, state.sim_time)
        };
        self.inner
            .telemetry
            .log(EventType::Stop, now, json!({ "tick": tick }));
        self.inner.telemetry.stop();
        self.inner.draining.store(false, Ordering::SeqCst);

        log::info!("Simulation stopped after {tick} ticks");
        true
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn tick(&self) -> TickReport {
        let mut pool_guard = self.pool.lock();
        let pool = &mut *pool_guard;

        let (policy, tick, now) = {
            let mut state = self.state.lock();
            if state.fatal_error.is_some() {
                return TickReport {
                    tick: state.tick,
                    ..Default::default()
                };
            }
            state.tick += 1;
            let minutes_per_tick = i64::from(state.policy.minutes_per_tick);
            state.sim_time += chrono::Duration::minutes(minutes_per_tick);
            (state.policy.clone(), state.tick, state.sim_time)
        };
        let events_before = self.telemetry.len();
        let hour = now.hour();

        self.telemetry.log(
            EventType::Tick,
            now,
            json!({
                "tick": tick,
                "simTime": format_timestamp(now),
                "liveAgents": pool.agents.len(),
            }),
        );

        let turns = {
            let mut order: Vec<&mut Agent> = pool.agents.iter_mut().collect();
            if policy.reorder_rate > 0.0 && pool.rng.chance(policy.reorder_rate) {
                pool.rng.shuffle(&mut order);
                self.telemetry.log(
                    EventType::ChaosReorder,
                    now,
                    json!({ "tick": tick, "agents": order.len() }),
                );
            }

            let workers = self
                .config
                .dispatch_workers
                .unwrap_or(policy.max_concurrent_agents)
                .max(1);
            let ctx = TurnContext {
                policy: &policy,
                capabilities: &self.config.capabilities,
                api: self.api.as_ref(),
                tick,
                hour,
            };
            dispatch(&mut order, workers, &ctx)
        };

        let mut fatal = None;
        for event in turns.into_iter().flatten() {
            if fatal.is_none() {
                fatal = event.fatal;
            }
            self.telemetry.log(event.event_type, now, event.data);
        }

        let live_before = pool.agents.len();
        pool.agents.retain(|agent| !agent.is_retired());
        let retired = live_before - pool.agents.len();

        let mut spawned = 0;
        if fatal.is_none() && !self.draining.load(Ordering::SeqCst) {
            for _ in 0..policy.max_spawns_per_tick {
                if pool.agents.len() < policy.max_concurrent_agents
                    && pool.rng.chance(policy.customer_spawn_rate)
                {
                    self.spawn_agent(pool, AgentKind::Customer, &policy, now);
                    spawned += 1;
                }
                if policy.vendor_open_hours.contains(hour)
                    && pool.agents.len() < policy.max_concurrent_agents
                    && pool.rng.chance(policy.vendor_spawn_rate)
                {
                    self.spawn_agent(pool, AgentKind::Vendor, &policy, now);
                    spawned += 1;
                }
            }
        }

        {
            let mut state = self.state.lock();
            state.live_agents = pool.agents.len();
            if let Some(message) = fatal {
                log::error!("Simulation halted: {message}");
                state.fatal_error = Some(message);
            }
        }

        TickReport {
            tick,
            spawned,
            retired,
            events: self.telemetry.len() - events_before,
        }
    }

    fn spawn_agent(
        &self,
        pool: &mut AgentPool,
        kind: AgentKind,
        policy: &Policy,
        now: DateTime<Utc>,
    ) {
        let counter = match kind {
            AgentKind::Customer => &mut pool.next_customer,
            AgentKind::Vendor => &mut pool.next_vendor,
        };
        let index = *counter;
        *counter += 1;

        let agent = Agent::spawn(&self.config.seed, kind, index, policy);
        self.telemetry.log(EventType::AgentSpawn, now, agent.spawn_data());
        pool.agents.push(agent);
    }

    fn retire_all(&self, reason: &str) {
        let mut pool = self.pool.lock();
        let now = self.state.lock().sim_time;
        for agent in pool.agents.iter_mut() {
            if let Some(event) = agent.retire_now(reason) {
                self.telemetry.log(event.event_type, now, event.data);
            }
        }
        pool.agents.clear();
        self.state.lock().live_agents = 0;
    }
}

/// Run one turn for every agent, in `order`, on at most `workers` threads.
///
/// Each worker takes a contiguous run of the order, so an agent's own events stay in sequence and
/// the returned turns line up with `order` however the threads interleave.
fn dispatch(
    order: &mut [&mut Agent],
    workers: usize,
    ctx: &TurnContext<'_>,
) -> Vec<Vec<PendingEvent>> {
    if order.is_empty() {
        return Vec::new();
    }
    if workers == 1 {
        return order.iter_mut().map(|agent| agent.take_turn(ctx)).collect();
    }

    let chunk = order.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let handles: Vec<_> = order
            .chunks_mut(chunk)
            .map(|agents| {
                scope.spawn(move || {
                    agents
                        .iter_mut()
                        .map(|agent| agent.take_turn(ctx))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(turns) => turns,
                Err(_) => {
                    log::error!("Agent worker panicked, its turns were dropped");
                    Vec::new()
                }
            })
            .collect()
    })
}

/// Run `ticks` ticks offline with a single dispatch worker.
///
/// Telemetry is never started, so for a booking API that answers deterministically the result is
/// a pure function of the inputs.
pub fn simulate(
    seed: &Seed,
    ticks: u64,
    policy: Policy,
    api: Arc<dyn BookingApi>,
) -> (MetricsSnapshot, Vec<TelemetryEvent>) {
    let telemetry = Arc::new(Telemetry::new());
    let config = OrchestratorConfig {
        seed: seed.clone(),
        capabilities: CapabilitySet::all(),
        dispatch_workers: Some(1),
    };
    let orchestrator = Orchestrator::new(
        config,
        SimulationState::new(policy, default_sim_start()),
        api,
        telemetry.clone(),
    );
    for _ in 0..ticks {
        orchestrator.tick();
    }

    (telemetry.snapshot(), telemetry.events())
}
