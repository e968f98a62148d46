//! Contracts with the external simulation, network-state and scenario-director services,
//! plus an in-memory loopback used offline and in tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised by collaborator calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// The collaborator answered with a failure flag; the message is its own.
    #[error("{0}")]
    Downstream(String),
    /// The call did not complete (connection refused, timeout, ...).
    #[error("transport error: {0}")]
    Transport(String),
    /// The collaborator answered with a body we could not read.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The collaborator is not configured or not reachable yet.
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Acknowledgement of a clock or weather change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    /// Whether the change was applied.
    pub success: bool,
    /// Failure detail, if any.
    #[serde(default)]
    pub error: Option<String>,
}

impl CommitResponse {
    /// Successful acknowledgement.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Converts a failure flag into [`ControlError::Downstream`].
    pub fn into_result(self) -> Result<(), ControlError> {
        if self.success {
            Ok(())
        } else {
            Err(ControlError::Downstream(
                self.error.unwrap_or_else(|| "request rejected".into()),
            ))
        }
    }
}

/// Result of resetting and reseeding the vehicle population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationResponse {
    /// Whether the population was reseeded.
    pub success: bool,
    /// Vehicles actually spawned.
    #[serde(default)]
    pub spawned: u32,
    /// Failure detail, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// Result of a top-up spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnResponse {
    /// Whether the spawn request was accepted.
    pub success: bool,
    /// Vehicles requested.
    #[serde(default)]
    pub requested: u32,
    /// Vehicles actually spawned.
    #[serde(default)]
    pub spawned: u32,
    /// Population after the spawn.
    #[serde(default)]
    pub total: u32,
    /// Failure detail, if any.
    #[serde(default)]
    pub error: Option<String>,
}

/// State-of-charge bounds, in percent, for spawned electric vehicles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocRange {
    /// Lower bound.
    pub min: f64,
    /// Upper bound.
    pub max: f64,
}

impl Default for SocRange {
    fn default() -> Self {
        Self {
            min: 20.0,
            max: 80.0,
        }
    }
}

/// Vehicle population as reported by the network-state service.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    /// Vehicles currently in the network.
    pub count: u32,
    /// Electric vehicles among them.
    #[serde(default)]
    pub electric: u32,
    /// Average state of charge of the electric vehicles, if known.
    #[serde(default)]
    pub average_soc: Option<f64>,
}

/// Phase of a long-running external scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorPhase {
    /// Nothing scheduled.
    #[default]
    Idle,
    /// Staging a run.
    Preparing,
    /// Run in progress.
    Running,
    /// Run finished.
    Done,
}

impl DirectorPhase {
    /// True while a run is staging or in progress.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Preparing | Self::Running)
    }
}

/// Status reported by the external scenario director.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectorStatus {
    /// Current phase.
    pub phase: DirectorPhase,
    /// Scenario the director is working on, if it reports one.
    #[serde(default)]
    pub scenario_key: Option<String>,
}

/// Commands sent to the simulation backend.
#[async_trait]
pub trait SimulationControl: Send + Sync {
    /// Commits a new simulated hour downstream.
    async fn set_simulated_time(&self, hour: u8) -> Result<CommitResponse, ControlError>;

    /// Commits a new ambient temperature downstream.
    async fn set_simulated_temperature(
        &self,
        fahrenheit: i32,
    ) -> Result<CommitResponse, ControlError>;

    /// Removes every vehicle.
    async fn stop_population(&self) -> Result<CommitResponse, ControlError>;

    /// Seeds a fresh population.
    async fn start_population(
        &self,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> Result<PopulationResponse, ControlError>;

    /// Adds vehicles without resetting the population.
    async fn spawn_additional(
        &self,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> Result<SpawnResponse, ControlError>;

    /// Tells the energy model how many new vehicles draw charge.
    async fn report_ev_load(&self, count: u32) -> Result<(), ControlError>;
}

/// Read access to the live network state.
#[async_trait]
pub trait NetworkState: Send + Sync {
    /// Current vehicle population.
    async fn population_snapshot(&self) -> Result<PopulationSnapshot, ControlError>;
}

/// Read access to the external scenario director.
#[async_trait]
pub trait ScenarioDirector: Send + Sync {
    /// Current director status.
    async fn status(&self) -> Result<DirectorStatus, ControlError>;
}

/// Operations of [`LoopbackSimulation`] that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopbackOp {
    /// `set_simulated_time`.
    SetTime,
    /// `set_simulated_temperature`.
    SetTemperature,
    /// `stop_population`.
    StopPopulation,
    /// `start_population`.
    StartPopulation,
    /// `spawn_additional`.
    Spawn,
    /// `report_ev_load`.
    ReportLoad,
    /// `population_snapshot`.
    Snapshot,
    /// `status` on the director.
    DirectorStatus,
}

/// Number of calls the loopback journal remembers.
pub const JOURNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy)]
struct LoopbackVehicle {
    electric: bool,
    soc: f64,
}

#[derive(Debug)]
struct LoopbackState {
    hour: u8,
    temperature_f: i32,
    vehicles: Vec<LoopbackVehicle>,
    ev_load: u32,
    director: DirectorStatus,
    failures: IndexMap<LoopbackOp, String>,
    journal: VecDeque<String>,
    rng: SmallRng,
}

/// In-memory stand-in for every external collaborator.
#[derive(Debug)]
pub struct LoopbackSimulation {
    state: Mutex<LoopbackState>,
    capacity: Option<u32>,
}

impl Default for LoopbackSimulation {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackSimulation {
    /// Creates an empty simulation without a population cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(rand::thread_rng().gen())
    }

    /// Creates an empty simulation with a reproducible RNG.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                hour: 0,
                temperature_f: 75,
                vehicles: Vec::new(),
                ev_load: 0,
                director: DirectorStatus::default(),
                failures: IndexMap::new(),
                journal: VecDeque::with_capacity(JOURNAL_CAPACITY),
                rng: SmallRng::seed_from_u64(seed),
            }),
            capacity: None,
        }
    }

    /// Caps the population; spawns beyond it are partially fulfilled.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Makes every subsequent call to `op` fail with `message`.
    pub fn fail(&self, op: LoopbackOp, message: impl Into<String>) {
        self.state.lock().failures.insert(op, message.into());
    }

    /// Clears an injected failure.
    pub fn recover(&self, op: LoopbackOp) {
        self.state.lock().failures.shift_remove(&op);
    }

    /// Sets what the director reports.
    pub fn set_director(&self, phase: DirectorPhase, scenario_key: Option<&str>) {
        self.state.lock().director = DirectorStatus {
            phase,
            scenario_key: scenario_key.map(str::to_owned),
        };
    }

    /// Adds vehicles directly, bypassing the capacity cap (external arrivals).
    pub fn inject_vehicles(&self, count: u32) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.vehicles.push(LoopbackVehicle {
                electric: false,
                soc: 0.0,
            });
        }
    }

    /// Current population.
    #[must_use]
    pub fn population(&self) -> u32 {
        u32::try_from(self.state.lock().vehicles.len()).unwrap_or(u32::MAX)
    }

    /// Last committed hour.
    #[must_use]
    pub fn hour(&self) -> u8 {
        self.state.lock().hour
    }

    /// Last committed temperature.
    #[must_use]
    pub fn temperature_f(&self) -> i32 {
        self.state.lock().temperature_f
    }

    /// Total EV load reported so far.
    #[must_use]
    pub fn ev_load(&self) -> u32 {
        self.state.lock().ev_load
    }

    /// Names of the most recent calls received, oldest first.
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.iter().cloned().collect()
    }

    fn enter(
        &self,
        op: LoopbackOp,
        entry: String,
    ) -> Result<MutexGuard<'_, LoopbackState>, ControlError> {
        let mut state = self.state.lock();
        if state.journal.len() == JOURNAL_CAPACITY {
            state.journal.pop_front();
        }
        state.journal.push_back(entry);
        if let Some(message) = state.failures.get(&op) {
            return Err(ControlError::Downstream(message.clone()));
        }
        Ok(state)
    }

    fn spawn_into(
        &self,
        state: &mut LoopbackState,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> u32 {
        let current = u32::try_from(state.vehicles.len()).unwrap_or(u32::MAX);
        let room = self
            .capacity
            .map_or(count, |cap| cap.saturating_sub(current));
        let spawned = count.min(room);
        let ev_fraction = if ev_fraction.is_nan() {
            0.0
        } else {
            ev_fraction.clamp(0.0, 1.0)
        };
        let (low, high) = if soc.min <= soc.max {
            (soc.min, soc.max)
        } else {
            (soc.max, soc.min)
        };
        for _ in 0..spawned {
            let electric = state.rng.gen_bool(ev_fraction);
            let soc = if electric && high > low {
                state.rng.gen_range(low..high)
            } else {
                low
            };
            state.vehicles.push(LoopbackVehicle { electric, soc });
        }
        spawned
    }
}

#[async_trait]
impl SimulationControl for LoopbackSimulation {
    async fn set_simulated_time(&self, hour: u8) -> Result<CommitResponse, ControlError> {
        let mut state = self.enter(LoopbackOp::SetTime, format!("set_time:{hour}"))?;
        state.hour = hour;
        Ok(CommitResponse::ok())
    }

    async fn set_simulated_temperature(
        &self,
        fahrenheit: i32,
    ) -> Result<CommitResponse, ControlError> {
        let mut state = self.enter(
            LoopbackOp::SetTemperature,
            format!("set_temperature:{fahrenheit}"),
        )?;
        state.temperature_f = fahrenheit;
        Ok(CommitResponse::ok())
    }

    async fn stop_population(&self) -> Result<CommitResponse, ControlError> {
        let mut state = self.enter(LoopbackOp::StopPopulation, "stop_population".into())?;
        state.vehicles.clear();
        Ok(CommitResponse::ok())
    }

    async fn start_population(
        &self,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> Result<PopulationResponse, ControlError> {
        let mut state = self.enter(
            LoopbackOp::StartPopulation,
            format!("start_population:{count}"),
        )?;
        state.vehicles.clear();
        let spawned = self.spawn_into(&mut state, count, ev_fraction, soc);
        Ok(PopulationResponse {
            success: true,
            spawned,
            error: None,
        })
    }

    async fn spawn_additional(
        &self,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> Result<SpawnResponse, ControlError> {
        let mut state = self.enter(LoopbackOp::Spawn, format!("spawn:{count}"))?;
        let spawned = self.spawn_into(&mut state, count, ev_fraction, soc);
        Ok(SpawnResponse {
            success: true,
            requested: count,
            spawned,
            total: u32::try_from(state.vehicles.len()).unwrap_or(u32::MAX),
            error: None,
        })
    }

    async fn report_ev_load(&self, count: u32) -> Result<(), ControlError> {
        let mut state = self.enter(LoopbackOp::ReportLoad, format!("ev_load:{count}"))?;
        state.ev_load = state.ev_load.saturating_add(count);
        Ok(())
    }
}

#[async_trait]
impl NetworkState for LoopbackSimulation {
    async fn population_snapshot(&self) -> Result<PopulationSnapshot, ControlError> {
        let state = self.enter(LoopbackOp::Snapshot, "snapshot".into())?;
        let electric: Vec<f64> = state
            .vehicles
            .iter()
            .filter(|v| v.electric)
            .map(|v| v.soc)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average_soc = if electric.is_empty() {
            None
        } else {
            Some(electric.iter().sum::<f64>() / electric.len() as f64)
        };
        Ok(PopulationSnapshot {
            count: u32::try_from(state.vehicles.len()).unwrap_or(u32::MAX),
            electric: u32::try_from(electric.len()).unwrap_or(u32::MAX),
            average_soc,
        })
    }
}

#[async_trait]
impl ScenarioDirector for LoopbackSimulation {
    async fn status(&self) -> Result<DirectorStatus, ControlError> {
        let state = self.enter(LoopbackOp::DirectorStatus, "director_status".into())?;
        Ok(state.director.clone())
    }
}
