use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use shared_logging::LogLevel;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::{
    catalog::{self, ScenarioDefinition},
    clock::{ClockState, HourChange, ProgressiveClock},
    collaborators::{
        CommitResponse, ControlError, LoopbackSimulation, NetworkState, ScenarioDirector,
        SimulationControl,
    },
    config::OrchestratorConfig,
    error::OrchestratorError,
    guard::ConflictGuard,
    interpreter::{CommandInterpreter, Intent, TEMPERATURE_CHANGE_KEY, TIME_CHANGE_KEY},
    patterns,
    quota::{QuotaMaintainer, QuotaOutcome},
    suggestions::{Suggestion, SuggestionEngine},
    telemetry::OrchestratorTelemetry,
};

/// Uniform result of every executed command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    /// Whether the command took effect.
    pub success: bool,
    /// Operator-facing summary.
    pub message: String,
    /// Structured payload for dashboards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set when another exclusive change blocked this one.
    pub conflict: bool,
    /// Keys that blocked the command.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking: Vec<String>,
}

impl CommandResult {
    /// Successful result.
    #[must_use]
    pub fn ok(message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            conflict: false,
            blocking: Vec::new(),
        }
    }

    /// Failed result carrying the downstream message verbatim.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
            conflict: false,
            blocking: Vec::new(),
        }
    }

    /// Rejection by the conflict guard.
    #[must_use]
    pub fn conflict(action: &str, blocking: Vec<String>) -> Self {
        let names = if blocking.is_empty() {
            "another change".to_owned()
        } else {
            blocking.join(", ")
        };
        Self {
            success: false,
            message: format!("Cannot {action}: {names} already in progress"),
            data: None,
            conflict: true,
            blocking,
        }
    }
}

/// Builder for [`ScenarioOrchestrator`].
#[derive(Default)]
pub struct ScenarioOrchestratorBuilder {
    simulation: Option<Arc<dyn SimulationControl>>,
    network: Option<Arc<dyn NetworkState>>,
    director: Option<Arc<dyn ScenarioDirector>>,
    config: OrchestratorConfig,
    telemetry: Option<OrchestratorTelemetry>,
}

impl ScenarioOrchestratorBuilder {
    /// Simulation backend.
    #[must_use]
    pub fn simulation(mut self, simulation: Arc<dyn SimulationControl>) -> Self {
        self.simulation = Some(simulation);
        self
    }

    /// Network-state reader.
    #[must_use]
    pub fn network(mut self, network: Arc<dyn NetworkState>) -> Self {
        self.network = Some(network);
        self
    }

    /// External scenario director consulted by the conflict guard.
    #[must_use]
    pub fn director(mut self, director: Arc<dyn ScenarioDirector>) -> Self {
        self.director = Some(director);
        self
    }

    /// Uses one loopback simulation for every collaborator.
    #[must_use]
    pub fn loopback(self, simulation: Arc<LoopbackSimulation>) -> Self {
        self.simulation(simulation.clone())
            .network(simulation.clone())
            .director(simulation)
    }

    /// Settings.
    #[must_use]
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Telemetry sinks.
    #[must_use]
    pub fn telemetry(mut self, telemetry: OrchestratorTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Builds a stopped orchestrator.
    pub fn build(self) -> Result<ScenarioOrchestrator, OrchestratorError> {
        let simulation = self.simulation.ok_or_else(|| {
            ControlError::Unavailable("no simulation backend configured".into())
        })?;
        let network = self
            .network
            .ok_or_else(|| ControlError::Unavailable("no network-state reader configured".into()))?;
        let clock = ProgressiveClock::new(self.config.tick_period(), self.telemetry.clone());
        clock.set_time(self.config.clock.initial_hour, self.config.clock.initial_minute);
        let guard = ConflictGuard::new(self.director);
        let quota = QuotaMaintainer::new(
            clock.clone(),
            Arc::clone(&simulation),
            Arc::clone(&network),
            guard.clone(),
            self.config.soc_range(),
            self.config.quota_interval(),
            self.telemetry.clone(),
        );
        Ok(ScenarioOrchestrator {
            inner: Arc::new(OrchestratorInner {
                interpreter: CommandInterpreter::new(),
                suggestions: SuggestionEngine::new(),
                guard,
                clock,
                quota,
                simulation,
                network,
                temperature_f: Mutex::new(self.config.scenarios.initial_temperature_f),
                config: self.config,
                telemetry: self.telemetry,
            }),
        })
    }
}

struct OrchestratorInner {
    interpreter: CommandInterpreter,
    suggestions: SuggestionEngine,
    guard: ConflictGuard,
    clock: ProgressiveClock,
    quota: QuotaMaintainer,
    simulation: Arc<dyn SimulationControl>,
    network: Arc<dyn NetworkState>,
    temperature_f: Mutex<i32>,
    config: OrchestratorConfig,
    telemetry: Option<OrchestratorTelemetry>,
}

impl Drop for OrchestratorInner {
    fn drop(&mut self) {
        self.quota.stop();
        self.clock.stop();
    }
}

/// Single owner of the session clock, the active-scenario set and the
/// periodic tasks. Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct ScenarioOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl std::fmt::Debug for ScenarioOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioOrchestrator")
            .field("clock", &self.current_clock())
            .field("temperature_f", &self.current_temperature())
            .field("active", &self.active_scenarios())
            .finish_non_exhaustive()
    }
}

impl ScenarioOrchestrator {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> ScenarioOrchestratorBuilder {
        ScenarioOrchestratorBuilder::default()
    }

    /// Settings the orchestrator was built with.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Classifies operator text without executing it.
    #[must_use]
    pub fn interpret(&self, text: &str) -> Option<Intent> {
        self.inner.interpreter.interpret(text)
    }

    /// Interprets and executes `text`. `None` means it was not a control command.
    pub async fn handle_text(&self, text: &str) -> Option<CommandResult> {
        let (rule, intent) = self.inner.interpreter.explain(text)?;
        debug!(?rule, intent = intent.label(), "classified operator text");
        Some(self.execute(intent).await)
    }

    /// Executes an intent. Failures are reported in the result, never raised.
    ///
    /// Intents that change simulation state first take their key in the
    /// conflict guard; a held key anywhere rejects them untouched.
    #[instrument(skip_all, fields(intent = intent.label()))]
    pub async fn execute(&self, intent: Intent) -> CommandResult {
        let label = intent.label();
        let admitted = match intent.exclusive_key() {
            Some(key) => self.inner.guard.try_acquire(key).await,
            None => Ok(()),
        };
        let result = match admitted {
            Ok(()) => self.apply(intent).await,
            Err(blocking) => self.reject(action_of(&intent), blocking),
        };
        info!(
            success = result.success,
            conflict = result.conflict,
            "{label}: {}",
            result.message
        );
        self.record(
            if result.success {
                LogLevel::Info
            } else {
                LogLevel::Warn
            },
            "orchestrator.command",
            json!({
                "intent": label,
                "success": result.success,
                "conflict": result.conflict,
                "message": result.message,
            }),
        );
        result
    }

    /// Current clock state.
    #[must_use]
    pub fn current_clock(&self) -> ClockState {
        self.inner.clock.state()
    }

    /// Last committed temperature.
    #[must_use]
    pub fn current_temperature(&self) -> i32 {
        *self.inner.temperature_f.lock()
    }

    /// Keys currently blocking exclusive changes.
    #[must_use]
    pub fn active_scenarios(&self) -> Vec<String> {
        self.inner.guard.active_keys()
    }

    /// Ranked suggestions for an arbitrary context.
    #[must_use]
    pub fn suggestions_for(&self, hour: u8, temperature_f: i32) -> Vec<Suggestion> {
        self.inner.suggestions.suggestions_for(hour, temperature_f)
    }

    /// Starts the clock at `hour:minute` together with the quota maintainer.
    pub fn start(&self, hour: u8, minute: u8) -> Result<(), OrchestratorError> {
        self.inner.clock.start(hour, minute)?;
        if let Err(err) = self.inner.quota.start() {
            self.inner.clock.stop();
            return Err(err);
        }
        self.record(
            LogLevel::Info,
            "orchestrator.started",
            json!({ "hour": hour, "minute": minute }),
        );
        Ok(())
    }

    /// Stops both periodic tasks. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let quota = self.inner.quota.stop();
        let clock = self.inner.clock.stop();
        if quota || clock {
            self.record(LogLevel::Info, "orchestrator.stopped", json!({}));
        }
        quota || clock
    }

    /// Freezes the clock; quota checks skip while paused.
    pub fn pause(&self) {
        self.inner.clock.pause();
    }

    /// Unfreezes the clock.
    pub fn resume(&self) {
        self.inner.clock.resume();
    }

    /// Changes real milliseconds per simulated minute.
    pub fn set_tick_period(&self, period: Duration) -> Result<(), OrchestratorError> {
        self.inner.clock.set_tick_period(period)
    }

    /// True while the clock is started and not paused.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.clock.state().running
    }

    /// True between `start` and `stop`, paused or not.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.clock.is_active()
    }

    /// Hour-change notifications for UI mirrors.
    #[must_use]
    pub fn subscribe_hour_changes(&self) -> broadcast::Receiver<HourChange> {
        self.inner.clock.subscribe()
    }

    /// Runs one quota check immediately, outside the periodic schedule.
    pub async fn check_quota(&self) -> Result<QuotaOutcome, ControlError> {
        self.inner.quota.check_once().await
    }

    /// Clock, weather, demand and population summary.
    pub async fn status(&self) -> CommandResult {
        let blocked = self.inner.guard.has_conflict().await;
        let clock = self.current_clock();
        let temperature = self.current_temperature();
        let bucket = patterns::bucket_for(clock.hour);
        let population = match self.inner.network.population_snapshot().await {
            Ok(snapshot) => json!(snapshot.count),
            Err(err) => {
                warn!("population snapshot unavailable: {err}");
                json!("unknown")
            }
        };
        let active = self.active_scenarios();
        let mut message = format!(
            "{} {} | {}°F | {} {} | {} vehicles (quota {})",
            clock.display(),
            if clock.running { "running" } else { "stopped" },
            temperature,
            bucket.icon,
            bucket.label,
            population.as_u64().map_or_else(|| "unknown".to_owned(), |n| n.to_string()),
            bucket.quota_target(),
        );
        if !active.is_empty() {
            message.push_str(&format!(" | in progress: {}", active.join(", ")));
        }
        CommandResult::ok(
            message,
            Some(json!({
                "clock": clock,
                "time": clock.display(),
                "temperature_f": temperature,
                "bucket": bucket,
                "quota_target": bucket.quota_target(),
                "population": population,
                "active": active,
                "blocked": blocked,
            })),
        )
    }

    fn suggestion_result(&self) -> CommandResult {
        let clock = self.current_clock();
        let temperature = self.current_temperature();
        let list = self.suggestions_for(clock.hour, temperature);
        let lines: Vec<String> = list
            .iter()
            .map(|s| format!("[{}] {}: {}", s.priority, s.scenario_key, s.reason))
            .collect();
        CommandResult::ok(
            format!(
                "Suggestions for {} at {}°F:\n{}",
                clock.display(),
                temperature,
                lines.join("\n")
            ),
            Some(json!({ "suggestions": list })),
        )
    }

    async fn apply(&self, intent: Intent) -> CommandResult {
        match intent {
            Intent::Status => self.status().await,
            Intent::Suggestions => self.suggestion_result(),
            Intent::SetTime { hour } => self.apply_time(hour).await,
            Intent::SetTemperature { fahrenheit } => self.apply_temperature(fahrenheit).await,
            Intent::StartScenario { key } => self.apply_scenario(&key).await,
        }
    }

    fn reject(&self, action: &str, blocking: Vec<String>) -> CommandResult {
        self.record(
            LogLevel::Warn,
            "orchestrator.conflict",
            json!({ "action": action, "blocking": blocking }),
        );
        CommandResult::conflict(action, blocking)
    }

    /// Expects [`TIME_CHANGE_KEY`] to be held.
    async fn apply_time(&self, hour: u8) -> CommandResult {
        let committed = self
            .inner
            .simulation
            .set_simulated_time(hour)
            .await
            .and_then(CommitResponse::into_result);
        match committed {
            Ok(()) => {
                self.inner.clock.set_time(hour, 0);
                self.release_after_grace(TIME_CHANGE_KEY);
                CommandResult::ok(
                    format!("Time set to {hour:02}:00"),
                    Some(json!({ "hour": hour })),
                )
            }
            Err(err) => {
                self.inner.guard.release(TIME_CHANGE_KEY);
                CommandResult::failure(err.to_string())
            }
        }
    }

    async fn apply_temperature(&self, fahrenheit: i32) -> CommandResult {
        let committed = self
            .inner
            .simulation
            .set_simulated_temperature(fahrenheit)
            .await
            .and_then(CommitResponse::into_result);
        match committed {
            Ok(()) => {
                *self.inner.temperature_f.lock() = fahrenheit;
                self.release_after_grace(TEMPERATURE_CHANGE_KEY);
                CommandResult::ok(
                    format!("Temperature set to {fahrenheit}°F"),
                    Some(json!({ "temperature_f": fahrenheit })),
                )
            }
            Err(err) => {
                self.inner.guard.release(TEMPERATURE_CHANGE_KEY);
                CommandResult::failure(err.to_string())
            }
        }
    }

    /// Expects `key` to be held.
    async fn apply_scenario(&self, key: &str) -> CommandResult {
        let Some(scenario) = catalog::scenario_for(key) else {
            self.inner.guard.release(key);
            return CommandResult::failure(
                OrchestratorError::UnknownScenario(key.to_owned()).to_string(),
            );
        };
        self.record(
            LogLevel::Info,
            "scenario.started",
            json!({ "key": scenario.key, "hour": scenario.hour, "temperature_f": scenario.temperature_f }),
        );
        match self.run_scenario(scenario).await {
            Ok(spawned) => {
                self.release_after_grace(scenario.key);
                let mut message = format!(
                    "{} {}: {:02}:00, {}°F, {} vehicles",
                    scenario.icon,
                    scenario.key,
                    scenario.hour,
                    scenario.temperature_f,
                    scenario.vehicle_target
                );
                if spawned < scenario.vehicle_target {
                    message.push_str(&format!(
                        " (only {spawned} of {} vehicles spawned)",
                        scenario.vehicle_target
                    ));
                }
                self.record(
                    LogLevel::Info,
                    "scenario.applied",
                    json!({ "key": scenario.key, "requested": scenario.vehicle_target, "spawned": spawned }),
                );
                CommandResult::ok(
                    message,
                    Some(json!({
                        "scenario": scenario,
                        "requested": scenario.vehicle_target,
                        "spawned": spawned,
                    })),
                )
            }
            Err(err) => {
                self.inner.guard.release(scenario.key);
                self.record(
                    LogLevel::Error,
                    "scenario.failed",
                    json!({ "key": scenario.key, "error": err.to_string() }),
                );
                CommandResult::failure(err.to_string())
            }
        }
    }

    /// Commits time, weather and a fresh population in that order. Local
    /// state follows each downstream commit as it lands.
    async fn run_scenario(&self, scenario: &ScenarioDefinition) -> Result<u32, ControlError> {
        let simulation = &self.inner.simulation;
        simulation
            .set_simulated_time(scenario.hour)
            .await?
            .into_result()?;
        self.inner.clock.set_time(scenario.hour, 0);

        simulation
            .set_simulated_temperature(scenario.temperature_f)
            .await?
            .into_result()?;
        *self.inner.temperature_f.lock() = scenario.temperature_f;

        simulation.stop_population().await?.into_result()?;
        let bucket = patterns::bucket_for(scenario.hour);
        let response = simulation
            .start_population(
                scenario.vehicle_target,
                bucket.ev_fraction,
                self.inner.config.soc_range(),
            )
            .await?;
        if !response.success {
            return Err(ControlError::Downstream(
                response
                    .error
                    .unwrap_or_else(|| "population start rejected".into()),
            ));
        }
        if response.spawned > 0 {
            if let Err(err) = simulation.report_ev_load(response.spawned).await {
                warn!(
                    "EV load for {} {} vehicles not reported: {err}",
                    response.spawned, scenario.key
                );
                self.record(
                    LogLevel::Warn,
                    "scenario.ev_load_unreported",
                    json!({ "key": scenario.key, "spawned": response.spawned, "error": err.to_string() }),
                );
            }
        }
        Ok(response.spawned)
    }

    fn release_after_grace(&self, key: &'static str) {
        let guard = self.inner.guard.clone();
        let telemetry = self.inner.telemetry.clone();
        let grace = self.inner.config.grace_period();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if guard.release(key) {
                if let Some(tel) = telemetry {
                    tel.record(LogLevel::Info, "scenario.released", json!({ "key": key }));
                }
            }
        });
    }

    fn record(&self, level: LogLevel, name: &str, payload: Value) {
        if let Some(tel) = &self.inner.telemetry {
            tel.record(level, name, payload);
        }
    }
}

const fn action_of(intent: &Intent) -> &'static str {
    match intent {
        Intent::SetTime { .. } => "change the time",
        Intent::SetTemperature { .. } => "change the temperature",
        Intent::StartScenario { .. } => "start a scenario",
        Intent::Status => "report status",
        Intent::Suggestions => "suggest scenarios",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        DirectorPhase, LoopbackOp, PopulationResponse, PopulationSnapshot, SocRange,
        SpawnResponse,
    };
    use async_trait::async_trait;
    use shared_event_bus::MemoryEventBus;
    use tokio::{sync::broadcast::error::TryRecvError, time};

    fn orchestrator(sim: &Arc<LoopbackSimulation>) -> ScenarioOrchestrator {
        ScenarioOrchestrator::builder()
            .loopback(sim.clone())
            .build()
            .unwrap()
    }

    fn start(key: &str) -> Intent {
        Intent::StartScenario { key: key.into() }
    }

    #[tokio::test(start_paused = true)]
    async fn evening_rush_applies_and_releases_after_grace() {
        let sim = Arc::new(LoopbackSimulation::with_seed(21));
        let orch = orchestrator(&sim);
        let result = orch.execute(start("evening_rush")).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(sim.hour(), 18);
        assert_eq!(sim.temperature_f(), 80);
        assert_eq!(sim.population(), 98);
        assert_eq!(sim.ev_load(), 98);
        assert_eq!(orch.current_clock().hour, 18);
        assert_eq!(orch.current_temperature(), 80);
        assert_eq!(orch.active_scenarios(), vec!["evening_rush"]);

        time::sleep(Duration::from_millis(5_001)).await;
        assert!(orch.active_scenarios().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_command_changes_nothing() {
        let sim = Arc::new(LoopbackSimulation::with_seed(22));
        let orch = orchestrator(&sim);
        assert!(orch.execute(start("evening_rush")).await.success);
        let calls = sim.journal().len();

        let rejected = orch.execute(Intent::SetTime { hour: 3 }).await;
        assert!(rejected.conflict);
        assert!(!rejected.success);
        assert_eq!(rejected.blocking, vec!["evening_rush"]);
        assert_eq!(orch.current_clock().hour, 18);
        assert_eq!(sim.hour(), 18);
        // Only the director status read went out.
        assert_eq!(sim.journal().len(), calls + 1);

        let status = orch.execute(Intent::Status).await;
        assert!(status.success);
        assert!(!status.conflict);
    }

    /// Backend whose calls take real (virtual) time, spawns the longest.
    struct Slow(Arc<LoopbackSimulation>);

    const CALL: Duration = Duration::from_millis(100);

    #[async_trait]
    impl SimulationControl for Slow {
        async fn set_simulated_time(&self, hour: u8) -> Result<CommitResponse, ControlError> {
            time::sleep(CALL).await;
            self.0.set_simulated_time(hour).await
        }

        async fn set_simulated_temperature(
            &self,
            fahrenheit: i32,
        ) -> Result<CommitResponse, ControlError> {
            time::sleep(CALL).await;
            self.0.set_simulated_temperature(fahrenheit).await
        }

        async fn stop_population(&self) -> Result<CommitResponse, ControlError> {
            time::sleep(CALL).await;
            self.0.stop_population().await
        }

        async fn start_population(
            &self,
            count: u32,
            ev_fraction: f64,
            soc: SocRange,
        ) -> Result<PopulationResponse, ControlError> {
            time::sleep(CALL).await;
            self.0.start_population(count, ev_fraction, soc).await
        }

        async fn spawn_additional(
            &self,
            count: u32,
            ev_fraction: f64,
            soc: SocRange,
        ) -> Result<SpawnResponse, ControlError> {
            time::sleep(CALL * 5).await;
            self.0.spawn_additional(count, ev_fraction, soc).await
        }

        async fn report_ev_load(&self, count: u32) -> Result<(), ControlError> {
            time::sleep(CALL).await;
            self.0.report_ev_load(count).await
        }
    }

    #[async_trait]
    impl NetworkState for Slow {
        async fn population_snapshot(&self) -> Result<PopulationSnapshot, ControlError> {
            time::sleep(CALL).await;
            self.0.population_snapshot().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_population_is_not_topped_up_mid_flight() {
        let sim = Arc::new(LoopbackSimulation::with_seed(31));
        let slow = Arc::new(Slow(sim.clone()));
        let orch = ScenarioOrchestrator::builder()
            .simulation(slow.clone())
            .network(slow)
            .director(sim.clone())
            .build()
            .unwrap();
        orch.start(3, 0).unwrap();

        let result = orch.execute(start("evening_rush")).await;
        assert!(result.success, "{}", result.message);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sim.population(), 98);
        assert!(!sim.journal().iter().any(|call| call.starts_with("spawn:")));

        // Past the grace period the maintainer finds the bucket satisfied.
        time::sleep(Duration::from_secs(10)).await;
        assert!(orch.active_scenarios().is_empty());
        assert_eq!(sim.population(), 98);
        orch.stop();
    }

    #[tokio::test]
    async fn unreported_ev_load_keeps_scenario_applied() {
        let sim = Arc::new(LoopbackSimulation::with_seed(32));
        sim.fail(LoopbackOp::ReportLoad, "energy model offline");
        let orch = orchestrator(&sim);
        let result = orch.execute(start("evening_rush")).await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.data.unwrap()["spawned"], 98);
        assert_eq!(sim.population(), 98);
        assert_eq!(sim.ev_load(), 0);
        assert_eq!(orch.active_scenarios(), vec!["evening_rush"]);
    }

    #[tokio::test]
    async fn downstream_failure_releases_immediately() {
        let sim = Arc::new(LoopbackSimulation::with_seed(23));
        sim.fail(LoopbackOp::StartPopulation, "spawner at capacity");
        let orch = orchestrator(&sim);
        let result = orch.execute(start("heatwave")).await;
        assert!(!result.success);
        assert!(!result.conflict);
        assert_eq!(result.message, "spawner at capacity");
        assert!(orch.active_scenarios().is_empty());
        assert_eq!(sim.ev_load(), 0);
    }

    #[tokio::test]
    async fn partial_population_is_noted() {
        let sim = Arc::new(LoopbackSimulation::with_seed(24).with_capacity(50));
        let orch = orchestrator(&sim);
        let result = orch.execute(start("morning_rush")).await;
        assert!(result.success);
        assert!(result.message.contains("only 50 of 85"), "{}", result.message);
        assert_eq!(result.data.unwrap()["spawned"], 50);
    }

    #[tokio::test]
    async fn busy_director_blocks_commands() {
        let sim = Arc::new(LoopbackSimulation::with_seed(25));
        sim.set_director(DirectorPhase::Running, Some("cold_snap"));
        let orch = orchestrator(&sim);
        let result = orch.execute(Intent::SetTemperature { fahrenheit: 90 }).await;
        assert!(result.conflict);
        assert_eq!(result.blocking, vec!["cold_snap"]);
        assert_eq!(sim.temperature_f(), 75);

        sim.set_director(DirectorPhase::Idle, None);
        let result = orch.execute(Intent::SetTemperature { fahrenheit: 90 }).await;
        assert!(result.success);
        assert_eq!(orch.current_temperature(), 90);
    }

    #[tokio::test]
    async fn unknown_scenario_fails_without_calls() {
        let sim = Arc::new(LoopbackSimulation::with_seed(26));
        let orch = orchestrator(&sim);
        let result = orch.execute(start("blizzard")).await;
        assert!(!result.success);
        assert_eq!(result.message, "unknown scenario: blizzard");
        assert_eq!(sim.journal(), vec!["director_status"]);
    }

    #[tokio::test]
    async fn text_commands_route_through_interpreter() {
        let sim = Arc::new(LoopbackSimulation::with_seed(27));
        let orch = orchestrator(&sim);

        let suggestions = orch.handle_text("what should I do").await.unwrap();
        let data = suggestions.data.unwrap();
        assert_eq!(data["suggestions"][0]["scenario_key"], "morning_rush");

        let temp = orch.handle_text("set temperature to 1000").await.unwrap();
        assert!(temp.success);
        assert_eq!(sim.temperature_f(), 120);

        let busy = orch.handle_text("set time to lunch hour").await.unwrap();
        assert!(busy.conflict);
        assert_eq!(busy.blocking, vec![TEMPERATURE_CHANGE_KEY]);

        let fresh = orchestrator(&sim);
        let lunch = fresh.handle_text("set time to lunch hour").await.unwrap();
        assert!(lunch.success, "{}", lunch.message);
        assert_eq!(sim.hour(), 12);
        assert_eq!(fresh.current_clock().hour, 12);

        assert!(orch.handle_text("zoom the map to downtown").await.is_none());
    }

    #[tokio::test]
    async fn status_reports_unknown_population() {
        let sim = Arc::new(LoopbackSimulation::with_seed(28));
        sim.inject_vehicles(12);
        let orch = orchestrator(&sim);
        let status = orch.status().await;
        assert_eq!(status.data.as_ref().unwrap()["population"], 12);
        assert_eq!(status.data.as_ref().unwrap()["quota_target"], 70);

        assert_eq!(status.data.as_ref().unwrap()["blocked"], false);

        sim.fail(LoopbackOp::Snapshot, "network state offline");
        sim.set_director(DirectorPhase::Running, Some("ev_surge"));
        let status = orch.status().await;
        assert!(status.success);
        assert_eq!(status.data.as_ref().unwrap()["blocked"], true);
        assert_eq!(status.data.as_ref().unwrap()["active"][0], "ev_surge");
        assert_eq!(status.data.unwrap()["population"], "unknown");
        assert!(status.message.contains("unknown vehicles"));
    }

    #[tokio::test(start_paused = true)]
    async fn start_stop_and_drop_tear_down_tasks() {
        let sim = Arc::new(LoopbackSimulation::with_seed(29));
        let orch = orchestrator(&sim);
        let mut hours = orch.subscribe_hour_changes();
        orch.start(9, 59).unwrap();
        assert!(orch.is_running());

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(hours.try_recv().unwrap().hour, 10);
        assert_eq!(sim.population(), 40);

        orch.pause();
        assert!(!orch.is_running());
        orch.resume();
        assert!(orch.stop());
        assert!(!orch.stop());

        orch.start(12, 0).unwrap();
        drop(orch);
        time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(hours.try_recv(), Err(TryRecvError::Closed)));
    }

    #[tokio::test]
    async fn telemetry_mirrors_commands() {
        let sim = Arc::new(LoopbackSimulation::with_seed(30));
        let bus = Arc::new(MemoryEventBus::new(32));
        let telemetry = OrchestratorTelemetry::builder("scenario-control")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        let orch = ScenarioOrchestrator::builder()
            .loopback(sim)
            .telemetry(telemetry)
            .build()
            .unwrap();
        orch.execute(start("late_night")).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.snapshot_of("scenario.applied").len(), 1);
        assert_eq!(bus.snapshot_of("orchestrator.command").len(), 1);
    }

    #[test]
    fn missing_backend_is_rejected() {
        let err = ScenarioOrchestrator::builder().build().unwrap_err();
        assert!(matches!(err, OrchestratorError::Control(ControlError::Unavailable(_))));
    }
}
