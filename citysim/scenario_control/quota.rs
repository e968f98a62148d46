use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use shared_logging::LogLevel;
use tokio::{
    runtime::Handle,
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, warn};

use crate::{
    clock::{HourChange, ProgressiveClock},
    collaborators::{ControlError, NetworkState, SimulationControl, SocRange},
    error::OrchestratorError,
    guard::ConflictGuard,
    patterns,
    telemetry::OrchestratorTelemetry,
};

/// Guard key held while a top-up check reads and grows the population.
pub const QUOTA_TOP_UP_KEY: &str = "quota_top_up";

/// Result of one quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QuotaOutcome {
    /// The clock is stopped or paused.
    Skipped,
    /// Another exclusive change was in flight; the next cycle retries.
    Deferred,
    /// Population already meets the bucket minimum.
    Satisfied {
        /// Population observed.
        population: u32,
        /// Bucket minimum.
        target: u32,
    },
    /// Vehicles were spawned to cover a deficit.
    ToppedUp {
        /// Vehicles asked for.
        requested: u32,
        /// Vehicles the simulation actually added.
        spawned: u32,
        /// Population after the spawn.
        total: u32,
    },
    /// The maintainer was stopped while the check was in flight.
    Discarded,
}

struct QuotaInner {
    clock: ProgressiveClock,
    simulation: Arc<dyn SimulationControl>,
    network: Arc<dyn NetworkState>,
    guard: ConflictGuard,
    soc: SocRange,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    telemetry: Option<OrchestratorTelemetry>,
}

/// Keeps the vehicle population at or above the current demand bucket's minimum.
///
/// Checks run on a fixed interval and immediately after every hour change.
/// The maintainer only ever adds vehicles. Each check holds
/// [`QUOTA_TOP_UP_KEY`] in the shared conflict guard, so it never overlaps a
/// scenario or clock change that is reseeding the population.
#[derive(Clone)]
pub struct QuotaMaintainer {
    inner: Arc<QuotaInner>,
}

impl std::fmt::Debug for QuotaMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaMaintainer")
            .field("interval", &self.inner.interval)
            .field("active", &self.is_active())
            .finish()
    }
}

impl QuotaMaintainer {
    /// Creates a stopped maintainer bound to `clock` and sharing `guard`.
    #[must_use]
    pub fn new(
        clock: ProgressiveClock,
        simulation: Arc<dyn SimulationControl>,
        network: Arc<dyn NetworkState>,
        guard: ConflictGuard,
        soc: SocRange,
        interval: Duration,
        telemetry: Option<OrchestratorTelemetry>,
    ) -> Self {
        Self {
            inner: Arc::new(QuotaInner {
                clock,
                simulation,
                network,
                guard,
                soc,
                interval,
                task: Mutex::new(None),
                generation: AtomicU64::new(0),
                telemetry,
            }),
        }
    }

    /// True while the periodic task exists.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    /// Starts periodic checks, replacing any running task.
    pub fn start(&self) -> Result<(), OrchestratorError> {
        let handle = Handle::try_current().map_err(|_| OrchestratorError::Runtime)?;
        self.halt_task();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let hours = self.inner.clock.subscribe();
        let task = handle.spawn(run_checks(
            Arc::downgrade(&self.inner),
            generation,
            self.inner.interval,
            hours,
        ));
        *self.inner.task.lock() = Some(task);
        Ok(())
    }

    /// Stops periodic checks. In-flight checks are discarded when they resume.
    pub fn stop(&self) -> bool {
        let was_active = self.halt_task();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        was_active
    }

    /// Runs one check now.
    pub async fn check_once(&self) -> Result<QuotaOutcome, ControlError> {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        if !self.inner.clock.state().running {
            return Ok(QuotaOutcome::Skipped);
        }
        if let Err(blocking) = self.inner.guard.try_acquire(QUOTA_TOP_UP_KEY).await {
            debug!("quota check deferred: {} in progress", blocking.join(", "));
            self.record(
                LogLevel::Debug,
                "quota.deferred",
                json!({ "blocking": blocking }),
            );
            return Ok(QuotaOutcome::Deferred);
        }
        let _held = HeldKey(&self.inner.guard);

        // Re-read after acquiring: a change that just released may have moved the hour.
        let clock = self.inner.clock.state();
        if !clock.running {
            return Ok(QuotaOutcome::Skipped);
        }
        let bucket = patterns::bucket_for(clock.hour);
        let target = bucket.quota_target();

        let snapshot = self.inner.network.population_snapshot().await?;
        if self.is_stale(generation) {
            return Ok(self.discard(clock.hour));
        }
        if snapshot.count >= target {
            return Ok(QuotaOutcome::Satisfied {
                population: snapshot.count,
                target,
            });
        }

        let deficit = target - snapshot.count;
        let response = self
            .inner
            .simulation
            .spawn_additional(deficit, bucket.ev_fraction, self.inner.soc)
            .await?;
        if !response.success {
            return Err(ControlError::Downstream(
                response.error.unwrap_or_else(|| "spawn rejected".into()),
            ));
        }
        if self.is_stale(generation) {
            return Ok(self.discard(clock.hour));
        }
        if response.spawned > 0 {
            if let Err(err) = self.inner.simulation.report_ev_load(response.spawned).await {
                warn!(
                    "EV load for {} topped-up vehicles not reported: {err}",
                    response.spawned
                );
                self.record(
                    LogLevel::Warn,
                    "quota.ev_load_unreported",
                    json!({ "spawned": response.spawned, "error": err.to_string() }),
                );
            }
        }

        let outcome = QuotaOutcome::ToppedUp {
            requested: deficit,
            spawned: response.spawned,
            total: response.total,
        };
        let level = if response.spawned < deficit {
            LogLevel::Warn
        } else {
            LogLevel::Info
        };
        self.record(
            level,
            "quota.topped_up",
            json!({
                "hour": clock.hour,
                "bucket": bucket.label,
                "target": target,
                "requested": deficit,
                "spawned": response.spawned,
                "total": response.total,
            }),
        );
        Ok(outcome)
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) != generation
    }

    fn discard(&self, hour: u8) -> QuotaOutcome {
        debug!("quota check for hour {hour} discarded after stop");
        self.record(LogLevel::Debug, "quota.discarded", json!({ "hour": hour }));
        QuotaOutcome::Discarded
    }

    fn halt_task(&self) -> bool {
        let Some(task) = self.inner.task.lock().take() else {
            return false;
        };
        task.abort();
        true
    }

    fn record(&self, level: LogLevel, name: &str, payload: serde_json::Value) {
        if let Some(tel) = &self.inner.telemetry {
            tel.record(level, name, payload);
        }
    }
}

/// Releases the top-up key however the check ends, including task abort.
struct HeldKey<'a>(&'a ConflictGuard);

impl Drop for HeldKey<'_> {
    fn drop(&mut self) {
        self.0.release(QUOTA_TOP_UP_KEY);
    }
}

impl Drop for QuotaInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_checks(
    inner: Weak<QuotaInner>,
    generation: u64,
    interval: Duration,
    mut hours: broadcast::Receiver<HourChange>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            change = hours.recv() => match change {
                Ok(change) => debug!("hour changed to {}, checking quota", change.hour),
                Err(RecvError::Lagged(skipped)) => debug!("missed {skipped} hour changes"),
                Err(RecvError::Closed) => break,
            },
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            break;
        }
        let maintainer = QuotaMaintainer { inner };
        if let Err(err) = maintainer.check_once().await {
            warn!("quota check failed, retrying next cycle: {err}");
            maintainer.record(
                LogLevel::Warn,
                "quota.check_failed",
                json!({ "error": err.to_string() }),
            );
        }
    }
}
