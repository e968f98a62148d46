use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use tokio::{
    runtime::Handle,
    sync::broadcast,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::{error::OrchestratorError, telemetry::OrchestratorTelemetry};

/// Snapshot of the simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    /// Hour, `0..=23`.
    pub hour: u8,
    /// Minute, `0..=59`.
    pub minute: u8,
    /// False while stopped or paused.
    pub running: bool,
    /// Real milliseconds per simulated minute.
    pub tick_period_ms: u64,
}

impl ClockState {
    /// `HH:MM` rendering.
    #[must_use]
    pub fn display(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// What moved the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HourChangeCause {
    /// Minute overflow during a tick.
    Tick,
    /// An explicit set-time.
    Command,
}

/// Notification raised whenever the simulated hour changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourChange {
    /// Hour before the change.
    pub previous: u8,
    /// Hour after the change.
    pub hour: u8,
    /// What caused it.
    pub cause: HourChangeCause,
}

struct ClockInner {
    state: Mutex<ClockState>,
    task: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    hours: broadcast::Sender<HourChange>,
    telemetry: Option<OrchestratorTelemetry>,
}

/// Simulated clock advanced by a periodic task, one minute per tick.
///
/// The clock is either stopped (no task) or started (task alive). A started
/// clock can be paused: the task keeps firing but ticks are ignored, so pause
/// and resume never re-register the timer. Every start and stop bumps a
/// generation counter; tasks and async continuations from an older generation
/// must not act on the clock.
#[derive(Clone)]
pub struct ProgressiveClock {
    inner: Arc<ClockInner>,
}

impl std::fmt::Debug for ProgressiveClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressiveClock")
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish()
    }
}

impl ProgressiveClock {
    /// Creates a stopped clock at 00:00.
    #[must_use]
    pub fn new(tick_period: Duration, telemetry: Option<OrchestratorTelemetry>) -> Self {
        let (hours, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ClockInner {
                state: Mutex::new(ClockState {
                    hour: 0,
                    minute: 0,
                    running: false,
                    tick_period_ms: period_ms(tick_period),
                }),
                task: Mutex::new(None),
                generation: AtomicU64::new(0),
                hours,
                telemetry,
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClockState {
        *self.inner.state.lock()
    }

    /// True between `start` and `stop`, paused or not.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    /// Current generation; changes on every start and stop.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Subscribes to hour changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HourChange> {
        self.inner.hours.subscribe()
    }

    /// Starts (or restarts) ticking from `hour:minute`.
    pub fn start(&self, hour: u8, minute: u8) -> Result<(), OrchestratorError> {
        let handle = Handle::try_current().map_err(|_| OrchestratorError::Runtime)?;
        self.halt_task();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let period = {
            let mut state = self.inner.state.lock();
            state.hour = hour.min(23);
            state.minute = minute.min(59);
            state.running = true;
            Duration::from_millis(state.tick_period_ms)
        };
        let task = handle.spawn(run_ticks(Arc::downgrade(&self.inner), generation, period));
        *self.inner.task.lock() = Some(task);
        self.record(
            LogLevel::Info,
            "clock.started",
            json!({ "hour": hour.min(23), "minute": minute.min(59), "tick_period_ms": period_ms(period) }),
        );
        Ok(())
    }

    /// Stops ticking. Returns false if the clock was already stopped.
    pub fn stop(&self) -> bool {
        let was_active = self.halt_task();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let state = {
            let mut state = self.inner.state.lock();
            state.running = false;
            *state
        };
        if was_active {
            self.record(
                LogLevel::Info,
                "clock.stopped",
                json!({ "time": state.display() }),
            );
        }
        was_active
    }

    /// Suppresses ticks without cancelling the task.
    pub fn pause(&self) {
        if self.is_active() {
            self.inner.state.lock().running = false;
        }
    }

    /// Lets a paused clock tick again.
    pub fn resume(&self) {
        if self.is_active() {
            self.inner.state.lock().running = true;
        }
    }

    /// Changes the tick period. A started clock is restarted at its current
    /// time and keeps its paused/running flag.
    pub fn set_tick_period(&self, period: Duration) -> Result<(), OrchestratorError> {
        let period_ms = period_ms(period);
        if !self.is_active() {
            self.inner.state.lock().tick_period_ms = period_ms;
            return Ok(());
        }
        let before = self.state();
        self.stop();
        self.inner.state.lock().tick_period_ms = period_ms;
        self.start(before.hour, before.minute)?;
        if !before.running {
            self.pause();
        }
        Ok(())
    }

    /// Moves the clock to `hour:minute` in place, without touching the task.
    pub fn set_time(&self, hour: u8, minute: u8) -> Option<HourChange> {
        let hour = hour.min(23);
        let previous = {
            let mut state = self.inner.state.lock();
            let previous = state.hour;
            state.hour = hour;
            state.minute = minute.min(59);
            previous
        };
        (previous != hour).then(|| {
            let change = HourChange {
                previous,
                hour,
                cause: HourChangeCause::Command,
            };
            self.announce(change);
            change
        })
    }

    /// Advances one simulated minute. Returns the hour change, if any.
    /// Does nothing while stopped or paused.
    pub fn tick(&self) -> Option<HourChange> {
        let change = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return None;
            }
            state.minute += 1;
            if state.minute < 60 {
                return None;
            }
            let previous = state.hour;
            state.minute = 0;
            state.hour = (state.hour + 1) % 24;
            HourChange {
                previous,
                hour: state.hour,
                cause: HourChangeCause::Tick,
            }
        };
        self.announce(change);
        Some(change)
    }

    fn announce(&self, change: HourChange) {
        // Nobody listening is fine.
        let _ = self.inner.hours.send(change);
        self.record(
            LogLevel::Info,
            "clock.hour_changed",
            json!({ "previous": change.previous, "hour": change.hour, "cause": change.cause }),
        );
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

impl Drop for ClockInner {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn run_ticks(inner: Weak<ClockInner>, generation: u64, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.generation.load(Ordering::SeqCst) != generation {
            debug!("stale clock task exiting");
            break;
        }
        let clock = ProgressiveClock { inner };
        if let Some(change) = clock.tick() {
            debug!("simulated hour is now {}", change.hour);
        }
    }
}

fn period_ms(period: Duration) -> u64 {
    u64::try_from(period.as_millis()).unwrap_or(u64::MAX).max(1)
}
