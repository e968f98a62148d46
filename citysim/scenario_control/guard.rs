use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::Mutex;
use tracing::warn;

use crate::collaborators::ScenarioDirector;

/// Key absorbed when the director is busy but does not name its scenario.
pub const DIRECTOR_KEY: &str = "scenario_director";

#[derive(Debug, Default)]
struct ActiveSet {
    local: IndexSet<String>,
    absorbed: IndexSet<String>,
}

impl ActiveSet {
    fn is_busy(&self) -> bool {
        !self.local.is_empty() || !self.absorbed.is_empty()
    }

    fn keys(&self) -> Vec<String> {
        self.local
            .iter()
            .chain(self.absorbed.iter().filter(|key| !self.local.contains(*key)))
            .cloned()
            .collect()
    }
}

/// Tracks in-flight exclusive changes and rejects overlapping ones.
///
/// A change is in flight while its key is marked locally or while the
/// external scenario director reports a busy phase. Director keys are
/// absorbed into the set so rejection messages can name them, and are
/// dropped again once the director settles.
#[derive(Clone)]
pub struct ConflictGuard {
    active: Arc<Mutex<ActiveSet>>,
    director: Option<Arc<dyn ScenarioDirector>>,
}

impl std::fmt::Debug for ConflictGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictGuard")
            .field("active", &self.active_keys())
            .field("director", &self.director.is_some())
            .finish()
    }
}

impl Default for ConflictGuard {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ConflictGuard {
    /// Creates a guard, optionally consulting an external director.
    #[must_use]
    pub fn new(director: Option<Arc<dyn ScenarioDirector>>) -> Self {
        Self {
            active: Arc::new(Mutex::new(ActiveSet::default())),
            director,
        }
    }

    /// True if an exclusive change is in progress here or in the director.
    pub async fn has_conflict(&self) -> bool {
        self.refresh_director().await;
        self.is_busy()
    }

    /// Marks `key` as in flight unless another exclusive change already is.
    ///
    /// The check and the insert happen under one lock, so two callers racing
    /// on different threads cannot both succeed. On rejection the blocking
    /// keys are returned, local ones first.
    pub async fn try_acquire(&self, key: impl Into<String>) -> Result<(), Vec<String>> {
        self.refresh_director().await;
        let mut active = self.active.lock();
        if active.is_busy() {
            return Err(active.keys());
        }
        active.local.insert(key.into());
        Ok(())
    }

    /// Releases `key`. Returns false if it was not active.
    pub fn release(&self, key: &str) -> bool {
        self.active.lock().local.shift_remove(key)
    }

    /// Keys currently blocking exclusive changes, local ones first.
    #[must_use]
    pub fn active_keys(&self) -> Vec<String> {
        self.active.lock().keys()
    }

    /// True if any key is held, without asking the director again.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.lock().is_busy()
    }

    async fn refresh_director(&self) {
        let Some(director) = &self.director else {
            return;
        };
        match director.status().await {
            Ok(status) if status.phase.is_busy() => {
                let key = status
                    .scenario_key
                    .unwrap_or_else(|| DIRECTOR_KEY.to_owned());
                self.active.lock().absorbed.insert(key);
            }
            Ok(_) => self.active.lock().absorbed.clear(),
            Err(err) => warn!("scenario director status unavailable: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{DirectorPhase, LoopbackOp, LoopbackSimulation};

    #[tokio::test]
    async fn local_keys_block_until_released() {
        let guard = ConflictGuard::default();
        assert!(!guard.has_conflict().await);
        assert_eq!(guard.try_acquire("evening_rush").await, Ok(()));
        assert_eq!(
            guard.try_acquire("heatwave").await,
            Err(vec!["evening_rush".to_owned()])
        );
        assert!(guard.has_conflict().await);
        assert!(guard.is_busy());
        assert_eq!(guard.active_keys(), vec!["evening_rush"]);
        assert!(guard.release("evening_rush"));
        assert!(!guard.release("evening_rush"));
        assert!(!guard.has_conflict().await);
        assert!(!guard.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquires_admit_exactly_one() {
        let guard = ConflictGuard::default();
        let attempts: Vec<_> = (0..16)
            .map(|n| {
                let guard = guard.clone();
                tokio::spawn(async move { guard.try_acquire(format!("change_{n}")).await })
            })
            .collect();
        let mut admitted = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(guard.active_keys().len(), 1);
    }

    #[tokio::test]
    async fn busy_director_rejects_acquire() {
        let sim = Arc::new(LoopbackSimulation::with_seed(5));
        let guard = ConflictGuard::new(Some(sim.clone()));
        sim.set_director(DirectorPhase::Running, Some("heatwave"));
        assert_eq!(
            guard.try_acquire("evening_rush").await,
            Err(vec!["heatwave".to_owned()])
        );
        sim.set_director(DirectorPhase::Idle, None);
        assert_eq!(guard.try_acquire("evening_rush").await, Ok(()));
    }

    #[tokio::test]
    async fn busy_director_is_absorbed_then_dropped() {
        let sim = Arc::new(LoopbackSimulation::with_seed(5));
        let guard = ConflictGuard::new(Some(sim.clone()));
        sim.set_director(DirectorPhase::Running, Some("heatwave"));
        assert!(guard.has_conflict().await);
        assert_eq!(guard.active_keys(), vec!["heatwave"]);

        sim.set_director(DirectorPhase::Preparing, None);
        assert!(guard.has_conflict().await);
        assert!(guard.active_keys().contains(&DIRECTOR_KEY.to_owned()));

        sim.set_director(DirectorPhase::Done, None);
        assert!(!guard.has_conflict().await);
        assert!(guard.active_keys().is_empty());
    }

    #[tokio::test]
    async fn unreachable_director_does_not_block() {
        let sim = Arc::new(LoopbackSimulation::with_seed(5));
        sim.fail(LoopbackOp::DirectorStatus, "director offline");
        let guard = ConflictGuard::new(Some(sim));
        assert!(!guard.has_conflict().await);
    }
}
