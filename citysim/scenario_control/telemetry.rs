use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};
use uuid::Uuid;

/// Builder for orchestrator telemetry sinks.
pub struct OrchestratorTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl OrchestratorTelemetryBuilder {
    /// Creates the builder scoped to a component label.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            event_publisher: None,
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets the event publisher dashboards subscribe to.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<OrchestratorTelemetry> {
        let logger = self.log_path.map(JsonLogger::new).transpose()?;
        Ok(OrchestratorTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared by the clock, quota maintainer and façade.
#[derive(Clone)]
pub struct OrchestratorTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for OrchestratorTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.as_ref().map(JsonLogger::path))
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl OrchestratorTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> OrchestratorTelemetryBuilder {
        OrchestratorTelemetryBuilder::new(module)
    }

    /// Component label.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.inner.module
    }

    /// Writes a structured log record.
    pub fn log(&self, level: LogLevel, message: &str, fields: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_fields(&fields);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Publishes an event for dashboard mirrors.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        let Some(publisher) = &self.inner.publisher else {
            return Ok(());
        };
        let record = EventRecord {
            id: format!("evt-{}", Uuid::new_v4()),
            source: self.inner.module.clone(),
            event_type: event_type.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            payload,
        };
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    tracing::debug!("event publish failed: {err}");
                }
            });
            Ok(())
        } else {
            Runtime::new()?.block_on(publisher.publish(record))
        }
    }

    /// Logs and publishes the same payload under one name.
    pub fn record(&self, level: LogLevel, name: &str, payload: Value) {
        if let Err(err) = self.log(level, name, payload.clone()) {
            tracing::debug!("telemetry log failed for {name}: {err}");
        }
        if let Err(err) = self.event(name, payload) {
            tracing::debug!("telemetry event failed for {name}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event_without_runtime() {
        let tmp = tempdir().unwrap();
        let bus = Arc::new(MemoryEventBus::new(4));
        let log_path = tmp.path().join("orchestrator.log");
        let telemetry = OrchestratorTelemetry::builder("scenario-control")
            .log_path(&log_path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "clock.started", json!({ "hour": 8 }))
            .unwrap();
        telemetry
            .event("clock.hour_changed", json!({ "hour": 9 }))
            .unwrap();
        assert!(std::fs::read_to_string(&log_path)
            .unwrap()
            .contains("clock.started"));
        assert_eq!(bus.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn record_publishes_inside_runtime() {
        let bus = Arc::new(MemoryEventBus::new(4));
        let telemetry = OrchestratorTelemetry::builder("scenario-control")
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry.record(LogLevel::Info, "scenario.started", json!({ "key": "late_night" }));
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.snapshot_of("scenario.started").len(), 1);
    }
}
