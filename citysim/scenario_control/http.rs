use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{
    collaborators::{
        CommitResponse, ControlError, DirectorStatus, NetworkState, PopulationResponse,
        PopulationSnapshot, ScenarioDirector, SimulationControl, SocRange, SpawnResponse,
    },
    config::BackendSettings,
};

#[derive(Debug, Serialize)]
struct TimeRequest {
    hour: u8,
}

#[derive(Debug, Serialize)]
struct TemperatureRequest {
    temperature: i32,
}

#[derive(Debug, Serialize)]
struct PopulationRequest {
    count: u32,
    ev_percentage: f64,
    min_soc: f64,
    max_soc: f64,
}

impl PopulationRequest {
    fn new(count: u32, ev_fraction: f64, soc: SocRange) -> Self {
        Self {
            count,
            ev_percentage: (ev_fraction * 100.0).clamp(0.0, 100.0),
            min_soc: soc.min,
            max_soc: soc.max,
        }
    }
}

#[derive(Debug, Serialize)]
struct EvLoadRequest {
    count: u32,
}

#[derive(Debug, Default, Deserialize)]
struct VehicleBody {
    #[serde(default, alias = "is_ev")]
    electric: bool,
    #[serde(default, alias = "battery_soc")]
    soc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NetworkStateBody {
    #[serde(default, alias = "vehicle_count")]
    count: Option<u32>,
    #[serde(default)]
    vehicles: Vec<VehicleBody>,
}

impl NetworkStateBody {
    fn into_snapshot(self) -> PopulationSnapshot {
        let listed = u32::try_from(self.vehicles.len()).unwrap_or(u32::MAX);
        let socs: Vec<f64> = self
            .vehicles
            .iter()
            .filter(|v| v.electric)
            .filter_map(|v| v.soc)
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let average_soc = (!socs.is_empty()).then(|| socs.iter().sum::<f64>() / socs.len() as f64);
        PopulationSnapshot {
            count: self.count.unwrap_or(listed),
            electric: u32::try_from(self.vehicles.iter().filter(|v| v.electric).count())
                .unwrap_or(u32::MAX),
            average_soc,
        }
    }
}

/// JSON-over-HTTP client for the simulation backend.
#[derive(Debug, Clone)]
pub struct HttpSimulationClient {
    client: Client,
    base_url: String,
}

impl HttpSimulationClient {
    /// Builds a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ControlError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ControlError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    /// Builds a client from the `[backend]` config section.
    pub fn from_settings(settings: &BackendSettings) -> Result<Self, ControlError> {
        Self::new(
            settings.base_url.clone(),
            Duration::from_millis(settings.request_timeout_ms),
        )
    }

    /// Backend root, without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ControlError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        debug!("POST {path}");
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ControlError> {
        debug!("GET {path}");
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport)?;
        decode(response).await
    }
}

fn transport(err: reqwest::Error) -> ControlError {
    ControlError::Transport(err.to_string())
}

async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, ControlError> {
    let status = response.status();
    let text = response.text().await.map_err(transport)?;
    if !status.is_success() {
        return Err(ControlError::Downstream(failure_message(status.as_u16(), &text)));
    }
    serde_json::from_str(&text).map_err(|err| ControlError::Decode(err.to_string()))
}

fn failure_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() {
                format!("backend answered HTTP {status}")
            } else {
                format!("backend answered HTTP {status}: {body}")
            }
        })
}

#[async_trait]
impl SimulationControl for HttpSimulationClient {
    async fn set_simulated_time(&self, hour: u8) -> Result<CommitResponse, ControlError> {
        self.post("/api/simulation/time", &TimeRequest { hour }).await
    }

    async fn set_simulated_temperature(
        &self,
        fahrenheit: i32,
    ) -> Result<CommitResponse, ControlError> {
        self.post(
            "/api/simulation/temperature",
            &TemperatureRequest {
                temperature: fahrenheit,
            },
        )
        .await
    }

    async fn stop_population(&self) -> Result<CommitResponse, ControlError> {
        self.post("/api/vehicles/stop", &serde_json::json!({})).await
    }

    async fn start_population(
        &self,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> Result<PopulationResponse, ControlError> {
        self.post(
            "/api/vehicles/start",
            &PopulationRequest::new(count, ev_fraction, soc),
        )
        .await
    }

    async fn spawn_additional(
        &self,
        count: u32,
        ev_fraction: f64,
        soc: SocRange,
    ) -> Result<SpawnResponse, ControlError> {
        self.post(
            "/api/vehicles/spawn",
            &PopulationRequest::new(count, ev_fraction, soc),
        )
        .await
    }

    async fn report_ev_load(&self, count: u32) -> Result<(), ControlError> {
        let response: CommitResponse = self
            .post("/api/energy/ev_load", &EvLoadRequest { count })
            .await?;
        response.into_result()
    }
}

#[async_trait]
impl NetworkState for HttpSimulationClient {
    async fn population_snapshot(&self) -> Result<PopulationSnapshot, ControlError> {
        let body: NetworkStateBody = self.get("/api/network_state").await?;
        Ok(body.into_snapshot())
    }
}

#[async_trait]
impl ScenarioDirector for HttpSimulationClient {
    async fn status(&self) -> Result<DirectorStatus, ControlError> {
        self.get("/api/scenario/status").await
    }
}
