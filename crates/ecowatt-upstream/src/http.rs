//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP client for the hosted telemetry service."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ecowatt_common::UpstreamConfig;
use ecowatt_model::{Device, Reading};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use crate::{Result, TelemetrySink, TelemetrySource, UpstreamError};

const AUTH_HEADER: &str = "X-Auth-Token";
const VARIABLES: [&str; 4] = ["voltage", "current", "power", "temperature"];

#[derive(Debug, Deserialize)]
struct ValuesPage {
    #[serde(default)]
    results: Vec<Sample>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct Sample {
    value: f64,
    timestamp: i64,
}

/// Telemetry sink and source backed by a hosted device-variable API.
///
/// Writes post one JSON document per reading to `{base}/devices/{label}`.
/// Reads fetch each variable from `{base}/devices/{label}/{variable}/values`
/// and join them on the power samples' timestamps.
#[derive(Debug, Clone)]
pub struct HttpTelemetryClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl HttpTelemetryClient {
    /// Client for `base_url`, sending `token` when present.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let base =
            Url::parse(base_url).map_err(|_| UpstreamError::InvalidBaseUrl(base_url.to_owned()))?;
        if base.cannot_be_a_base() {
            return Err(UpstreamError::InvalidBaseUrl(base_url.to_owned()));
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Client)?;
        Ok(Self { http, base, token })
    }

    /// Client configured from the `[upstream]` section.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self> {
        Self::new(&config.base_url, config.resolve_token(), config.request_timeout)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidBaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorised(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTH_HEADER, token),
            None => request,
        }
    }

    async fn variable(
        &self,
        label: &str,
        variable: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let url = self.endpoint(&["devices", label, variable, "values"])?;
        let response = self
            .authorised(self.http.get(url.clone()))
            .query(&[
                ("start", from.timestamp_millis()),
                ("end", to.timestamp_millis()),
            ])
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status,
            });
        }
        let page: ValuesPage = response
            .json()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
        Ok(page.results)
    }

    async fn fetch_joined(
        &self,
        device: &Device,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let mut series = HashMap::with_capacity(VARIABLES.len());
        for variable in VARIABLES {
            let samples = self.variable(&device.label, variable, from, to).await?;
            series.insert(variable, samples);
        }
        Ok(join_series(&device.id.to_string(), &series))
    }
}

/// Build readings from per-variable samples, keyed on the power timestamps.
/// Missing companions read as 0.0.
fn join_series(device_id: &str, series: &HashMap<&str, Vec<Sample>>) -> Vec<Reading> {
    let lookup = |variable: &str| -> HashMap<i64, f64> {
        series
            .get(variable)
            .map(|samples| samples.iter().map(|s| (s.timestamp, s.value)).collect())
            .unwrap_or_default()
    };
    let voltage = lookup("voltage");
    let current = lookup("current");
    let temperature = lookup("temperature");

    let mut readings: Vec<Reading> = series
        .get("power")
        .into_iter()
        .flatten()
        .filter_map(|sample| {
            let timestamp = Utc.timestamp_millis_opt(sample.timestamp).single()?;
            Some(Reading {
                device_id: device_id.to_owned(),
                voltage: voltage.get(&sample.timestamp).copied().unwrap_or(0.0),
                current: current.get(&sample.timestamp).copied().unwrap_or(0.0),
                power: sample.value,
                temperature: temperature.get(&sample.timestamp).copied().unwrap_or(0.0),
                timestamp,
            })
        })
        .collect();
    readings.sort_by_key(|reading| reading.timestamp);
    readings
}

#[async_trait]
impl TelemetrySink for HttpTelemetryClient {
    async fn send(&self, label: &str, reading: &Reading) -> Result<()> {
        let url = self.endpoint(&["devices", label])?;
        let payload = json!({
            "voltage": reading.voltage,
            "current": reading.current,
            "power": reading.power,
            "temperature": reading.temperature,
            "timestamp": reading.timestamp.timestamp_millis(),
        });
        let response = self
            .authorised(self.http.post(url.clone()))
            .json(&payload)
            .send()
            .await
            .map_err(|source| UpstreamError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status,
            });
        }
        debug!(label, "reading forwarded upstream");
        Ok(())
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetryClient {
    async fn fetch(&self, device: &Device, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Reading> {
        match self.fetch_joined(device, from, to).await {
            Ok(readings) => readings,
            Err(err) => {
                warn!(label = %device.label, error = %err, "telemetry read failed; returning empty window");
                Vec::new()
            }
        }
    }
}
