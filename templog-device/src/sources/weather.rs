//! Met Office DataPoint hourly observation client
//!
//! The feed returns a time series: `SiteRep.DV.Location.Period[].Rep[]`, one
//! `Period` per day and one `Rep` per hourly observation. The current value is
//! the last observation of the last period. DataPoint collapses single-element
//! lists into bare objects and encodes numbers as strings; both are accepted.
//! Anything else that does not match is a [`WeatherError`], never a silently
//! missing field.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use templog_common::config::MetOfficeConfig;
use templog_common::Measurement;
use thiserror::Error;

use super::WeatherSource;

const USER_AGENT: &str = concat!("templog-device/", env!("CARGO_PKG_VERSION"));

/// Weather feed errors
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Response contains no observation")]
    MissingObservation,

    #[error("Observation has no '{0}' field")]
    MissingField(&'static str),

    #[error("Observation field '{field}' is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, Deserialize)]
struct ObservationResponse {
    #[serde(rename = "SiteRep")]
    site_rep: SiteRep,
}

#[derive(Debug, Deserialize)]
struct SiteRep {
    #[serde(rename = "DV")]
    data_values: DataValues,
}

#[derive(Debug, Deserialize)]
struct DataValues {
    #[serde(rename = "Location")]
    location: Option<Location>,
}

#[derive(Debug, Deserialize)]
struct Location {
    #[serde(rename = "Period", default)]
    periods: OneOrMany<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "Rep", default)]
    observations: OneOrMany<Observation>,
}

/// One hourly observation as sent by DataPoint
#[derive(Debug, Deserialize)]
struct Observation {
    /// Temperature, °C
    #[serde(rename = "T")]
    temperature: Option<FieldValue>,
    /// Relative humidity, %
    #[serde(rename = "H")]
    humidity: Option<FieldValue>,
    /// Pressure, hPa
    #[serde(rename = "P")]
    pressure: Option<FieldValue>,
    /// Wind speed, mph
    #[serde(rename = "S")]
    wind_speed: Option<FieldValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn last(&self) -> Option<&T> {
        match self {
            OneOrMany::Many(items) => items.last(),
            OneOrMany::One(item) => Some(item),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    fn to_f64(&self, field: &'static str) -> Result<f64, WeatherError> {
        match self {
            FieldValue::Number(n) => Ok(*n),
            FieldValue::Text(s) => s.trim().parse::<f64>().map_err(|_| WeatherError::InvalidNumber {
                field,
                value: s.clone(),
            }),
        }
    }
}

fn required(value: &Option<FieldValue>, field: &'static str) -> Result<f64, WeatherError> {
    value
        .as_ref()
        .ok_or(WeatherError::MissingField(field))?
        .to_f64(field)
}

/// Parse a DataPoint observation body into the most recent measurement
pub fn parse_observation(body: &str) -> Result<Measurement, WeatherError> {
    let response: ObservationResponse =
        serde_json::from_str(body).map_err(|e| WeatherError::Parse(e.to_string()))?;

    let observation = response
        .site_rep
        .data_values
        .location
        .as_ref()
        .and_then(|location| location.periods.last())
        .and_then(|period| period.observations.last())
        .ok_or(WeatherError::MissingObservation)?;

    let wind = match &observation.wind_speed {
        Some(value) => Some(value.to_f64("S")?),
        None => None,
    };

    Ok(Measurement {
        temperature: required(&observation.temperature, "T")?,
        humidity: required(&observation.humidity, "H")?,
        pressure: required(&observation.pressure, "P")?,
        wind,
    })
}

/// HTTP client for the DataPoint observation endpoint
pub struct MetOfficeClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl MetOfficeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WeatherError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| WeatherError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &MetOfficeConfig) -> Result<Self, WeatherError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_seconds),
        )
    }

    fn location_url(&self, location_id: &str) -> String {
        format!("{}/{}", self.base_url, location_id)
    }
}

#[async_trait]
impl WeatherSource for MetOfficeClient {
    async fn fetch(&self, location_id: &str, api_key: &str) -> Result<Measurement, WeatherError> {
        let url = self.location_url(location_id);
        tracing::debug!(url = %url, "Querying Met Office observations");

        let response = self
            .http_client
            .get(&url)
            .query(&[("res", "hourly"), ("key", api_key)])
            .send()
            .await
            .map_err(|e| WeatherError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(WeatherError::Status(status.as_u16(), error_text));
        }

        let body = response
            .text()
            .await
            .map_err(|e| WeatherError::Network(e.without_url().to_string()))?;

        parse_observation(&body)
    }
}
