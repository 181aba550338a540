//! Reading model shared by sources and sinks

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Raw values returned by a source, before a device id and timestamp are attached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Degrees Celsius
    pub temperature: f64,
    /// Hectopascals
    pub pressure: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Wind speed (weather feed only)
    pub wind: Option<f64>,
}

/// A timestamped measurement from one source
///
/// Readings are never mutated after capture; sinks only serialize them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
    pub wind: Option<f64>,
}

impl Reading {
    /// Build a reading stamped with the current time
    pub fn capture(source: impl Into<String>, measurement: Measurement) -> Self {
        Self::at(source, measurement, crate::time::now())
    }

    /// Build a sensor reading; the physical sensor never reports wind
    pub fn sensor(source: impl Into<String>, measurement: Measurement) -> Self {
        Self::capture(
            source,
            Measurement {
                wind: None,
                ..measurement
            },
        )
    }

    /// Build a reading with an explicit timestamp
    ///
    /// The timestamp is truncated to microseconds, the precision readings are
    /// persisted with.
    pub fn at(source: impl Into<String>, measurement: Measurement, timestamp: DateTime<Utc>) -> Self {
        Self {
            source: source.into(),
            timestamp: timestamp.trunc_subsecs(6),
            temperature: round2(measurement.temperature),
            pressure: round2(measurement.pressure),
            humidity: round2(measurement.humidity),
            wind: measurement.wind.map(round2),
        }
    }
}

/// Round to 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
