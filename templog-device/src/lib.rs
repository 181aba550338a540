//! # templog-device
//!
//! Periodically samples a BME280 sensor and the Met Office hourly
//! observation feed, and fans each reading out to a SQLite reading store
//! and an MQTT broker. Each sink and the weather feed are optional; the
//! sensor is not.

pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod sinks;
pub mod sources;
pub mod startup;

pub use error::{Error, Result};
pub use orchestrator::{CycleReport, Orchestrator, SensorRoute, WeatherRoute};
pub use startup::build_orchestrator;
