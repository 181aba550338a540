//! Acquisition and fan-out loop
//!
//! One cycle at a time, never overlapping:
//! 1. Weather feed (if configured): fetch, then fan out with hour dedup.
//!    A failed fetch is logged and skipped.
//! 2. Sensor: read, then fan out without dedup. A failed read ends the run.
//! 3. Sleep for the reading interval, waking early on shutdown.
//!
//! Shutdown is only observed between cycles, so a read or save in progress
//! always completes. Sink failures are logged per sink and never reach the
//! other sink.

use std::sync::Arc;
use std::time::Duration;

use templog_common::config::MIN_READING_INTERVAL_SECS;
use templog_common::Reading;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::sinks::{ReadingPublisher, ReadingStore, SaveOutcome};
use crate::sources::{SensorSource, WeatherSource};

/// Device id and topic for sensor readings
#[derive(Debug, Clone)]
pub struct SensorRoute {
    pub device_id: String,
    pub topic: String,
}

/// Device id, topic and request parameters for weather readings
#[derive(Debug, Clone)]
pub struct WeatherRoute {
    pub device_id: String,
    pub topic: String,
    pub location_id: String,
    pub api_key: String,
}

/// What happened during one cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub weather_reading: bool,
    pub sensor_reading: bool,
    pub stored: usize,
    pub skipped_duplicates: usize,
    pub store_failures: usize,
    pub published: usize,
}

pub struct Orchestrator {
    sensor: Box<dyn SensorSource>,
    sensor_route: SensorRoute,
    weather: Option<(Box<dyn WeatherSource>, WeatherRoute)>,
    store: Option<Box<dyn ReadingStore>>,
    publisher: Option<Arc<dyn ReadingPublisher>>,
    interval: Duration,
}

impl Orchestrator {
    pub fn new(sensor: Box<dyn SensorSource>, sensor_route: SensorRoute) -> Self {
        Self {
            sensor,
            sensor_route,
            weather: None,
            store: None,
            publisher: None,
            interval: Duration::from_secs(MIN_READING_INTERVAL_SECS),
        }
    }

    pub fn with_weather(mut self, source: Box<dyn WeatherSource>, route: WeatherRoute) -> Self {
        self.weather = Some((source, route));
        self
    }

    pub fn with_store(mut self, store: Box<dyn ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn ReadingPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Delay between cycles. Callers apply the configured floor.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run cycles until `shutdown` is cancelled or a cycle fails with a
    /// fatal error (see [`Error::is_fatal`]). The fatal error is returned
    /// unlogged for the caller to report.
    ///
    /// Returns the number of completed cycles. The sensor and broker are
    /// released on both paths.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<u64> {
        info!(
            "Device started, reading every {}s",
            self.interval.as_secs()
        );

        let mut cycles = 0u64;
        let outcome = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }

            match self.run_cycle().await {
                Ok(_) => cycles += 1,
                Err(e) if e.is_fatal() => break Err(e),
                Err(e) => warn!("Cycle failed, continuing: {}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping after {} cycles", cycles);
                }
            }
        };

        self.release().await;
        outcome.map(|()| cycles)
    }

    /// Run a single cycle, then release resources
    pub async fn run_once(mut self) -> Result<CycleReport> {
        let report = self.run_cycle().await;
        self.release().await;
        report
    }

    /// Weather step, then sensor step
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        if let Some((source, route)) = &self.weather {
            match source.fetch(&route.location_id, &route.api_key).await {
                Ok(measurement) => {
                    let reading = Reading::capture(route.device_id.as_str(), measurement);
                    log_reading(&reading);
                    report.weather_reading = true;
                    self.dispatch(&reading, &route.topic, true, &mut report).await;
                }
                Err(e) => {
                    warn!("Met Office fetch failed, skipping weather this cycle: {}", e);
                }
            }
        }

        let measurement = self.sensor.read().await.map_err(|e| match e {
            Error::SensorRead(_) => e,
            other => Error::SensorRead(other.to_string()),
        })?;
        let reading = Reading::sensor(self.sensor_route.device_id.as_str(), measurement);
        log_reading(&reading);
        report.sensor_reading = true;
        self.dispatch(&reading, &self.sensor_route.topic, false, &mut report)
            .await;

        Ok(report)
    }

    /// Hand a reading to every configured sink
    async fn dispatch(
        &self,
        reading: &Reading,
        topic: &str,
        dedup_by_hour: bool,
        report: &mut CycleReport,
    ) {
        if let Some(store) = &self.store {
            match store.save(reading, dedup_by_hour).await {
                Ok(SaveOutcome::Inserted) => report.stored += 1,
                Ok(SaveOutcome::SkippedDuplicate) => report.skipped_duplicates += 1,
                Err(e) => {
                    report.store_failures += 1;
                    error!("Failed to save {} reading: {}", reading.source, e);
                }
            }
        }

        if let Some(publisher) = &self.publisher {
            // Detached; delivery is not awaited
            if publisher.publish(reading, topic).is_some() {
                report.published += 1;
            }
        }
    }

    async fn release(&mut self) {
        self.sensor.close().await;
        if let Some(publisher) = &self.publisher {
            publisher.shutdown().await;
        }
        info!("Device stopped");
    }
}

fn log_reading(reading: &Reading) {
    match reading.wind {
        Some(wind) => info!(
            "Device ({}) reading: {:.2}C, {:.2} hPa, {:.2}%, {:.2} mph",
            reading.source, reading.temperature, reading.pressure, reading.humidity, wind
        ),
        None => info!(
            "Device ({}) reading: {:.2}C, {:.2} hPa, {:.2}%",
            reading.source, reading.temperature, reading.pressure, reading.humidity
        ),
    }
}
