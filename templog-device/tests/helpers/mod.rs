//! Test doubles for sources and sinks
//!
//! Each fake records what the orchestrator asked of it so tests can assert
//! on call order, flags and isolation.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use templog_common::{Measurement, Reading};
use templog_device::error::{Error, Result};
use templog_device::sinks::{ReadingPublisher, ReadingStore, SaveOutcome};
use templog_device::sources::{SensorSource, WeatherError, WeatherSource};
use templog_device::{SensorRoute, WeatherRoute};
use tokio::task::JoinHandle;

pub fn indoor_measurement() -> Measurement {
    Measurement {
        temperature: 21.45,
        pressure: 1013.20,
        humidity: 55.10,
        wind: None,
    }
}

pub fn outdoor_measurement() -> Measurement {
    Measurement {
        temperature: 9.0,
        pressure: 1005.0,
        humidity: 80.0,
        wind: Some(12.0),
    }
}

pub fn sensor_route() -> SensorRoute {
    SensorRoute {
        device_id: "lounge".to_string(),
        topic: "templog/lounge".to_string(),
    }
}

pub fn weather_route() -> WeatherRoute {
    WeatherRoute {
        device_id: "outside".to_string(),
        topic: "templog/outside".to_string(),
        location_id: "3414".to_string(),
        api_key: "test-key".to_string(),
    }
}

/// Sensor that replays scripted results, then repeats the indoor measurement
#[derive(Clone, Default)]
pub struct FakeSensor {
    script: Arc<Mutex<VecDeque<std::result::Result<Measurement, String>>>>,
    pub reads: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl FakeSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        let sensor = Self::new();
        sensor.push(Err(message.to_string()));
        sensor
    }

    pub fn push(&self, result: std::result::Result<Measurement, String>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for FakeSensor {
    async fn read(&mut self) -> Result<Measurement> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(m)) => Ok(m),
            Some(Err(message)) => Err(Error::SensorRead(message)),
            None => Ok(indoor_measurement()),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Weather feed that always succeeds or always fails
#[derive(Clone)]
pub struct FakeWeather {
    result: Option<Measurement>,
    pub calls: Arc<AtomicUsize>,
    pub last_request: Arc<Mutex<Option<(String, String)>>>,
}

impl FakeWeather {
    pub fn ok(measurement: Measurement) -> Self {
        Self {
            result: Some(measurement),
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: None,
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeatherSource for FakeWeather {
    async fn fetch(
        &self,
        location_id: &str,
        api_key: &str,
    ) -> std::result::Result<Measurement, WeatherError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some((location_id.to_string(), api_key.to_string()));
        self.result
            .ok_or_else(|| WeatherError::Network("connection refused".to_string()))
    }
}

/// Store that records every save; optionally fails all of them
#[derive(Clone, Default)]
pub struct RecordingStore {
    pub saves: Arc<Mutex<Vec<(Reading, bool)>>>,
    fail: bool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            saves: Arc::default(),
            fail: true,
        }
    }

    pub fn saves(&self) -> Vec<(Reading, bool)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadingStore for RecordingStore {
    async fn save(&self, reading: &Reading, dedup_by_hour: bool) -> Result<SaveOutcome> {
        self.saves
            .lock()
            .unwrap()
            .push((reading.clone(), dedup_by_hour));
        if self.fail {
            return Err(Error::Storage(sqlx::Error::PoolClosed));
        }
        Ok(SaveOutcome::Inserted)
    }
}

/// Publisher that records every publish and shutdown
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    pub published: Arc<Mutex<Vec<(Reading, String)>>>,
    pub shut_down: Arc<AtomicBool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(Reading, String)> {
        self.published.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingPublisher for RecordingPublisher {
    fn publish(&self, reading: &Reading, topic: &str) -> Option<JoinHandle<()>> {
        self.published
            .lock()
            .unwrap()
            .push((reading.clone(), topic.to_string()));
        Some(tokio::spawn(async {}))
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
