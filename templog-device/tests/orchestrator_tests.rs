//! Orchestrator cycle, isolation and shutdown tests
//!
//! **Given/When/Then** style, using the fakes in `helpers`.

mod helpers;

use helpers::*;
use std::sync::Arc;
use std::time::Duration;
use templog_device::error::Error;
use templog_device::Orchestrator;
use tokio_util::sync::CancellationToken;

fn orchestrator(sensor: &FakeSensor) -> Orchestrator {
    Orchestrator::new(Box::new(sensor.clone()), sensor_route())
}

// ============================================================================
// Fan-out
// ============================================================================

/// **Given:** weather feed and both sinks enabled
/// **When:** one cycle runs
/// **Then:** weather goes out with hour dedup, sensor without, each on its own topic
#[tokio::test]
async fn test_cycle_fans_out_both_sources() {
    let sensor = FakeSensor::new();
    let weather = FakeWeather::ok(outdoor_measurement());
    let store = RecordingStore::new();
    let publisher = RecordingPublisher::new();

    let mut orch = orchestrator(&sensor)
        .with_weather(Box::new(weather.clone()), weather_route())
        .with_store(Box::new(store.clone()))
        .with_publisher(Arc::new(publisher.clone()));

    let report = orch.run_cycle().await.unwrap();

    assert!(report.weather_reading);
    assert!(report.sensor_reading);
    assert_eq!(report.stored, 2);
    assert_eq!(report.published, 2);

    assert_eq!(
        *weather.last_request.lock().unwrap(),
        Some(("3414".to_string(), "test-key".to_string()))
    );

    let saves = store.saves();
    assert_eq!(saves.len(), 2);
    let (weather_reading, weather_dedup) = &saves[0];
    assert_eq!(weather_reading.source, "outside");
    assert!(*weather_dedup);
    assert_eq!(weather_reading.temperature, 9.0);
    assert_eq!(weather_reading.humidity, 80.0);
    assert_eq!(weather_reading.pressure, 1005.0);
    assert_eq!(weather_reading.wind, Some(12.0));

    let (sensor_reading, sensor_dedup) = &saves[1];
    assert_eq!(sensor_reading.source, "lounge");
    assert!(!*sensor_dedup);
    assert_eq!(sensor_reading.wind, None);

    let published = publisher.published();
    assert_eq!(published[0].1, "templog/outside");
    assert_eq!(published[1].1, "templog/lounge");
}

/// **Given:** a sensor that (wrongly) reports wind
/// **When:** the reading is built
/// **Then:** wind is dropped
#[tokio::test]
async fn test_sensor_reading_never_carries_wind() {
    let sensor = FakeSensor::new();
    sensor.push(Ok(outdoor_measurement()));
    let store = RecordingStore::new();

    let mut orch = orchestrator(&sensor).with_store(Box::new(store.clone()));
    orch.run_cycle().await.unwrap();

    assert_eq!(store.saves()[0].0.wind, None);
}

/// **Given:** no sinks enabled
/// **When:** a cycle runs
/// **Then:** the sensor is still read and nothing is stored or published
#[tokio::test]
async fn test_cycle_without_sinks_still_reads_sensor() {
    let sensor = FakeSensor::new();
    let mut orch = orchestrator(&sensor);

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(sensor.reads(), 1);
    assert!(report.sensor_reading);
    assert_eq!(report.stored + report.published, 0);
}

// ============================================================================
// Error isolation
// ============================================================================

/// **Given:** a weather feed that fails
/// **When:** a cycle runs
/// **Then:** the sensor is still read and its reading reaches the sinks
#[tokio::test]
async fn test_weather_failure_does_not_skip_sensor() {
    let sensor = FakeSensor::new();
    let weather = FakeWeather::failing();
    let store = RecordingStore::new();

    let mut orch = orchestrator(&sensor)
        .with_weather(Box::new(weather.clone()), weather_route())
        .with_store(Box::new(store.clone()));

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(weather.calls(), 1);
    assert_eq!(sensor.reads(), 1);
    assert!(!report.weather_reading);
    assert!(report.sensor_reading);
    let saves = store.saves();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].0.source, "lounge");
}

/// **Given:** a store that fails every write
/// **When:** a cycle runs
/// **Then:** the publisher still receives both readings and the cycle succeeds
#[tokio::test]
async fn test_store_failure_does_not_block_publisher() {
    let sensor = FakeSensor::new();
    let store = RecordingStore::failing();
    let publisher = RecordingPublisher::new();

    let mut orch = orchestrator(&sensor)
        .with_weather(Box::new(FakeWeather::ok(outdoor_measurement())), weather_route())
        .with_store(Box::new(store.clone()))
        .with_publisher(Arc::new(publisher.clone()));

    let report = orch.run_cycle().await.unwrap();

    assert_eq!(report.store_failures, 2);
    assert_eq!(report.stored, 0);
    assert_eq!(publisher.published().len(), 2);
}

/// **Given:** a sensor whose first read fails
/// **When:** the device runs
/// **Then:** it stops with a fatal SensorRead error after exactly one cycle attempt
#[tokio::test]
async fn test_sensor_failure_is_fatal_and_stops_loop() {
    let sensor = FakeSensor::failing("i2c nack");
    let store = RecordingStore::new();

    let orch = orchestrator(&sensor)
        .with_store(Box::new(store.clone()))
        .with_interval(Duration::from_millis(10));

    let result = orch.run(CancellationToken::new()).await;

    match result {
        Err(e @ Error::SensorRead(_)) => assert!(e.is_fatal()),
        other => panic!("Expected SensorRead error, got {:?}", other),
    }
    assert_eq!(sensor.reads(), 1);
    assert!(store.saves().is_empty());
    assert!(sensor.is_closed());
}

/// **Given:** a sensor failure on the third cycle
/// **When:** the device runs
/// **Then:** two full cycles complete and no fourth read happens
#[tokio::test]
async fn test_sensor_failure_mid_run_stops_further_cycles() {
    let sensor = FakeSensor::new();
    sensor.push(Ok(indoor_measurement()));
    sensor.push(Ok(indoor_measurement()));
    sensor.push(Err("bus error".to_string()));
    let store = RecordingStore::new();

    let orch = orchestrator(&sensor)
        .with_store(Box::new(store.clone()))
        .with_interval(Duration::from_millis(5));

    let result = orch.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(Error::SensorRead(_))));
    assert_eq!(sensor.reads(), 3);
    assert_eq!(store.saves().len(), 2);
}

// ============================================================================
// Shutdown
// ============================================================================

/// **Given:** shutdown already requested
/// **When:** the device starts
/// **Then:** no cycle runs and the sensor is released
#[tokio::test]
async fn test_cancelled_before_start_runs_no_cycles() {
    let sensor = FakeSensor::new();
    let publisher = RecordingPublisher::new();
    let token = CancellationToken::new();
    token.cancel();

    let cycles = orchestrator(&sensor)
        .with_publisher(Arc::new(publisher.clone()))
        .run(token)
        .await
        .unwrap();

    assert_eq!(cycles, 0);
    assert_eq!(sensor.reads(), 0);
    assert!(sensor.is_closed());
    assert!(publisher.was_shut_down());
}

/// **Given:** a device sleeping between cycles
/// **When:** shutdown is requested
/// **Then:** it wakes, exits cleanly and releases the sensor
#[tokio::test]
async fn test_shutdown_interrupts_sleep() {
    let sensor = FakeSensor::new();
    let token = CancellationToken::new();

    let handle = tokio::spawn(
        orchestrator(&sensor)
            .with_interval(Duration::from_secs(3600))
            .run(token.clone()),
    );

    while sensor.reads() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    token.cancel();

    let cycles = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("orchestrator did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(cycles, 1);
    assert_eq!(sensor.reads(), 1);
    assert!(sensor.is_closed());
}

/// **Given:** a short interval
/// **When:** the device runs for a while
/// **Then:** cycles repeat and each reads the sensor once
#[tokio::test]
async fn test_runs_repeated_cycles_until_shutdown() {
    let sensor = FakeSensor::new();
    let store = RecordingStore::new();
    let token = CancellationToken::new();

    let handle = tokio::spawn(
        orchestrator(&sensor)
            .with_store(Box::new(store.clone()))
            .with_interval(Duration::from_millis(5))
            .run(token.clone()),
    );

    while sensor.reads() < 3 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    token.cancel();

    let cycles = handle.await.unwrap().unwrap();
    assert!(cycles >= 3);
    assert_eq!(sensor.reads() as u64, cycles);
    assert_eq!(store.saves().len() as u64, cycles);
}

/// **Given:** single-cycle mode
/// **When:** run_once completes
/// **Then:** the report is returned and resources are released
#[tokio::test]
async fn test_run_once_releases_resources() {
    let sensor = FakeSensor::new();
    let publisher = RecordingPublisher::new();

    let report = orchestrator(&sensor)
        .with_publisher(Arc::new(publisher.clone()))
        .run_once()
        .await
        .unwrap();

    assert!(report.sensor_reading);
    assert_eq!(report.published, 1);
    assert!(sensor.is_closed());
    assert!(publisher.was_shut_down());
}
