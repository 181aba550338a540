//! BME280 temperature / pressure / humidity sensor on Linux I2C
//!
//! The driver is blocking, so open and read run on the blocking thread pool.
//! Built without the `bme280` feature (or off Linux) the device has no sensor
//! and refuses to start.

use templog_common::config::SensorConfig;
use templog_common::Measurement;
use tracing::info;

use super::SensorSource;
use crate::error::Result;

/// Open the sensor described by the config
pub async fn open_configured_sensor(config: &SensorConfig) -> Result<Box<dyn SensorSource>> {
    let path = config.i2c_device_path();
    info!(
        "Opening BME280 on {} at address {:#04x}",
        path.display(),
        config.i2c_address
    );

    #[cfg(all(feature = "bme280", target_os = "linux"))]
    let sensor = bme280_device::Bme280Sensor::open(path, config.i2c_address)
        .await
        .map(|sensor| Box::new(sensor) as Box<dyn SensorSource>);

    #[cfg(not(all(feature = "bme280", target_os = "linux")))]
    let sensor = Err(crate::error::Error::SensorInit(format!(
        "{}: built without BME280 support",
        path.display()
    )));

    sensor
}

/// Convert raw driver output (°C, Pa, %) into a measurement in hPa
pub fn to_measurement(temperature: f32, pressure_pa: f32, humidity: f32) -> Measurement {
    Measurement {
        temperature: f64::from(temperature),
        pressure: f64::from(pressure_pa) / 100.0,
        humidity: f64::from(humidity),
        wind: None,
    }
}

#[cfg(all(feature = "bme280", target_os = "linux"))]
mod bme280_device {
    use async_trait::async_trait;
    use bme280::i2c::BME280;
    use linux_embedded_hal::{Delay, I2cdev};
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use templog_common::Measurement;
    use tracing::info;

    use super::to_measurement;
    use crate::error::{Error, Result};
    use crate::sources::SensorSource;

    fn join_error(e: tokio::task::JoinError) -> Error {
        Error::SensorRead(format!("sensor task failed: {}", e))
    }

    struct Device {
        driver: BME280<I2cdev>,
        delay: Delay,
    }

    /// Open BME280 handle
    pub struct Bme280Sensor {
        device: Option<Arc<Mutex<Device>>>,
    }

    impl Bme280Sensor {
        pub async fn open(path: PathBuf, address: u8) -> Result<Self> {
            let device = tokio::task::spawn_blocking(move || -> Result<Device> {
                let i2c = I2cdev::new(&path)
                    .map_err(|e| Error::SensorInit(format!("{}: {}", path.display(), e)))?;
                let mut driver = BME280::new(i2c, address);
                let mut delay = Delay;
                driver
                    .init(&mut delay)
                    .map_err(|e| Error::SensorInit(format!("{:?}", e)))?;
                Ok(Device { driver, delay })
            })
            .await
            .map_err(|e| Error::SensorInit(e.to_string()))??;

            info!("Sensor initialised");
            Ok(Self {
                device: Some(Arc::new(Mutex::new(device))),
            })
        }
    }

    #[async_trait]
    impl SensorSource for Bme280Sensor {
        async fn read(&mut self) -> Result<Measurement> {
            let device = self
                .device
                .clone()
                .ok_or_else(|| Error::SensorRead("sensor not initialised".to_string()))?;

            tokio::task::spawn_blocking(move || {
                let mut device = device
                    .lock()
                    .map_err(|_| Error::SensorRead("sensor lock poisoned".to_string()))?;
                let Device { driver, delay } = &mut *device;
                let m = driver
                    .measure(delay)
                    .map_err(|e| Error::SensorRead(format!("{:?}", e)))?;
                Ok(to_measurement(m.temperature, m.pressure, m.humidity))
            })
            .await
            .map_err(join_error)?
        }

        async fn close(&mut self) {
            if self.device.take().is_some() {
                info!("Sensor connection closed");
            }
        }
    }
}
