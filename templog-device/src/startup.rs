//! Wiring from configuration to a ready orchestrator
//!
//! Every failure here is fatal: an enabled sink that cannot connect at
//! startup, or a sensor that cannot be opened, stops the device.

use std::sync::Arc;

use templog_common::config::TomlConfig;
use tracing::info;

use crate::error::{Error, Result};
use crate::orchestrator::{Orchestrator, SensorRoute, WeatherRoute};
use crate::sinks::{MqttPublisher, SqliteReadingStore};
use crate::sources::{open_configured_sensor, MetOfficeClient};

/// Connect sinks, open the sensor and build the orchestrator
pub async fn build_orchestrator(config: &TomlConfig) -> Result<Orchestrator> {
    config.validate()?;

    let store = if config.storage.enabled {
        Some(SqliteReadingStore::from_config(&config.storage).await?)
    } else {
        info!("Reading store disabled");
        None
    };

    let publisher = if config.mqtt.enabled {
        Some(MqttPublisher::connect(&config.mqtt, &config.sensor.device_id).await?)
    } else {
        info!("MQTT publishing disabled");
        None
    };

    let weather = if config.met_office.enabled {
        let client = MetOfficeClient::from_config(&config.met_office)
            .map_err(|e| Error::Config(format!("Met Office client: {}", e)))?;
        info!(
            "Met Office feed enabled for location {} as device ({})",
            config.met_office.location_id, config.met_office.device_id
        );
        Some(client)
    } else {
        info!("Met Office feed disabled");
        None
    };

    let sensor = open_configured_sensor(&config.sensor).await?;

    let mut orchestrator = Orchestrator::new(
        sensor,
        SensorRoute {
            device_id: config.sensor.device_id.clone(),
            topic: config.sensor.mqtt_topic.clone(),
        },
    )
    .with_interval(config.effective_interval());

    if let Some(client) = weather {
        orchestrator = orchestrator.with_weather(
            Box::new(client),
            WeatherRoute {
                device_id: config.met_office.device_id.clone(),
                topic: config.met_office.mqtt_topic.clone(),
                location_id: config.met_office.location_id.clone(),
                api_key: config.met_office.api_key.clone(),
            },
        );
    }
    if let Some(store) = store {
        orchestrator = orchestrator.with_store(Box::new(store));
    }
    if let Some(publisher) = publisher {
        orchestrator = orchestrator.with_publisher(Arc::new(publisher));
    }

    Ok(orchestrator)
}
