//! BLE Connection Module
//!
//! Handles link establishment, service discovery, and the heart rate
//! measurement subscription for a single peripheral.

use std::time::Duration;

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _};
use btleplug::platform::Peripheral as PlatformPeripheral;
use tokio::time::timeout;
use tracing::info;

use crate::error::MonitorError;
use crate::infrastructure::bluetooth::protocol;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on link establishment. A connect never hangs; it fails
    /// with [`MonitorError::ConnectionTimeout`] instead.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Result of a successful connection
pub struct ConnectionResult {
    pub peripheral: PlatformPeripheral,
    pub hr_characteristic: Characteristic,
}

/// Performs one connection attempt. Retry policy belongs to the caller.
pub struct BleConnection {
    config: ConnectionConfig,
}

impl BleConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Connect to the peripheral and subscribe to heart rate notifications.
    pub async fn connect(
        &self,
        peripheral: PlatformPeripheral,
    ) -> Result<ConnectionResult, MonitorError> {
        info!("Connecting to peripheral {}", peripheral.id());

        if !peripheral.is_connected().await.unwrap_or(false) {
            match timeout(self.config.connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(MonitorError::from_ble(err)),
                Err(_) => return Err(MonitorError::ConnectionTimeout(self.config.connect_timeout)),
            }
        }

        info!("Link established, discovering services...");
        peripheral
            .discover_services()
            .await
            .map_err(MonitorError::from_ble)?;

        let hr_characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == protocol::HEART_RATE_MEASUREMENT_UUID
                    && c.properties.contains(CharPropFlags::NOTIFY)
            })
            .ok_or(MonitorError::CharacteristicNotFound)?;

        peripheral
            .subscribe(&hr_characteristic)
            .await
            .map_err(MonitorError::from_ble)?;
        info!("Subscribed to heart rate measurement notifications");

        Ok(ConnectionResult {
            peripheral,
            hr_characteristic,
        })
    }
}
