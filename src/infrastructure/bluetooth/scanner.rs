//! BLE Scanner Module
//!
//! Handles Bluetooth LE discovery of supported heart rate sensors.

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{Central, CentralEvent, CentralState, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Peripheral as PlatformPeripheral};
use futures::StreamExt;
use tokio::time;
use tracing::{info, warn};

use crate::domain::models::DiscoveredPeripheral;
use crate::error::MonitorError;
use crate::infrastructure::bluetooth::protocol;

/// Time-bounded sensor discovery.
///
/// Scans without a service filter: some straps leave the heart rate service
/// out of their scan response, so filtering happens on advertised names.
pub struct BleScanner {
    name_prefixes: Vec<String>,
}

impl BleScanner {
    /// `name_prefixes` overrides the built-in sensor allow-list; an empty
    /// list keeps the default.
    pub fn new(name_prefixes: Vec<String>) -> Self {
        Self { name_prefixes }
    }

    /// Scan for `duration`, invoking `on_found` at most once per peripheral.
    ///
    /// Peripherals with no advertised name, or a name outside the
    /// allow-list, are ignored. Returns the platform handles of every match,
    /// keyed by id, for the connection step. Stops the scan before
    /// returning; nothing is reported after the window closes.
    pub async fn scan<F>(
        &self,
        adapter: &Adapter,
        duration: Duration,
        mut on_found: F,
    ) -> Result<HashMap<String, PlatformPeripheral>, MonitorError>
    where
        F: FnMut(DiscoveredPeripheral),
    {
        Self::check_radio(adapter).await?;

        let mut events = adapter.events().await.map_err(MonitorError::from_ble)?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(MonitorError::from_ble)?;
        info!("Scanning for heart rate sensors ({:?})", duration);

        let mut found: HashMap<String, PlatformPeripheral> = HashMap::new();
        let deadline = time::sleep(duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => {
                    let Some(event) = event else { break };
                    let CentralEvent::DeviceDiscovered(id) = event else { continue };

                    let key = id.to_string();
                    if found.contains_key(&key) {
                        continue;
                    }
                    let Ok(peripheral) = adapter.peripheral(&id).await else { continue };
                    let Ok(Some(properties)) = peripheral.properties().await else { continue };
                    let Some(name) = properties.local_name else { continue };
                    if !self.matches_allow_list(&name) {
                        continue;
                    }

                    info!("Discovered sensor '{}' ({})", name, key);
                    found.insert(key.clone(), peripheral);
                    on_found(DiscoveredPeripheral {
                        id: key,
                        name: Some(name),
                        rssi: properties.rssi,
                    });
                }
            }
        }

        if let Err(err) = adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", err);
        }
        info!("Scan finished with {} matching sensor(s)", found.len());
        Ok(found)
    }

    fn matches_allow_list(&self, name: &str) -> bool {
        if self.name_prefixes.is_empty() {
            return protocol::is_supported_sensor_name(name);
        }
        let name = name.to_lowercase();
        self.name_prefixes
            .iter()
            .any(|prefix| name.contains(&prefix.to_lowercase()))
    }

    /// Fail fast when the radio cannot scan at all, rather than letting a
    /// scan spin for its whole window finding nothing.
    async fn check_radio(adapter: &Adapter) -> Result<(), MonitorError> {
        match adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => Ok(()),
            Ok(CentralState::PoweredOff) => Err(MonitorError::RadioDisabled),
            Ok(state) => {
                // Some platforms report Unknown until the first scan.
                warn!("Adapter state {:?}, attempting scan anyway", state);
                Ok(())
            }
            Err(err) => Err(MonitorError::from_ble(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_prefixes_override_allow_list() {
        let scanner = BleScanner::new(vec!["Wahoo".to_string()]);
        assert!(scanner.matches_allow_list("WAHOO TICKR 0102"));
        assert!(!scanner.matches_allow_list("Polar H10 12345678"));
    }

    #[test]
    fn test_empty_prefixes_fall_back_to_default_list() {
        let scanner = BleScanner::new(Vec::new());
        assert!(scanner.matches_allow_list("Polar H10 12345678"));
        assert!(!scanner.matches_allow_list("Garmin HRM-Pro"));
    }
}
