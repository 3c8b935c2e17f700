//! Heart Rate Service Module
//!
//! Main service that coordinates scanning, connection, sample delivery, and
//! the workout session for a single heart rate sensor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use btleplug::api::{
    Central, CentralState, Characteristic, Manager as _, Peripheral as _,
};
use btleplug::platform::{Adapter, Manager, Peripheral as PlatformPeripheral};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::models::{
    ConnectionStatus, DiscoveredPeripheral, MonitorEvent, PauseReason, WorkoutMetrics,
};
use crate::domain::session::SessionTracker;
use crate::domain::settings::SettingsService;
use crate::error::MonitorError;
use crate::infrastructure::bluetooth::{
    connection::{BleConnection, ConnectionConfig},
    protocol,
    scanner::BleScanner,
};
use crate::infrastructure::events::EventBus;
use crate::infrastructure::liveness::LivenessMonitor;

/// The one live link. Owns the notification pump; dropping the link without
/// going through teardown would leak the task, so it only ever leaves the
/// service via [`HeartRateService::disconnect`] or a replacing connect.
struct ActiveLink {
    peripheral: PlatformPeripheral,
    hr_characteristic: Characteristic,
    pump_cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Main service coordinating all BLE and session operations.
///
/// Constructible per instance; independent services share nothing, so tests
/// can run several in parallel. All session state mutation funnels through
/// the internal tracker mutex, whether it comes from the notification pump,
/// the liveness watchdog, or an API call.
pub struct HeartRateService {
    settings: Arc<Mutex<SettingsService>>,
    session: Arc<Mutex<SessionTracker>>,
    events: Arc<EventBus>,
    last_sample_at: Arc<Mutex<Option<Instant>>>,
    /// Platform handles from the most recent scan, keyed by peripheral id.
    /// Each scan supersedes the previous set.
    scan_results: Mutex<HashMap<String, PlatformPeripheral>>,
    /// Async mutex: concurrent connects serialize here, and a new connect
    /// tears the old link down before establishing its own.
    link: AsyncMutex<Option<ActiveLink>>,
    watchdog: Arc<Mutex<Option<CancellationToken>>>,
}

impl HeartRateService {
    pub fn new(settings: Arc<Mutex<SettingsService>>) -> Self {
        let assumed_age = settings.lock().unwrap().get().assumed_age_years;
        Self {
            settings,
            session: Arc::new(Mutex::new(SessionTracker::new(assumed_age))),
            events: Arc::new(EventBus::new()),
            last_sample_at: Arc::new(Mutex::new(None)),
            scan_results: Mutex::new(HashMap::new()),
            link: AsyncMutex::new(None),
            watchdog: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether the radio is powered on. Lets consumers prompt the user
    /// before a scan instead of surfacing the scan failure.
    pub async fn radio_enabled(&self) -> Result<bool, MonitorError> {
        let adapter = self.adapter().await?;
        match adapter.adapter_state().await {
            Ok(state) => Ok(state == CentralState::PoweredOn),
            Err(err) => Err(MonitorError::from_ble(err)),
        }
    }

    /// Scan for supported sensors, invoking `on_found` for each new match.
    ///
    /// Duration and the name allow-list come from settings. The resolved
    /// platform handles are retained for [`connect`](Self::connect);
    /// scanning again replaces them.
    pub async fn scan<F>(&self, on_found: F) -> Result<(), MonitorError>
    where
        F: FnMut(DiscoveredPeripheral),
    {
        let (prefixes, duration) = {
            let settings = self.settings.lock().unwrap();
            let s = settings.get();
            (s.device_name_prefixes.clone(), s.scan_duration())
        };

        let adapter = self.adapter().await?;
        let scanner = BleScanner::new(prefixes);
        let found = scanner.scan(&adapter, duration, on_found).await?;
        *self.scan_results.lock().unwrap() = found;
        Ok(())
    }

    /// Connect to a peripheral surfaced by the most recent scan.
    ///
    /// Any existing link is torn down first, so at most one connection is
    /// ever active; its listeners do not carry over. On success the
    /// notification pump is running and the device is remembered in
    /// settings.
    pub async fn connect(&self, target: &DiscoveredPeripheral) -> Result<(), MonitorError> {
        let mut link = self.link.lock().await;
        self.teardown(&mut link).await;

        let peripheral = self
            .scan_results
            .lock()
            .unwrap()
            .get(&target.id)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownPeripheral(target.id.clone()))?;

        self.events
            .broadcast(&MonitorEvent::ConnectionStatus(ConnectionStatus::Connecting));

        let config = ConnectionConfig {
            connect_timeout: self.settings.lock().unwrap().get().connect_timeout(),
        };
        let result = match BleConnection::new(config).connect(peripheral).await {
            Ok(result) => result,
            Err(err) => {
                self.events
                    .broadcast(&MonitorEvent::ConnectionStatus(ConnectionStatus::Error));
                return Err(err);
            }
        };

        let pump_cancel = CancellationToken::new();
        let pump = match self
            .spawn_pump(result.peripheral.clone(), pump_cancel.clone())
            .await
        {
            Ok(pump) => pump,
            Err(err) => {
                let _ = result.peripheral.disconnect().await;
                self.events
                    .broadcast(&MonitorEvent::ConnectionStatus(ConnectionStatus::Error));
                return Err(err);
            }
        };
        *link = Some(ActiveLink {
            peripheral: result.peripheral,
            hr_characteristic: result.hr_characteristic,
            pump_cancel,
            pump,
        });

        if let Err(err) = self.settings.lock().unwrap().remember_device(&target.id) {
            warn!("Failed to persist remembered device: {}", err);
        }

        self.events
            .broadcast(&MonitorEvent::ConnectionStatus(ConnectionStatus::Connected));

        // A session started before the link came up gets its watchdog now.
        if self.session.lock().unwrap().is_active() {
            self.spawn_watchdog();
        }
        Ok(())
    }

    /// Disconnect from the current sensor. No-op when already disconnected.
    pub async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.teardown(&mut link).await;
    }

    /// Check if connected
    pub async fn is_connected(&self) -> bool {
        match self.link.lock().await.as_ref() {
            Some(link) => link.peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    /// Register a listener for live monitor events.
    pub fn subscribe(&self, id: impl Into<String>) -> mpsc::UnboundedReceiver<MonitorEvent> {
        self.events.subscribe(id)
    }

    pub fn unsubscribe(&self, id: &str) {
        self.events.unsubscribe(id);
    }

    /// Begin a new workout session.
    pub async fn start_session(&self) -> Result<(), MonitorError> {
        let assumed_age = self.settings.lock().unwrap().get().assumed_age_years;
        {
            let mut session = self.session.lock().unwrap();
            session.set_assumed_age(assumed_age);
            session.start()?;
        }
        // The session start is the initial known-good point: a sensor that
        // never delivers gets paused one threshold later, backdated here.
        *self.last_sample_at.lock().unwrap() = Some(Instant::now());

        if self.is_connected().await {
            self.spawn_watchdog();
        }
        info!("Workout session started");
        Ok(())
    }

    /// Pause the session at the user's request.
    pub fn pause_session(&self) -> Result<(), MonitorError> {
        self.session.lock().unwrap().pause(PauseReason::User)?;
        self.cancel_watchdog();
        self.events.broadcast(&MonitorEvent::SessionPaused {
            reason: PauseReason::User,
        });
        Ok(())
    }

    /// Resume a paused session.
    pub async fn resume_session(&self) -> Result<(), MonitorError> {
        self.session.lock().unwrap().resume()?;
        // Fresh grace window: the pre-pause arrival time would read as stale
        // immediately.
        *self.last_sample_at.lock().unwrap() = Some(Instant::now());

        if self.is_connected().await {
            self.spawn_watchdog();
        }
        Ok(())
    }

    /// End the session and hand the final metrics to subscribers.
    ///
    /// Returns `None` when no valid sample was recorded. Late samples still
    /// in flight are dropped; the tracker no longer accepts them.
    pub fn end_session(&self) -> Result<Option<WorkoutMetrics>, MonitorError> {
        let metrics = self.session.lock().unwrap().end()?;
        self.cancel_watchdog();
        if let Some(metrics) = metrics {
            self.events.broadcast(&MonitorEvent::SessionEnded(metrics));
        }
        info!("Workout session ended: {:?}", metrics);
        Ok(metrics)
    }

    /// Live statistics for the session in progress, if any valid sample has
    /// been recorded.
    pub fn current_metrics(&self) -> Option<WorkoutMetrics> {
        self.session.lock().unwrap().current_metrics()
    }

    async fn adapter(&self) -> Result<Adapter, MonitorError> {
        let manager = Manager::new().await.map_err(MonitorError::from_ble)?;
        let adapters = manager.adapters().await.map_err(MonitorError::from_ble)?;
        adapters
            .into_iter()
            .next()
            .ok_or(MonitorError::AdapterUnavailable)
    }

    /// Release the link, if any: stop the watchdog and the pump, drop the
    /// subscription, and clear every listener so nothing carries over to a
    /// later connection.
    async fn teardown(&self, link: &mut Option<ActiveLink>) {
        let Some(active) = link.take() else { return };

        self.cancel_watchdog();
        active.pump_cancel.cancel();
        let _ = active.pump.await;

        if let Err(err) = active.peripheral.unsubscribe(&active.hr_characteristic).await {
            warn!("Failed to unsubscribe from measurements: {}", err);
        }
        if let Err(err) = active.peripheral.disconnect().await {
            warn!("Failed to disconnect peripheral: {}", err);
        }
        info!("Disconnected from sensor");

        self.events
            .broadcast(&MonitorEvent::ConnectionStatus(ConnectionStatus::Disconnected));
        self.events.clear();
    }

    /// Spawn the notification pump: decode each measurement, record its
    /// arrival time, feed the session, and fan it out to listeners.
    /// Malformed payloads are logged and dropped without disturbing the
    /// stream.
    async fn spawn_pump(
        &self,
        peripheral: PlatformPeripheral,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, MonitorError> {
        let mut notifications = peripheral
            .notifications()
            .await
            .map_err(MonitorError::from_ble)?;

        let session = Arc::clone(&self.session);
        let events = Arc::clone(&self.events);
        let last_sample_at = Arc::clone(&self.last_sample_at);
        let watchdog = Arc::clone(&self.watchdog);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = notifications.next() => {
                        let Some(notification) = notification else {
                            // Stream end means the link dropped underneath us.
                            info!("Notification stream ended, link lost");
                            if let Some(token) = watchdog.lock().unwrap().take() {
                                token.cancel();
                            }
                            events.broadcast(&MonitorEvent::ConnectionStatus(
                                ConnectionStatus::Disconnected,
                            ));
                            break;
                        };
                        if notification.uuid != protocol::HEART_RATE_MEASUREMENT_UUID {
                            continue;
                        }
                        match protocol::decode_heart_rate(&notification.value) {
                            Ok(sample) => {
                                *last_sample_at.lock().unwrap() = Some(Instant::now());
                                session.lock().unwrap().ingest(sample.clone());
                                events.broadcast(&MonitorEvent::Sample(sample));
                            }
                            Err(err) => warn!("Dropping notification: {}", err),
                        }
                    }
                }
            }
        }))
    }

    fn spawn_watchdog(&self) {
        let (stale_threshold, poll_interval) = {
            let settings = self.settings.lock().unwrap();
            let s = settings.get();
            (s.stale_signal_threshold(), s.liveness_poll_interval())
        };
        let monitor = LivenessMonitor::new(
            Arc::clone(&self.session),
            Arc::clone(&self.last_sample_at),
            Arc::clone(&self.events),
            stale_threshold,
            poll_interval,
        );

        let token = CancellationToken::new();
        if let Some(old) = self.watchdog.lock().unwrap().replace(token.clone()) {
            old.cancel();
        }
        tokio::spawn(monitor.run(token));
    }

    fn cancel_watchdog(&self) {
        if let Some(token) = self.watchdog.lock().unwrap().take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HeartRateSample;
    use crate::domain::settings::Settings;
    use std::time::SystemTime;

    fn service() -> HeartRateService {
        let settings = SettingsService::ephemeral(Settings::default());
        HeartRateService::new(Arc::new(Mutex::new(settings)))
    }

    fn sample(bpm: u16) -> HeartRateSample {
        HeartRateSample {
            bpm,
            captured_at: SystemTime::now(),
            energy_expended: None,
            rr_intervals: None,
        }
    }

    #[tokio::test]
    async fn test_session_flow_broadcasts_events() {
        let service = service();
        let mut rx = service.subscribe("consumer");

        service.start_session().await.unwrap();
        service.session.lock().unwrap().ingest(sample(140));

        service.pause_session().unwrap();
        match rx.try_recv().unwrap() {
            MonitorEvent::SessionPaused {
                reason: PauseReason::User,
            } => {}
            other => panic!("unexpected event: {:?}", other),
        }

        service.resume_session().await.unwrap();
        let metrics = service.end_session().unwrap().unwrap();
        assert_eq!(metrics.average_bpm, 140);
        match rx.try_recv().unwrap() {
            MonitorEvent::SessionEnded(broadcast) => assert_eq!(broadcast, metrics),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_samples_after_end_are_dropped() {
        let service = service();
        service.start_session().await.unwrap();
        service.session.lock().unwrap().ingest(sample(100));
        service.end_session().unwrap();

        // A sample still in flight when the session ended.
        service.session.lock().unwrap().ingest(sample(100));
        assert!(service.current_metrics().is_none());

        // It has not leaked into the next session either.
        service.start_session().await.unwrap();
        assert!(service.current_metrics().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_when_disconnected_is_noop() {
        let service = service();
        let mut rx = service.subscribe("consumer");

        service.disconnect().await;

        assert!(!service.is_connected().await);
        assert!(rx.try_recv().is_err());
        assert_eq!(service.events.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_requires_scanned_peripheral() {
        let service = service();
        let unknown = DiscoveredPeripheral {
            id: "aa:bb:cc".to_string(),
            name: Some("Polar H10".to_string()),
            rssi: None,
        };
        assert!(matches!(
            service.connect(&unknown).await,
            Err(MonitorError::UnknownPeripheral(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_session_operations_surface_errors() {
        let service = service();
        assert!(service.pause_session().is_err());
        assert!(service.resume_session().await.is_err());
        assert!(service.end_session().is_err());

        service.start_session().await.unwrap();
        assert!(service.start_session().await.is_err());
    }

    #[tokio::test]
    async fn test_end_without_valid_samples_yields_no_metrics() {
        let service = service();
        let mut rx = service.subscribe("consumer");

        service.start_session().await.unwrap();
        service.session.lock().unwrap().ingest(sample(10));
        assert!(service.end_session().unwrap().is_none());
        // Nothing to hand to the completion pipeline.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let service = service();
        let mut rx = service.subscribe("consumer");
        service.unsubscribe("consumer");

        service.start_session().await.unwrap();
        service.session.lock().unwrap().ingest(sample(90));
        service.pause_session().unwrap();
        assert!(rx.try_recv().is_err());
    }
}
