use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One decoded heart rate measurement.
///
/// Produced by the wire decoder at notification arrival time; immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateSample {
    /// Beats per minute.
    pub bpm: u16,
    /// Arrival time of the notification. The wire format carries no
    /// timestamp of its own.
    pub captured_at: SystemTime,
    /// Energy expended in kilojoules, when the sensor reports it.
    pub energy_expended: Option<u16>,
    /// RR intervals in milliseconds, when the sensor reports them.
    pub rr_intervals: Option<Vec<u16>>,
}

/// A sensor seen during one scan cycle.
///
/// Superseded by a fresh set on every new scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeripheral {
    /// Platform peripheral identifier, unique within a scan.
    pub id: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Workout statistics derived from the session sample buffer.
///
/// Recomputed on demand, never mutated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutMetrics {
    /// Active duration in whole seconds, paused time excluded.
    pub duration_secs: u64,
    pub average_bpm: u16,
    pub max_bpm: u16,
    pub min_bpm: u16,
    pub calories_burned: u32,
    /// Training zone 1-5 relative to the age-estimated maximum heart rate.
    pub zone: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Why a session left the Active state without ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// Explicit pause by the consumer.
    User,
    /// The liveness watchdog saw no samples within the stale threshold.
    SignalLost,
}

/// Events broadcast to subscribed listeners.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Sample(HeartRateSample),
    ConnectionStatus(ConnectionStatus),
    SessionPaused { reason: PauseReason },
    SessionEnded(WorkoutMetrics),
}
