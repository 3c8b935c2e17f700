//! Real-time heart rate telemetry over Bluetooth LE.
//!
//! Discovers chest-strap and watch sensors, streams the standard Heart Rate
//! Measurement characteristic, and derives live workout statistics with
//! pause/resume and signal-dropout handling.
//!
//! ## Data flow
//!
//! ```text
//! Scanner ──► HeartRateService::connect ──► notification pump
//!                                               │ decode
//!                                               ▼
//!                                         SessionTracker ──► WorkoutMetrics
//!                                               ▲
//!                                 LivenessMonitor (stale-signal pause)
//! ```
//!
//! [`HeartRateService`] is the entry point; construct one per sensor. It
//! broadcasts [`MonitorEvent`]s to any number of subscribers and hands the
//! final [`WorkoutMetrics`] to whatever consumes finished workouts.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{
    ConnectionStatus, DiscoveredPeripheral, HeartRateSample, MonitorEvent, PauseReason,
    WorkoutMetrics,
};
pub use domain::session::{SessionPhase, SessionTracker};
pub use domain::settings::{LogSettings, Settings, SettingsService};
pub use error::MonitorError;
pub use infrastructure::bluetooth::HeartRateService;
pub use infrastructure::logging::{init_logger, LoggingGuard};
