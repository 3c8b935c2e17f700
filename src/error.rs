//! Error Types
//!
//! Typed failures for every fallible operation in the crate. Transport
//! errors from btleplug are wrapped rather than stringified so callers can
//! decide on a retry policy.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Platform refused the Bluetooth permission. Recoverable by user action.
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    /// The radio is powered off. Recoverable by user action.
    #[error("Bluetooth radio is powered off")]
    RadioDisabled,

    #[error("No Bluetooth adapter found")]
    AdapterUnavailable,

    /// The peripheral id was not produced by the most recent scan.
    #[error("Peripheral {0} not found in current scan results")]
    UnknownPeripheral(String),

    #[error("Connection failed: {0}")]
    Connection(#[source] btleplug::Error),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("Heart rate measurement characteristic not found on peripheral")]
    CharacteristicNotFound,

    /// A single bad packet. Logged and dropped, never fatal to the stream.
    #[error("Malformed heart rate payload ({0} bytes)")]
    MalformedPayload(usize),

    /// A session operation called from a state that does not allow it.
    /// The call is rejected; session state is left untouched.
    #[error("Invalid session transition: cannot {op} while {state}")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },
}

impl MonitorError {
    /// Wrap a transport error, promoting the kinds the caller can act on.
    pub(crate) fn from_ble(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => Self::PermissionDenied,
            other => Self::Connection(other),
        }
    }
}
