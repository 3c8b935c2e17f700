//! Infrastructure Layer
//!
//! I/O and long-running tasks: the Bluetooth transport, event delivery to
//! consumers, the liveness watchdog, and logging setup.

pub mod bluetooth;
pub mod events;
pub mod liveness;
pub mod logging;
