//! Control plane: request handlers, response formatting and the idle watchdog

pub mod format;
mod server;
mod watchdog;

pub use format::{Table, format_listing, format_task};
pub use server::ControlPlane;
pub use watchdog::{IdleGate, Watchdog, WatchdogHandle};
