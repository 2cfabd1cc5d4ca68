//! Unix process driver for udpbind.
//!
//! Spawns the proxy executable with `tokio::process`, pumps its output
//! into the supervisor's event channel, and delivers SIGINT/SIGKILL via
//! `nix`.

mod proxy_driver;

pub use proxy_driver::{UnixProxyDriver, UnixProxyHandle};
