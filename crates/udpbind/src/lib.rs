//! udpbind - supervises the UDP proxy that rebinds game-server ports
//! across the WSL2 network boundary.
//!
//! The heavy lifting lives in `udpbind-core` (line classification and
//! the supervisor actor) and `udpbind-unix` (process spawning and
//! signals); this crate wires them together behind the [`Binder`]
//! lifecycle controller.

mod binder;

pub use binder::{Binder, InitOutcome};

// Re-export core functionality
pub use udpbind_core::*;

#[cfg(unix)]
pub use udpbind_unix::{UnixProxyDriver, UnixProxyHandle};
