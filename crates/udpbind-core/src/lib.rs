//! udpbind core - platform-independent supervision primitives
//!
//! This crate provides the proxy line classifier, configuration, error
//! types, the process-driver seam, and the supervisor actor that are
//! shared across platform-specific drivers.

mod classifier;
mod config;
mod error;
mod process;
mod sink;
mod supervisor;

pub use classifier::*;
pub use config::*;
pub use error::*;
pub use process::*;
pub use sink::*;
pub use supervisor::*;
