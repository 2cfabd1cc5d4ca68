use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use derive_builder::Builder;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Forwarding destination handed to the proxy subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub port: u16,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Configuration for the crash-restart policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    /// Delay before respawning a crashed proxy (in milliseconds)
    #[serde(default = "default_restart_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_restart_delay_ms(),
        }
    }
}

impl RestartConfig {
    /// Create a new RestartConfig with the default delay
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RestartConfig that respawns without waiting (tests, local
    /// development)
    pub fn immediate() -> Self {
        Self { delay_ms: 0 }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.delay_ms > 60_000 {
            return Err(anyhow::anyhow!("delay_ms should not exceed 60 seconds"));
        }

        Ok(())
    }

    /// Get the restart delay as Duration
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Main binder configuration
#[derive(Default, Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct BinderConfig {
    /// Address the proxy forwards datagrams to.
    pub target_address: String,
    /// Port the proxy binds and forwards to.
    pub target_port: u16,
    /// Path to the proxy executable.
    pub proxy_command: PathBuf,
    /// Working directory for the proxy; defaults to the executable's own
    /// directory.
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    /// Marker path whose existence gates startup.
    #[builder(default = "default_detect_marker()")]
    pub detect_marker: PathBuf,
    /// Host web UI port; enables the portproxy hint when set.
    #[builder(default)]
    pub web_port: Option<u16>,
    #[builder(default)]
    pub restart: RestartConfig,
}

impl BinderConfig {
    pub fn builder() -> BinderConfigBuilder {
        BinderConfigBuilder::default()
    }

    /// The forwarding target described by this configuration.
    pub fn target(&self) -> Target {
        Target {
            address: self.target_address.clone(),
            port: self.target_port,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_ipv4_literal(&self.target_address) {
            return Err(anyhow::anyhow!(
                "target address {:?} is not an IPv4 dotted quad",
                self.target_address
            ));
        }

        if self.target_port == 0 {
            return Err(anyhow::anyhow!("target port must be non-zero"));
        }

        self.restart.validate()
    }
}

impl BinderConfigBuilder {
    /// Sets both halves of the forwarding target at once.
    pub fn target(&mut self, target: Target) -> &mut Self {
        self.target_address = Some(target.address);
        self.target_port = Some(target.port);
        self
    }
}

static IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+\.\d+$").expect("valid pattern"));

/// Matches the dotted-quad shape the address-discovery tool emits.
pub fn is_ipv4_literal(text: &str) -> bool {
    IPV4.is_match(text)
}

// Default value functions for serde
fn default_restart_delay_ms() -> u64 {
    5_000
}

fn default_detect_marker() -> PathBuf {
    PathBuf::from("/run/WSL")
}
