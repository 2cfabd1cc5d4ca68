use std::sync::Arc;

use udpbind_core::{
    BinderConfig, ProcessDriver, StatusSink, Supervisor, TracingSink, UdpbindError,
};

/// Outcome of [`Binder::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// The environment marker was present and the proxy was started.
    Started,
    /// The environment marker was absent; the proxy is redundant here.
    Skipped,
}

/// Lifecycle controller: wires configuration into the supervisor and
/// exposes an idempotent, terminal shutdown.
pub struct Binder<D: ProcessDriver> {
    config: BinderConfig,
    sink: Arc<dyn StatusSink>,
    driver: Option<D>,
    supervisor: Option<Supervisor>,
}

#[cfg(unix)]
impl Binder<udpbind_unix::UnixProxyDriver> {
    /// Creates a binder with the platform driver and a `tracing`-backed
    /// sink.
    pub fn new(config: BinderConfig) -> Self {
        tracing::debug!(
            "using Unix proxy driver for {}",
            config.proxy_command.display()
        );
        let mut driver = udpbind_unix::UnixProxyDriver::new(config.proxy_command.clone());
        if let Some(dir) = &config.working_directory {
            driver = driver.with_working_dir(dir.clone());
        }

        Self::with_driver(config, driver, Arc::new(TracingSink))
    }
}

impl<D> Binder<D>
where
    D: ProcessDriver + 'static,
    D::Handle: 'static,
{
    /// Creates a binder with an injected driver and sink.
    pub fn with_driver(config: BinderConfig, driver: D, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            config,
            sink,
            driver: Some(driver),
            supervisor: None,
        }
    }

    /// Checks the environment, validates the target, and starts the
    /// supervisor.
    ///
    /// Returns [`InitOutcome::Skipped`] when the detection marker is
    /// absent; that is a normal outcome, not an error. Calling `init`
    /// again after a successful start is a contract violation.
    pub async fn init(&mut self) -> Result<InitOutcome, UdpbindError> {
        if !self.config.detect_marker.exists() {
            self.sink
                .info("not in a WSL2 environment - the UDP proxy is redundant here");
            return Ok(InitOutcome::Skipped);
        }
        self.sink.log("WSL2 detected");

        self.config
            .validate()
            .map_err(|e| UdpbindError::Configuration(e.to_string()))?;

        if let Some(web_port) = self.config.web_port {
            self.log_portproxy_hint(web_port);
        }

        let driver = self.driver.take().ok_or(UdpbindError::AlreadyRunning)?;
        let supervisor = Supervisor::new(
            driver,
            self.sink.clone(),
            self.config.target(),
            self.config.restart.clone(),
        );
        supervisor.start().await?;
        self.supervisor = Some(supervisor);

        Ok(InitOutcome::Started)
    }

    /// How Windows-side users reach the host web UI across the WSL2
    /// boundary; the proxy only carries the UDP game traffic.
    fn log_portproxy_hint(&self, web_port: u16) {
        let address = &self.config.target_address;
        self.sink.info(
            "run the following in Windows PowerShell as Administrator to access the Web UI:",
        );
        self.sink.info(&format!(
            "netsh interface portproxy add v4tov4 listenport={web_port} listenaddress=0.0.0.0 connectport={web_port} connectaddress={address}"
        ));
        self.sink.info(&format!(
            "or connect to the Web UI on the same PC with https://{address}:{web_port}"
        ));
    }

    /// Requests shutdown. Safe to call when `init` never ran or skipped.
    pub async fn stop(&self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop().await;
        }
    }
}
