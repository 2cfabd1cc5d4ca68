#[cfg(unix)]
mod unix_impl {
    use std::path::{Path, PathBuf};
    use std::process::Stdio;

    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use tokio::process::Command;
    use tokio::sync::mpsc;
    use tracing::{debug, info, warn};

    use udpbind_core::{ProcessControl, ProcessDriver, ProcessEvent, Target, pump_lines};

    /// Handle to the spawned proxy child.
    ///
    /// Holds only the OS pid: the child itself is owned by the exit
    /// monitor task, and signals are addressed by pid.
    #[derive(Debug)]
    pub struct UnixProxyHandle {
        pid: Option<u32>,
    }

    impl ProcessControl for UnixProxyHandle {
        fn os_pid(&self) -> Option<u32> {
            self.pid
        }

        fn interrupt(&self) {
            let Some(pid) = self.pid else {
                warn!("proxy handle has no pid, nothing to interrupt");
                return;
            };

            match signal::kill(NixPid::from_raw(pid as i32), Signal::SIGINT) {
                Ok(()) => info!("sent SIGINT to proxy process {pid}"),
                Err(Errno::ESRCH) => debug!("proxy process {pid} already gone"),
                Err(e) => warn!("failed to send SIGINT to proxy process {pid}: {e}"),
            }
        }
    }

    /// Spawns the proxy executable and pumps its output into the
    /// supervisor's event channel.
    pub struct UnixProxyDriver {
        command: PathBuf,
        working_dir: PathBuf,
    }

    impl UnixProxyDriver {
        /// `command` is the proxy executable; the working directory
        /// defaults to the directory the executable lives in.
        pub fn new(command: impl Into<PathBuf>) -> Self {
            let command = command.into();
            let working_dir = command
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));

            Self {
                command,
                working_dir,
            }
        }

        pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
            self.working_dir = dir.into();
            self
        }
    }

    #[async_trait]
    impl ProcessDriver for UnixProxyDriver {
        type Handle = UnixProxyHandle;

        async fn spawn(
            &self,
            target: &Target,
            events: mpsc::Sender<ProcessEvent>,
        ) -> Result<Self::Handle> {
            let mut child = Command::new(&self.command)
                .arg(&target.address)
                .arg(target.port.to_string())
                .current_dir(&self.working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .with_context(|| format!("failed to spawn proxy {}", self.command.display()))?;

            let pid = child.id();
            info!(
                "spawned proxy process {} (pid {pid:?})",
                self.command.display()
            );

            let stdout = child
                .stdout
                .take()
                .context("proxy stdout was not captured")?;
            let stderr = child
                .stderr
                .take()
                .context("proxy stderr was not captured")?;

            let out_task = tokio::spawn(pump_lines(stdout, events.clone(), ProcessEvent::Stdout));
            let err_task = tokio::spawn(pump_lines(stderr, events.clone(), ProcessEvent::Stderr));

            tokio::spawn(async move {
                let status = child.wait().await;

                // Drain both readers before reporting the exit so no
                // output line arrives after the Exited event.
                if let Ok(Err(e)) = out_task.await {
                    warn!("proxy stdout reader failed: {e}");
                }
                if let Ok(Err(e)) = err_task.await {
                    warn!("proxy stderr reader failed: {e}");
                }

                let code = match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!("failed to wait on proxy process: {e}");
                        None
                    }
                };
                debug!("proxy process exited with {code:?}");
                let _ = events.send(ProcessEvent::Exited(code)).await;
            });

            Ok(UnixProxyHandle { pid })
        }

        fn kill_unowned(&self, pid: &str) {
            let Ok(raw) = pid.parse::<i32>() else {
                warn!("proxy reported a non-numeric pid {pid:?}, nothing to kill");
                return;
            };

            match signal::kill(NixPid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => info!("sent SIGKILL to proxy process {raw}"),
                Err(Errno::ESRCH) => info!("proxy process {raw} not found (already terminated)"),
                Err(Errno::EPERM) => warn!("permission denied to kill proxy process {raw}"),
                Err(e) => warn!("failed to send SIGKILL to proxy process {raw}: {e}"),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn working_dir_defaults_to_command_directory() {
            let driver = UnixProxyDriver::new("/opt/udpbind/tools/proxy");
            assert_eq!(driver.working_dir, PathBuf::from("/opt/udpbind/tools"));

            let driver = UnixProxyDriver::new("proxy");
            assert_eq!(driver.working_dir, PathBuf::from("."));

            let driver =
                UnixProxyDriver::new("/opt/udpbind/tools/proxy").with_working_dir("/tmp");
            assert_eq!(driver.working_dir, PathBuf::from("/tmp"));
        }

        #[test]
        fn kill_unowned_ignores_garbage_pids() {
            let driver = UnixProxyDriver::new("proxy");
            // must not panic or signal anything
            driver.kill_unowned("not-a-pid");
            driver.kill_unowned("");
        }

        #[tokio::test]
        async fn spawn_failure_carries_the_command_path() {
            let driver = UnixProxyDriver::new("/nonexistent/udpbind-proxy");
            let (tx, _rx) = mpsc::channel(8);
            let target = Target {
                address: "127.0.0.1".into(),
                port: 7777,
            };

            let err = driver.spawn(&target, tx).await.unwrap_err();
            assert!(format!("{err:#}").contains("/nonexistent/udpbind-proxy"));
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProxyDriver, UnixProxyHandle};

// Stubs keep the crate compiling on non-Unix targets; the supervised
// proxy itself only exists on the Unix side of the boundary.
#[cfg(not(unix))]
pub struct UnixProxyDriver;

#[cfg(not(unix))]
pub struct UnixProxyHandle;
