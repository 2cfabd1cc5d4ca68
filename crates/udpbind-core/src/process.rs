use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::config::Target;

/// Message from a subprocess reader into the supervisor's control loop.
///
/// All output handling, exit handling, and restart scheduling funnel
/// through one channel so the supervisor's state is only ever touched
/// from a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line of proxy stdout.
    Stdout(String),
    /// One line of proxy stderr, relayed verbatim.
    Stderr(String),
    /// The subprocess terminated; the code is absent when it was killed
    /// by a signal.
    Exited(Option<i32>),
}

/// Handle to a running proxy process.
pub trait ProcessControl: Send {
    /// OS process id of the spawned child, if still known.
    fn os_pid(&self) -> Option<u32>;

    /// Sends a graceful interrupt to the process.
    ///
    /// Fire-and-forget; delivery failures are logged by the
    /// implementation, never surfaced.
    fn interrupt(&self);
}

/// Platform seam for spawning and signalling the proxy subprocess.
#[async_trait]
pub trait ProcessDriver: Send + Sync {
    type Handle: ProcessControl;

    /// Spawns the proxy for `target`, wiring its output into `events`.
    ///
    /// Implementations deliver every stdout/stderr line on the channel
    /// and finish with a single [`ProcessEvent::Exited`].
    async fn spawn(
        &self,
        target: &Target,
        events: mpsc::Sender<ProcessEvent>,
    ) -> Result<Self::Handle>;

    /// Sends an unconditional kill to an arbitrary self-reported pid.
    ///
    /// Used on shutdown: the proxy may daemonize or re-exec itself, so
    /// the spawned child handle is not necessarily the process that must
    /// die. Fire-and-forget at the OS level.
    fn kill_unowned(&self, pid: &str);
}

/// Pumps a subprocess output stream into the event channel line by line.
///
/// Stops early when the receiving side goes away; the remaining output
/// has nowhere to go.
pub async fn pump_lines<R>(
    io: R,
    events: mpsc::Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::with_capacity(io, LinesCodec::new(), 1024);
    while let Some(frame) = frames.next().await {
        let line = frame?;
        if events.send(wrap(line)).await.is_err() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pump_splits_lines_and_wraps() {
        let input = b"pid = 4821\nListening on 0.0.0.0:7777\n".to_vec();
        let (tx, mut rx) = mpsc::channel(8);

        pump_lines(&input[..], tx, ProcessEvent::Stdout).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ProcessEvent::Stdout("pid = 4821".to_string()))
        );
        assert_eq!(
            rx.recv().await,
            Some(ProcessEvent::Stdout("Listening on 0.0.0.0:7777".to_string()))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn pump_handles_missing_trailing_newline() {
        let input = b"stderr text without newline".to_vec();
        let (tx, mut rx) = mpsc::channel(8);

        pump_lines(&input[..], tx, ProcessEvent::Stderr).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(ProcessEvent::Stderr("stderr text without newline".to_string()))
        );
        assert_eq!(rx.recv().await, None);
    }
}
