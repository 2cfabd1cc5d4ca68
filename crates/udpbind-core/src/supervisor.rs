//! Proxy process supervisor.
//!
//! The supervisor owns the subprocess lifecycle: it spawns the proxy,
//! classifies every stdout line, tracks the self-reported pid, and
//! respawns after a fixed delay when the process dies while shutdown has
//! not been requested. All state lives in one actor task; output
//! readers and the restart timer talk to it over a message channel, so
//! no two callbacks ever touch the state concurrently.
//!
//! ```text
//! Supervisor (handle) ──start/stop──► actor task ──spawn──► ProcessDriver
//!                                        ▲
//!          stdout/stderr/exit events ────┘ (per-process forwarder)
//!                                        ▲
//!          RestartDue ───────────────────┘ (delayed, re-checks closing)
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

use crate::classifier::{ProxyLine, classify};
use crate::config::{RestartConfig, Target};
use crate::error::UdpbindError;
use crate::process::{ProcessControl, ProcessDriver, ProcessEvent};
use crate::sink::StatusSink;

/// Queue depth for supervisor messages; proxy output lines are short and
/// the actor drains quickly.
const MAILBOX: usize = 64;

enum Msg {
    Start(oneshot::Sender<Result<(), UdpbindError>>),
    Stop(oneshot::Sender<()>),
    Process(ProcessEvent),
    RestartDue,
}

/// Front handle to the supervisor actor.
///
/// Cheap to clone; the actor lives for as long as a handle or an active
/// process exists.
#[derive(Clone)]
pub struct Supervisor {
    tx: mpsc::Sender<Msg>,
}

impl Supervisor {
    /// Spawns the supervisor actor. Must be called within a Tokio
    /// runtime.
    pub fn new<D>(
        driver: D,
        sink: Arc<dyn StatusSink>,
        target: Target,
        restart: RestartConfig,
    ) -> Self
    where
        D: ProcessDriver + 'static,
        D::Handle: 'static,
    {
        let (tx, rx) = mpsc::channel(MAILBOX);
        let actor = Actor {
            driver,
            sink,
            target,
            restart,
            closing: false,
            process: None,
            restart_timer: None,
            mailbox: tx.downgrade(),
        };
        tokio::spawn(actor.run(rx));

        Self { tx }
    }

    /// Starts the proxy subprocess.
    ///
    /// Starting while a process is already active is a contract
    /// violation: the error is logged on the sink, no second process is
    /// spawned, and [`UdpbindError::AlreadyRunning`] is returned. A
    /// failure of the spawn itself is treated like an immediate crash and
    /// handed to the restart policy, not surfaced here.
    pub async fn start(&self) -> Result<(), UdpbindError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Msg::Start(ack))
            .await
            .map_err(|_| UdpbindError::ChannelClosed)?;

        match done.await {
            Ok(result) => result,
            Err(_) => Err(UdpbindError::ChannelClosed),
        }
    }

    /// Requests shutdown. Idempotent, never fails.
    ///
    /// Sets the terminal closing flag and dispatches the kill signals;
    /// returns once they are sent rather than waiting for the process to
    /// actually exit. No process is ever spawned after this completes.
    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Msg::Stop(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

struct ActiveProcess<H> {
    handle: H,
    /// Self-reported pid, parsed from the proxy's own output. Set at
    /// most once per process instance.
    pid: Option<String>,
}

struct Actor<D: ProcessDriver> {
    driver: D,
    sink: Arc<dyn StatusSink>,
    target: Target,
    restart: RestartConfig,
    /// One-way terminal flag; once set, no process is ever spawned again.
    closing: bool,
    process: Option<ActiveProcess<D::Handle>>,
    restart_timer: Option<JoinHandle<()>>,
    /// Weak mailbox for readers and the restart timer; the actor must
    /// not keep its own channel alive.
    mailbox: mpsc::WeakSender<Msg>,
}

impl<D: ProcessDriver> Actor<D> {
    async fn run(mut self, mut rx: mpsc::Receiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Start(ack) => {
                    let _ = ack.send(self.handle_start().await);
                }
                Msg::Stop(ack) => {
                    self.handle_stop();
                    let _ = ack.send(());
                }
                Msg::Process(event) => self.handle_event(event),
                Msg::RestartDue => {
                    let _ = self.restart_timer.take();
                    // The flag is re-checked here, at fire time; a timer
                    // that outlives stop() is a no-op.
                    if !self.closing && self.process.is_none() {
                        self.spawn_proxy().await;
                    }
                }
            }
        }
    }

    async fn handle_start(&mut self) -> Result<(), UdpbindError> {
        if self.closing {
            return Err(UdpbindError::Terminated);
        }
        if self.process.is_some() {
            self.sink
                .error("attempting to start the proxy while a process is still active");
            return Err(UdpbindError::AlreadyRunning);
        }

        self.spawn_proxy().await;
        Ok(())
    }

    async fn spawn_proxy(&mut self) {
        self.sink
            .log(&format!("UDP proxy - now forwarding to {}", self.target));

        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };

        // Per-process forwarder: readers write ProcessEvents, the actor
        // consumes them as Msg::Process. It also keeps the actor alive
        // while a process is running even if every handle is dropped.
        let (events_tx, mut events_rx) = mpsc::channel(MAILBOX);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if mailbox.send(Msg::Process(event)).await.is_err() {
                    break;
                }
            }
        });

        let spawned = self.driver.spawn(&self.target, events_tx).await;
        match spawned {
            Ok(handle) => {
                self.process = Some(ActiveProcess { handle, pid: None });
            }
            Err(e) => {
                // A proxy that never came up is handled like one that
                // exited immediately.
                self.sink.error(&format!("failed to spawn UDP proxy: {e:#}"));
                if !self.closing {
                    self.schedule_restart();
                }
            }
        }
    }

    fn handle_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Stdout(line) => self.dispatch_line(&line),
            ProcessEvent::Stderr(line) => {
                self.sink.error(&format!("stderr: {line}"));
            }
            ProcessEvent::Exited(code) => {
                match code {
                    Some(code) => self
                        .sink
                        .log(&format!("UDP proxy - process exited with code {code}")),
                    None => self.sink.log("UDP proxy - process exited by signal"),
                }
                self.process = None;
                if !self.closing {
                    self.schedule_restart();
                }
            }
        }
    }

    fn dispatch_line(&mut self, line: &str) {
        match classify(line) {
            ProxyLine::PidAnnounced { pid } => {
                if let Some(process) = self.process.as_mut() {
                    // First announcement wins; later pid lines are
                    // ignored for this process instance.
                    if process.pid.is_none() {
                        self.sink.info(&format!("UDP proxy - PID is {pid}"));
                        process.pid = Some(pid);
                    }
                }
            }
            ProxyLine::ClientOpened { client, port } => {
                self.sink.log(&format!("joining client {client} -> {port}"));
            }
            // Timed-out clients are expected; logging them is noise.
            ProxyLine::ClientClosed { .. } => {}
            ProxyLine::ListenerStarted => {
                self.sink.log("UDP proxy - listen server started");
            }
            ProxyLine::Unrecognized { raw } => {
                if !raw.is_empty() {
                    self.sink.log(&format!("stdout: {raw}"));
                }
            }
        }
    }

    fn schedule_restart(&mut self) {
        let delay = self.restart.delay();
        self.sink
            .info(&format!("restarting proxy in {} seconds", delay.as_secs()));

        let mailbox = self.mailbox.clone();
        self.restart_timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            if let Some(mailbox) = mailbox.upgrade() {
                let _ = mailbox.send(Msg::RestartDue).await;
            }
        }));
    }

    fn handle_stop(&mut self) {
        self.closing = true;
        // The restart timer is left to fire; it re-checks the flag.
        if let Some(process) = &self.process {
            if let Some(pid) = &process.pid {
                self.sink.log(&format!("killing proxy process {pid}"));
                self.driver.kill_unowned(pid);
            }
            process.handle.interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::sink::{Channel, RecordingSink};

    #[derive(Default)]
    struct DriverState {
        spawns: Mutex<Vec<Target>>,
        events: Mutex<Option<mpsc::Sender<ProcessEvent>>>,
        killed: Mutex<Vec<String>>,
        interrupts: AtomicUsize,
        fail_next_spawn: AtomicBool,
    }

    /// In-memory driver: no process is ever spawned, the test injects
    /// output and exit events by hand.
    #[derive(Clone, Default)]
    struct FakeDriver(Arc<DriverState>);

    struct FakeControl(Arc<DriverState>);

    impl ProcessControl for FakeControl {
        fn os_pid(&self) -> Option<u32> {
            Some(1)
        }

        fn interrupt(&self) {
            self.0.interrupts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl ProcessDriver for FakeDriver {
        type Handle = FakeControl;

        async fn spawn(
            &self,
            target: &Target,
            events: mpsc::Sender<ProcessEvent>,
        ) -> anyhow::Result<Self::Handle> {
            if self.0.fail_next_spawn.swap(false, Ordering::SeqCst) {
                anyhow::bail!("spawn refused");
            }
            self.0.spawns.lock().unwrap().push(target.clone());
            *self.0.events.lock().unwrap() = Some(events);
            Ok(FakeControl(self.0.clone()))
        }

        fn kill_unowned(&self, pid: &str) {
            self.0.killed.lock().unwrap().push(pid.to_string());
        }
    }

    impl FakeDriver {
        fn spawn_count(&self) -> usize {
            self.0.spawns.lock().unwrap().len()
        }

        fn spawned_targets(&self) -> Vec<Target> {
            self.0.spawns.lock().unwrap().clone()
        }

        fn killed(&self) -> Vec<String> {
            self.0.killed.lock().unwrap().clone()
        }

        fn interrupts(&self) -> usize {
            self.0.interrupts.load(Ordering::SeqCst)
        }

        async fn feed_stdout(&self, line: &str) {
            let tx = self.0.events.lock().unwrap().clone().unwrap();
            tx.send(ProcessEvent::Stdout(line.to_string())).await.unwrap();
        }

        async fn feed_stderr(&self, line: &str) {
            let tx = self.0.events.lock().unwrap().clone().unwrap();
            tx.send(ProcessEvent::Stderr(line.to_string())).await.unwrap();
        }

        async fn exit(&self, code: Option<i32>) {
            let tx = self.0.events.lock().unwrap().clone().unwrap();
            tx.send(ProcessEvent::Exited(code)).await.unwrap();
        }
    }

    fn target() -> Target {
        Target {
            address: "10.0.0.2".into(),
            port: 7777,
        }
    }

    async fn started() -> (Supervisor, FakeDriver, Arc<RecordingSink>) {
        let driver = FakeDriver::default();
        let sink = Arc::new(RecordingSink::new());
        let supervisor = Supervisor::new(
            driver.clone(),
            sink.clone(),
            target(),
            RestartConfig::default(),
        );
        supervisor.start().await.unwrap();
        (supervisor, driver, sink)
    }

    /// Lets the actor drain every queued message. With the paused clock
    /// this only advances virtual time, never wall time.
    async fn drain() {
        time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_spawns_and_logs_the_target() {
        let (_supervisor, driver, sink) = started().await;

        assert_eq!(driver.spawn_count(), 1);
        assert!(sink.contains(Channel::Log, "now forwarding to 10.0.0.2:7777"));
    }

    #[tokio::test(start_paused = true)]
    async fn records_first_pid_announcement_only() {
        let (supervisor, driver, sink) = started().await;

        driver.feed_stdout("pid = 4821").await;
        driver.feed_stdout("pid = 9999").await;
        drain().await;

        assert!(sink.contains(Channel::Info, "4821"));
        assert!(!sink.contains(Channel::Info, "9999"));

        // the stored pid is the first one; stop() kills it
        supervisor.stop().await;
        assert_eq!(driver.killed(), vec!["4821".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn logs_client_open_events() {
        let (_supervisor, driver, sink) = started().await;

        driver.feed_stdout("client 10.0.0.5:55231 -> 0.0.0.0:7777").await;
        drain().await;

        assert!(sink.contains(Channel::Log, "10.0.0.5:55231"));
        assert!(sink.contains(Channel::Log, "7777"));
        assert!(!sink.entries().iter().any(|(c, _)| *c == Channel::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn suppresses_client_close_events() {
        let (_supervisor, driver, sink) = started().await;
        let before = sink.len();

        driver.feed_stdout("client 10.0.0.5:55231 -> closed").await;
        drain().await;

        assert_eq!(sink.len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn logs_listener_start_once() {
        let (_supervisor, driver, sink) = started().await;

        driver.feed_stdout("Listening on 0.0.0.0:7777").await;
        drain().await;

        assert_eq!(sink.count_containing("listen server started"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn relays_unrecognized_output_and_stderr() {
        let (_supervisor, driver, sink) = started().await;

        driver.feed_stdout("something unexpected").await;
        driver.feed_stdout("").await;
        driver.feed_stderr("bind failed").await;
        drain().await;

        assert!(sink.contains(Channel::Log, "stdout: something unexpected"));
        assert!(sink.contains(Channel::Error, "stderr: bind failed"));
        // the empty line produced no entry
        assert_eq!(sink.count_containing("stdout:"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_with_same_target_after_crash() {
        let (_supervisor, driver, sink) = started().await;

        driver.exit(Some(1)).await;
        drain().await;

        assert!(sink.contains(Channel::Log, "exited with code 1"));
        assert!(sink.contains(Channel::Info, "restarting proxy in 5 seconds"));
        // the delay has not elapsed yet
        assert_eq!(driver.spawn_count(), 1);

        time::sleep(Duration::from_secs(6)).await;

        assert_eq!(driver.spawn_count(), 2);
        assert_eq!(driver.spawned_targets(), vec![target(), target()]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_restart_after_stop() {
        let (supervisor, driver, _sink) = started().await;

        supervisor.stop().await;
        driver.exit(Some(0)).await;
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(driver.spawn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_pending_restart_cancels_it() {
        let (supervisor, driver, _sink) = started().await;

        driver.exit(Some(1)).await;
        drain().await;
        supervisor.stop().await;
        time::sleep(Duration::from_secs(10)).await;

        assert_eq!(driver.spawn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_dispatches_kill_and_interrupt() {
        let (supervisor, driver, sink) = started().await;

        driver.feed_stdout("pid = 4821").await;
        drain().await;
        supervisor.stop().await;

        assert_eq!(driver.killed(), vec!["4821".to_string()]);
        assert_eq!(driver.interrupts(), 1);
        assert!(sink.contains(Channel::Log, "killing proxy process 4821"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_reported_pid_still_interrupts() {
        let (supervisor, driver, _sink) = started().await;

        supervisor.stop().await;

        assert!(driver.killed().is_empty());
        assert_eq!(driver.interrupts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent() {
        let (supervisor, driver, _sink) = started().await;

        supervisor.stop().await;
        supervisor.stop().await;

        // start after stop is refused and spawns nothing
        assert!(matches!(
            supervisor.start().await,
            Err(UdpbindError::Terminated)
        ));
        assert_eq!(driver.spawn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_any_start_is_safe() {
        let driver = FakeDriver::default();
        let sink = Arc::new(RecordingSink::new());
        let supervisor = Supervisor::new(
            driver.clone(),
            sink.clone(),
            target(),
            RestartConfig::default(),
        );

        supervisor.stop().await;

        assert_eq!(driver.spawn_count(), 0);
        assert_eq!(driver.interrupts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_a_contract_violation() {
        let (supervisor, driver, sink) = started().await;

        assert!(matches!(
            supervisor.start().await,
            Err(UdpbindError::AlreadyRunning)
        ));
        assert_eq!(driver.spawn_count(), 1);
        assert!(sink.contains(Channel::Error, "still active"));
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_failure_is_retried_like_a_crash() {
        let driver = FakeDriver::default();
        driver.0.fail_next_spawn.store(true, Ordering::SeqCst);
        let sink = Arc::new(RecordingSink::new());
        let supervisor = Supervisor::new(
            driver.clone(),
            sink.clone(),
            target(),
            RestartConfig::default(),
        );

        // the failed spawn is not an error for the caller
        supervisor.start().await.unwrap();
        assert_eq!(driver.spawn_count(), 0);
        assert!(sink.contains(Channel::Error, "failed to spawn"));

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(driver.spawn_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_start_during_pending_restart_defuses_the_timer() {
        let (supervisor, driver, _sink) = started().await;

        driver.exit(Some(1)).await;
        drain().await;

        // operator restarts by hand before the timer fires
        supervisor.start().await.unwrap();
        assert_eq!(driver.spawn_count(), 2);

        time::sleep(Duration::from_secs(10)).await;
        // the timer fired, saw an active process, and did nothing
        assert_eq!(driver.spawn_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pid_resets_across_process_instances() {
        let (supervisor, driver, _sink) = started().await;

        driver.feed_stdout("pid = 100").await;
        driver.exit(Some(1)).await;
        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(driver.spawn_count(), 2);

        // the replacement process announces a different pid
        driver.feed_stdout("pid = 200").await;
        drain().await;
        supervisor.stop().await;

        assert_eq!(driver.killed(), vec!["200".to_string()]);
    }
}
