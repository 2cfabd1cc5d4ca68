use std::sync::Mutex;

/// Severity channel a supervision message was emitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Log,
    Info,
    Error,
}

/// Logging collaborator for supervision events.
///
/// Injected into the supervisor and binder at construction time; the
/// crates never reach into ambient logger state for protocol messages.
pub trait StatusSink: Send + Sync {
    fn log(&self, message: &str);
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards supervision messages to the `tracing` ecosystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "udpbind", "{message}");
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "udpbind", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "udpbind", "{message}");
    }
}

/// Captures supervision messages in memory.
///
/// Mainly useful for assertions in tests and examples; production code
/// wants [`TracingSink`] or a host-specific implementation.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(Channel, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every message seen so far, in emission order.
    pub fn entries(&self) -> Vec<(Channel, String)> {
        self.entries.lock().unwrap().clone()
    }

    /// True if any message on `channel` contains `needle`.
    pub fn contains(&self, channel: Channel, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .any(|(c, m)| *c == channel && m.contains(needle))
    }

    /// Number of messages containing `needle`, across all channels.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, m)| m.contains(needle))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StatusSink for RecordingSink {
    fn log(&self, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((Channel::Log, message.to_string()));
    }

    fn info(&self, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((Channel::Info, message.to_string()));
    }

    fn error(&self, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((Channel::Error, message.to_string()));
    }
}
