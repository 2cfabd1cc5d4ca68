//! Classification of the proxy's line-oriented status output.
//!
//! The proxy announces its pid, client endpoints, and listener state on
//! stdout in a small fixed grammar. Every line maps to exactly one
//! [`ProxyLine`]; anything outside the grammar is passed through for
//! diagnosis.

use std::sync::LazyLock;

use regex::Regex;

/// One classified line of proxy stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyLine {
    /// `pid = <digits>` - the proxy announcing its own process id.
    PidAnnounced { pid: String },
    /// `client <ip:port> -> 0.0.0.0:<port>` - a client endpoint opened.
    ClientOpened { client: String, port: String },
    /// `client <ip:port> -> closed` - a client endpoint went away.
    ClientClosed { client: String },
    /// `Listening on 0.0.0.0:<port>` - the listen socket is bound.
    ListenerStarted,
    /// Anything else, kept verbatim.
    Unrecognized { raw: String },
}

static PID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^pid = (\d+)$").expect("valid pattern"));
static CLIENT_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^client (\d+\.\d+\.\d+\.\d+:\d+) -> 0\.0\.0\.0:(\d+)$").expect("valid pattern")
});
static CLIENT_CLOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^client (\d+\.\d+\.\d+\.\d+:\d+) -> closed$").expect("valid pattern")
});
static LISTENING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Listening on 0\.0\.0\.0:\d+$").expect("valid pattern"));

/// Classifies one line of proxy stdout.
///
/// The input is trimmed before matching; each pattern must match the
/// whole trimmed line and the first match wins. The grammar is ASCII and
/// fixed-form, so no case folding is applied.
pub fn classify(line: &str) -> ProxyLine {
    let line = line.trim();

    if let Some(caps) = PID.captures(line) {
        return ProxyLine::PidAnnounced {
            pid: caps[1].to_string(),
        };
    }
    if let Some(caps) = CLIENT_OPEN.captures(line) {
        return ProxyLine::ClientOpened {
            client: caps[1].to_string(),
            port: caps[2].to_string(),
        };
    }
    if let Some(caps) = CLIENT_CLOSE.captures(line) {
        return ProxyLine::ClientClosed {
            client: caps[1].to_string(),
        };
    }
    if LISTENING.is_match(line) {
        return ProxyLine::ListenerStarted;
    }

    ProxyLine::Unrecognized {
        raw: line.to_string(),
    }
}
