//! vigil-types: Shared event and value types.
//!
//! Everything that crosses a crate boundary lives here: the transcript and
//! agent lifecycle events both watchdogs consume, sign-off tokens, and the
//! heartbeat dispatcher seam the core fires recovery turns through.

pub mod clock;
pub mod heartbeat;

pub use clock::{Clock, ManualClock, SystemClock};
pub use heartbeat::{
    DispatchError, HeartbeatDispatcher, HeartbeatOutcome, HeartbeatRequest,
    REASON_REPLY_CHAIN_BROKEN, REASON_WATCHDOG_STALL,
};

use serde::{Deserialize, Serialize};

// ──────────────────── Sign-off ────────────────────

/// Agent text meaning "turn finished, nothing more to say".
pub const NO_REPLY: &str = "NO_REPLY";

/// Agent text acknowledging a heartbeat without further action.
pub const HEARTBEAT_OK: &str = "HEARTBEAT_OK";

/// Whether `text`, trimmed, is exactly one of the sign-off tokens.
pub fn is_sign_off(text: &str) -> bool {
    let text = text.trim();
    text == NO_REPLY || text == HEARTBEAT_OK
}

/// Looser sign-off check that also accepts a reply ending in `NO_REPLY`.
pub fn ends_with_sign_off(text: &str) -> bool {
    is_sign_off(text) || text.trim().ends_with(NO_REPLY)
}

// ──────────────────── Session Events ────────────────────

/// Which side of the conversation produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    User,
    Agent,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation turn was appended to a session transcript.
///
/// Fields are optional because producers are loosely typed; consumers ignore
/// updates without a session key or source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Transcript file the turn was appended to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<String>,
}

impl TranscriptUpdate {
    pub fn new(session_key: impl Into<String>, source: Source, text: impl Into<String>) -> Self {
        Self {
            session_key: Some(session_key.into()),
            source: Some(source),
            text: Some(text.into()),
            session_file: None,
        }
    }

    /// Session key and source, if both are present.
    pub fn routing(&self) -> Option<(&str, Source)> {
        match (self.session_key.as_deref(), self.source) {
            (Some(key), Some(source)) if !key.is_empty() => Some((key, source)),
            _ => None,
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// Phase of an agent turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Start,
    End,
    Error,
}

impl LifecyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Error => "error",
        }
    }

    /// `end` and `error` both close a turn.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::End | Self::Error)
    }
}

/// An agent turn started, finished, or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLifecycleEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub phase: LifecyclePhase,
}

impl AgentLifecycleEvent {
    pub fn new(session_key: impl Into<String>, phase: LifecyclePhase) -> Self {
        Self {
            session_key: Some(session_key.into()),
            phase,
        }
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// A session became known to the process (startup discovery or creation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLoaded {
    pub session_key: String,
}
