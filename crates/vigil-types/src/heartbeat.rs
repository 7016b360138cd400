//! Heartbeat dispatch seam.
//!
//! The core never runs an agent turn itself. Recovery nudges and cron job
//! payloads are handed to a [`HeartbeatDispatcher`], which the host process
//! wires to whatever transport actually drives the agent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reason attached to stall recovery heartbeats.
pub const REASON_WATCHDOG_STALL: &str = "watchdog-stall";

/// Reason attached to reply-chain recovery heartbeats.
pub const REASON_REPLY_CHAIN_BROKEN: &str = "reply-chain-broken";

/// A request to run one out-of-band agent turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub reason: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
}

/// What the dispatcher did with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HeartbeatOutcome {
    Ran,
    Skipped { reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("heartbeat runner unavailable: {0}")]
    Unavailable(String),
    #[error("heartbeat failed: {0}")]
    Failed(String),
}

/// Runs agent turns on behalf of the scheduler and the watchdogs.
#[async_trait]
pub trait HeartbeatDispatcher: Send + Sync {
    /// Run one agent turn now and wait for it to be accepted.
    async fn run_heartbeat_once(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatOutcome, DispatchError>;

    /// Queue text to be delivered with the session's next heartbeat.
    fn enqueue_system_event(&self, text: &str, session_key: Option<&str>);

    /// Ask the runner to bring the next heartbeat forward.
    fn request_heartbeat_now(&self, reason: &str);
}
