//! vigil-watchdog: Per-session liveness watchdogs.
//!
//! Two independent detectors watch the same transcript and lifecycle
//! streams for different failure modes:
//!
//! - [`StallDetector`]: the user is waiting and the agent never answered.
//! - [`ReplyChainEnforcer`]: the agent answered but never signed off.
//!
//! Each owns its session map and a periodic poll task; when a session goes
//! quiet past its timeout, a recovery heartbeat is handed to the
//! [`vigil_types::HeartbeatDispatcher`].

mod poller;
pub mod reply_chain;
pub mod stall;

pub use reply_chain::{ChainStatus, ReplyChainEnforcer, ReplyChainState};
pub use stall::{SessionActivityState, StallDetector};

use async_trait::async_trait;

/// A detector driven by a periodic poll.
#[async_trait]
pub trait Watchdog: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Evaluate every tracked session once and fire overdue heartbeats.
    async fn check(&self);
}

/// Truncate to at most `max` characters.
pub(crate) fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_counts_chars() {
        assert_eq!(preview("héllo world", 5), "héllo");
        assert_eq!(preview("hi", 50), "hi");
        assert_eq!(preview("", 20), "");
    }
}
