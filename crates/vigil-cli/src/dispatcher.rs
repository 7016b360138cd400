//! Heartbeat dispatcher that hands requests to the host process as JSON lines
//! on stdout.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use vigil_types::{DispatchError, HeartbeatDispatcher, HeartbeatOutcome, HeartbeatRequest};

/// One line written for the host.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent<'a> {
    Heartbeat(&'a HeartbeatRequest),
    SystemEvent {
        text: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_key: Option<&'a str>,
    },
    WakeRequest {
        reason: &'a str,
    },
}

/// Writes every dispatch as one JSON object per line.
pub struct JsonLineDispatcher<W: Write + Send> {
    out: Mutex<W>,
}

impl JsonLineDispatcher<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLineDispatcher<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, event: &OutboundEvent<'_>) -> Result<(), DispatchError> {
        let line = serde_json::to_string(event).map_err(|e| DispatchError::Failed(e.to_string()))?;
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{line}")
            .and_then(|_| out.flush())
            .map_err(|e| DispatchError::Unavailable(e.to_string()))
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> HeartbeatDispatcher for JsonLineDispatcher<W> {
    async fn run_heartbeat_once(
        &self,
        request: HeartbeatRequest,
    ) -> Result<HeartbeatOutcome, DispatchError> {
        info!(reason = %request.reason, session_key = ?request.session_key, "dispatching heartbeat");
        self.emit(&OutboundEvent::Heartbeat(&request))?;
        Ok(HeartbeatOutcome::Ran)
    }

    fn enqueue_system_event(&self, text: &str, session_key: Option<&str>) {
        if let Err(e) = self.emit(&OutboundEvent::SystemEvent { text, session_key }) {
            debug!("failed to write system event: {e}");
        }
    }

    fn request_heartbeat_now(&self, reason: &str) {
        if let Err(e) = self.emit(&OutboundEvent::WakeRequest { reason }) {
            debug!("failed to write wake request: {e}");
        }
    }
}
