//! Hook event types.

use serde::{Deserialize, Serialize};

use vigil_types::{AgentLifecycleEvent, SessionLoaded, TranscriptUpdate};

/// Inbound events an external feeder can publish onto the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HookEvent {
    /// A conversation turn was appended.
    Transcript(TranscriptUpdate),
    /// An agent turn started, ended, or failed.
    Lifecycle(AgentLifecycleEvent),
    /// A session became known to the process.
    SessionLoaded(SessionLoaded),
}

/// What happened to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Added,
    Updated,
    Removed,
    Started,
    Finished,
}

/// Job lifecycle notification, emitted after each successful mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub action: JobAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobEvent {
    pub fn new(job_id: impl Into<String>, action: JobAction) -> Self {
        Self {
            job_id: job_id.into(),
            action,
            next_run_at_ms: None,
            status: None,
            error: None,
        }
    }

    pub fn with_next_run(mut self, next_run_at_ms: Option<i64>) -> Self {
        self.next_run_at_ms = next_run_at_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::{LifecyclePhase, Source};

    #[test]
    fn test_hook_event_json_lines() {
        let line = r#"{"type":"transcript","session_key":"s1","source":"user","text":"hello"}"#;
        match serde_json::from_str::<HookEvent>(line).unwrap() {
            HookEvent::Transcript(update) => {
                assert_eq!(update.routing(), Some(("s1", Source::User)));
                assert_eq!(update.text(), "hello");
            }
            other => panic!("Expected transcript, got {other:?}"),
        }

        let line = r#"{"type":"lifecycle","session_key":"s1","phase":"end"}"#;
        match serde_json::from_str::<HookEvent>(line).unwrap() {
            HookEvent::Lifecycle(evt) => assert_eq!(evt.phase, LifecyclePhase::End),
            other => panic!("Expected lifecycle, got {other:?}"),
        }

        let line = r#"{"type":"session_loaded","session_key":"s2"}"#;
        assert!(matches!(
            serde_json::from_str::<HookEvent>(line).unwrap(),
            HookEvent::SessionLoaded(SessionLoaded { session_key }) if session_key == "s2"
        ));
    }

    #[test]
    fn test_job_event_serde() {
        let evt = JobEvent::new("job-1", JobAction::Added).with_next_run(Some(120_000));
        let json = serde_json::to_string(&evt).unwrap();
        assert_eq!(
            json,
            r#"{"jobId":"job-1","action":"added","nextRunAtMs":120000}"#
        );
    }
}
