//! vigil-cron: Scheduled and activity-driven jobs.
//!
//! Jobs live in a single persisted document. A [`scheduler::CronService`]
//! owns the in-memory copy, serializes every mutation behind one async lock,
//! and keeps exactly one timer armed at the earliest pending run.

pub mod schedule;
pub mod scheduler;
pub mod store;

pub use scheduler::{BumpOutcome, CronService, CronServiceDeps, CronStatus, RemoveResult, RunMode, RunResult};
pub use store::{CronStoreFile, JobStore, JsonFileStore, SqliteStore, open_store};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use vigil_types::Source;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("unknown cron job id: {0}")]
    NotFound(String),
    #[error("invalid job: {0}")]
    InvalidJob(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CronError>;

// ──────────────────── Schedule ────────────────────

/// When a job becomes due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Schedule {
    /// Once, at an absolute time.
    At { at_ms: i64 },
    /// Every `every_ms`, aligned to `anchor_ms`.
    Every {
        every_ms: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },
    /// Cron expression (5, 6 or 7 fields), evaluated in UTC.
    Cron { expr: String },
    /// `timeout_ms` after the last matching session activity.
    Idle {
        timeout_ms: i64,
        #[serde(default)]
        reset_on: Vec<Source>,
        #[serde(default)]
        stop_on: Vec<Source>,
    },
}

impl Schedule {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::At { .. } => "at",
            Self::Every { .. } => "every",
            Self::Cron { .. } => "cron",
            Self::Idle { .. } => "idle",
        }
    }
}

// ──────────────────── Targeting & Delivery ────────────────────

/// Session-agnostic targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    Main,
    Isolated,
}

/// Which session a job applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionTarget {
    Scope(TargetScope),
    Session { key: String },
}

impl Default for SessionTarget {
    fn default() -> Self {
        Self::Scope(TargetScope::Main)
    }
}

impl SessionTarget {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Session { key: key.into() }
    }

    pub fn session_key(&self) -> Option<&str> {
        match self {
            Self::Session { key } => Some(key),
            Self::Scope(_) => None,
        }
    }

    /// Key-scoped targets match only their own session; scopes match any.
    pub fn matches(&self, session_key: Option<&str>) -> bool {
        match self {
            Self::Session { key } => session_key == Some(key.as_str()),
            Self::Scope(_) => true,
        }
    }
}

/// How a due job's payload is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WakeMode {
    /// Run a heartbeat immediately.
    #[default]
    Now,
    /// Queue the payload for the session's next heartbeat.
    NextHeartbeat,
}

/// What a job does when it runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    SystemEvent { text: String },
    AgentTurn { message: String },
}

impl Payload {
    pub fn text(&self) -> &str {
        match self {
            Self::SystemEvent { text } => text,
            Self::AgentTurn { message } => message,
        }
    }
}

// ──────────────────── Job ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// Runtime bookkeeping for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    /// Next due time; `None` means not scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    /// Set while an execution is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<i64>,
}

/// A scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    /// Unique job ID.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    /// Remove a one-shot job after it runs successfully.
    #[serde(default)]
    pub delete_after_run: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub schedule: Schedule,
    #[serde(default)]
    pub session_target: SessionTarget,
    #[serde(default)]
    pub wake_mode: WakeMode,
    pub payload: Payload,
    #[serde(default)]
    pub state: CronJobState,
}

/// Input for creating a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobCreate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub delete_after_run: bool,
    pub schedule: Schedule,
    #[serde(default)]
    pub session_target: SessionTarget,
    #[serde(default)]
    pub wake_mode: WakeMode,
    pub payload: Payload,
}

fn default_true() -> bool {
    true
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_target: Option<SessionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_mode: Option<WakeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl CronJob {
    /// Build a job from creation input. Scheduling state is left empty.
    pub fn from_create(input: CronJobCreate, now_ms: i64) -> Result<Self> {
        let mut schedule = input.schedule;
        if let Schedule::Every { anchor_ms, .. } = &mut schedule {
            anchor_ms.get_or_insert(now_ms);
        }
        let job = Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            description: input.description,
            enabled: input.enabled,
            delete_after_run: input.delete_after_run,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            schedule,
            session_target: input.session_target,
            wake_mode: input.wake_mode,
            payload: input.payload,
            state: CronJobState::default(),
        };
        job.validate()?;
        Ok(job)
    }

    pub fn apply_patch(&mut self, patch: CronJobPatch) -> Result<()> {
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        if let Some(delete_after_run) = patch.delete_after_run {
            self.delete_after_run = delete_after_run;
        }
        if let Some(mut schedule) = patch.schedule {
            if let Schedule::Every { anchor_ms, .. } = &mut schedule {
                anchor_ms.get_or_insert(self.created_at_ms);
            }
            self.schedule = schedule;
        }
        if let Some(target) = patch.session_target {
            self.session_target = target;
        }
        if let Some(wake_mode) = patch.wake_mode {
            self.wake_mode = wake_mode;
        }
        if let Some(payload) = patch.payload {
            self.payload = payload;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(CronError::InvalidJob("name must not be empty".into()));
        }
        if self.payload.text().trim().is_empty() {
            return Err(CronError::InvalidJob("payload text must not be empty".into()));
        }
        schedule::validate_schedule(&self.schedule)
    }

    pub fn is_running(&self) -> bool {
        self.state.running_at_ms.is_some()
    }
}
