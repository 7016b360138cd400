//! Cron service: owns the job collection, its lock, and the single wake timer.
//!
//! Every public operation except [`CronService::wake_now`] and
//! [`CronService::stop`] runs inside one FIFO async lock over the in-memory
//! state, following the same shape: load if needed, mutate, persist, re-arm.
//! Job execution happens with the lock released; the `runningAtMs` marker
//! keeps a job from overlapping itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vigil_hooks::{EventHub, JobAction, JobEvent, Subscription};
use vigil_types::{Clock, HeartbeatDispatcher, HeartbeatOutcome, HeartbeatRequest, Source};

use crate::schedule::{compute_next_run_at_ms, is_job_due};
use crate::store::{CronStoreFile, JobStore};
use crate::{
    CronError, CronJob, CronJobCreate, CronJobPatch, Payload, Result, RunStatus, Schedule,
    WakeMode,
};

/// A `runningAtMs` marker older than this is considered abandoned.
const STUCK_RUN_MS: i64 = 2 * 60 * 60 * 1000;

/// Upper bound on a single timer sleep; the timer re-checks and re-arms.
const MAX_TIMER_DELAY_MS: i64 = 60_000;

/// Collaborators the service needs.
pub struct CronServiceDeps {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<dyn HeartbeatDispatcher>,
    pub clock: Arc<dyn Clock>,
    /// Receives job lifecycle notifications when present.
    pub hub: Option<Arc<EventHub>>,
    /// Global switch. When off, jobs can be managed but never run.
    pub cron_enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Only run if the job is due.
    #[default]
    Due,
    /// Run regardless of the schedule.
    Force,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub ok: bool,
    pub ran: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RunResult {
    fn ran() -> Self {
        Self {
            ok: true,
            ran: true,
            reason: None,
        }
    }

    fn not_run(reason: &str) -> Self {
        Self {
            ok: true,
            ran: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveResult {
    pub ok: bool,
    pub removed: bool,
}

/// Result of feeding one activity event to the idle jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpOutcome {
    /// The scheduler is globally disabled.
    Disabled,
    Unchanged,
    /// This many jobs were re-armed or disarmed.
    Changed(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub enabled: bool,
    pub store_path: String,
    pub jobs: usize,
    pub next_wake_at_ms: Option<i64>,
}

/// In-memory view of the job document, guarded by the service lock.
#[derive(Default)]
struct CronState {
    store: Option<CronStoreFile>,
}

impl CronState {
    fn jobs(&self) -> &[CronJob] {
        self.store.as_ref().map(|s| s.jobs.as_slice()).unwrap_or_default()
    }

    fn jobs_mut(&mut self) -> &mut Vec<CronJob> {
        &mut self.store.get_or_insert_with(CronStoreFile::default).jobs
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut CronJob> {
        self.jobs_mut().iter_mut().find(|j| j.id == id)
    }

    fn find_or_err(&mut self, id: &str) -> Result<&mut CronJob> {
        self.find_mut(id)
            .ok_or_else(|| CronError::NotFound(id.to_string()))
    }

    /// Earliest pending run over enabled jobs that are not mid-execution.
    fn next_wake_at_ms(&self) -> Option<i64> {
        self.jobs()
            .iter()
            .filter(|j| j.enabled && !j.is_running())
            .filter_map(|j| j.state.next_run_at_ms)
            .min()
    }
}

#[derive(Default)]
struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    wake_at_ms: Option<i64>,
}

struct Inner {
    deps: CronServiceDeps,
    state: Mutex<CronState>,
    timer: StdMutex<TimerSlot>,
    stopped: AtomicBool,
}

/// Outcome of one job execution.
struct Execution {
    job_id: String,
    started_at_ms: i64,
    ended_at_ms: i64,
    status: RunStatus,
    error: Option<String>,
}

/// Persisted job scheduler with idle-activity support.
#[derive(Clone)]
pub struct CronService {
    inner: Arc<Inner>,
}

impl CronService {
    pub fn new(deps: CronServiceDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                // tokio's Mutex grants the lock in FIFO order.
                state: Mutex::new(CronState::default()),
                timer: StdMutex::new(TimerSlot::default()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Load jobs, normalize their due times against now, and arm the timer.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !inner.deps.cron_enabled {
            info!(enabled = false, "cron: disabled");
            return Ok(());
        }
        inner.stopped.store(false, Ordering::SeqCst);
        // Markers read from the store belong to a process that is gone.
        let from_store = state.store.is_none();
        inner.ensure_loaded(&mut state).await?;
        inner.recompute_next_runs(&mut state, from_store);
        inner.persist(&state).await?;
        inner.arm_timer(&state);
        info!(
            enabled = true,
            jobs = state.jobs().len(),
            next_wake_at_ms = ?state.next_wake_at_ms(),
            "cron: started"
        );
        Ok(())
    }

    /// Disarm the timer. In-flight executions are left to finish.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.stop_timer();
    }

    pub async fn status(&self) -> Result<CronStatus> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        inner.ensure_loaded(&mut state).await?;
        Ok(CronStatus {
            enabled: inner.deps.cron_enabled,
            store_path: inner.deps.store.location(),
            jobs: state.jobs().len(),
            next_wake_at_ms: if inner.deps.cron_enabled {
                state.next_wake_at_ms()
            } else {
                None
            },
        })
    }

    /// Jobs ordered by next run; unscheduled jobs sort first.
    pub async fn list(&self, include_disabled: bool) -> Result<Vec<CronJob>> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        inner.ensure_loaded(&mut state).await?;
        let mut jobs: Vec<CronJob> = state
            .jobs()
            .iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.state.next_run_at_ms.unwrap_or(0));
        Ok(jobs)
    }

    pub async fn add(&self, input: CronJobCreate) -> Result<CronJob> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        inner.warn_if_disabled("add");
        inner.ensure_loaded(&mut state).await?;

        let now = inner.now_ms();
        let mut job = CronJob::from_create(input, now)?;
        if job.enabled {
            job.state.next_run_at_ms = compute_next_run_at_ms(&job, now);
        }
        state.jobs_mut().push(job.clone());

        inner.persist(&state).await?;
        inner.arm_timer(&state);
        info!(job_id = %job.id, name = %job.name, kind = job.schedule.kind(), "cron: job added");
        inner.emit(JobEvent::new(&job.id, JobAction::Added).with_next_run(job.state.next_run_at_ms));
        Ok(job)
    }

    /// Apply a patch and recompute the job's next run from now.
    pub async fn update(&self, id: &str, patch: CronJobPatch) -> Result<CronJob> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        inner.warn_if_disabled("update");
        inner.ensure_loaded(&mut state).await?;

        let now = inner.now_ms();
        let job = state.find_or_err(id)?;
        let mut patched = job.clone();
        patched.apply_patch(patch)?;
        patched.updated_at_ms = now;
        if patched.enabled {
            patched.state.next_run_at_ms = compute_next_run_at_ms(&patched, now);
        } else {
            patched.state.next_run_at_ms = None;
            patched.state.running_at_ms = None;
        }
        *job = patched.clone();

        inner.persist(&state).await?;
        inner.arm_timer(&state);
        inner.emit(
            JobEvent::new(id, JobAction::Updated).with_next_run(patched.state.next_run_at_ms),
        );
        Ok(patched)
    }

    pub async fn remove(&self, id: &str) -> Result<RemoveResult> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        inner.warn_if_disabled("remove");
        inner.ensure_loaded(&mut state).await?;

        let jobs = state.jobs_mut();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(CronError::NotFound(id.to_string()));
        }

        inner.persist(&state).await?;
        inner.arm_timer(&state);
        info!(job_id = %id, "cron: job removed");
        inner.emit(JobEvent::new(id, JobAction::Removed));
        Ok(RemoveResult {
            ok: true,
            removed: true,
        })
    }

    /// Run one job now. `RunMode::Due` is a no-op unless the job is due.
    pub async fn run(&self, id: &str, mode: RunMode) -> Result<RunResult> {
        let forced = mode == RunMode::Force;
        let inner = &self.inner;
        let claimed = {
            let mut state = inner.state.lock().await;
            inner.warn_if_disabled("run");
            inner.ensure_loaded(&mut state).await?;

            let now = inner.now_ms();
            let job = state.find_or_err(id)?;
            if job.is_running() {
                return Ok(RunResult::not_run("already-running"));
            }
            if !is_job_due(job, now, forced) {
                return Ok(RunResult::not_run("not-due"));
            }
            job.state.running_at_ms = Some(now);
            let claimed = job.clone();
            inner.persist(&state).await?;
            inner.arm_timer(&state);
            claimed
        };

        let execution = inner.execute(&claimed).await;

        let mut state = inner.state.lock().await;
        inner.ensure_loaded(&mut state).await?;
        inner.finish(&mut state, execution);
        inner.persist(&state).await?;
        inner.arm_timer(&state);
        Ok(RunResult::ran())
    }

    /// Feed one activity event to every enabled idle job.
    ///
    /// A `stopOn` match disarms the job (it stays enabled). A `resetOn` match
    /// moves the deadline to `now + timeoutMs`, never earlier than it already
    /// is.
    pub async fn bump_idle_jobs(
        &self,
        source: Source,
        session_key: Option<&str>,
    ) -> Result<BumpOutcome> {
        let now = self.inner.now_ms();
        self.bump_idle_jobs_at(source, session_key, now).await
    }

    /// [`Self::bump_idle_jobs`] for activity observed at `now`.
    async fn bump_idle_jobs_at(
        &self,
        source: Source,
        session_key: Option<&str>,
        now: i64,
    ) -> Result<BumpOutcome> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if !inner.deps.cron_enabled {
            return Ok(BumpOutcome::Disabled);
        }
        inner.ensure_loaded(&mut state).await?;

        let mut changed = 0;
        for job in state.jobs_mut().iter_mut() {
            if !job.enabled || !job.session_target.matches(session_key) {
                continue;
            }
            let Schedule::Idle {
                timeout_ms,
                reset_on,
                stop_on,
            } = &job.schedule
            else {
                continue;
            };

            if stop_on.contains(&source) {
                if job.state.next_run_at_ms.is_some() || job.state.running_at_ms.is_some() {
                    job.state.next_run_at_ms = None;
                    job.state.running_at_ms = None;
                    changed += 1;
                    debug!(job_id = %job.id, %source, "cron: idle job disarmed");
                }
                continue;
            }

            if !reset_on.contains(&source) {
                continue;
            }
            let next = now.saturating_add(*timeout_ms);
            if job.state.next_run_at_ms.is_none_or(|current| next > current) {
                job.state.next_run_at_ms = Some(next);
                job.state.running_at_ms = None;
                changed += 1;
                debug!(job_id = %job.id, %source, next_run_at_ms = next, "cron: idle job bumped");
            }
        }

        if changed == 0 {
            return Ok(BumpOutcome::Unchanged);
        }
        inner.persist(&state).await?;
        inner.arm_timer(&state);
        Ok(BumpOutcome::Changed(changed))
    }

    /// Deliver `text` now and force a scheduler tick without waiting for the
    /// lock, so a tick can be requested while a long job holds it.
    pub fn wake_now(&self, mode: WakeMode, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let dispatcher = &self.inner.deps.dispatcher;
        dispatcher.enqueue_system_event(text, None);
        if mode == WakeMode::Now {
            dispatcher.request_heartbeat_now("wake");
        }
        let inner = self.inner.clone();
        tokio::spawn(async move { inner.on_timer().await });
        true
    }

    /// Drop the in-memory copy; the next operation reloads from the store.
    pub async fn unload(&self) {
        self.inner.state.lock().await.store = None;
    }

    /// Wake time the timer is currently armed for.
    pub fn armed_wake_at_ms(&self) -> Option<i64> {
        self.inner
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .wake_at_ms
    }

    /// Route transcript activity into [`Self::bump_idle_jobs`].
    ///
    /// Events are stamped when published and applied one at a time, in
    /// publish order, by a single drain task. The task ends when the returned
    /// subscription is dropped.
    pub fn attach(&self, hub: &EventHub) -> Subscription {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Source, String, i64)>();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let service = self.clone();
                handle.spawn(async move {
                    while let Some((source, session_key, at_ms)) = rx.recv().await {
                        if let Err(e) = service
                            .bump_idle_jobs_at(source, Some(&session_key), at_ms)
                            .await
                        {
                            warn!(session_key = %session_key, "cron: idle bump failed: {e}");
                        }
                    }
                    debug!("cron: idle bump feed closed");
                });
            }
            Err(_) => warn!("cron: no tokio runtime available; idle jobs will not be bumped"),
        }

        let clock = self.inner.deps.clock.clone();
        hub.transcripts.subscribe(move |update| {
            let Some((session_key, source)) = update.routing() else {
                return;
            };
            if tx
                .send((source, session_key.to_string(), clock.now_ms()))
                .is_err()
            {
                debug!(session_key, "cron: idle bump feed closed; dropping event");
            }
        })
    }
}

impl Inner {
    fn now_ms(&self) -> i64 {
        self.deps.clock.now_ms()
    }

    fn warn_if_disabled(&self, action: &str) {
        if !self.deps.cron_enabled {
            warn!(action, "cron: scheduler is disabled; jobs will not run");
        }
    }

    fn emit(&self, event: JobEvent) {
        if let Some(hub) = &self.deps.hub {
            hub.jobs.publish(&event);
        }
    }

    async fn ensure_loaded(&self, state: &mut CronState) -> Result<()> {
        if state.store.is_none() {
            let doc = self.deps.store.load().await?;
            debug!(jobs = doc.jobs.len(), store = %self.deps.store.location(), "cron: store loaded");
            state.store = Some(doc);
        }
        Ok(())
    }

    async fn persist(&self, state: &CronState) -> Result<()> {
        match &state.store {
            Some(doc) => self.deps.store.save(doc).await,
            None => Ok(()),
        }
    }

    /// Normalize due times after a (re)start.
    ///
    /// With `orphaned_markers` every `runningAtMs` is cleared; otherwise only
    /// markers older than [`STUCK_RUN_MS`].
    fn recompute_next_runs(&self, state: &mut CronState, orphaned_markers: bool) {
        let now = self.now_ms();
        for job in state.jobs_mut().iter_mut() {
            if let Some(running_at) = job.state.running_at_ms {
                if orphaned_markers || now - running_at > STUCK_RUN_MS {
                    warn!(job_id = %job.id, running_at_ms = running_at, "cron: clearing stale run marker");
                    job.state.running_at_ms = None;
                }
            }
            if !job.enabled {
                job.state.next_run_at_ms = None;
                continue;
            }
            let next = job.state.next_run_at_ms;
            let overdue = next.is_some_and(|n| n <= now);
            if job.schedule.is_idle() {
                // A disarmed idle job waits for activity, not for a restart.
                if overdue {
                    job.state.next_run_at_ms = compute_next_run_at_ms(job, now);
                }
            } else if next.is_none() || overdue {
                job.state.next_run_at_ms = compute_next_run_at_ms(job, now);
            }
        }
    }

    fn stop_timer(&self) {
        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.handle.take() {
            handle.abort();
        }
        slot.wake_at_ms = None;
    }

    /// Replace the outstanding timer with one firing at the earliest due time.
    fn arm_timer(self: &Arc<Self>, state: &CronState) {
        self.stop_timer();
        if !self.deps.cron_enabled || self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let Some(wake_at) = state.next_wake_at_ms() else {
            return;
        };
        let delay_ms = (wake_at - self.now_ms()).clamp(0, MAX_TIMER_DELAY_MS);
        let weak: Weak<Inner> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms as u64)).await;
            if let Some(inner) = weak.upgrade() {
                // Detached so re-arming from inside the tick cannot abort it.
                tokio::spawn(async move { inner.on_timer().await });
            }
        });

        let mut slot = self.timer.lock().unwrap_or_else(|e| e.into_inner());
        slot.handle = Some(handle);
        slot.wake_at_ms = Some(wake_at);
    }

    /// Timer tick: claim due jobs, run them unlocked, record results.
    async fn on_timer(self: Arc<Self>) {
        if !self.deps.cron_enabled {
            return;
        }
        let claimed = {
            let mut state = self.state.lock().await;
            if let Err(e) = self.ensure_loaded(&mut state).await {
                warn!("cron: failed to load store on timer: {e}");
                return;
            }
            let now = self.now_ms();
            let mut claimed = Vec::new();
            for job in state.jobs_mut().iter_mut() {
                if !job.is_running() && is_job_due(job, now, false) {
                    job.state.running_at_ms = Some(now);
                    claimed.push(job.clone());
                }
            }
            if !claimed.is_empty() {
                if let Err(e) = self.persist(&state).await {
                    warn!("cron: failed to persist run markers: {e}");
                }
            }
            self.arm_timer(&state);
            claimed
        };
        if claimed.is_empty() {
            return;
        }

        let mut executions = Vec::with_capacity(claimed.len());
        for job in &claimed {
            executions.push(self.execute(job).await);
        }

        let mut state = self.state.lock().await;
        if let Err(e) = self.ensure_loaded(&mut state).await {
            warn!("cron: failed to reload store after run: {e}");
            return;
        }
        for execution in executions {
            self.finish(&mut state, execution);
        }
        if let Err(e) = self.persist(&state).await {
            warn!("cron: failed to persist run results: {e}");
        }
        self.arm_timer(&state);
    }

    /// Deliver a job's payload. Never fails; errors are folded into the result.
    async fn execute(&self, job: &CronJob) -> Execution {
        let started_at_ms = self.now_ms();
        self.emit(JobEvent::new(&job.id, JobAction::Started));
        info!(job_id = %job.id, name = %job.name, "cron: running job");

        let dispatcher = &self.deps.dispatcher;
        let session_key = job.session_target.session_key();
        let outcome = match (&job.payload, job.wake_mode) {
            (Payload::SystemEvent { text }, WakeMode::NextHeartbeat) => {
                dispatcher.enqueue_system_event(text, session_key);
                dispatcher.request_heartbeat_now(&format!("cron:{}", job.id));
                Ok(HeartbeatOutcome::Ran)
            }
            (payload, _) => {
                dispatcher
                    .run_heartbeat_once(HeartbeatRequest {
                        reason: job.name.clone(),
                        prompt: payload.text().to_string(),
                        session_key: session_key.map(str::to_string),
                    })
                    .await
            }
        };

        let (status, error) = match outcome {
            Ok(HeartbeatOutcome::Ran) => (RunStatus::Ok, None),
            Ok(HeartbeatOutcome::Skipped { reason }) => (RunStatus::Skipped, Some(reason)),
            Err(e) => {
                warn!(job_id = %job.id, "cron: job execution failed: {e}");
                (RunStatus::Error, Some(e.to_string()))
            }
        };
        Execution {
            job_id: job.id.clone(),
            started_at_ms,
            ended_at_ms: self.now_ms(),
            status,
            error,
        }
    }

    /// Fold an execution back into the job and schedule what comes next.
    fn finish(&self, state: &mut CronState, execution: Execution) {
        let Some(job) = state.find_mut(&execution.job_id) else {
            debug!(job_id = %execution.job_id, "cron: job removed while running");
            return;
        };
        job.state.running_at_ms = None;
        job.state.last_run_at_ms = Some(execution.started_at_ms);
        job.state.last_status = Some(execution.status);
        job.state.last_error = execution.error.clone();
        job.state.last_duration_ms = Some(execution.ended_at_ms - execution.started_at_ms);

        let mut delete = false;
        match &job.schedule {
            Schedule::At { .. } => {
                if job.delete_after_run && execution.status == RunStatus::Ok {
                    delete = true;
                } else {
                    job.enabled = false;
                    job.state.next_run_at_ms = None;
                }
            }
            Schedule::Every { .. } | Schedule::Cron { .. } => {
                job.state.next_run_at_ms = if job.enabled {
                    compute_next_run_at_ms(job, execution.ended_at_ms)
                } else {
                    None
                };
            }
            Schedule::Idle { .. } => {
                // Keep a deadline set by activity during the run.
                let bumped = job
                    .state
                    .next_run_at_ms
                    .is_some_and(|n| n > execution.started_at_ms);
                if !bumped {
                    job.state.next_run_at_ms = None;
                }
            }
        }

        let mut event = JobEvent::new(&execution.job_id, JobAction::Finished)
            .with_next_run(job.state.next_run_at_ms);
        event.status = Some(execution.status.as_str().to_string());
        event.error = execution.error;

        if delete {
            state.jobs_mut().retain(|j| j.id != execution.job_id);
            info!(job_id = %execution.job_id, "cron: one-shot job deleted after run");
            self.emit(event);
            self.emit(JobEvent::new(&execution.job_id, JobAction::Removed));
        } else {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as SyncMutex;

    use async_trait::async_trait;
    use vigil_types::{DispatchError, ManualClock, TranscriptUpdate};

    use crate::store::JsonFileStore;
    use crate::{SessionTarget, WakeMode};

    /// 2025-01-01T10:00:00Z
    const T0: i64 = 1_735_725_600_000;

    #[derive(Default)]
    struct RecordingDispatcher {
        runs: SyncMutex<Vec<HeartbeatRequest>>,
        queued: SyncMutex<Vec<(String, Option<String>)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl HeartbeatDispatcher for RecordingDispatcher {
        async fn run_heartbeat_once(
            &self,
            request: HeartbeatRequest,
        ) -> std::result::Result<HeartbeatOutcome, DispatchError> {
            self.runs.lock().unwrap().push(request);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DispatchError::Unavailable("agent offline".into()));
            }
            Ok(HeartbeatOutcome::Ran)
        }

        fn enqueue_system_event(&self, text: &str, session_key: Option<&str>) {
            self.queued
                .lock()
                .unwrap()
                .push((text.to_string(), session_key.map(str::to_string)));
        }

        fn request_heartbeat_now(&self, _reason: &str) {}
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store_path: std::path::PathBuf,
        clock: Arc<ManualClock>,
        dispatcher: Arc<RecordingDispatcher>,
        hub: Arc<EventHub>,
        cron: CronService,
    }

    fn harness_with(enabled: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("cron").join("jobs.json");
        let clock = ManualClock::new(T0);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let hub = EventHub::new();
        let cron = CronService::new(CronServiceDeps {
            store: Arc::new(JsonFileStore::new(&store_path)),
            dispatcher: dispatcher.clone(),
            clock: clock.clone(),
            hub: Some(hub.clone()),
            cron_enabled: enabled,
        });
        Harness {
            _dir: dir,
            store_path,
            clock,
            dispatcher,
            hub,
            cron,
        }
    }

    fn harness() -> Harness {
        harness_with(true)
    }

    fn idle_job(key: &str, reset_on: Vec<Source>, stop_on: Vec<Source>) -> CronJobCreate {
        CronJobCreate {
            name: "watchdog".into(),
            description: None,
            enabled: true,
            delete_after_run: false,
            schedule: Schedule::Idle {
                timeout_ms: 120_000,
                reset_on,
                stop_on,
            },
            session_target: SessionTarget::key(key),
            wake_mode: WakeMode::Now,
            payload: Payload::SystemEvent {
                text: "Are you there?".into(),
            },
        }
    }

    fn every_job(every_ms: i64) -> CronJobCreate {
        CronJobCreate {
            name: "tick".into(),
            description: None,
            enabled: true,
            delete_after_run: false,
            schedule: Schedule::Every {
                every_ms,
                anchor_ms: None,
            },
            session_target: SessionTarget::default(),
            wake_mode: WakeMode::Now,
            payload: Payload::AgentTurn {
                message: "status report".into(),
            },
        }
    }

    async fn only_job(cron: &CronService) -> CronJob {
        let mut jobs = cron.list(true).await.unwrap();
        assert_eq!(jobs.len(), 1);
        jobs.remove(0)
    }

    #[tokio::test]
    async fn test_idle_job_bump_scenario() {
        let h = harness();
        h.cron.start().await.unwrap();

        let timeout = 120_000;
        let job = h
            .cron
            .add(idle_job("session-123", vec![Source::User, Source::Agent], vec![]))
            .await
            .unwrap();
        assert_eq!(job.state.next_run_at_ms, Some(T0 + timeout));

        h.clock.advance(60_000);
        let mid = T0 + 60_000;
        let outcome = h
            .cron
            .bump_idle_jobs(Source::User, Some("session-123"))
            .await
            .unwrap();
        assert_eq!(outcome, BumpOutcome::Changed(1));
        assert_eq!(only_job(&h.cron).await.state.next_run_at_ms, Some(mid + timeout));

        // Wrong session leaves the deadline alone.
        h.clock.advance(10_000);
        let outcome = h
            .cron
            .bump_idle_jobs(Source::User, Some("session-999"))
            .await
            .unwrap();
        assert_eq!(outcome, BumpOutcome::Unchanged);
        assert_eq!(only_job(&h.cron).await.state.next_run_at_ms, Some(mid + timeout));

        // Narrowing resetOn re-arms from the update time.
        let updated = h
            .cron
            .update(
                &job.id,
                CronJobPatch {
                    schedule: Some(Schedule::Idle {
                        timeout_ms: timeout,
                        reset_on: vec![Source::Agent],
                        stop_on: vec![],
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let post_update = h.clock.now_ms();
        assert_eq!(updated.state.next_run_at_ms, Some(post_update + timeout));

        // Matching session, source no longer in resetOn.
        h.clock.advance(10_000);
        h.cron
            .bump_idle_jobs(Source::User, Some("session-123"))
            .await
            .unwrap();
        assert_eq!(
            only_job(&h.cron).await.state.next_run_at_ms,
            Some(post_update + timeout)
        );

        h.cron.stop();
    }

    #[tokio::test]
    async fn test_idle_bump_is_monotonic() {
        let h = harness();
        let job = h
            .cron
            .add(idle_job("s1", vec![Source::User], vec![]))
            .await
            .unwrap();

        // An event stamped earlier than the current baseline cannot pull it back.
        h.clock.set(T0 - 30_000);
        let outcome = h.cron.bump_idle_jobs(Source::User, Some("s1")).await.unwrap();
        assert_eq!(outcome, BumpOutcome::Unchanged);
        assert_eq!(
            only_job(&h.cron).await.state.next_run_at_ms,
            job.state.next_run_at_ms
        );
    }

    #[tokio::test]
    async fn test_idle_stop_on_disarms_without_disabling() {
        let h = harness();
        h.cron.start().await.unwrap();
        h.cron
            .add(idle_job("s1", vec![Source::User], vec![Source::Agent]))
            .await
            .unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), Some(T0 + 120_000));

        let outcome = h.cron.bump_idle_jobs(Source::Agent, Some("s1")).await.unwrap();
        assert_eq!(outcome, BumpOutcome::Changed(1));

        let job = only_job(&h.cron).await;
        assert!(job.enabled);
        assert_eq!(job.state.next_run_at_ms, None);
        assert_eq!(job.state.running_at_ms, None);
        assert_eq!(h.cron.armed_wake_at_ms(), None);

        // A later reset re-arms.
        h.clock.advance(5_000);
        h.cron.bump_idle_jobs(Source::User, Some("s1")).await.unwrap();
        assert_eq!(
            only_job(&h.cron).await.state.next_run_at_ms,
            Some(T0 + 5_000 + 120_000)
        );
        h.cron.stop();
    }

    #[tokio::test]
    async fn test_stop_on_ignores_other_sessions() {
        let h = harness();
        h.cron
            .add(idle_job("s1", vec![Source::User], vec![Source::Agent]))
            .await
            .unwrap();
        let outcome = h.cron.bump_idle_jobs(Source::Agent, Some("s2")).await.unwrap();
        assert_eq!(outcome, BumpOutcome::Unchanged);
        assert_eq!(
            only_job(&h.cron).await.state.next_run_at_ms,
            Some(T0 + 120_000)
        );
    }

    #[tokio::test]
    async fn test_unscoped_idle_job_matches_every_session() {
        let h = harness();
        let mut input = idle_job("ignored", vec![Source::User], vec![]);
        input.session_target = SessionTarget::default();
        h.cron.add(input).await.unwrap();

        h.clock.advance(1_000);
        h.cron.bump_idle_jobs(Source::User, Some("any")).await.unwrap();
        h.clock.advance(1_000);
        h.cron.bump_idle_jobs(Source::User, None).await.unwrap();
        assert_eq!(
            only_job(&h.cron).await.state.next_run_at_ms,
            Some(T0 + 2_000 + 120_000)
        );
    }

    #[tokio::test]
    async fn test_bump_when_disabled_reports_disabled() {
        let h = harness_with(false);
        h.cron
            .add(idle_job("s1", vec![Source::User], vec![]))
            .await
            .unwrap();
        let outcome = h.cron.bump_idle_jobs(Source::User, Some("s1")).await.unwrap();
        assert_eq!(outcome, BumpOutcome::Disabled);
        assert_eq!(h.cron.armed_wake_at_ms(), None);
        assert_eq!(h.cron.status().await.unwrap().next_wake_at_ms, None);
    }

    #[tokio::test]
    async fn test_timer_tracks_minimum_next_run() {
        let h = harness();
        h.cron.start().await.unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), None);

        let slow = h.cron.add(every_job(600_000)).await.unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), Some(T0 + 600_000));

        let fast = h.cron.add(every_job(60_000)).await.unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), Some(T0 + 60_000));

        h.cron
            .update(
                &fast.id,
                CronJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), Some(T0 + 600_000));

        h.cron.remove(&slow.id).await.unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), None);

        let status = h.cron.status().await.unwrap();
        assert_eq!(status.jobs, 1);
        assert_eq!(status.next_wake_at_ms, None);
        h.cron.stop();
    }

    #[tokio::test]
    async fn test_disable_clears_markers_and_enable_recomputes() {
        let h = harness();
        let job = h.cron.add(every_job(60_000)).await.unwrap();

        let disabled = h
            .cron
            .update(
                &job.id,
                CronJobPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(disabled.state.next_run_at_ms, None);
        assert_eq!(disabled.state.running_at_ms, None);
        assert!(h.cron.list(false).await.unwrap().is_empty());

        h.clock.advance(90_000);
        let enabled = h
            .cron
            .update(
                &job.id,
                CronJobPatch {
                    enabled: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(enabled.state.next_run_at_ms, Some(T0 + 120_000));
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let h = harness();
        assert!(matches!(
            h.cron.update("nope", CronJobPatch::default()).await,
            Err(CronError::NotFound(_))
        ));
        assert!(matches!(h.cron.remove("nope").await, Err(CronError::NotFound(_))));
        assert!(matches!(
            h.cron.run("nope", RunMode::Force).await,
            Err(CronError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_patch_leaves_job_untouched() {
        let h = harness();
        let job = h.cron.add(every_job(60_000)).await.unwrap();
        let err = h
            .cron
            .update(
                &job.id,
                CronJobPatch {
                    name: Some("   ".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(err, Err(CronError::InvalidJob(_))));
        assert_eq!(only_job(&h.cron).await.name, "tick");
    }

    #[tokio::test]
    async fn test_run_due_and_force() {
        let h = harness();
        let job = h.cron.add(every_job(60_000)).await.unwrap();

        let result = h.cron.run(&job.id, RunMode::Due).await.unwrap();
        assert_eq!(result, RunResult::not_run("not-due"));
        assert!(h.dispatcher.runs.lock().unwrap().is_empty());

        let result = h.cron.run(&job.id, RunMode::Force).await.unwrap();
        assert_eq!(result, RunResult::ran());
        {
            let runs = h.dispatcher.runs.lock().unwrap();
            assert_eq!(runs.len(), 1);
            assert_eq!(runs[0].reason, "tick");
            assert_eq!(runs[0].prompt, "status report");
            assert_eq!(runs[0].session_key, None);
        }

        let after = only_job(&h.cron).await;
        assert_eq!(after.state.last_status, Some(RunStatus::Ok));
        assert_eq!(after.state.last_run_at_ms, Some(T0));
        assert_eq!(after.state.running_at_ms, None);
        assert_eq!(after.state.next_run_at_ms, Some(T0 + 60_000));

        h.clock.advance(60_000);
        let result = h.cron.run(&job.id, RunMode::Due).await.unwrap();
        assert!(result.ran);
        assert_eq!(
            only_job(&h.cron).await.state.next_run_at_ms,
            Some(T0 + 120_000)
        );
    }

    #[tokio::test]
    async fn test_run_skips_job_already_running() {
        let h = harness();
        let job = h.cron.add(every_job(60_000)).await.unwrap();
        {
            let mut state = h.cron.inner.state.lock().await;
            state.find_mut(&job.id).unwrap().state.running_at_ms = Some(T0);
        }
        let result = h.cron.run(&job.id, RunMode::Force).await.unwrap();
        assert_eq!(result, RunResult::not_run("already-running"));
        assert!(h.dispatcher.runs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_recorded_not_raised() {
        let h = harness();
        h.dispatcher.fail.store(true, Ordering::SeqCst);
        let job = h.cron.add(every_job(60_000)).await.unwrap();

        let result = h.cron.run(&job.id, RunMode::Force).await.unwrap();
        assert!(result.ran);
        let after = only_job(&h.cron).await;
        assert_eq!(after.state.last_status, Some(RunStatus::Error));
        assert!(after.state.last_error.unwrap().contains("agent offline"));
        assert_eq!(after.state.next_run_at_ms, Some(T0 + 60_000));
    }

    #[tokio::test]
    async fn test_idle_job_disarms_after_firing() {
        let h = harness();
        let mut input = idle_job("s1", vec![Source::User], vec![]);
        input.wake_mode = WakeMode::NextHeartbeat;
        let job = h.cron.add(input).await.unwrap();

        h.clock.advance(120_000);
        let result = h.cron.run(&job.id, RunMode::Due).await.unwrap();
        assert!(result.ran);
        assert_eq!(
            *h.dispatcher.queued.lock().unwrap(),
            vec![("Are you there?".to_string(), Some("s1".to_string()))]
        );

        let after = only_job(&h.cron).await;
        assert!(after.enabled);
        assert_eq!(after.state.next_run_at_ms, None);
    }

    #[tokio::test]
    async fn test_one_shot_at_job() {
        let h = harness();
        let mut input = every_job(1);
        input.schedule = Schedule::At { at_ms: T0 + 1_000 };
        let keep = h.cron.add(input.clone()).await.unwrap();
        input.delete_after_run = true;
        let drop_after = h.cron.add(input).await.unwrap();

        h.clock.advance(1_000);
        h.cron.run(&keep.id, RunMode::Due).await.unwrap();
        h.cron.run(&drop_after.id, RunMode::Due).await.unwrap();

        let jobs = h.cron.list(true).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, keep.id);
        assert!(!jobs[0].enabled);
        assert_eq!(jobs[0].state.next_run_at_ms, None);
    }

    #[tokio::test]
    async fn test_mutations_persist_and_reload() {
        let h = harness();
        let job = h
            .cron
            .add(idle_job("s1", vec![Source::User], vec![]))
            .await
            .unwrap();
        assert!(h.store_path.exists());

        h.cron.unload().await;
        assert_eq!(only_job(&h.cron).await, job);

        let other = CronService::new(CronServiceDeps {
            store: Arc::new(JsonFileStore::new(&h.store_path)),
            dispatcher: h.dispatcher.clone(),
            clock: h.clock.clone(),
            hub: None,
            cron_enabled: true,
        });
        assert_eq!(only_job(&other).await.id, job.id);
    }

    #[tokio::test]
    async fn test_start_recomputes_after_long_downtime() {
        let h = harness();
        let every = h.cron.add(every_job(60_000)).await.unwrap();
        let idle = h
            .cron
            .add(idle_job("s1", vec![Source::User], vec![Source::Agent]))
            .await
            .unwrap();
        let stopped = h
            .cron
            .add(idle_job("s2", vec![Source::User], vec![Source::Agent]))
            .await
            .unwrap();
        h.cron.bump_idle_jobs(Source::Agent, Some("s2")).await.unwrap();

        // Simulate a restart an hour later.
        h.clock.advance(3_600_000);
        let now = h.clock.now_ms();
        let restarted = CronService::new(CronServiceDeps {
            store: Arc::new(JsonFileStore::new(&h.store_path)),
            dispatcher: h.dispatcher.clone(),
            clock: h.clock.clone(),
            hub: None,
            cron_enabled: true,
        });
        restarted.start().await.unwrap();

        let jobs = restarted.list(true).await.unwrap();
        let find = |id: &str| jobs.iter().find(|j| j.id == id).unwrap().clone();
        assert_eq!(find(&every.id).state.next_run_at_ms, Some(T0 + 3_660_000));
        assert_eq!(find(&idle.id).state.next_run_at_ms, Some(now + 120_000));
        assert_eq!(find(&stopped.id).state.next_run_at_ms, None);
        restarted.stop();
    }

    #[tokio::test]
    async fn test_start_clears_marker_left_by_crashed_run() {
        let h = harness();
        let job = h.cron.add(every_job(60_000)).await.unwrap();

        // The process died mid-run: the marker was persisted, never cleared.
        let store = JsonFileStore::new(&h.store_path);
        let mut doc = store.load().await.unwrap();
        doc.jobs[0].state.running_at_ms = Some(T0);
        store.save(&doc).await.unwrap();

        h.clock.advance(600_000);
        let restarted = CronService::new(CronServiceDeps {
            store: Arc::new(JsonFileStore::new(&h.store_path)),
            dispatcher: h.dispatcher.clone(),
            clock: h.clock.clone(),
            hub: None,
            cron_enabled: true,
        });
        restarted.start().await.unwrap();

        let reloaded = only_job(&restarted).await;
        assert_eq!(reloaded.state.running_at_ms, None);
        assert_eq!(reloaded.state.next_run_at_ms, Some(T0 + 660_000));
        assert_eq!(restarted.armed_wake_at_ms(), Some(T0 + 660_000));

        h.clock.advance(300_000);
        let result = restarted.run(&job.id, RunMode::Due).await.unwrap();
        assert_eq!(result, RunResult::ran());
        restarted.stop();
    }

    #[tokio::test]
    async fn test_oversized_interval_is_rejected() {
        let h = harness();
        h.cron.start().await.unwrap();
        let err = h.cron.add(every_job(i64::MAX)).await.unwrap_err();
        assert!(matches!(err, CronError::InvalidJob(_)), "{err}");
        assert!(h.cron.list(true).await.unwrap().is_empty());
        assert_eq!(h.cron.armed_wake_at_ms(), None);
        h.cron.stop();
    }

    #[tokio::test]
    async fn test_job_events_emitted() {
        let h = harness();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let s = seen.clone();
        let _sub = h.hub.jobs.subscribe(move |evt| s.lock().unwrap().push(evt.action));

        let job = h.cron.add(every_job(60_000)).await.unwrap();
        h.cron
            .update(
                &job.id,
                CronJobPatch {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        h.cron.run(&job.id, RunMode::Force).await.unwrap();
        h.cron.remove(&job.id).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                JobAction::Added,
                JobAction::Updated,
                JobAction::Started,
                JobAction::Finished,
                JobAction::Removed
            ]
        );
    }

    #[tokio::test]
    async fn test_attach_bumps_on_transcript_activity() {
        let h = harness();
        h.cron
            .add(idle_job("s1", vec![Source::Agent], vec![]))
            .await
            .unwrap();
        let _sub = h.cron.attach(&h.hub);

        h.clock.advance(30_000);
        h.hub
            .transcripts
            .publish(&TranscriptUpdate::new("s1", Source::Agent, "working on it"));
        // Malformed updates are ignored.
        h.hub.transcripts.publish(&TranscriptUpdate::default());

        let mut next = None;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            next = only_job(&h.cron).await.state.next_run_at_ms;
            if next == Some(T0 + 30_000 + 120_000) {
                break;
            }
        }
        assert_eq!(next, Some(T0 + 30_000 + 120_000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_attach_applies_events_in_publish_order() {
        let h = harness();
        let watched = h
            .cron
            .add(idle_job("s1", vec![Source::Agent], vec![Source::User]))
            .await
            .unwrap();
        h.cron
            .add(idle_job("marker", vec![Source::Agent], vec![]))
            .await
            .unwrap();
        let _sub = h.cron.attach(&h.hub);

        for _ in 0..50 {
            h.clock.advance(1_000);
            let expected_marker = h.clock.now_ms() + 120_000;
            h.hub
                .transcripts
                .publish(&TranscriptUpdate::new("s1", Source::Agent, "on it"));
            h.hub
                .transcripts
                .publish(&TranscriptUpdate::new("s1", Source::User, "thanks"));
            h.hub
                .transcripts
                .publish(&TranscriptUpdate::new("marker", Source::Agent, "tick"));

            // The marker bump is applied after both s1 events.
            let mut jobs = Vec::new();
            for _ in 0..400 {
                jobs = h.cron.list(true).await.unwrap();
                let marker = jobs.iter().find(|j| j.id != watched.id).unwrap();
                if marker.state.next_run_at_ms == Some(expected_marker) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let s1 = jobs.iter().find(|j| j.id == watched.id).unwrap();
            assert_eq!(s1.state.next_run_at_ms, None);
        }
    }

    #[test]
    fn test_attach_stamps_events_when_published() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let h = harness();
        rt.block_on(async {
            h.cron
                .add(idle_job("s1", vec![Source::Agent], vec![]))
                .await
                .unwrap();
        });
        let _sub = rt.block_on(async { h.cron.attach(&h.hub) });

        // Published outside the runtime; applied once it runs again.
        h.clock.advance(30_000);
        h.hub
            .transcripts
            .publish(&TranscriptUpdate::new("s1", Source::Agent, "working"));
        h.clock.advance(45_000);

        let next = rt.block_on(async {
            for _ in 0..200 {
                let next = only_job(&h.cron).await.state.next_run_at_ms;
                if next == Some(T0 + 30_000 + 120_000) {
                    return next;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            only_job(&h.cron).await.state.next_run_at_ms
        });
        assert_eq!(next, Some(T0 + 30_000 + 120_000));
    }

    #[derive(Default)]
    struct MemoryStore {
        doc: SyncMutex<CronStoreFile>,
    }

    #[async_trait]
    impl JobStore for MemoryStore {
        async fn load(&self) -> Result<CronStoreFile> {
            Ok(self.doc.lock().unwrap().clone())
        }

        async fn save(&self, doc: &CronStoreFile) -> Result<()> {
            *self.doc.lock().unwrap() = doc.clone();
            Ok(())
        }

        fn location(&self) -> String {
            "memory".into()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_due_job() {
        let clock = ManualClock::new(T0);
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let cron = CronService::new(CronServiceDeps {
            store: Arc::new(MemoryStore::default()),
            dispatcher: dispatcher.clone(),
            clock: clock.clone(),
            hub: None,
            cron_enabled: true,
        });
        cron.start().await.unwrap();
        let job = cron.add(every_job(60_000)).await.unwrap();
        assert_eq!(cron.armed_wake_at_ms(), Some(T0 + 60_000));

        clock.advance(60_000);
        tokio::time::sleep(Duration::from_millis(60_001)).await;

        let mut after = only_job(&cron).await;
        for _ in 0..100 {
            if after.state.last_status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
            after = only_job(&cron).await;
        }
        assert_eq!(dispatcher.runs.lock().unwrap().len(), 1);
        assert_eq!(after.id, job.id);
        assert_eq!(after.state.last_status, Some(RunStatus::Ok));
        assert_eq!(after.state.next_run_at_ms, Some(T0 + 120_000));
        assert_eq!(cron.armed_wake_at_ms(), Some(T0 + 120_000));
        cron.stop();
    }

    #[tokio::test]
    async fn test_wake_now_enqueues_without_lock() {
        let h = harness();
        let guard = h.cron.inner.state.lock().await;
        assert!(h.cron.wake_now(WakeMode::Now, "check in"));
        assert!(!h.cron.wake_now(WakeMode::Now, "   "));
        drop(guard);
        assert_eq!(h.dispatcher.queued.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness();
        h.cron.start().await.unwrap();
        h.cron.add(every_job(60_000)).await.unwrap();
        assert!(h.cron.armed_wake_at_ms().is_some());
        h.cron.stop();
        h.cron.stop();
        assert_eq!(h.cron.armed_wake_at_ms(), None);

        // Mutations after stop do not re-arm.
        h.cron.add(every_job(30_000)).await.unwrap();
        assert_eq!(h.cron.armed_wake_at_ms(), None);
    }
}
