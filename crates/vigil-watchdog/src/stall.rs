//! Stall detector: is the agent overdue to answer the user?
//!
//! Each session tracks which side the ball rests with. `Source::User` means
//! the agent owes a reply (armed); `Source::Agent` means nothing is owed
//! (disarmed). An armed session with no activity for longer than the timeout
//! gets a `watchdog-stall` heartbeat.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use vigil_config::StallConfig;
use vigil_hooks::{EventHub, Subscription};
use vigil_types::{
    AgentLifecycleEvent, Clock, HeartbeatDispatcher, HeartbeatRequest, REASON_WATCHDOG_STALL,
    Source, TranscriptUpdate, is_sign_off,
};

use crate::poller::PollTask;
use crate::{Watchdog, preview};

/// User text landing this soon after agent activity is treated as a race.
const AGENT_DEBOUNCE_MS: i64 = 2_000;

/// Nothing may arm the detector this soon after construction.
const BOOT_GRACE_MS: i64 = 15_000;

const PREVIEW_CHARS: usize = 50;
const TRIGGER_CHARS: usize = 20;

const RESTART_MARKERS: [&str; 3] = ["GatewayRestart", r#""kind": "restart""#, r#""kind":"restart""#];

/// Restart notices are injected as user text but never start an agent turn.
fn is_restart_notice(text: &str) -> bool {
    RESTART_MARKERS.iter().any(|m| text.contains(m))
        || (text.contains("restart") && text.contains("gateway"))
}

/// What the detector knows about one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionActivityState {
    pub last_activity_ms: i64,
    /// Side the ball is resting with.
    pub last_source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_text_preview: Option<String>,
}

impl SessionActivityState {
    /// Safe default for a session seen for the first time.
    fn seeded(now_ms: i64) -> Self {
        Self {
            last_activity_ms: now_ms,
            last_source: Source::Agent,
            last_text_preview: None,
        }
    }

    fn is_armed(&self) -> bool {
        self.last_source == Source::User
    }

    /// Disarmed within the debounce window.
    fn recently_disarmed(&self, now_ms: i64) -> bool {
        self.last_source == Source::Agent && now_ms - self.last_activity_ms < AGENT_DEBOUNCE_MS
    }

    fn set(&mut self, now_ms: i64, source: Source, preview: impl Into<String>) {
        self.last_activity_ms = now_ms;
        self.last_source = source;
        self.last_text_preview = Some(preview.into());
    }
}

pub struct StallDetector {
    config: StallConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn HeartbeatDispatcher>,
    boot_ms: i64,
    sessions: Mutex<HashMap<String, SessionActivityState>>,
    poller: PollTask,
}

impl StallDetector {
    pub fn new(
        config: StallConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn HeartbeatDispatcher>,
    ) -> Arc<Self> {
        let boot_ms = clock.now_ms();
        Arc::new(Self {
            config,
            clock,
            dispatcher,
            boot_ms,
            sessions: Mutex::new(HashMap::new()),
            poller: PollTask::default(),
        })
    }

    /// Begin polling. No-op when disabled.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("stall detector disabled");
            return;
        }
        self.poller
            .start(self, Duration::from_millis(self.config.poll_interval_ms));
    }

    pub fn stop(&self) {
        if self.poller.stop() {
            info!("stall detector stopped");
        }
    }

    /// Subscribe to the hub's transcript, lifecycle and session buses.
    pub fn attach(self: &Arc<Self>, hub: &EventHub) -> Vec<Subscription> {
        let on_transcript = self.clone();
        let on_lifecycle = self.clone();
        let on_loaded = self.clone();
        vec![
            hub.transcripts
                .subscribe(move |update| on_transcript.on_transcript_update(update)),
            hub.lifecycle
                .subscribe(move |evt| on_lifecycle.on_agent_lifecycle(evt)),
            hub.sessions
                .subscribe(move |evt| on_loaded.on_session_loaded(&evt.session_key)),
        ]
    }

    pub fn snapshot(&self, session_key: &str) -> Option<SessionActivityState> {
        self.sessions().get(session_key).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Track a session discovered at startup without arming it.
    pub fn on_session_loaded(&self, session_key: &str) {
        if !self.config.enabled || session_key.is_empty() {
            return;
        }
        let now = self.clock.now_ms();
        let mut sessions = self.sessions();
        if !sessions.contains_key(session_key) {
            sessions.insert(session_key.to_string(), SessionActivityState::seeded(now));
            debug!(session_key, "stall detector tracking session");
        }
    }

    pub fn on_transcript_update(&self, update: &TranscriptUpdate) {
        if !self.config.enabled {
            return;
        }
        let Some((session_key, source)) = update.routing() else {
            return;
        };
        let text = update.text();

        if source == Source::User && is_restart_notice(text) {
            debug!(session_key, "ignoring restart notice");
            return;
        }

        let now = self.clock.now_ms();
        let mut sessions = self.sessions();
        let state = sessions
            .entry(session_key.to_string())
            .or_insert_with(|| SessionActivityState::seeded(now));

        match source {
            Source::User => {
                if state.recently_disarmed(now) {
                    debug!(session_key, "ignoring user text right after agent activity");
                } else if now - self.boot_ms < BOOT_GRACE_MS {
                    debug!(session_key, uptime_ms = now - self.boot_ms, "ignoring user text during boot grace period");
                    state.set(now, Source::Agent, "boot grace period");
                } else {
                    state.set(now, Source::User, preview(text, PREVIEW_CHARS));
                    debug!(session_key, text = %preview(text, 100), "stall detector armed");
                }
            }
            Source::Agent if is_sign_off(text) => {
                state.set(now, Source::Agent, text.trim());
                debug!(session_key, "stall detector disarmed by sign-off");
            }
            Source::Agent => {
                // Streaming agent output is activity, not a reply.
                if !text.trim().is_empty() {
                    state.last_activity_ms = now;
                }
            }
        }
    }

    pub fn on_agent_lifecycle(&self, evt: &AgentLifecycleEvent) {
        if !self.config.enabled {
            return;
        }
        let Some(session_key) = evt.session_key() else {
            return;
        };
        let now = self.clock.now_ms();
        let mut sessions = self.sessions();
        let state = sessions
            .entry(session_key.to_string())
            .or_insert_with(|| SessionActivityState::seeded(now));
        debug!(session_key, phase = evt.phase.as_str(), last_source = %state.last_source, "stall lifecycle update");

        if !evt.phase.is_terminal() {
            state.last_activity_ms = now;
            return;
        }
        if now - self.boot_ms < BOOT_GRACE_MS {
            debug!(session_key, "disarming on turn end during boot grace period");
            state.set(now, Source::Agent, "boot cleanup");
        } else if state.recently_disarmed(now) {
            debug!(session_key, "skipping re-arm after explicit sign-off");
        } else {
            // A turn that ends without a sign-off may still owe a reply.
            state.set(now, Source::User, format!("lifecycle: {}", evt.phase.as_str()));
        }
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionActivityState>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn evict_idle(&self, now_ms: i64) {
        let Some(evict_after_ms) = self.config.evict_after_ms else {
            return;
        };
        let mut sessions = self.sessions();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_armed() || now_ms - s.last_activity_ms <= evict_after_ms);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, "stall detector evicted idle sessions");
        }
    }
}

#[async_trait]
impl Watchdog for StallDetector {
    fn name(&self) -> &'static str {
        "stall"
    }

    async fn check(&self) {
        let now = self.clock.now_ms();
        let timeout_ms = self.config.timeout_ms;
        let overdue: Vec<(String, i64, Option<String>)> = self
            .sessions()
            .iter()
            .filter(|(_, s)| s.is_armed() && now - s.last_activity_ms > timeout_ms)
            .map(|(k, s)| (k.clone(), now - s.last_activity_ms, s.last_text_preview.clone()))
            .collect();

        for (session_key, elapsed_ms, last_text) in overdue {
            warn!(session_key = %session_key, elapsed_ms, last_text = ?last_text, "session stall detected");
            let trigger = last_text
                .as_deref()
                .map(|t| preview(t, TRIGGER_CHARS))
                .unwrap_or_else(|| "None".to_string());
            let request = HeartbeatRequest {
                reason: REASON_WATCHDOG_STALL.to_string(),
                prompt: format!("{} (Trigger: {trigger})", self.config.prompt),
                session_key: Some(session_key.clone()),
            };

            match self.dispatcher.run_heartbeat_once(request).await {
                Ok(_) => {
                    // Snooze; the side stays armed until the agent signs off.
                    if let Some(state) = self.sessions().get_mut(&session_key) {
                        state.last_activity_ms = state.last_activity_ms.max(now);
                    }
                }
                Err(e) => {
                    error!(session_key = %session_key, "failed to fire recovery heartbeat: {e}");
                }
            }
        }

        self.evict_idle(now);
    }
}
