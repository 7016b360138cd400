//! Reply-chain enforcer: every agent turn must end with an explicit sign-off.
//!
//! A turn that starts arms the chain; only a sign-off token from the agent
//! disarms it. An armed chain that stays quiet past the timeout gets a
//! `reply-chain-broken` heartbeat, and keeps getting one every timeout until
//! the agent signs off.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use vigil_config::{ReplyChainConfig, UserMessagePolicy};
use vigil_hooks::{EventHub, Subscription};
use vigil_types::{
    AgentLifecycleEvent, Clock, HeartbeatDispatcher, HeartbeatRequest, LifecyclePhase,
    REASON_REPLY_CHAIN_BROKEN, Source, TranscriptUpdate, ends_with_sign_off,
};

use crate::Watchdog;
use crate::poller::PollTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    Armed,
    Disarmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyChainState {
    pub status: ChainStatus,
    pub last_activity_ms: i64,
    /// Why the chain is in its current status.
    pub reason: String,
}

pub struct ReplyChainEnforcer {
    config: ReplyChainConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<dyn HeartbeatDispatcher>,
    chains: Mutex<HashMap<String, ReplyChainState>>,
    poller: PollTask,
}

impl ReplyChainEnforcer {
    pub fn new(
        config: ReplyChainConfig,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<dyn HeartbeatDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clock,
            dispatcher,
            chains: Mutex::new(HashMap::new()),
            poller: PollTask::default(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("reply-chain enforcer disabled");
            return;
        }
        self.poller
            .start(self, Duration::from_millis(self.config.poll_interval_ms));
    }

    pub fn stop(&self) {
        if self.poller.stop() {
            info!("reply-chain enforcer stopped");
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

    pub fn snapshot(&self, session_key: &str) -> Option<ReplyChainState> {
        self.chains().get(session_key).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.chains().len()
    }

    pub fn on_session_loaded(&self, session_key: &str) {
        if !self.config.enabled || session_key.is_empty() {
            return;
        }
        self.set(session_key, ChainStatus::Disarmed, "session loaded");
    }

    pub fn on_transcript_update(&self, update: &TranscriptUpdate) {
        if !self.config.enabled {
            return;
        }
        let Some((session_key, source)) = update.routing() else {
            return;
        };

        match source {
            Source::User => match self.config.user_message_policy {
                UserMessagePolicy::Ignore => {}
                UserMessagePolicy::Disarm => {
                    self.set(session_key, ChainStatus::Disarmed, "user message");
                }
            },
            Source::Agent if ends_with_sign_off(update.text()) => {
                self.set(session_key, ChainStatus::Disarmed, "sign-off");
                debug!(session_key, "reply chain disarmed by sign-off");
            }
            Source::Agent => {
                self.touch_or_set(session_key, ChainStatus::Armed, ChainStatus::Armed, || {
                    "agent text".to_string()
                });
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

        match evt.phase {
            LifecyclePhase::Start => self.set(session_key, ChainStatus::Armed, "lifecycle start"),
            LifecyclePhase::End | LifecyclePhase::Error => {
                let armed =
                    self.touch_or_set(session_key, ChainStatus::Disarmed, ChainStatus::Armed, || {
                        format!("lifecycle {}: no sign-off", evt.phase.as_str())
                    });
                if armed {
                    debug!(session_key, "reply chain left armed");
                }
            }
        }
    }

    fn chains(&self) -> std::sync::MutexGuard<'_, HashMap<String, ReplyChainState>> {
        self.chains.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, session_key: &str, status: ChainStatus, reason: impl Into<String>) {
        let state = ReplyChainState {
            status,
            last_activity_ms: self.clock.now_ms(),
            reason: reason.into(),
        };
        self.chains().insert(session_key.to_string(), state);
    }

    /// Refresh the chain if it is already `keep`, otherwise replace it with
    /// `status`. Returns whether the chain was replaced.
    fn touch_or_set(
        &self,
        session_key: &str,
        keep: ChainStatus,
        status: ChainStatus,
        reason: impl FnOnce() -> String,
    ) -> bool {
        let now = self.clock.now_ms();
        let mut chains = self.chains();
        match chains.get_mut(session_key) {
            Some(chain) if chain.status == keep => {
                chain.last_activity_ms = now;
                false
            }
            _ => {
                let state = ReplyChainState {
                    status,
                    last_activity_ms: now,
                    reason: reason(),
                };
                chains.insert(session_key.to_string(), state);
                true
            }
        }
    }

    fn touch(&self, session_key: &str) {
        let now = self.clock.now_ms();
        if let Some(chain) = self.chains().get_mut(session_key) {
            chain.last_activity_ms = now;
        }
    }

    fn evict_idle(&self, now_ms: i64) {
        let Some(evict_after_ms) = self.config.evict_after_ms else {
            return;
        };
        self.chains().retain(|_, c| {
            c.status == ChainStatus::Armed || now_ms - c.last_activity_ms <= evict_after_ms
        });
    }
}

#[async_trait]
impl Watchdog for ReplyChainEnforcer {
    fn name(&self) -> &'static str {
        "reply-chain"
    }

    async fn check(&self) {
        let now = self.clock.now_ms();
        let timeout_ms = self.config.timeout_ms;
        let broken: Vec<(String, i64, String)> = self
            .chains()
            .iter()
            .filter(|(_, c)| c.status == ChainStatus::Armed && now - c.last_activity_ms > timeout_ms)
            .map(|(k, c)| (k.clone(), now - c.last_activity_ms, c.reason.clone()))
            .collect();

        for (session_key, elapsed_ms, reason) in broken {
            warn!(session_key = %session_key, elapsed_ms, reason = %reason, "reply chain broken");
            let request = HeartbeatRequest {
                reason: REASON_REPLY_CHAIN_BROKEN.to_string(),
                prompt: format!("{} (Trigger: {reason})", self.config.prompt),
                session_key: Some(session_key.clone()),
            };
            match self.dispatcher.run_heartbeat_once(request).await {
                Ok(_) => self.touch(&session_key),
                Err(e) => {
                    error!(session_key = %session_key, "failed to fire recovery heartbeat: {e}");
                }
            }
        }

        self.evict_idle(now);
    }
}
