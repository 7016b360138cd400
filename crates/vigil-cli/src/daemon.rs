use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vigil_config::VigilConfig;
use vigil_cron::{CronService, CronServiceDeps, open_store};
use vigil_hooks::{EventHub, HookEvent};
use vigil_types::{Clock, HeartbeatDispatcher, SystemClock};
use vigil_watchdog::{ReplyChainEnforcer, StallDetector};

use crate::dispatcher::JsonLineDispatcher;

/// Wire the scheduler and both watchdogs to one hub, feed it hook events from
/// stdin, and run until ctrl-c.
pub async fn run_daemon(
    config: VigilConfig,
    store_override: Option<PathBuf>,
    exit_on_eof: bool,
) -> Result<()> {
    let hub = EventHub::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher: Arc<dyn HeartbeatDispatcher> = Arc::new(JsonLineDispatcher::stdout());

    let store_path = match store_override {
        Some(path) => path,
        None => config.cron_store_path()?,
    };
    let store = open_store(&store_path)
        .with_context(|| format!("Failed to open job store at {}", store_path.display()))?;

    let cron = CronService::new(CronServiceDeps {
        store,
        dispatcher: dispatcher.clone(),
        clock: clock.clone(),
        hub: Some(hub.clone()),
        cron_enabled: config.cron.enabled,
    });
    let stall = StallDetector::new(config.stall.clone(), clock.clone(), dispatcher.clone());
    let reply_chain =
        ReplyChainEnforcer::new(config.reply_chain.clone(), clock, dispatcher);

    let mut subscriptions = vec![
        cron.attach(&hub),
        hub.jobs.subscribe(|evt| {
            info!(
                job_id = %evt.job_id,
                action = ?evt.action,
                next_run_at_ms = ?evt.next_run_at_ms,
                status = ?evt.status,
                "job event"
            );
        }),
    ];
    subscriptions.extend(stall.attach(&hub));
    subscriptions.extend(reply_chain.attach(&hub));

    cron.start().await.context("Failed to start cron service")?;
    stall.start();
    reply_chain.start();
    info!(store = %store_path.display(), "vigil daemon running");

    let cancel = CancellationToken::new();
    let reader = tokio::spawn(read_events(
        BufReader::new(tokio::io::stdin()),
        hub.clone(),
        cancel.clone(),
        exit_on_eof,
    ));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            info!("Shutdown signal received");
        }
        _ = cancel.cancelled() => info!("Input closed, shutting down"),
    }

    cancel.cancel();
    cron.stop();
    stall.stop();
    reply_chain.stop();
    drop(subscriptions);
    if let Err(e) = reader.await {
        debug!("event reader ended abnormally: {e}");
    }
    info!("vigil daemon stopped");
    Ok(())
}

/// Publish one [`HookEvent`] per input line. Blank and malformed lines are
/// skipped. Returns the number of events published.
async fn read_events<R>(
    input: R,
    hub: Arc<EventHub>,
    cancel: CancellationToken,
    exit_on_eof: bool,
) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut published = 0;
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(published, "event input reached EOF");
                if exit_on_eof {
                    cancel.cancel();
                }
                break;
            }
            Err(e) => {
                warn!("failed to read event input: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HookEvent>(line) {
            Ok(event) => {
                hub.dispatch(&event);
                published += 1;
            }
            Err(e) => warn!("skipping malformed hook event: {e}"),
        }
    }
    published
}
