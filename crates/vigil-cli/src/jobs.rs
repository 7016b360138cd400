use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand, ValueEnum};

use vigil_config::VigilConfig;
use vigil_cron::{
    CronJob, CronJobCreate, CronJobPatch, CronService, CronServiceDeps, Payload, RunMode,
    Schedule, SessionTarget, WakeMode, open_store,
};
use vigil_types::{Source, SystemClock};

use crate::dispatcher::JsonLineDispatcher;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List jobs
    List {
        /// Include disabled jobs
        #[arg(short, long)]
        all: bool,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },
    /// Show scheduler status
    Status,
    /// Add a job that fires after a session goes quiet
    AddIdle {
        #[command(flatten)]
        common: JobArgs,

        /// Quiet period before the job fires
        #[arg(long)]
        timeout_ms: i64,

        /// Activity that pushes the deadline back
        #[arg(long, value_delimiter = ',', default_values = ["user", "agent"])]
        reset_on: Vec<SourceArg>,

        /// Activity that disarms the job until the next reset
        #[arg(long, value_delimiter = ',')]
        stop_on: Vec<SourceArg>,
    },
    /// Add a job that repeats at a fixed interval
    AddEvery {
        #[command(flatten)]
        common: JobArgs,

        #[arg(long)]
        every_ms: i64,
    },
    /// Add a job driven by a cron expression (UTC)
    AddCron {
        #[command(flatten)]
        common: JobArgs,

        /// 5-field crontab or 6/7-field expression with seconds
        #[arg(long)]
        expr: String,
    },
    /// Add a one-shot job
    AddAt {
        #[command(flatten)]
        common: JobArgs,

        /// RFC 3339 timestamp or epoch milliseconds
        #[arg(long)]
        at: String,

        /// Remove the job after it runs successfully
        #[arg(long)]
        delete_after_run: bool,
    },
    /// Enable a job
    Enable { id: String },
    /// Disable a job
    Disable { id: String },
    /// Remove a job
    Remove { id: String },
    /// Run a job now
    Run {
        id: String,

        /// Run even if the job is not due
        #[arg(short, long)]
        force: bool,
    },
    /// Record session activity against idle jobs
    Bump {
        #[arg(long, value_enum)]
        source: SourceArg,

        #[arg(long)]
        session: Option<String>,
    },
}

/// Options shared by every `add-*` command.
#[derive(Args)]
pub struct JobArgs {
    #[arg(long)]
    name: String,

    #[arg(long)]
    description: Option<String>,

    /// Text delivered when the job runs
    #[arg(long)]
    text: String,

    /// Deliver as an agent turn instead of a system event
    #[arg(long)]
    agent_turn: bool,

    /// Restrict the job to one session
    #[arg(long)]
    session: Option<String>,

    #[arg(long, value_enum, default_value_t = WakeArg::Now)]
    wake: WakeArg,

    /// Create the job disabled
    #[arg(long)]
    disabled: bool,
}

impl JobArgs {
    fn into_create(self, schedule: Schedule, delete_after_run: bool) -> CronJobCreate {
        let payload = if self.agent_turn {
            Payload::AgentTurn { message: self.text }
        } else {
            Payload::SystemEvent { text: self.text }
        };
        CronJobCreate {
            name: self.name,
            description: self.description,
            enabled: !self.disabled,
            delete_after_run,
            schedule,
            session_target: self.session.map(SessionTarget::key).unwrap_or_default(),
            wake_mode: self.wake.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    User,
    Agent,
}

impl From<SourceArg> for Source {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::User => Source::User,
            SourceArg::Agent => Source::Agent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WakeArg {
    Now,
    NextHeartbeat,
}

impl From<WakeArg> for WakeMode {
    fn from(arg: WakeArg) -> Self {
        match arg {
            WakeArg::Now => WakeMode::Now,
            WakeArg::NextHeartbeat => WakeMode::NextHeartbeat,
        }
    }
}

fn sources(args: Vec<SourceArg>) -> Vec<Source> {
    let mut out: Vec<Source> = Vec::with_capacity(args.len());
    for source in args.into_iter().map(Source::from) {
        if !out.contains(&source) {
            out.push(source);
        }
    }
    out
}

/// Accept epoch milliseconds or an RFC 3339 timestamp.
fn parse_at(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Ok(ms);
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid time {raw:?}: expected RFC 3339 or epoch ms"))?;
    Ok(parsed.timestamp_millis())
}

fn format_ms(ms: Option<i64>) -> String {
    ms.and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "-".to_string())
}

fn print_job(job: &CronJob) {
    println!(
        "{}  {:<20} {:<6} {:<8} next={}",
        job.id,
        job.name,
        job.schedule.kind(),
        if job.enabled { "enabled" } else { "disabled" },
        format_ms(job.state.next_run_at_ms),
    );
}

/// Execute a job management command against the configured store.
pub async fn run_jobs(
    command: JobsCommand,
    config: VigilConfig,
    store_override: Option<PathBuf>,
) -> Result<()> {
    let store_path = match store_override {
        Some(path) => path,
        None => config.cron_store_path()?,
    };
    let store = open_store(&store_path)
        .with_context(|| format!("Failed to open job store at {}", store_path.display()))?;
    let cron = CronService::new(CronServiceDeps {
        store,
        dispatcher: Arc::new(JsonLineDispatcher::stdout()),
        clock: Arc::new(SystemClock),
        hub: None,
        cron_enabled: config.cron.enabled,
    });

    let added = match command {
        JobsCommand::List { all, json } => {
            let jobs = cron.list(all).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs.");
            } else {
                jobs.iter().for_each(print_job);
            }
            return Ok(());
        }
        JobsCommand::Status => {
            let status = cron.status().await?;
            println!("enabled:   {}", status.enabled);
            println!("store:     {}", status.store_path);
            println!("jobs:      {}", status.jobs);
            println!("next wake: {}", format_ms(status.next_wake_at_ms));
            return Ok(());
        }
        JobsCommand::AddIdle {
            common,
            timeout_ms,
            reset_on,
            stop_on,
        } => {
            let schedule = Schedule::Idle {
                timeout_ms,
                reset_on: sources(reset_on),
                stop_on: sources(stop_on),
            };
            cron.add(common.into_create(schedule, false)).await?
        }
        JobsCommand::AddEvery { common, every_ms } => {
            let schedule = Schedule::Every {
                every_ms,
                anchor_ms: None,
            };
            cron.add(common.into_create(schedule, false)).await?
        }
        JobsCommand::AddCron { common, expr } => {
            cron.add(common.into_create(Schedule::Cron { expr }, false))
                .await?
        }
        JobsCommand::AddAt {
            common,
            at,
            delete_after_run,
        } => {
            let schedule = Schedule::At {
                at_ms: parse_at(&at)?,
            };
            cron.add(common.into_create(schedule, delete_after_run))
                .await?
        }
        JobsCommand::Enable { id } => set_enabled(&cron, &id, true).await?,
        JobsCommand::Disable { id } => set_enabled(&cron, &id, false).await?,
        JobsCommand::Remove { id } => {
            cron.remove(&id).await?;
            println!("Removed {id}");
            return Ok(());
        }
        JobsCommand::Run { id, force } => {
            let mode = if force { RunMode::Force } else { RunMode::Due };
            let result = cron.run(&id, mode).await?;
            match result.reason {
                Some(reason) if !result.ran => bail!("Job {id} did not run: {reason}"),
                _ => eprintln!("Ran {id}"),
            }
            return Ok(());
        }
        JobsCommand::Bump { source, session } => {
            let outcome = cron
                .bump_idle_jobs(source.into(), session.as_deref())
                .await?;
            println!("{outcome:?}");
            return Ok(());
        }
    };

    print_job(&added);
    Ok(())
}

async fn set_enabled(cron: &CronService, id: &str, enabled: bool) -> Result<CronJob> {
    let patch = CronJobPatch {
        enabled: Some(enabled),
        ..Default::default()
    };
    Ok(cron.update(id, patch).await?)
}
