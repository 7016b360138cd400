mod daemon;
mod dispatcher;
mod jobs;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use vigil_config::VigilConfig;

#[derive(Parser)]
#[command(name = "vigil", about = "Session liveness scheduler")]
struct Cli {
    /// Config file (defaults to ~/.vigil/config.json5)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Job store path (overrides config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and watchdogs, reading hook events from stdin
    Daemon {
        /// Shut down when stdin closes
        #[arg(long)]
        exit_on_eof: bool,
    },
    /// Manage scheduled jobs
    Jobs {
        #[command(subcommand)]
        command: jobs::JobsCommand,
    },
    /// Check configuration
    Health,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<VigilConfig> {
    let config = match path {
        Some(path) => {
            let _ = dotenvy::dotenv();
            vigil_config::load_config_from(path)?
        }
        None => vigil_config::load_config()?,
    };
    Ok(config)
}

fn init_tracing(json: bool) {
    // Logs go to stderr; stdout carries dispatcher output.
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        );
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Daemon { exit_on_eof } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(daemon::run_daemon(config, cli.store, exit_on_eof))?;
        }
        Commands::Jobs { command } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(jobs::run_jobs(command, config, cli.store))?;
        }
        Commands::Health => {
            println!("vigil is healthy");
            let store = match cli.store {
                Some(path) => path,
                None => config.cron_store_path()?,
            };
            println!("  cron: {} (store {})", on_off(config.cron.enabled), store.display());
            println!(
                "  stall detector: {} (timeout {} ms)",
                on_off(config.stall.enabled),
                config.stall.timeout_ms
            );
            println!(
                "  reply chain: {} (timeout {} ms, user messages: {:?})",
                on_off(config.reply_chain.enabled),
                config.reply_chain.timeout_ms,
                config.reply_chain.user_message_policy
            );
        }
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "enabled" } else { "disabled" }
}
