//! CLI binary for ulticlock.

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulticlock::calendar::{CalendarSync, EventSource, EventStore, IcalFetcher};
use ulticlock::control::HistorySource;
use ulticlock::scheduler::runner::RunOutcome;
use ulticlock::scheduler::tasks::format_time_spec;
use ulticlock::{AlarmClient, ControlServer, Scheduler, UlticlockConfig};

/// UltiClock: alarms from calendar events.
#[derive(Parser)]
#[command(name = "ulticlock", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control API base URL (defaults to the configured server address).
    #[arg(long, global = true)]
    url: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the scheduler, the control API and the periodic calendar sync.
    Serve,

    /// Fetch calendars once, store the events and show the next one.
    Sync,

    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Schedule an alarm.
    Create {
        alarm_id: String,
        /// `YYYY-MM-DD HH:MM:SS` (UTC).
        time_spec: String,
        /// Shell command to run.
        command: String,
    },

    /// Move a pending alarm.
    Modify {
        alarm_id: String,
        /// `YYYY-MM-DD HH:MM:SS` (UTC).
        new_time_spec: String,
    },

    /// Cancel a pending alarm.
    Cancel { alarm_id: String },

    /// Push a pending alarm into the future.
    Snooze {
        alarm_id: String,
        /// Seconds from now (server default when omitted).
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Show one alarm.
    Status { alarm_id: String },

    /// List pending alarms.
    List,

    /// Show recently finished alarms.
    History,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(UlticlockConfig::default_config_path);
    let config = if cli.config.is_some() {
        UlticlockConfig::from_file(&config_path)?
    } else {
        UlticlockConfig::load_or_default(&config_path)?
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let url = cli.url.clone().unwrap_or_else(|| config.server.base_url());

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Sync => sync_once(config).await,
        Command::Init { force } => init_config(&config_path, force),
        Command::Create {
            alarm_id,
            time_spec,
            command,
        } => {
            let ok = client(&url)?
                .create(&alarm_id, &time_spec, &command)
                .await?;
            report("create", &alarm_id, ok)
        }
        Command::Modify {
            alarm_id,
            new_time_spec,
        } => {
            let ok = client(&url)?.modify(&alarm_id, &new_time_spec).await?;
            report("modify", &alarm_id, ok)
        }
        Command::Cancel { alarm_id } => {
            let ok = client(&url)?.cancel(&alarm_id).await?;
            report("cancel", &alarm_id, ok)
        }
        Command::Snooze { alarm_id, seconds } => {
            let ok = client(&url)?.snooze(&alarm_id, seconds).await?;
            report("snooze", &alarm_id, ok)
        }
        Command::Status { alarm_id } => {
            let status = client(&url)?.status(&alarm_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Command::List => {
            for task in client(&url)?.list().await? {
                println!(
                    "{}\t{}\t{}",
                    task.alarm_id,
                    format_time_spec(task.trigger_time),
                    task.command
                );
            }
            Ok(())
        }
        Command::History => {
            for record in client(&url)?.history().await? {
                let outcome = match record.outcome {
                    RunOutcome::Success => "success".to_owned(),
                    RunOutcome::Failed { reason } => format!("failed: {reason}"),
                    RunOutcome::Abandoned => "abandoned".to_owned(),
                };
                println!(
                    "{}\t{}\t{}",
                    record.alarm_id,
                    format_time_spec(record.finished_at),
                    outcome
                );
            }
            Ok(())
        }
    }
}

async fn serve(config: UlticlockConfig) -> anyhow::Result<()> {
    println!("ulticlock v{}", env!("CARGO_PKG_VERSION"));

    let scheduler = Arc::new(Scheduler::from_config(&config.scheduler));
    scheduler.start();

    let history: HistorySource = {
        let scheduler = Arc::clone(&scheduler);
        Arc::new(move || scheduler.history())
    };
    let server = ControlServer::start(scheduler.handle(), history, &config.server).await?;
    println!("Control API on {}", server.base_url());

    let cancel = CancellationToken::new();
    let sync_task = if config.sync.enabled && !config.calendars.is_empty() {
        let store = Arc::new(
            EventStore::open(&config.database_path)
                .with_context(|| format!("opening {}", config.database_path.display()))?,
        );
        let sync = CalendarSync::from_config(&config, store, scheduler.handle())?;
        let token = cancel.clone();
        Some(tokio::spawn(async move { sync.run(token).await }))
    } else {
        info!("calendar sync disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    cancel.cancel();
    if let Some(task) = sync_task {
        let _ = task.await;
    }
    server.shutdown().await;
    scheduler.shutdown(config.scheduler.shutdown).await;
    Ok(())
}

async fn sync_once(config: UlticlockConfig) -> anyhow::Result<()> {
    if config.calendars.is_empty() {
        bail!("no calendars configured");
    }

    let today = Utc::now().date_naive();
    let until = today
        .checked_add_days(chrono::Days::new(u64::from(config.sync.lookahead_days)))
        .unwrap_or(today);

    let mut events = Vec::new();
    for calendar in &config.calendars {
        let fetcher = IcalFetcher::new(calendar.clone())?;
        let mut fetched = fetcher
            .fetch(&config.alarm_keyword, today, until)
            .await?;
        events.append(&mut fetched);
    }
    events.sort_by(|a, b| (&a.date, &a.start_time).cmp(&(&b.date, &b.start_time)));

    for e in &events {
        println!("{} {}-{}\t{}\t{}", e.date, e.start_time, e.end_time, e.title, e.event_id);
    }

    let store = EventStore::open(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    store.store(&events)?;
    println!("Stored {} event(s) in {}", events.len(), store.path().display());

    match store.next_due_event(Utc::now())? {
        Some(next) => println!("Next: {} {} {}", next.date, next.start_time, next.title),
        None => println!("No upcoming event"),
    }
    Ok(())
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    UlticlockConfig::default().save_to_file(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn client(url: &str) -> anyhow::Result<AlarmClient> {
    Ok(AlarmClient::new(url)?)
}

fn report(operation: &str, alarm_id: &str, ok: bool) -> anyhow::Result<()> {
    if ok {
        println!("{operation} {alarm_id}: ok");
        Ok(())
    } else {
        bail!("{operation} {alarm_id}: rejected by server")
    }
}
