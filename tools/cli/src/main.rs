//! repsync CLI - record workouts offline and replay them when connected.
//!
//! Writes are queued locally and drained against the remote API by the
//! sync engine; reads go through the caching intercept layer.

mod config;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use repsync_cache::{InterceptLayer, LocalCacheStorage, ReqwestFetch};
use repsync_common::{
    HttpRequest, Mutation, MutationKind, SessionAction, SessionActionPayload, SetPayload,
    WeightLogPayload,
};
use repsync_storage::{MutationQueue, SqliteQueue};
use repsync_sync::{DrainOutcome, HttpEndpoint, SyncEngine, SyncReport, SyncScheduler};

use crate::config::{default_config_path, AppConfig};

#[derive(Parser)]
#[command(name = "repsync")]
#[command(about = "repsync - Offline-first workout sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <data dir>/repsync/config.json).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a write for the remote API.
    Enqueue {
        #[command(subcommand)]
        write: WriteCommand,
    },

    /// Show pending and abandoned writes.
    Status,

    /// Run one drain cycle now.
    Sync,

    /// List writes that exhausted their retries.
    Failed,

    /// Delete writes the remote API already accepted.
    Purge,

    /// Keep draining in the background until interrupted.
    Run,

    /// Fetch a URL through the cache layer.
    Fetch {
        url: Url,

        /// Treat the request as a page navigation.
        #[arg(short, long)]
        navigate: bool,
    },

    /// Precache static assets and drop caches of other versions.
    Install {
        /// Origin the asset paths are resolved against.
        origin: Url,
    },

    /// Generate shell completions.
    Completions { shell: Shell },
}

#[derive(Subcommand)]
enum WriteCommand {
    /// Record a set.
    Set {
        #[arg(long)]
        session: String,

        #[arg(long)]
        exercise: String,

        #[arg(long)]
        set_number: u32,

        #[arg(long)]
        reps: u32,

        /// Load in kilograms.
        #[arg(long)]
        weight: f64,

        #[arg(long)]
        rpe: Option<f32>,
    },

    /// Start, complete or cancel a session.
    Session {
        #[arg(long)]
        session: String,

        /// "start", "complete", or "cancel".
        #[arg(long)]
        action: SessionAction,
    },

    /// Log body weight.
    Weight {
        /// Body weight in kilograms.
        #[arg(long)]
        weight: f64,

        #[arg(long)]
        note: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "repsync", &mut std::io::stdout());
        return Ok(());
    }

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let app = App {
        config: AppConfig::load(&config_path)?,
    };

    match cli.command {
        Commands::Enqueue { write } => cmd_enqueue(&app, write).await,
        Commands::Status => cmd_status(&app).await,
        Commands::Sync => cmd_sync(&app).await,
        Commands::Failed => cmd_failed(&app).await,
        Commands::Purge => cmd_purge(&app).await,
        Commands::Run => cmd_run(&app).await,
        Commands::Fetch { url, navigate } => cmd_fetch(&app, url, navigate).await,
        Commands::Install { origin } => cmd_install(&app, &origin).await,
        Commands::Completions { .. } => Ok(()),
    }
}

/// Wires the components together from configuration.
struct App {
    config: AppConfig,
}

impl App {
    fn queue(&self) -> Result<Arc<SqliteQueue>> {
        let queue = SqliteQueue::open(&self.config.database_path).with_context(|| {
            format!(
                "Failed to open queue at {}",
                self.config.database_path.display()
            )
        })?;
        Ok(Arc::new(queue))
    }

    fn layer(&self) -> Result<InterceptLayer> {
        let network =
            ReqwestFetch::new(self.config.request_timeout).context("Failed to create HTTP client")?;
        let cache = LocalCacheStorage::new(&self.config.cache_dir)
            .context("Failed to open response cache")?;
        Ok(InterceptLayer::new(
            Arc::new(network),
            Arc::new(cache),
            self.config.cache.clone(),
        ))
    }

    fn engine(&self) -> Result<Arc<SyncEngine>> {
        let endpoint = HttpEndpoint::new(Arc::new(self.layer()?), self.config.endpoint.clone());
        Ok(Arc::new(SyncEngine::new(
            self.queue()?,
            Arc::new(endpoint),
            self.config.sync.clone(),
        )))
    }
}

/// Queue a write.
async fn cmd_enqueue(app: &App, write: WriteCommand) -> Result<()> {
    let now = Utc::now();
    let mutation = match write {
        WriteCommand::Set {
            session,
            exercise,
            set_number,
            reps,
            weight,
            rpe,
        } => Mutation::Set(SetPayload {
            session_id: session,
            exercise_id: exercise,
            set_number,
            reps,
            weight_kg: weight,
            rpe,
            performed_at: now,
        }),
        WriteCommand::Session { session, action } => {
            Mutation::Session(SessionActionPayload {
                session_id: session,
                action,
                at: now,
            })
        }
        WriteCommand::Weight { weight, note } => Mutation::WeightLog(WeightLogPayload {
            weight_kg: weight,
            logged_at: now,
            note,
        }),
    };

    let kind = mutation.kind();
    let engine = app.engine()?;
    let id = engine
        .enqueue_mutation(mutation)
        .await
        .context("Failed to queue write")?;

    println!("Queued {} #{}", kind, id);
    println!("  Pending: {}", engine.status().pending_count);

    Ok(())
}

/// Show queue status.
async fn cmd_status(app: &App) -> Result<()> {
    let queue = app.queue()?;
    let max_retries = app.config.sync.retry.max_retries;

    println!("Sync status:");
    for kind in MutationKind::ALL {
        let pending = queue.count_pending(kind).await?;
        let abandoned = queue.list_abandoned(kind, max_retries).await?.len();
        println!(
            "  {:<18} {} pending, {} abandoned",
            kind.as_str(),
            pending,
            abandoned
        );
    }
    println!("  Total pending: {}", queue.count_all_pending().await?);

    Ok(())
}

/// Run a single drain cycle.
async fn cmd_sync(app: &App) -> Result<()> {
    let engine = app.engine()?;

    match engine.sync().await {
        DrainOutcome::Completed(report) => print_report(&report),
        DrainOutcome::AlreadyRunning => println!("A drain is already running."),
    }
    println!("  Pending: {}", engine.status().pending_count);

    Ok(())
}

fn print_report(report: &SyncReport) {
    println!("Drain finished in {:?}:", report.duration);
    println!("  Submitted: {}", report.submitted);
    println!("  Succeeded: {}", report.succeeded);
    println!("  Failed:    {}", report.failed);
    println!("  Deferred:  {}", report.deferred);
    println!("  Abandoned: {}", report.abandoned);
    println!("  Purged:    {}", report.purged);
}

/// List abandoned writes.
async fn cmd_failed(app: &App) -> Result<()> {
    let engine = app.engine()?;
    let mut total = 0;

    for kind in MutationKind::ALL {
        for record in engine.abandoned(kind).await? {
            total += 1;
            println!(
                "{} #{} (queued {}, {} attempts)",
                kind,
                record.id,
                record.enqueued_at.to_rfc3339(),
                record.retry_count
            );
            if let Some(error) = &record.last_error {
                println!("  Last error: {}", error);
            }
            println!("  Payload: {}", record.payload);
        }
    }

    if total == 0 {
        println!("No abandoned writes.");
    }

    Ok(())
}

/// Delete synced writes.
async fn cmd_purge(app: &App) -> Result<()> {
    let purged = app.engine()?.cleanup().await?;
    println!("Purged {} synced writes.", purged);
    Ok(())
}

/// Run the scheduler until Ctrl-C.
async fn cmd_run(app: &App) -> Result<()> {
    let engine = app.engine()?;
    let _subscription = engine.on_status_change(|status| {
        info!(
            "syncing={} pending={}",
            status.is_syncing, status.pending_count
        );
    });
    engine.refresh_status().await;

    let (scheduler, handle) = SyncScheduler::new(app.config.sync.poll_interval);
    let task = tokio::spawn(handle.run(engine.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping");
    scheduler.shutdown().await;
    task.await.context("Scheduler task failed")?;

    Ok(())
}

/// Fetch a URL through the cache layer.
async fn cmd_fetch(app: &App, url: Url, navigate: bool) -> Result<()> {
    let layer = app.layer()?;
    let request = if navigate {
        HttpRequest::navigate(url)
    } else {
        HttpRequest::get(url)
    };

    let response = layer.handle(request).await.context("Request failed")?;
    layer.settle().await;

    println!("Status: {}", response.status);
    for (name, value) in &response.headers {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", response.text());

    Ok(())
}

/// Precache assets and activate the configured cache version.
async fn cmd_install(app: &App, origin: &Url) -> Result<()> {
    let layer = app.layer()?;

    let stored = layer.install(origin).await;
    let deleted = layer.activate().await.context("Failed to activate cache")?;

    println!("Precached {} assets.", stored);
    for namespace in deleted {
        println!("  Removed {}", namespace);
    }

    Ok(())
}
