//! RustRun - Outdoor Activity Recording Engine
//!
//! Command line driver: replays a GPX track through a full session, and
//! inspects or clears local state left behind by an interrupted session.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rustrun::geo::{format_pace, mps_to_kmh};
use rustrun::location::background::NullBackgroundLocation;
use rustrun::location::gpx::load_fixes;
use rustrun::location::producer::ReplayLocationProducer;
use rustrun::recording::driver::{SessionDriver, SessionHandle};
use rustrun::recording::engine::SessionEngine;
use rustrun::recording::types::{ActivityType, Privacy, Session, SessionEvent, StartRequest};
use rustrun::storage::config::{load_config, load_config_from, AppConfig};
use rustrun::storage::database::Database;
use rustrun::storage::queue::DurableQueue;
use rustrun::storage::registry::ActiveSessionRegistry;
use rustrun::sync::connectivity::Connectivity;
use rustrun::sync::http::HttpRemoteStore;
use rustrun::sync::remote::{MemoryRemoteStore, RemoteStore};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "rustrun", version, about = "Outdoor activity recording engine")]
struct Cli {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a session from a GPX track
    Replay {
        /// GPX file to replay
        file: PathBuf,

        /// Activity type (run, walk, hike)
        #[arg(long, default_value = "run")]
        activity: ActivityType,

        /// Session title
        #[arg(long)]
        title: Option<String>,

        /// Delay between fixes in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Remote session store base URL (in-memory store when omitted)
        #[arg(long)]
        endpoint: Option<String>,

        /// Drop connectivity this many seconds into the replay
        #[arg(long)]
        offline_after: Option<u64>,

        /// Length of the simulated offline window in seconds
        #[arg(long, default_value_t = 30)]
        offline_for: u64,
    },

    /// Show the active session and queued samples
    Status,

    /// Discard the active session left by an interrupted run
    Discard {
        /// Confirm discarding
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting RustRun v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let database = Database::open(&config.database_path())
        .with_context(|| format!("Failed to open {}", config.database_path().display()))?;
    let database = Arc::new(Mutex::new(database));

    match cli.command {
        Command::Replay {
            file,
            activity,
            title,
            interval_ms,
            endpoint,
            offline_after,
            offline_for,
        } => {
            let mut request = StartRequest::new(activity).with_privacy(Privacy::Private);
            if let Some(title) = title {
                request = request.with_title(title);
            }
            let options = ReplayOptions {
                file,
                request,
                interval: Duration::from_millis(interval_ms.max(1)),
                offline_window: offline_after
                    .map(|after| (Duration::from_secs(after), Duration::from_secs(offline_for))),
            };

            let connectivity = Connectivity::new(true);
            let endpoint = endpoint.or_else(|| config.sync.endpoint.clone());
            match endpoint {
                Some(url) => {
                    if options.offline_window.is_some() {
                        tracing::warn!("Offline window is only simulated for the in-memory store");
                    }
                    let store = HttpRemoteStore::new(
                        url,
                        Duration::from_secs(config.sync.request_timeout_secs),
                    )
                    .context("Failed to build HTTP client")?
                    .with_connectivity(connectivity.clone());
                    replay(&config, database, Arc::new(store), connectivity, options, |_| {}).await
                }
                None => {
                    let store = MemoryRemoteStore::new();
                    let switch = store.clone();
                    replay(
                        &config,
                        database,
                        Arc::new(store),
                        connectivity,
                        options,
                        move |online| switch.set_online(online),
                    )
                    .await
                }
            }
        }
        Command::Status => status(database),
        Command::Discard { yes } => discard(database, yes),
    }
}

struct ReplayOptions {
    file: PathBuf,
    request: StartRequest,
    interval: Duration,
    offline_window: Option<(Duration, Duration)>,
}

async fn replay<R: RemoteStore>(
    config: &AppConfig,
    database: Arc<Mutex<Database>>,
    remote: Arc<R>,
    connectivity: Connectivity,
    options: ReplayOptions,
    set_remote_online: impl Fn(bool),
) -> Result<()> {
    let fixes = load_fixes(&options.file)
        .with_context(|| format!("Failed to load {}", options.file.display()))?;
    if fixes.is_empty() {
        bail!("{} contains no track points", options.file.display());
    }
    let replay_time = options.interval * fixes.len() as u32;
    tracing::info!("Replaying {} fixes from {}", fixes.len(), options.file.display());

    let engine = SessionEngine::new(
        config,
        database,
        remote,
        Arc::new(ReplayLocationProducer::new(fixes, options.interval)),
        Arc::new(NullBackgroundLocation),
        connectivity.clone(),
    );
    let (driver, handle) = SessionDriver::new(engine, config);
    let task = driver.spawn();
    let printer = tokio::spawn(print_events(handle.clone()));

    let session_id = handle.start(options.request).await?;
    println!("Recording session {}", session_id);

    match options.offline_window {
        Some((after, length)) if after < replay_time => {
            tokio::time::sleep(after).await;
            println!("-- connectivity lost --");
            set_remote_online(false);
            connectivity.set_online(false);

            tokio::time::sleep(length).await;
            println!("-- connectivity regained --");
            set_remote_online(true);
            connectivity.set_online(true);

            tokio::time::sleep(replay_time.saturating_sub(after + length)).await;
        }
        _ => tokio::time::sleep(replay_time).await,
    }

    let session = finish_with_retry(&handle).await?;
    print_summary(&session);

    handle.shutdown().await;
    let engine = task.await.context("Session driver panicked")?;
    let report = engine.drain_pending().await?;
    if report.remaining > 0 {
        println!("{} samples still queued for delivery", report.remaining);
    }
    printer.abort();
    Ok(())
}

async fn finish_with_retry(handle: &SessionHandle) -> Result<Session> {
    const ATTEMPTS: u32 = 3;
    let mut attempt = 1;
    loop {
        match handle.finish().await {
            Ok(session) => return Ok(session),
            Err(e) if attempt < ATTEMPTS => {
                tracing::warn!("Finish attempt {} failed: {}", attempt, e);
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(e) => return Err(e).context("Failed to finish session"),
        }
    }
}

async fn print_events(handle: SessionHandle) {
    let mut events = handle.subscribe();
    while let Ok(event) = events.recv().await {
        match event {
            SessionEvent::AutoPaused(_) => println!("auto-paused"),
            SessionEvent::AutoResumed(_) => println!("auto-resumed"),
            SessionEvent::SplitRecorded(split) => println!(
                "split {} ({:?}): {:.0} m in {:.0} s, pace {}",
                split.index,
                split.kind,
                split.distance_m,
                split.duration_s,
                format_pace(split.avg_pace_s_per_km)
            ),
            SessionEvent::SamplesQueued { count, .. } => {
                println!("{} samples queued offline", count)
            }
            _ => {}
        }
    }
}

fn print_summary(session: &Session) {
    println!();
    println!("{} ({})", session.title, session.id);
    println!("  distance      {:.2} km", session.distance_m / 1000.0);
    println!("  duration      {:.0} s", session.duration_s);
    println!("  moving time   {:.0} s", session.moving_time_s);
    println!("  paused time   {:.0} s", session.paused_time_s);
    println!("  elevation     +{:.0} m", session.elev_gain_m);
    println!("  max speed     {:.1} km/h", mps_to_kmh(session.max_speed_mps));
    println!("  avg pace      {}", format_pace(session.avg_pace_s_per_km));
    for split in &session.splits {
        println!(
            "  {:?} {:>2}  {:>6.0} m  {:>5.0} s  {}",
            split.kind,
            split.index,
            split.distance_m,
            split.duration_s,
            format_pace(split.avg_pace_s_per_km)
        );
    }
}

fn status(database: Arc<Mutex<Database>>) -> Result<()> {
    let registry = ActiveSessionRegistry::new(Arc::clone(&database));
    match registry.current()? {
        Some(entry) => println!(
            "Active {} session {} \"{}\" ({}, {:.0} s, {:.0} m)",
            entry.kind,
            entry.session_id,
            entry.title,
            entry.phase.as_str(),
            entry.elapsed_s,
            entry.distance_m
        ),
        None => println!("No active session"),
    }

    let pending = DurableQueue::new(database).pending_sessions()?;
    if pending.is_empty() {
        println!("No queued samples");
    }
    for (session_id, count) in pending {
        println!("{} samples queued for {}", count, session_id);
    }
    Ok(())
}

fn discard(database: Arc<Mutex<Database>>, yes: bool) -> Result<()> {
    let registry = ActiveSessionRegistry::new(Arc::clone(&database));
    let Some(entry) = registry.current()? else {
        println!("No active session");
        return Ok(());
    };
    if !yes {
        bail!(
            "Refusing to discard {} session {} without --yes",
            entry.kind,
            entry.session_id
        );
    }

    registry.discard()?;
    database
        .lock()
        .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))?
        .clear_checkpoint(&entry.session_id)?;
    println!("Discarded session {}", entry.session_id);
    Ok(())
}
