//! candleclock CLI — run a demo session and inspect trigger timing.
//!
//! Commands:
//! - `run`: drive a live session with synthetic capture and random decisions
//! - `next`: countdown to the next pre-close trigger for a timeframe
//! - `schedule`: list upcoming trigger instants
//! - `decode`: parse a decision payload into a signal
//! - `config`: print the effective configuration as TOML

use anyhow::{bail, Context, Result};
use candleclock_core::schedule::{current_close, delay_with_buffer, trigger_target, upcoming_triggers};
use candleclock_core::signal::parse_decision;
use candleclock_core::{Countdown, EngineConfig, ResolutionDelay, Snapshot, Timeframe};
use candleclock_runner::demo::{RandomOracle, RandomSignalSource, SyntheticCapture};
use candleclock_runner::{Collaborators, Engine, EngineEvent, SystemClock, WallClock};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(
    name = "candleclock",
    about = "candleclock — candle-synchronized signal assistant"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a session against synthetic capture and a random decision source.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Timeframe override: 1M, 5M or 15M.
        #[arg(long)]
        timeframe: Option<Timeframe>,

        /// Seed for the demo decision source and outcome oracle.
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many seconds. Runs until Ctrl-C otherwise.
        #[arg(long)]
        duration: Option<u64>,

        /// Resolve trades after 3s/5s instead of one full candle.
        #[arg(long, default_value_t = false)]
        fast_resolution: bool,
    },
    /// Show the countdown to the next trigger.
    Next {
        /// Path to a TOML config file (for `pre_close_buffer_ms`).
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "1M")]
        timeframe: Timeframe,

        /// Reference instant (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
    /// List upcoming trigger instants.
    Schedule {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "1M")]
        timeframe: Timeframe,

        #[arg(long, default_value_t = 5)]
        count: usize,

        /// Reference instant (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<String>,
    },
    /// Parse a decision payload (JSON, possibly wrapped in prose) into a signal.
    Decode {
        /// File containing the payload. Use `-` for stdin.
        file: PathBuf,
    },
    /// Print the effective configuration.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            timeframe,
            seed,
            duration,
            fast_resolution,
        } => run_session(config.as_deref(), timeframe, seed, duration, fast_resolution).await,
        Commands::Next {
            config,
            timeframe,
            at,
        } => run_next(config.as_deref(), timeframe, at.as_deref()),
        Commands::Schedule {
            config,
            timeframe,
            count,
            at,
        } => run_schedule(config.as_deref(), timeframe, count, at.as_deref()),
        Commands::Decode { file } => run_decode(&file),
        Commands::Config { config } => run_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn reference_time(at: Option<&str>) -> Result<DateTime<Utc>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --at '{s}' (expected RFC 3339)"))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

// ──────────────────────────────────────────────
// run
// ──────────────────────────────────────────────

async fn run_session(
    config_path: Option<&Path>,
    timeframe: Option<Timeframe>,
    seed: Option<u64>,
    duration: Option<u64>,
    fast_resolution: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(timeframe) = timeframe {
        config.timeframe = timeframe;
    }
    if fast_resolution {
        config.resolution = ResolutionDelay::demo();
    }

    let clock: Arc<dyn WallClock> = Arc::new(SystemClock);
    let sources = Collaborators {
        capture: Arc::new(SyntheticCapture::new(1920, 1080, config.capture.clone())),
        signals: Arc::new(RandomSignalSource::new(seed, Arc::clone(&clock))),
        oracle: Arc::new(RandomOracle::new(seed.map(|s| s.wrapping_add(1)))),
    };
    let timeframe = config.timeframe;
    let (handle, task) = Engine::spawn(config, sources, clock)?;
    let mut events = handle.subscribe();

    handle.attach_capture().await?;
    handle.activate().await?;
    println!("Session armed on {timeframe}. Press Ctrl-C to stop.");

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => report(&event),
                Err(RecvError::Lagged(n)) => log::warn!("dropped {n} events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
    task.await.context("engine task failed")?;
    print_summary(&handle.snapshot());
    Ok(())
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::CaptureAttached => println!("capture attached"),
        EngineEvent::CaptureDetached => println!("capture detached"),
        EngineEvent::Triggered(trigger) => println!(
            "[{}] trigger {} -> candle closing {}",
            trigger.fired_at.format("%H:%M:%S"),
            trigger.timeframe,
            trigger.target_close.format("%H:%M:%S")
        ),
        EngineEvent::SignalPublished(signal) => println!(
            "[{}] {} {}% (risk {:?}) {}",
            signal.produced_at.format("%H:%M:%S"),
            signal.action,
            signal.confidence,
            signal.risk_level,
            signal.rationale.lines().next().unwrap_or_default()
        ),
        EngineEvent::TradeOpened(record) => {
            println!("trade {} opened: {} on {}", record.id, record.side, record.timeframe)
        }
        EngineEvent::TradeResolved(settlement) => println!(
            "trade {} {:?} {:+.2} ({:?})",
            settlement.record.id, settlement.record.status, settlement.record.profit, settlement.verdict
        ),
        EngineEvent::BreakerTripped { streak } => println!(
            "RISK BREAKER: {streak} consecutive losses, scheduler paused until reset"
        ),
        EngineEvent::AnalysisFailed(e) => println!("analysis failed: {e}"),
    }
}

fn print_summary(snapshot: &Snapshot) {
    let stats = &snapshot.stats;
    println!();
    println!("=== Session Summary ===");
    println!("Trades:     {} ({} W / {} L)", stats.total, stats.wins, stats.losses);
    println!("Win rate:   {}%", stats.win_rate_display());
    println!("Net profit: {:+.2}", stats.net_profit);
    println!("Loss streak {} ({:?})", snapshot.loss_streak, snapshot.run_state);

    let pending = snapshot.trades.iter().filter(|t| t.is_pending()).count();
    if pending > 0 {
        println!("Pending:    {pending} (unresolved at shutdown)");
    }
    for record in snapshot.trades.iter().take(10) {
        println!(
            "  {}  {}  {:>4}  {:>3}%  {:?}  {:+.2}",
            record.opened_at.format("%H:%M:%S"),
            record.id,
            record.side.to_string(),
            record.confidence,
            record.status,
            record.profit
        );
    }
}

// ──────────────────────────────────────────────
// next / schedule
// ──────────────────────────────────────────────

/// Delay until the next trigger and the close it targets.
fn next_trigger(
    config: &EngineConfig,
    timeframe: Timeframe,
    now: &DateTime<Utc>,
) -> (i64, DateTime<Utc>) {
    let buffer = config.pre_close_buffer_ms;
    (
        delay_with_buffer(timeframe, now, buffer),
        trigger_target(timeframe, now, buffer),
    )
}

fn run_next(config_path: Option<&Path>, timeframe: Timeframe, at: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    let now = reference_time(at)?;
    let (delay, target) = next_trigger(&config, timeframe, &now);

    println!("Timeframe:     {timeframe}");
    println!("Now:           {}", now.format("%H:%M:%S%.3f"));
    println!("Current close: {}", current_close(timeframe, &now).format("%H:%M:%S"));
    println!("Next trigger:  in {} ({delay} ms)", Countdown::Remaining(delay));
    println!("Targets close: {}", target.format("%H:%M:%S"));
    Ok(())
}

fn run_schedule(
    config_path: Option<&Path>,
    timeframe: Timeframe,
    count: usize,
    at: Option<&str>,
) -> Result<()> {
    if count == 0 {
        bail!("--count must be at least 1");
    }
    let config = load_config(config_path)?;
    let now = reference_time(at)?;
    let instants = upcoming_triggers(timeframe, &now, config.pre_close_buffer_ms, count);
    println!("Upcoming {timeframe} triggers after {}:", now.format("%H:%M:%S"));
    for (i, instant) in instants.iter().enumerate() {
        println!("  {:>2}. {}", i + 1, instant.format("%Y-%m-%d %H:%M:%S"));
    }
    Ok(())
}

// ──────────────────────────────────────────────
// decode / config
// ──────────────────────────────────────────────

fn run_decode(file: &Path) -> Result<()> {
    let text = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading stdin")?
    } else {
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?
    };
    let signal = parse_decision(&text, Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&signal)?);
    if !signal.is_actionable() {
        log::info!("WAIT decision: no trade would be opened");
    }
    Ok(())
}

fn run_config(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn next_honours_configured_buffer() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 5).unwrap();
        let default = load_config(None).unwrap();
        assert_eq!(next_trigger(&default, Timeframe::OneMinute, &now).0, 45_000);

        let file = config_file("pre_close_buffer_ms = 30000\n");
        let custom = load_config(Some(file.path())).unwrap();
        let (delay, target) = next_trigger(&custom, Timeframe::OneMinute, &now);
        assert_eq!(delay, 25_000);
        assert_eq!(target, Utc.with_ymd_and_hms(2024, 3, 4, 10, 1, 0).unwrap());
    }

    #[test]
    fn schedule_rejects_bad_config() {
        let file = config_file("pre_close_buffer_ms = 60000\n");
        let err = run_schedule(Some(file.path()), Timeframe::OneMinute, 3, None).unwrap_err();
        assert!(format!("{err:#}").contains("pre_close_buffer_ms"), "{err:#}");
    }
}
