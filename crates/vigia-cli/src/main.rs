//! Vigia update CLI - refreshes the municipal health-data cache.
//!
//! Three modes, mirroring the operational scripts the dashboard ships with:
//! `--manual` runs one complete refresh and exits, `--daemon` stays resident
//! and fires on the configured weekly cadence, `--status` prints the
//! settings and the cache inventory. `--demo` switches any mode to
//! demonstration data (clearly flagged, never the default).
//!
//! A cron entry invoking `vigia --manual` weekly is equivalent to the
//! daemon; each invocation is a complete, isolated run.

use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigia_core::cache::CacheStore;
use vigia_core::provider::DatasusClient;
use vigia_core::settings::Settings;
use vigia_core::update::{RunSummary, UpdateCadence, UpdateRunner};

/// Initialize the tracing subscriber: stderr plus a daily-rolling log file.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=debug).
fn init_tracing(settings: &Settings) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = settings.log_dir()?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "vigia.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(filter)
        .init();
    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let demo = args.iter().any(|a| a == "--demo");
    let mode = args
        .iter()
        .find(|a| matches!(a.as_str(), "--manual" | "--daemon" | "--status"));

    let Some(mode) = mode.cloned() else {
        print_usage();
        return Ok(ExitCode::SUCCESS);
    };

    let mut settings = Settings::load().context("failed to load settings")?;
    if demo {
        settings.demo_mode = true;
    }

    let _guard = init_tracing(&settings)?;
    info!(mode = %mode, demo = settings.demo_mode, "vigia starting");

    match mode.as_str() {
        "--status" => show_status(&settings),
        "--manual" => run_manual(settings).await,
        "--daemon" => run_daemon(settings).await,
        _ => {
            print_usage();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_usage() {
    eprintln!("vigia - municipal health-data cache updater");
    eprintln!();
    eprintln!("Usage: vigia <mode> [--demo]");
    eprintln!();
    eprintln!("Modes:");
    eprintln!("  --manual   run one complete refresh and exit");
    eprintln!("  --daemon   stay resident, refreshing on the weekly schedule");
    eprintln!("  --status   print settings and the cache inventory");
    eprintln!();
    eprintln!("  --demo     use synthetic demonstration data (clearly flagged)");
    eprintln!();
    eprintln!("For cron deployments, schedule `vigia --manual` weekly instead");
    eprintln!("of running the daemon.");
}

fn build_runner(settings: Settings) -> Result<UpdateRunner<DatasusClient>> {
    let cache_dir = settings.cache_dir()?;
    let cache = CacheStore::open(&cache_dir)
        .with_context(|| format!("failed to open cache at {}", cache_dir.display()))?;
    let provider = DatasusClient::new().context("failed to build provider client")?;
    Ok(UpdateRunner::new(provider, cache, settings))
}

fn report(summary: &RunSummary) {
    println!(
        "refresh finished: {} succeeded, {} failed, {} skipped ({} records, {} pruned)",
        summary.succeeded,
        summary.failed.len(),
        summary.skipped,
        summary.total_records,
        summary.pruned
    );
    for failure in &summary.failed {
        println!("  failed {}: {}", failure.key, failure.reason);
    }
}

async fn run_manual(settings: Settings) -> Result<ExitCode> {
    let mut runner = build_runner(settings)?;
    let summary = runner.run_once().await;
    report(&summary);

    // A run where every dataset failed is worth a nonzero exit for cron
    // monitoring, but it is not a crash: the cache is intact.
    Ok(if summary.is_total_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_daemon(settings: Settings) -> Result<ExitCode> {
    let cadence = UpdateCadence::parse(&settings.update.weekday, &settings.update.time)
        .context("invalid update schedule in settings")?;
    let mut runner = build_runner(settings)?;
    runner.run_scheduled(cadence).await;
    Ok(ExitCode::SUCCESS)
}

fn show_status(settings: &Settings) -> Result<ExitCode> {
    let cache_dir = settings.cache_dir()?;
    let cache = CacheStore::open(&cache_dir)?;
    let info = cache.info()?;

    println!(
        "municipality: {} / {} (IBGE {})",
        settings.municipality.name, settings.municipality.uf, settings.municipality.ibge_code
    );
    println!(
        "schedule:     weekly, {} at {} UTC",
        settings.update.weekday, settings.update.time
    );
    println!("retention:    {} days", settings.update.retention_days);
    println!(
        "demo mode:    {}",
        if settings.demo_mode { "ON (synthetic data)" } else { "off" }
    );
    println!();
    println!(
        "cache: {} ({} entries, {:.2} MB)",
        cache_dir.display(),
        info.entry_count,
        info.total_bytes as f64 / (1024.0 * 1024.0)
    );

    for key in cache.list_keys()? {
        match cache.metadata(&key) {
            Ok(Some(meta)) => {
                let flag = if meta.source.is_synthetic() {
                    " [synthetic]"
                } else {
                    ""
                };
                println!(
                    "  {key}: {} records, updated {}{}",
                    meta.record_count,
                    format_age(Utc::now() - meta.timestamp),
                    flag
                );
            }
            Ok(None) => {}
            Err(e) => println!("  {key}: unreadable ({e})"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Compact age display for the status listing.
fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(chrono::Duration::seconds(30)), "just now");
        assert_eq!(format_age(chrono::Duration::minutes(5)), "5m ago");
        assert_eq!(format_age(chrono::Duration::hours(3)), "3h ago");
        assert_eq!(format_age(chrono::Duration::days(2)), "2d ago");
    }
}
