//! CLI entry point for the image gather engine
//!
//! Builds a configuration from an optional TOML file, environment overrides
//! and command line flags, then reports every gathered record.

use clap::Parser;
use image_gather::config::ConfigError;
use image_gather::{FailureStreaks, GatherConfig, GatherEngine, GatherReport, ImageRecord};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "image_gather=info";

/// Image Gather - poll image files and load them whenever they change
#[derive(Parser, Debug)]
#[command(name = "image-gather")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image files to watch
    paths: Vec<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep polling after the first cycle
    #[arg(short, long)]
    watch: bool,

    /// Fail at startup if any path is missing
    #[arg(long)]
    must_exist: bool,

    /// Seconds to sleep between polls of one path
    #[arg(long)]
    sleep: Option<f64>,

    /// Stop a path after this many successful loads
    #[arg(long)]
    max_images: Option<u64>,

    /// Stop a path after this many seconds since its first poll
    #[arg(long)]
    max_seconds: Option<f64>,

    /// Print one JSON summary per record on stdout
    #[arg(long)]
    json: bool,

    /// Warn after this many consecutive failures of one path (0 disables)
    #[arg(long, default_value = "3")]
    alert_after: u64,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

/// Merge file/env configuration with command line flags; flags win.
fn build_config(args: &Args) -> Result<GatherConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => GatherConfig::load(path)?,
        None => {
            let mut config = GatherConfig::default();
            config.apply_env_overrides();
            config
        }
    };

    config.paths.extend(args.paths.iter().cloned());
    if args.watch {
        config.watch = true;
    }
    if args.must_exist {
        config.must_exist = true;
    }
    if let Some(sleep) = args.sleep {
        config.sleep_secs = sleep;
    }
    if args.max_images.is_some() {
        config.max_images_per_path = args.max_images;
    }
    if args.max_seconds.is_some() {
        config.max_seconds_per_path = args.max_seconds;
    }

    Ok(config)
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("image_gather=debug,image_gather_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_record(record: &ImageRecord, json: bool) {
    let summary = record.summary();
    if json {
        match serde_json::to_string(&summary) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize record: {}", e),
        }
        return;
    }

    match (&summary.error, summary.width, summary.height) {
        (Some(error), _, _) => {
            println!("[{}] {} error: {}", summary.watch_id, summary.source, error)
        }
        (None, Some(w), Some(h)) => println!(
            "[{}] {} loaded {}x{}{}",
            summary.watch_id,
            summary.source,
            w,
            h,
            if summary.modified { " (modified)" } else { "" }
        ),
        _ => println!("[{}] {}", summary.watch_id, summary.source),
    }
}

fn print_report(report: &GatherReport) {
    for path in &report.paths {
        println!(
            "[{}] {}: polls={} skipped={} emitted={} failures={} stop={}",
            path.watch_id,
            path.path.display(),
            path.polls,
            path.skipped,
            path.emitted,
            path.failures,
            path.stop.map(|s| s.as_str()).unwrap_or("interrupted")
        );
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut engine = match GatherEngine::new(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to initialize gather engine: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut streaks = FailureStreaks::new(args.alert_after);

    loop {
        let record = tokio::select! {
            record = engine.next() => record,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping gather");
                break;
            }
        };

        let Some(record) = record else { break };

        if let Some(streak) = streaks.observe(&record) {
            warn!(
                path = %record.context().path().display(),
                streak,
                "Path keeps failing"
            );
        }
        print_record(&record, args.json);
    }

    if !args.json {
        print_report(&engine.report());
    }

    ExitCode::SUCCESS
}
