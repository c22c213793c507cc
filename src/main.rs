use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, TryFromFloatSecsError};

use clap::Parser;
use common::config::load_config;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ev3-simulator")]
#[command(about = "Simulates EV3 bricks and serves their devices over TCP", long_about = None)]
struct Args {
    /// World description (robots, bricks, devices, board)
    #[arg(short, long, default_value = "configs/world.toml")]
    config: String,

    /// Stop after this many seconds; runs until Ctrl-C when omitted
    #[arg(short, long)]
    duration: Option<f64>,

    /// Write the most recent per-tick timings to this CSV file on exit
    #[arg(long)]
    ticks_csv: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// `--duration` as a `Duration`; negative, non-finite or overflowing values
/// are errors.
fn run_length(secs: Option<f64>) -> Result<Option<Duration>, TryFromFloatSecsError> {
    secs.map(Duration::try_from_secs_f64).transpose()
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    let duration = match run_length(args.duration) {
        Ok(duration) => duration,
        Err(e) => {
            error!("invalid --duration: {}", e);
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    }) {
        error!("failed to install Ctrl-C handler: {}", e);
        std::process::exit(1);
    }

    info!(
        config = %args.config,
        robots = config.robots.len(),
        fps = config.simulation.fps,
        "starting simulator"
    );

    let recorder = match simulator::run_simulation(&config, duration, &running) {
        Ok(recorder) => recorder,
        Err(e) => {
            error!("simulation failed: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        ticks = recorder.total(),
        kept = recorder.len(),
        missed = recorder.missed_deadlines(),
        compliance_pct = recorder.compliance(),
        "simulation finished"
    );

    if let Some(path) = &args.ticks_csv {
        match recorder.save_to_csv(path) {
            Ok(rows) => info!("wrote {} ticks to {}", rows, path),
            Err(e) => {
                error!("failed to write {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_length_rejects_unrepresentable_durations() {
        assert_eq!(run_length(None).unwrap(), None);
        assert_eq!(run_length(Some(1.5)).unwrap(), Some(Duration::from_millis(1500)));
        assert!(run_length(Some(1e30)).is_err());
        assert!(run_length(Some(-1.0)).is_err());
        assert!(run_length(Some(f64::NAN)).is_err());
    }
}
