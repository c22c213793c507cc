use std::net::SocketAddr;
use std::time::{Duration, Instant};

use brick_client::BrickClient;
use clap::Parser;
use common::config::{load_config, DeviceConfig};
use common::metrics::TickResult;
use common::{MotorCommandProcessor, MotorGeometry, StopAction, WorldConfig};
use criterion::{black_box, Criterion};
use simulator::{Simulation, WorldSimulator};
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "benchmark_runner")]
#[command(about = "Drives a simulated world with concurrent clients and reports timing")]
struct Args {
    /// World description to load
    config: String,

    /// Clients per brick
    #[arg(short, long, default_value = "2")]
    clients: usize,

    /// Load duration in seconds
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Run Criterion micro-benchmarks instead of the load test
    #[arg(long)]
    criterion: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Round trips measured by one client.
#[derive(Debug, Default)]
struct ClientStats {
    requests: usize,
    failures: usize,
    latencies_us: Vec<f64>,
}

fn analyze_ticks(results: &[TickResult], fps: u32) {
    if results.is_empty() {
        println!("No ticks recorded");
        return;
    }

    let total = results.len();
    let missed = results.iter().filter(|r| !r.deadline_met).count();
    let compliance = (1.0 - missed as f64 / total as f64) * 100.0;
    let processing: Vec<f64> = results
        .iter()
        .map(|r| r.processing_time_ns as f64 / 1000.0)
        .collect();
    let max_lateness = results.iter().map(|r| r.lateness_ns).max().unwrap_or(0);
    let late = results.iter().filter(|r| r.lateness_ns > 1_000_000).count();

    println!("\n=== Update loop ({} fps) ===", fps);
    println!("Ticks: {}", total);
    println!("Deadline compliance: {:.2}% ({} missed)", compliance, missed);
    print_summary("Tick processing (μs)", &processing);
    println!("Max lateness: {} ns", max_lateness);
    println!(
        "Ticks more than 1ms late: {} ({:.2}%)",
        late,
        late as f64 / total as f64 * 100.0
    );
}

fn print_summary(label: &str, values: &[f64]) {
    if values.is_empty() {
        return;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let p99 = sorted[((sorted.len() - 1) as f64 * 0.99).round() as usize];
    println!(
        "{}: avg={:.2}, min={:.2}, p99={:.2}, max={:.2}",
        label,
        avg,
        sorted[0],
        p99,
        sorted[sorted.len() - 1]
    );
}

/// Listening ports are forced to 0 so the load test never collides with a
/// running simulator.
fn ephemeral_ports(mut config: WorldConfig) -> WorldConfig {
    for robot in &mut config.robots {
        for brick in &mut robot.bricks {
            brick.port = 0;
        }
    }
    config
}

/// Per brick: a readable address and, when there is one, a motor to drive.
fn targets(config: &WorldConfig) -> Vec<(Option<String>, Option<String>)> {
    config
        .robots
        .iter()
        .flat_map(|robot| &robot.bricks)
        .map(|brick| {
            let readable = brick
                .devices
                .iter()
                .find(|d| !matches!(d, DeviceConfig::Speaker))
                .map(DeviceConfig::address);
            let motor = brick
                .devices
                .iter()
                .find(|d| matches!(d, DeviceConfig::Motor { .. } | DeviceConfig::Arm { .. }))
                .map(DeviceConfig::address);
            (readable, motor)
        })
        .collect()
}

async fn drive_brick(
    addr: SocketAddr,
    frame_len: usize,
    readable: Option<String>,
    motor: Option<String>,
    until: Instant,
) -> ClientStats {
    let mut stats = ClientStats::default();
    let mut client = match BrickClient::connect(addr, frame_len).await {
        Ok(client) => client,
        Err(e) => {
            error!(%addr, "connect failed: {}", e);
            stats.failures += 1;
            return stats;
        }
    };

    let mut round = 0u64;
    while Instant::now() < until {
        let started = Instant::now();
        let outcome = match (&motor, &readable) {
            (Some(motor), _) if round % 4 == 0 => {
                let distance = if round % 8 == 0 { 90.0 } else { -90.0 };
                client
                    .rotate(motor, 180.0, distance, StopAction::Coast)
                    .await
                    .map(|_| ())
            }
            (_, Some(address)) => client.read(address).await.map(|_| ()),
            _ => break,
        };
        stats.requests += 1;
        match outcome {
            Ok(()) => stats
                .latencies_us
                .push(started.elapsed().as_nanos() as f64 / 1000.0),
            Err(e) => {
                warn!(%addr, "request failed: {}", e);
                stats.failures += 1;
            }
        }
        round += 1;
    }

    let _ = client.close().await;
    stats
}

fn run_load(config: WorldConfig, clients: usize, duration: Duration) {
    let config = ephemeral_ports(config);
    let frame_len = config.simulation.message_size;
    let fps = config.simulation.fps;
    let targets = targets(&config);

    let simulation = match Simulation::start(&config) {
        Ok(simulation) => simulation,
        Err(e) => {
            error!("failed to start simulation: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let until = Instant::now() + duration;
    let mut tasks = Vec::new();
    for ((brick, addr), (readable, motor)) in simulation.brick_addrs().iter().zip(targets) {
        if readable.is_none() && motor.is_none() {
            println!("{}: no devices to drive, skipped", brick);
            continue;
        }
        for _ in 0..clients {
            tasks.push(runtime.spawn(drive_brick(
                *addr,
                frame_len,
                readable.clone(),
                motor.clone(),
                until,
            )));
        }
    }

    let stats: Vec<ClientStats> = runtime.block_on(async {
        let mut all = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(stats) => all.push(stats),
                Err(e) => error!("client task failed: {}", e),
            }
        }
        all
    });

    let diagnostics = simulation.diagnostics().snapshot();
    let recorder = simulation.shutdown();

    analyze_ticks(&recorder.get_results(), fps);

    let requests: usize = stats.iter().map(|s| s.requests).sum();
    let failures: usize = stats.iter().map(|s| s.failures).sum();
    let latencies: Vec<f64> = stats.iter().flat_map(|s| s.latencies_us.iter().copied()).collect();
    println!("\n=== Clients ===");
    println!("Clients: {}", stats.len());
    println!(
        "Requests: {} ({:.1}/s), failures: {}",
        requests,
        requests as f64 / duration.as_secs_f64(),
        failures
    );
    print_summary("Round trip (μs)", &latencies);
    println!("Diagnostics: {:?}", diagnostics);

    match recorder.save_to_csv("load_ticks.csv") {
        Ok(rows) => println!("{} ticks saved to load_ticks.csv", rows),
        Err(e) => error!("failed to save load_ticks.csv: {}", e),
    }
}

fn benchmark_planning(c: &mut Criterion, config: &WorldConfig) {
    let sim = &config.simulation;
    let planner = match MotorCommandProcessor::new(sim.fps, sim.coasting_subtraction) {
        Ok(planner) => planner,
        Err(e) => {
            error!("invalid planner settings: {}", e);
            return;
        }
    };
    let geometry = MotorGeometry::wheel(56.0);

    c.bench_function("plan_rotate", |b| {
        b.iter(|| {
            let plan = planner.plan_rotate(
                black_box(360.0),
                black_box(720.0),
                geometry,
                StopAction::Coast,
            );
            black_box(plan.map(|p| p.jobs().sum::<f64>()))
        });
    });
}

fn benchmark_tick(c: &mut Criterion, config: &WorldConfig) {
    let world = match WorldSimulator::from_config(config) {
        Ok(world) => world,
        Err(e) => {
            error!("failed to build world: {}", e);
            return;
        }
    };

    c.bench_function("world_tick", |b| {
        b.iter(|| black_box(world.tick()));
    });
}

fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    println!("========================================");
    println!("EV3 Simulator Benchmark");
    println!("========================================");
    println!("Config: {}", args.config);
    println!("Robots: {}", config.robots.len());
    println!("Frame rate: {} fps", config.simulation.fps);
    if args.criterion {
        println!("Using Criterion for statistical analysis");
    } else {
        println!("Clients per brick: {}", args.clients);
        println!("Duration: {} seconds", args.duration);
    }
    println!("========================================");

    if args.criterion {
        let mut criterion = Criterion::default()
            .sample_size(20)
            .measurement_time(Duration::from_secs(10));
        benchmark_planning(&mut criterion, &config);
        benchmark_tick(&mut criterion, &config);
        println!("\nCheck the target/criterion directory for detailed HTML reports.");
    } else {
        run_load(config, args.clients, Duration::from_secs(args.duration));
    }

    println!("\n========================================");
    println!("Benchmark complete!");
    println!("========================================");
}
