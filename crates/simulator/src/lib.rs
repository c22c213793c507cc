//! Threaded EV3 brick simulator.
//!
//! A [`WorldSimulator`] holds every robot on the board. A fixed-rate update
//! loop ticks it while one TCP listener per brick feeds commands into the
//! robots' job queues and serves sensor reads from their freshness gates.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use common::{BrickId, SharedDiagnostics, TickRecorder, WorldConfig};
use tracing::info;

pub mod actuator;
pub mod board;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod physics;
pub mod processor;
pub mod robot;
pub mod sensor;
pub mod server;
pub mod update_loop;
pub mod world;

pub use error::{Result, SimError};
pub use robot::{RobotSimulator, RobotSnapshot};
pub use world::WorldSimulator;

/// Identifies one device: the brick it hangs off and its port address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub brick: BrickId,
    pub address: String,
}

impl DeviceKey {
    pub fn new(brick: BrickId, address: impl Into<String>) -> Self {
        Self {
            brick,
            address: address.into(),
        }
    }
}

/// A running simulator: world, update loop and brick listeners.
pub struct Simulation {
    world: Arc<WorldSimulator>,
    diagnostics: Arc<SharedDiagnostics>,
    recorder: TickRecorder,
    running: Arc<AtomicBool>,
    addrs: Vec<(BrickId, SocketAddr)>,
    threads: Vec<JoinHandle<()>>,
}

impl Simulation {
    /// Binds every brick's port, then starts the listeners and the update loop.
    pub fn start(config: &WorldConfig) -> Result<Self> {
        let world = Arc::new(WorldSimulator::from_config(config)?);
        let diagnostics = Arc::new(SharedDiagnostics::default());
        let recorder = TickRecorder::new();
        let running = Arc::new(AtomicBool::new(true));

        let host = world.settings().host.clone();
        let servers = world
            .bricks()
            .iter()
            .map(|brick| server::BrickServer::bind(&host, brick.port, brick.id))
            .collect::<Result<Vec<_>>>()?;

        let mut simulation = Self {
            world,
            diagnostics,
            recorder,
            running,
            addrs: servers.iter().map(|s| (s.brick(), s.local_addr())).collect(),
            threads: Vec::new(),
        };

        for server in servers {
            let handle = server.spawn(
                Arc::clone(&simulation.world),
                Arc::clone(&simulation.diagnostics),
                Arc::clone(&simulation.running),
            )?;
            simulation.threads.push(handle);
        }
        let handle = update_loop::spawn_update_loop(
            Arc::clone(&simulation.world),
            simulation.recorder.clone(),
            Arc::clone(&simulation.running),
        )?;
        simulation.threads.push(handle);

        info!(bricks = simulation.addrs.len(), "simulation started");
        Ok(simulation)
    }

    pub fn world(&self) -> &Arc<WorldSimulator> {
        &self.world
    }

    pub fn diagnostics(&self) -> &Arc<SharedDiagnostics> {
        &self.diagnostics
    }

    pub fn recorder(&self) -> &TickRecorder {
        &self.recorder
    }

    pub fn brick_addr(&self, brick: BrickId) -> Option<SocketAddr> {
        self.addrs
            .iter()
            .find(|(id, _)| *id == brick)
            .map(|(_, addr)| *addr)
    }

    pub fn brick_addrs(&self) -> &[(BrickId, SocketAddr)] {
        &self.addrs
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops every thread and returns the tick measurements.
    pub fn shutdown(mut self) -> TickRecorder {
        self.stop();
        self.recorder.clone()
    }

    fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.running.store(false, Ordering::Relaxed);
        self.world.close();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        info!(
            ticks = self.world.tick_count(),
            diagnostics = ?self.diagnostics.snapshot(),
            "simulation stopped"
        );
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}

/// How often `run_simulation` checks for a stop request.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Runs a simulation until `duration` has passed or `keep_running` is
/// cleared, whichever comes first.
pub fn run_simulation(
    config: &WorldConfig,
    duration: Option<Duration>,
    keep_running: &AtomicBool,
) -> Result<TickRecorder> {
    let simulation = Simulation::start(config)?;
    for (brick, addr) in simulation.brick_addrs() {
        info!(%brick, %addr, "accepting clients");
    }

    let deadline = duration.and_then(|d| Instant::now().checked_add(d));
    while keep_running.load(Ordering::Relaxed) {
        let wait = match deadline {
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    break;
                }
                left.min(STOP_POLL)
            }
            None => STOP_POLL,
        };
        thread::sleep(wait);
    }
    Ok(simulation.shutdown())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: &str = r#"
        [simulation]
        fps = 50

        [[robots]]
        name = "r"
        x = 100.0
        y = 100.0

        [[robots.bricks]]
        name = "main"
        port = 0
    "#;

    #[test]
    fn clearing_the_flag_stops_an_open_ended_run() {
        let config = WorldConfig::from_toml(WORLD).unwrap();
        let keep_running = Arc::new(AtomicBool::new(true));
        let stopper = {
            let keep_running = Arc::clone(&keep_running);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                keep_running.store(false, Ordering::Relaxed);
            })
        };

        let started = Instant::now();
        let recorder = run_simulation(&config, None, &keep_running).unwrap();
        stopper.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(recorder.total() > 0);
    }

    #[test]
    fn duration_bounds_the_run() {
        let config = WorldConfig::from_toml(WORLD).unwrap();
        let keep_running = AtomicBool::new(true);
        let started = Instant::now();
        run_simulation(&config, Some(Duration::from_millis(120)), &keep_running).unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_secs(5));
    }
}
