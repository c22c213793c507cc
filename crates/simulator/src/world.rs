use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use common::config::SimulationConfig;
use common::{BrickId, WorldConfig};
use tracing::{info, trace};

use crate::board::Board;
use crate::error::Result;
use crate::physics::{KinematicSpace, PhysicsSpace, Pose};
use crate::robot::{RobotSimulator, RobotSnapshot};

/// Runtime settings derived from the `[simulation]` table.
#[derive(Debug, Clone)]
pub struct SimSettings {
    pub fps: u32,
    pub coasting_subtraction: f64,
    pub message_size: usize,
    pub host: String,
    pub sensor_timeout: Duration,
    pub poll_interval: Duration,
}

impl SimSettings {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            fps: config.fps,
            coasting_subtraction: config.coasting_subtraction,
            message_size: config.message_size,
            host: config.host.clone(),
            sensor_timeout: Duration::from_millis(config.sensor_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(self.dt())
    }

    /// Simulated seconds per tick.
    pub fn dt(&self) -> f64 {
        1.0 / self.fps as f64
    }
}

/// Where a brick lives and which port it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickInfo {
    pub id: BrickId,
    pub name: String,
    pub port: u16,
    pub robot: usize,
}

/// All robots on one board, advanced together one tick at a time.
pub struct WorldSimulator {
    settings: SimSettings,
    board: Board,
    physics: Mutex<Box<dyn PhysicsSpace>>,
    robots: Vec<Arc<RobotSimulator>>,
    bricks: Vec<BrickInfo>,
    ticks: AtomicU64,
}

impl WorldSimulator {
    pub fn from_config(config: &WorldConfig) -> Result<Self> {
        let physics = KinematicSpace::new(config.board.width, config.board.height);
        Self::with_physics(config, Box::new(physics))
    }

    /// Builds the world on top of a caller-supplied physics space.
    pub fn with_physics(config: &WorldConfig, mut physics: Box<dyn PhysicsSpace>) -> Result<Self> {
        config.validate()?;

        let mut robots = Vec::with_capacity(config.robots.len());
        let mut bricks = Vec::new();
        for (index, robot_config) in config.robots.iter().enumerate() {
            let pose = Pose::new(
                robot_config.x,
                robot_config.y,
                robot_config.heading_deg.to_radians(),
            );
            let body = physics.add_body(pose, robot_config.wheel_base);
            let first = BrickId(bricks.len());
            for (offset, brick) in robot_config.bricks.iter().enumerate() {
                bricks.push(BrickInfo {
                    id: BrickId(first.0 + offset),
                    name: brick.name.clone(),
                    port: brick.port,
                    robot: index,
                });
            }
            robots.push(Arc::new(RobotSimulator::from_config(robot_config, first, body)));
        }

        info!(
            robots = robots.len(),
            bricks = bricks.len(),
            fps = config.simulation.fps,
            "world created"
        );

        Ok(Self {
            settings: SimSettings::from_config(&config.simulation),
            board: Board::from_config(&config.board),
            physics: Mutex::new(physics),
            robots,
            bricks,
            ticks: AtomicU64::new(0),
        })
    }

    fn physics(&self) -> MutexGuard<'_, Box<dyn PhysicsSpace>> {
        self.physics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> &SimSettings {
        &self.settings
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn robots(&self) -> &[Arc<RobotSimulator>] {
        &self.robots
    }

    pub fn bricks(&self) -> &[BrickInfo] {
        &self.bricks
    }

    pub fn brick(&self, id: BrickId) -> Option<&BrickInfo> {
        self.bricks.get(id.0)
    }

    pub fn robot_for(&self, brick: BrickId) -> Option<&Arc<RobotSimulator>> {
        self.brick(brick).and_then(|info| self.robots.get(info.robot))
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Advances the world by one tick.
    ///
    /// Robots with a pending reset are reset instead of ticked. Every other
    /// robot consumes its jobs, applies LED colors and publishes sensor values
    /// before the single physics step; visuals are synced and sensor readers
    /// released after it. Returns the number of robots ticked normally.
    pub fn tick(&self) -> usize {
        let mut physics = self.physics();
        let mut active = Vec::with_capacity(self.robots.len());

        for robot in &self.robots {
            if robot.take_reset() {
                robot.reset(&mut **physics);
                continue;
            }
            robot.apply_jobs(&mut **physics, self.settings.fps);
            robot.apply_leds();
            robot.refresh_sensors(&**physics, &self.board);
            active.push(robot);
        }

        physics.step(self.settings.dt());
        drop(physics);

        for robot in &active {
            robot.sync_visuals();
            robot.release_sensors();
        }

        let tick = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(tick, active = active.len(), "tick complete");
        active.len()
    }

    pub fn snapshot(&self, robot: usize) -> Option<RobotSnapshot> {
        let robot = self.robots.get(robot)?;
        let pose = self.physics().pose(robot.body()).unwrap_or(robot.initial_pose());
        Some(robot.snapshot(pose))
    }

    pub fn request_reset(&self, robot: usize) -> bool {
        match self.robots.get(robot) {
            Some(robot) => {
                robot.request_reset();
                true
            }
            None => false,
        }
    }

    /// Wakes every blocked sensor reader; used on shutdown.
    pub fn close(&self) {
        for robot in &self.robots {
            robot.close_sensors();
        }
    }
}
