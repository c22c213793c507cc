use std::sync::Arc;

use common::protocol::{
    ConfigRequest, DataRequest, LedCommand, RotateCommand, SoundCommand, StopCommand,
};
use common::{normalize_port, BrickId, Command, LedAddress, MotorCommandProcessor, MotorGeometry};
use serde_json::Value;
use tracing::debug;

use crate::actuator::{Actuator, Job};
use crate::discovery;
use crate::error::{Result, SimError};
use crate::robot::RobotSimulator;
use crate::world::WorldSimulator;

/// Characters per line of speaker text.
const SPEAKER_LINE_WIDTH: usize = 10;

/// Applies decoded commands for one brick to the simulated robot.
pub struct MessageProcessor {
    world: Arc<WorldSimulator>,
    robot: Arc<RobotSimulator>,
    brick: BrickId,
    motors: MotorCommandProcessor,
}

impl MessageProcessor {
    pub fn new(world: Arc<WorldSimulator>, brick: BrickId) -> Result<Self> {
        let robot = world
            .robot_for(brick)
            .cloned()
            .ok_or(SimError::UnknownBrick(brick))?;
        let settings = world.settings();
        let motors = MotorCommandProcessor::new(settings.fps, settings.coasting_subtraction)?;
        Ok(Self {
            world,
            robot,
            brick,
            motors,
        })
    }

    pub fn brick(&self) -> BrickId {
        self.brick
    }

    pub fn robot(&self) -> &Arc<RobotSimulator> {
        &self.robot
    }

    /// Executes `command`. Returns the reply value for commands that have one.
    pub fn process(&self, command: &Command) -> Result<Option<Value>> {
        match command {
            Command::RotateCommand(cmd) => self.rotate(cmd).map(|t| Some(Value::from(t))),
            Command::StopCommand(cmd) => self.stop(cmd).map(|t| Some(Value::from(t))),
            Command::SoundCommand(cmd) => self.sound(cmd).map(|_| None),
            Command::LedCommand(cmd) => self.led(cmd).map(|_| None),
            Command::DataRequest(cmd) => self.data(cmd).map(Some),
            Command::ConfigRequest(cmd) => Ok(Some(self.config(cmd))),
        }
    }

    fn motor(&self, address: &str) -> Result<(&Actuator, MotorGeometry)> {
        let address = normalize_port(address);
        let actuator = self
            .robot
            .actuator(self.brick, &address)
            .ok_or_else(|| SimError::UnknownDevice {
                brick: self.brick,
                address: address.clone(),
            })?;
        match actuator.geometry() {
            Some(geometry) => Ok((actuator, geometry)),
            None => Err(SimError::WrongDeviceKind {
                brick: self.brick,
                address,
                expected: "motor",
            }),
        }
    }

    fn planner_for(&self, actuator: &Actuator) -> Result<MotorCommandProcessor> {
        match actuator.coasting_subtraction {
            Some(sub) => Ok(self.motors.with_coasting(sub)?),
            None => Ok(self.motors),
        }
    }

    /// Replaces the motor's queue with the run; returns seconds until rest.
    fn rotate(&self, cmd: &RotateCommand) -> Result<f64> {
        let (actuator, geometry) = self.motor(&cmd.address)?;
        let plan = self.planner_for(actuator)?.plan_rotate(
            actuator.limit_speed(cmd.speed),
            cmd.distance,
            geometry,
            cmd.stop_action,
        )?;

        actuator.queue().replace(plan.jobs().map(Job::Displacement));
        debug!(
            brick = %self.brick,
            address = %actuator.key.address,
            frames = plan.frames,
            coast = plan.coast_frames(),
            "rotate scheduled"
        );
        Ok(plan.run_time())
    }

    /// Replaces the motor's queue with its stopping tail, if any.
    fn stop(&self, cmd: &StopCommand) -> Result<f64> {
        let (actuator, geometry) = self.motor(&cmd.address)?;
        let plan = self.planner_for(actuator)?.plan_stop(
            actuator.limit_speed(cmd.speed),
            geometry,
            cmd.stop_action,
        )?;

        actuator.queue().replace(plan.jobs().map(Job::Displacement));
        debug!(
            brick = %self.brick,
            address = %actuator.key.address,
            coast = plan.coast_frames(),
            "stop scheduled"
        );
        Ok(plan.run_time())
    }

    /// Queues the wrapped message for `round(fps * duration)` ticks.
    fn sound(&self, cmd: &SoundCommand) -> Result<()> {
        if !cmd.duration.is_finite() || cmd.duration < 0.0 {
            return Err(SimError::InvalidCommand(format!(
                "sound duration {} is not a non-negative number",
                cmd.duration
            )));
        }
        let speaker = self
            .robot
            .speaker(self.brick)
            .ok_or(SimError::NoSpeaker(self.brick))?;

        let frames = self
            .motors
            .checked_frames(self.motors.fps() as f64 * cmd.duration)
            .map_err(|_| {
                SimError::InvalidCommand(format!("sound duration {}s is too long", cmd.duration))
            })?;
        let text = wrap_text(&cmd.message, SPEAKER_LINE_WIDTH).join("\n");
        speaker
            .queue()
            .extend(std::iter::repeat(Job::Text(text)).take(frames));
        debug!(brick = %self.brick, frames, kind = %cmd.sound_type, "sound queued");
        Ok(())
    }

    fn led(&self, cmd: &LedCommand) -> Result<()> {
        let address = LedAddress::parse(&cmd.address)?;
        if !cmd.brightness.is_finite() {
            return Err(SimError::InvalidCommand("LED brightness must be finite".into()));
        }
        if let Some(color) = self.robot.set_led_channel(self.brick, address, cmd.brightness) {
            debug!(brick = %self.brick, side = ?address.side, ?color, "LED color resolved");
        }
        Ok(())
    }

    /// Blocks until the sensor's next fresh value.
    fn data(&self, cmd: &DataRequest) -> Result<Value> {
        let address = normalize_port(&cmd.address);
        let sensor = self
            .robot
            .sensor(self.brick, &address)
            .ok_or_else(|| SimError::UnknownDevice {
                brick: self.brick,
                address: address.clone(),
            })?;
        let value = sensor.read(self.world.settings().sensor_timeout)?;
        Ok(value.into())
    }

    fn config(&self, cmd: &ConfigRequest) -> Value {
        discovery::resolve(self.robot.devices(), self.brick, &cmd.kwargs, &cmd.class_name)
            .into_value()
    }
}

/// Greedy word wrap to lines of at most `width` characters. Words longer
/// than a line are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        let chars: Vec<char> = word.chars().collect();
        for piece in chars.chunks(width) {
            let piece: String = piece.iter().collect();
            let needed = if line.is_empty() { 0 } else { line.chars().count() + 1 };
            if needed + piece.chars().count() > width && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.push_str(&piece);
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}
