use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use common::config::{DeviceConfig, DriveSide, RobotConfig};
use common::led::LedChannels;
use common::{BrickId, LedAddress, LedColor, LedSide, MotorGeometry};
use tracing::{debug, warn};

use crate::actuator::{Actuator, ActuatorKind, Job};
use crate::board::Board;
use crate::discovery::{DeviceClass, DeviceEntry};
use crate::physics::{BodyId, PhysicsSpace, Pose};
use crate::sensor::{Sensor, SensorKind, SensorValue};
use crate::DeviceKey;

/// Ultrasonic readings saturate here, in centimetres.
const ULTRASONIC_MAX_CM: f64 = 255.0;

/// Outputs the update loop accumulates from consumed jobs.
#[derive(Debug, Default)]
struct RobotState {
    tacho: HashMap<DeviceKey, f64>,
    arm_angles: HashMap<DeviceKey, f64>,
    speaker_text: HashMap<BrickId, String>,
    led_colors: HashMap<(BrickId, LedSide), LedColor>,
}

/// Point-in-time view of a robot's outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotSnapshot {
    pub pose: Pose,
    /// Accumulated motor rotation, degrees.
    pub tacho: BTreeMap<DeviceKey, f64>,
    pub arm_angles: BTreeMap<DeviceKey, f64>,
    pub speaker_text: BTreeMap<BrickId, String>,
    pub led_colors: BTreeMap<(BrickId, LedSide), LedColor>,
    pub pending_jobs: BTreeMap<DeviceKey, usize>,
}

/// One simulated robot: its devices, per-actuator job queues and sensor gates.
pub struct RobotSimulator {
    name: String,
    body: BodyId,
    initial_pose: Pose,
    bricks: Vec<BrickId>,
    actuators: BTreeMap<DeviceKey, Actuator>,
    sensors: BTreeMap<DeviceKey, Sensor>,
    devices: Vec<DeviceEntry>,
    led_channels: Mutex<HashMap<(BrickId, LedSide), LedChannels>>,
    pending_leds: Mutex<Vec<(BrickId, LedSide, LedColor)>>,
    state: Mutex<RobotState>,
    reset_requested: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RobotSimulator {
    /// Builds the robot from its configuration. Its bricks take consecutive
    /// ids starting at `first_brick`.
    pub fn from_config(config: &RobotConfig, first_brick: BrickId, body: BodyId) -> Self {
        let initial_pose = Pose::new(config.x, config.y, config.heading_deg.to_radians());
        let mut robot = Self {
            name: config.name.clone(),
            body,
            initial_pose,
            bricks: Vec::with_capacity(config.bricks.len()),
            actuators: BTreeMap::new(),
            sensors: BTreeMap::new(),
            devices: Vec::new(),
            led_channels: Mutex::new(HashMap::new()),
            pending_leds: Mutex::new(Vec::new()),
            state: Mutex::new(RobotState::default()),
            reset_requested: AtomicBool::new(false),
        };

        for (offset, brick) in config.bricks.iter().enumerate() {
            let id = BrickId(first_brick.0 + offset);
            robot.bricks.push(id);
            for device in &brick.devices {
                robot.add_device(id, device);
            }
        }
        robot
    }

    fn add_device(&mut self, brick: BrickId, device: &DeviceConfig) {
        let key = DeviceKey::new(brick, device.address());
        let driver = device.driver();

        let class = match device {
            DeviceConfig::Motor {
                side,
                wheel_diameter,
                max_speed,
                coasting_subtraction,
                ..
            } => {
                let kind = ActuatorKind::Motor {
                    side: *side,
                    geometry: MotorGeometry::wheel(*wheel_diameter),
                };
                self.add_motor(&key, kind, &driver, *max_speed, *coasting_subtraction);
                DeviceClass::TachoMotor
            }
            DeviceConfig::Arm {
                max_speed,
                coasting_subtraction,
                ..
            } => {
                self.add_motor(&key, ActuatorKind::Arm, &driver, *max_speed, *coasting_subtraction);
                DeviceClass::TachoMotor
            }
            DeviceConfig::Speaker => {
                let speaker = Actuator::new(key.clone(), ActuatorKind::Speaker, driver.clone());
                self.actuators.insert(key.clone(), speaker);
                DeviceClass::Sound
            }
            DeviceConfig::Touch { x, y, .. } => {
                self.add_sensor(&key, SensorKind::Touch, &driver, (*x, *y));
                DeviceClass::Sensor
            }
            DeviceConfig::Color { x, y, .. } => {
                self.add_sensor(&key, SensorKind::Color, &driver, (*x, *y));
                DeviceClass::Sensor
            }
            DeviceConfig::Ultrasonic {
                x,
                y,
                orientation_deg,
                ..
            } => {
                let kind = SensorKind::Ultrasonic {
                    orientation: orientation_deg.to_radians(),
                };
                self.add_sensor(&key, kind, &driver, (*x, *y));
                DeviceClass::Sensor
            }
        };

        self.devices.push(DeviceEntry { key, driver, class });
    }

    fn add_motor(
        &mut self,
        key: &DeviceKey,
        kind: ActuatorKind,
        driver: &str,
        max_speed: Option<f64>,
        coasting_subtraction: Option<f64>,
    ) {
        let actuator = Actuator::new(key.clone(), kind, driver.to_string())
            .with_limits(max_speed, coasting_subtraction);
        self.actuators.insert(key.clone(), actuator);
        // Motors also report their position.
        self.add_sensor(key, SensorKind::Tacho, driver, (0.0, 0.0));
    }

    fn add_sensor(&mut self, key: &DeviceKey, kind: SensorKind, driver: &str, mount: (f64, f64)) {
        let sensor = Sensor::new(key.clone(), kind, driver.to_string(), mount);
        self.sensors.insert(key.clone(), sensor);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn initial_pose(&self) -> Pose {
        self.initial_pose
    }

    pub fn bricks(&self) -> &[BrickId] {
        &self.bricks
    }

    /// Discovery registry in configuration order.
    pub fn devices(&self) -> &[DeviceEntry] {
        &self.devices
    }

    pub fn actuator(&self, brick: BrickId, address: &str) -> Option<&Actuator> {
        self.actuators.get(&DeviceKey::new(brick, address))
    }

    pub fn sensor(&self, brick: BrickId, address: &str) -> Option<&Sensor> {
        self.sensors.get(&DeviceKey::new(brick, address))
    }

    pub fn sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values()
    }

    pub fn speaker(&self, brick: BrickId) -> Option<&Actuator> {
        self.actuators
            .values()
            .find(|a| a.key.brick == brick && a.kind == ActuatorKind::Speaker)
    }

    /// Drops pending jobs of every actuator on `brick`.
    pub fn clear_brick_jobs(&self, brick: BrickId) {
        for actuator in self.actuators.values().filter(|a| a.key.brick == brick) {
            actuator.queue().clear();
        }
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Records one LED channel write. Returns the color to display once both
    /// channels of that LED are known; the color is applied on the next tick.
    pub fn set_led_channel(
        &self,
        brick: BrickId,
        address: LedAddress,
        brightness: f64,
    ) -> Option<LedColor> {
        let mut channels = lock(&self.led_channels);
        let led = channels.entry((brick, address.side)).or_default();
        led.set(address.channel, brightness);
        let color = led.color()?;
        drop(channels);

        lock(&self.pending_leds).push((brick, address.side, color));
        Some(color)
    }

    pub(crate) fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }

    /// Returns the robot to its initial state in place of a normal tick.
    pub(crate) fn reset(&self, physics: &mut dyn PhysicsSpace) {
        for actuator in self.actuators.values() {
            actuator.queue().clear();
        }
        lock(&self.led_channels).clear();
        lock(&self.pending_leds).clear();
        *lock(&self.state) = RobotState::default();

        physics.set_wheel_speeds(self.body, 0.0, 0.0);
        physics.set_pose(self.body, self.initial_pose);
        for sensor in self.sensors.values() {
            sensor.gate().publish(sensor.kind.initial_value());
        }
        debug!(robot = %self.name, "robot reset");
    }

    /// Consumes at most one job per actuator and turns them into wheel speeds,
    /// arm angles and speaker text. An empty motor queue holds still.
    pub(crate) fn apply_jobs(&self, physics: &mut dyn PhysicsSpace, fps: u32) {
        let fps = fps as f64;
        let mut state = lock(&self.state);
        let (mut left, mut right) = (0.0, 0.0);

        for actuator in self.actuators.values() {
            let job = actuator.queue().dequeue();
            let key = &actuator.key;
            match (actuator.kind, job) {
                (ActuatorKind::Motor { side, geometry }, Some(Job::Displacement(delta))) => {
                    *state.tacho.entry(key.clone()).or_default() += geometry.to_degrees(delta);
                    match side {
                        Some(DriveSide::Left) => left += delta * fps,
                        Some(DriveSide::Right) => right += delta * fps,
                        None => {}
                    }
                }
                (ActuatorKind::Arm, Some(Job::Displacement(delta))) => {
                    *state.arm_angles.entry(key.clone()).or_default() += delta;
                    *state.tacho.entry(key.clone()).or_default() +=
                        MotorGeometry::Arm.to_degrees(delta);
                }
                (ActuatorKind::Speaker, Some(Job::Text(text))) => {
                    state.speaker_text.insert(key.brick, text);
                }
                (ActuatorKind::Speaker, None) => {
                    state.speaker_text.remove(&key.brick);
                }
                (_, None) => {}
                (kind, Some(job)) => {
                    warn!(address = %key.address, ?kind, ?job, "job does not fit actuator, dropped");
                }
            }
        }

        physics.set_wheel_speeds(self.body, left, right);
    }

    pub(crate) fn apply_leds(&self) {
        let pending = std::mem::take(&mut *lock(&self.pending_leds));
        if pending.is_empty() {
            return;
        }
        let mut state = lock(&self.state);
        for (brick, side, color) in pending {
            state.led_colors.insert((brick, side), color);
        }
    }

    /// Computes every sensor value from the current pose and publishes it.
    /// Readers stay blocked until `release_sensors`.
    pub(crate) fn refresh_sensors(&self, physics: &dyn PhysicsSpace, board: &Board) {
        let pose = physics.pose(self.body).unwrap_or(self.initial_pose);
        let state = lock(&self.state);

        for sensor in self.sensors.values() {
            let point = pose.transform(sensor.mount);
            let value = match sensor.kind {
                SensorKind::Touch => SensorValue::Int(board.in_contact(point) as i64),
                SensorKind::Color => SensorValue::Int(board.color_at(point)),
                SensorKind::Ultrasonic { orientation } => {
                    let cm = board.ray_distance(point, pose.heading + orientation) / 10.0;
                    SensorValue::Float((cm.min(ULTRASONIC_MAX_CM) * 10.0).round() / 10.0)
                }
                SensorKind::Tacho => {
                    let degrees = state.tacho.get(&sensor.key).copied().unwrap_or(0.0);
                    SensorValue::Int(degrees.round() as i64)
                }
            };
            sensor.gate().publish(value);
        }
    }

    /// Hook for a renderer; the headless simulator has nothing to push.
    pub(crate) fn sync_visuals(&self) {}

    pub(crate) fn release_sensors(&self) {
        for sensor in self.sensors.values() {
            sensor.gate().release();
        }
    }

    pub(crate) fn close_sensors(&self) {
        for sensor in self.sensors.values() {
            sensor.gate().close();
        }
    }

    pub fn snapshot(&self, pose: Pose) -> RobotSnapshot {
        let state = lock(&self.state);
        RobotSnapshot {
            pose,
            tacho: state.tacho.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            arm_angles: state.arm_angles.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            speaker_text: state.speaker_text.iter().map(|(k, v)| (*k, v.clone())).collect(),
            led_colors: state.led_colors.iter().map(|(k, v)| (*k, *v)).collect(),
            pending_jobs: self
                .actuators
                .iter()
                .map(|(k, a)| (k.clone(), a.queue().len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::KinematicSpace;
    use approx::assert_relative_eq;
    use common::config::{BoardConfig, WorldConfig};
    use common::LedChannel;

    const ROBOT: &str = r#"
        [[robots]]
        name = "rover"
        x = 500.0
        y = 300.0

        [[robots.bricks]]
        name = "main"
        port = 0

        [[robots.bricks.devices]]
        type = "motor"
        port = "outA"
        side = "left"
        wheel_diameter = 40.0

        [[robots.bricks.devices]]
        type = "motor"
        port = "outD"
        side = "right"
        wheel_diameter = 40.0

        [[robots.bricks.devices]]
        type = "arm"
        port = "outC"

        [[robots.bricks.devices]]
        type = "speaker"

        [[robots.bricks.devices]]
        type = "ultrasonic"
        port = "in4"
        x = 50.0

        [[robots.bricks]]
        name = "aux"
        port = 0

        [[robots.bricks.devices]]
        type = "color"
        port = "in2"
    "#;

    fn setup() -> (RobotSimulator, KinematicSpace, Board) {
        let config = WorldConfig::from_toml(ROBOT).unwrap();
        let mut space = KinematicSpace::new(1800.0, 1200.0);
        let body = space.add_body(Pose::new(500.0, 300.0, 0.0), 120.0);
        let robot = RobotSimulator::from_config(&config.robots[0], BrickId(3), body);
        (robot, space, Board::from_config(&BoardConfig::default()))
    }

    #[test]
    fn bricks_and_devices_are_registered_in_order() {
        let (robot, _, _) = setup();
        assert_eq!(robot.bricks(), &[BrickId(3), BrickId(4)]);
        let addresses: Vec<_> = robot.devices().iter().map(|d| d.key.address.as_str()).collect();
        assert_eq!(
            addresses,
            [
                "ev3-ports:outA",
                "ev3-ports:outD",
                "ev3-ports:outC",
                "ev3-ports:speaker",
                "ev3-ports:in4",
                "ev3-ports:in2"
            ]
        );
        assert!(robot.speaker(BrickId(3)).is_some());
        assert!(robot.speaker(BrickId(4)).is_none());
        assert!(robot.sensor(BrickId(3), "ev3-ports:outA").is_some());
        assert!(robot.sensor(BrickId(4), "ev3-ports:in2").is_some());
    }

    #[test]
    fn one_job_per_actuator_per_tick() {
        let (robot, mut space, _) = setup();
        let motor = robot.actuator(BrickId(3), "ev3-ports:outA").unwrap();
        motor.queue().replace(vec![Job::Displacement(2.0), Job::Displacement(3.0)]);

        robot.apply_jobs(&mut space, 10);
        assert_eq!(motor.queue().len(), 1);
        robot.apply_jobs(&mut space, 10);
        robot.apply_jobs(&mut space, 10);
        assert!(motor.queue().is_empty());

        let snapshot = robot.snapshot(Pose::default());
        let degrees = snapshot.tacho[&DeviceKey::new(BrickId(3), "ev3-ports:outA")];
        let expected = MotorGeometry::wheel(40.0).to_degrees(5.0);
        assert_relative_eq!(degrees, expected, epsilon = 1e-9);
    }

    #[test]
    fn matched_wheel_jobs_drive_forward() {
        let (robot, mut space, _) = setup();
        for address in ["ev3-ports:outA", "ev3-ports:outD"] {
            let motor = robot.actuator(BrickId(3), address).unwrap();
            motor.queue().replace(vec![Job::Displacement(1.0); 10]);
        }
        for _ in 0..10 {
            robot.apply_jobs(&mut space, 10);
            space.step(0.1);
        }
        let pose = space.pose(robot.body()).unwrap();
        assert_relative_eq!(pose.x, 510.0, epsilon = 1e-9);
        assert_relative_eq!(pose.y, 300.0, epsilon = 1e-9);

        // Queues are drained: the robot holds still.
        robot.apply_jobs(&mut space, 10);
        space.step(0.1);
        assert_relative_eq!(space.pose(robot.body()).unwrap().x, 510.0, epsilon = 1e-9);
    }

    #[test]
    fn arm_jobs_accumulate_angle() {
        let (robot, mut space, _) = setup();
        let arm = robot.actuator(BrickId(3), "ev3-ports:outC").unwrap();
        arm.queue().replace(vec![Job::Displacement(-5.0); 3]);
        for _ in 0..3 {
            robot.apply_jobs(&mut space, 30);
        }
        let key = DeviceKey::new(BrickId(3), "ev3-ports:outC");
        let snapshot = robot.snapshot(Pose::default());
        assert_relative_eq!(snapshot.arm_angles[&key], -15.0);
        assert_relative_eq!(snapshot.tacho[&key], 15.0);
    }

    #[test]
    fn speaker_text_lasts_one_tick_per_job() {
        let (robot, mut space, _) = setup();
        let speaker = robot.speaker(BrickId(3)).unwrap();
        speaker.queue().extend(vec![Job::Text("hello".into())]);

        robot.apply_jobs(&mut space, 30);
        assert_eq!(robot.snapshot(Pose::default()).speaker_text[&BrickId(3)], "hello");
        robot.apply_jobs(&mut space, 30);
        assert!(robot.snapshot(Pose::default()).speaker_text.is_empty());
    }

    #[test]
    fn led_color_needs_both_channels_and_a_tick() {
        let (robot, _, _) = setup();
        let red = LedAddress { side: LedSide::Left, channel: LedChannel::Red };
        let green = LedAddress { side: LedSide::Left, channel: LedChannel::Green };

        assert_eq!(robot.set_led_channel(BrickId(3), red, 1.0), None);
        assert_eq!(robot.set_led_channel(BrickId(3), green, 0.0), Some(LedColor::Red));
        assert!(robot.snapshot(Pose::default()).led_colors.is_empty());

        robot.apply_leds();
        let colors = robot.snapshot(Pose::default()).led_colors;
        assert_eq!(colors[&(BrickId(3), LedSide::Left)], LedColor::Red);
    }

    #[test]
    fn sensors_publish_then_release() {
        let (robot, space, board) = setup();
        robot.refresh_sensors(&space, &board);
        let ultrasonic = robot.sensor(BrickId(3), "ev3-ports:in4").unwrap();
        // Mounted 50mm ahead of x = 500 facing the right wall at 1800.
        assert_eq!(ultrasonic.gate().latest(), SensorValue::Float(125.0));
        assert_eq!(ultrasonic.gate().version(), 0);

        robot.release_sensors();
        assert_eq!(ultrasonic.gate().version(), 1);
        let color = robot.sensor(BrickId(4), "ev3-ports:in2").unwrap();
        assert_eq!(color.gate().latest(), SensorValue::Int(6));
    }

    #[test]
    fn clearing_a_brick_leaves_other_bricks_alone() {
        let config = WorldConfig::from_toml(ROBOT).unwrap();
        let mut robot_config = config.robots[0].clone();
        robot_config.bricks[1].devices.push(DeviceConfig::Arm {
            port: "outB".into(),
            driver: None,
            max_speed: None,
            coasting_subtraction: None,
        });
        let robot = RobotSimulator::from_config(&robot_config, BrickId(0), 0);

        let main = robot.actuator(BrickId(0), "ev3-ports:outA").unwrap();
        let aux = robot.actuator(BrickId(1), "ev3-ports:outB").unwrap();
        main.queue().replace(vec![Job::Displacement(1.0); 4]);
        aux.queue().replace(vec![Job::Displacement(1.0); 4]);

        robot.clear_brick_jobs(BrickId(0));
        assert!(main.queue().is_empty());
        assert_eq!(aux.queue().len(), 4);
    }

    #[test]
    fn reset_restores_initial_state() {
        let (robot, mut space, _) = setup();
        let motor = robot.actuator(BrickId(3), "ev3-ports:outA").unwrap();
        motor.queue().replace(vec![Job::Displacement(5.0); 20]);
        robot.apply_jobs(&mut space, 10);
        space.step(0.1);
        assert_ne!(space.pose(robot.body()), Some(robot.initial_pose()));

        robot.request_reset();
        assert!(robot.take_reset());
        assert!(!robot.take_reset());
        robot.reset(&mut space);

        assert!(motor.queue().is_empty());
        assert_eq!(space.pose(robot.body()), Some(robot.initial_pose()));
        assert!(robot.snapshot(Pose::default()).tacho.is_empty());
    }
}
