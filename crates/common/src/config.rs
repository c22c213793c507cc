use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::normalize_port;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorldConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub board: BoardConfig,
    pub robots: Vec<RobotConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulationConfig {
    pub fps: u32,
    /// Displacement units removed per frame while a motor coasts.
    pub coasting_subtraction: f64,
    /// Fixed frame size of every message, in bytes.
    pub message_size: usize,
    pub host: String,
    /// Upper bound on how long a sensor read waits for a fresh tick.
    pub sensor_timeout_ms: u64,
    /// Socket read timeout used to notice shutdown.
    pub poll_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            coasting_subtraction: 0.3,
            message_size: crate::protocol::DEFAULT_MESSAGE_SIZE,
            host: "127.0.0.1".to_string(),
            sensor_timeout_ms: 2_000,
            poll_interval_ms: 200,
        }
    }
}

/// Playing field, in millimetres.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BoardConfig {
    pub width: f64,
    pub height: f64,
    /// Distance at which a touch sensor counts as pressed against a surface.
    pub contact_margin: f64,
    pub floor: FloorColor,
    pub zones: Vec<ZoneConfig>,
    pub obstacles: Vec<RectConfig>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            width: 1800.0,
            height: 1200.0,
            contact_margin: 5.0,
            floor: FloorColor::White,
            zones: Vec::new(),
            obstacles: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RectConfig {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ZoneConfig {
    #[serde(flatten)]
    pub rect: RectConfig,
    pub color: FloorColor,
}

/// Floor colors, reported with the EV3 color sensor codes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FloorColor {
    None,
    Black,
    Blue,
    Green,
    Yellow,
    Red,
    White,
    Brown,
}

impl FloorColor {
    pub fn code(self) -> i64 {
        match self {
            FloorColor::None => 0,
            FloorColor::Black => 1,
            FloorColor::Blue => 2,
            FloorColor::Green => 3,
            FloorColor::Yellow => 4,
            FloorColor::Red => 5,
            FloorColor::White => 6,
            FloorColor::Brown => 7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RobotConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default = "default_wheel_base")]
    pub wheel_base: f64,
    pub bricks: Vec<BrickConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrickConfig {
    pub name: String,
    /// TCP port the brick listens on; 0 picks an ephemeral port.
    pub port: u16,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveSide {
    Left,
    Right,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceConfig {
    Motor {
        port: String,
        driver: Option<String>,
        side: Option<DriveSide>,
        #[serde(default = "default_wheel_diameter")]
        wheel_diameter: f64,
        max_speed: Option<f64>,
        coasting_subtraction: Option<f64>,
    },
    Arm {
        port: String,
        driver: Option<String>,
        max_speed: Option<f64>,
        coasting_subtraction: Option<f64>,
    },
    Speaker,
    Touch {
        port: String,
        driver: Option<String>,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Color {
        port: String,
        driver: Option<String>,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
    },
    Ultrasonic {
        port: String,
        driver: Option<String>,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default)]
        orientation_deg: f64,
    },
}

pub const SPEAKER_ADDRESS: &str = "ev3-ports:speaker";

impl DeviceConfig {
    /// Full port address, e.g. `ev3-ports:outA`.
    pub fn address(&self) -> String {
        match self {
            DeviceConfig::Motor { port, .. }
            | DeviceConfig::Arm { port, .. }
            | DeviceConfig::Touch { port, .. }
            | DeviceConfig::Color { port, .. }
            | DeviceConfig::Ultrasonic { port, .. } => normalize_port(port),
            DeviceConfig::Speaker => SPEAKER_ADDRESS.to_string(),
        }
    }

    /// Driver name reported during discovery, defaulting per device type.
    pub fn driver(&self) -> String {
        let explicit = match self {
            DeviceConfig::Motor { driver, .. }
            | DeviceConfig::Arm { driver, .. }
            | DeviceConfig::Touch { driver, .. }
            | DeviceConfig::Color { driver, .. }
            | DeviceConfig::Ultrasonic { driver, .. } => driver.clone(),
            DeviceConfig::Speaker => None,
        };
        explicit.unwrap_or_else(|| self.default_driver().to_string())
    }

    fn default_driver(&self) -> &'static str {
        match self {
            DeviceConfig::Motor { .. } => "lego-ev3-l-motor",
            DeviceConfig::Arm { .. } => "lego-ev3-m-motor",
            DeviceConfig::Speaker => "ev3-speaker",
            DeviceConfig::Touch { .. } => "lego-ev3-touch",
            DeviceConfig::Color { .. } => "lego-ev3-color",
            DeviceConfig::Ultrasonic { .. } => "lego-ev3-us",
        }
    }
}

fn default_wheel_base() -> f64 {
    120.0
}

fn default_wheel_diameter() -> f64 {
    56.0
}

pub fn load_config(path: impl AsRef<Path>) -> Result<WorldConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    WorldConfig::from_toml(&content)
}

impl WorldConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.fps == 0 {
            return Err(ConfigError::Invalid("fps must be positive".into()));
        }
        if !sim.coasting_subtraction.is_finite() || sim.coasting_subtraction <= 0.0 {
            return Err(ConfigError::Invalid(
                "coasting_subtraction must be positive".into(),
            ));
        }
        if sim.message_size < 64 {
            return Err(ConfigError::Invalid(
                "message_size must be at least 64 bytes".into(),
            ));
        }
        if self.board.width <= 0.0 || self.board.height <= 0.0 {
            return Err(ConfigError::Invalid("board must have a positive size".into()));
        }
        if self.robots.is_empty() {
            return Err(ConfigError::Invalid("at least one robot is required".into()));
        }

        let mut ports = HashSet::new();
        for robot in &self.robots {
            if robot.wheel_base <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "robot {}: wheel_base must be positive",
                    robot.name
                )));
            }
            for brick in &robot.bricks {
                if brick.port != 0 && !ports.insert(brick.port) {
                    return Err(ConfigError::Invalid(format!(
                        "port {} is used by more than one brick",
                        brick.port
                    )));
                }
                self.validate_devices(brick)?;
            }
        }
        Ok(())
    }

    fn validate_devices(&self, brick: &BrickConfig) -> Result<(), ConfigError> {
        let mut addresses = HashSet::new();
        for device in &brick.devices {
            let address = device.address();
            if !addresses.insert(address.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "brick {}: {} is configured twice",
                    brick.name, address
                )));
            }
            match device {
                DeviceConfig::Motor {
                    wheel_diameter,
                    coasting_subtraction,
                    ..
                } => {
                    if *wheel_diameter <= 0.0 {
                        return Err(ConfigError::Invalid(format!(
                            "brick {}: {} needs a positive wheel_diameter",
                            brick.name, address
                        )));
                    }
                    check_coasting(&brick.name, &address, *coasting_subtraction)?;
                }
                DeviceConfig::Arm {
                    coasting_subtraction,
                    ..
                } => check_coasting(&brick.name, &address, *coasting_subtraction)?,
                _ => {}
            }
        }
        Ok(())
    }
}

fn check_coasting(brick: &str, address: &str, value: Option<f64>) -> Result<(), ConfigError> {
    match value {
        Some(v) if !v.is_finite() || v <= 0.0 => Err(ConfigError::Invalid(format!(
            "brick {}: {} has a non-positive coasting_subtraction",
            brick, address
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [simulation]
        fps = 60

        [board]
        width = 1000.0
        height = 800.0

        [[board.zones]]
        x = 0.0
        y = 0.0
        width = 100.0
        height = 100.0
        color = "black"

        [[robots]]
        name = "rover"
        x = 500.0
        y = 400.0

        [[robots.bricks]]
        name = "main"
        port = 6840

        [[robots.bricks.devices]]
        type = "motor"
        port = "outA"
        side = "left"

        [[robots.bricks.devices]]
        type = "arm"
        port = "outC"

        [[robots.bricks.devices]]
        type = "speaker"

        [[robots.bricks.devices]]
        type = "ultrasonic"
        port = "in4"
        orientation_deg = 90.0
    "#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = WorldConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.simulation.fps, 60);
        assert_eq!(config.simulation.host, "127.0.0.1");
        assert_eq!(config.board.zones[0].color, FloorColor::Black);
        assert_eq!(config.board.floor, FloorColor::White);

        let robot = &config.robots[0];
        assert_eq!(robot.wheel_base, 120.0);
        let devices = &robot.bricks[0].devices;
        assert_eq!(devices.len(), 4);
        assert_eq!(devices[0].address(), "ev3-ports:outA");
        assert_eq!(devices[0].driver(), "lego-ev3-l-motor");
        assert_eq!(devices[1].driver(), "lego-ev3-m-motor");
        assert_eq!(devices[2].address(), SPEAKER_ADDRESS);
        match &devices[0] {
            DeviceConfig::Motor { wheel_diameter, side, .. } => {
                assert_eq!(*wheel_diameter, 56.0);
                assert_eq!(*side, Some(DriveSide::Left));
            }
            other => panic!("unexpected device {:?}", other),
        }
    }

    #[test]
    fn rejects_zero_fps() {
        let text = SAMPLE.replace("fps = 60", "fps = 0");
        assert!(matches!(
            WorldConfig::from_toml(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_duplicate_ports_on_a_brick() {
        let text = format!(
            "{}\n[[robots.bricks.devices]]\ntype = \"touch\"\nport = \"ev3-ports:outA\"\n",
            SAMPLE
        );
        let err = WorldConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("configured twice"));
    }

    #[test]
    fn rejects_shared_listen_port() {
        let text = format!(
            "{}\n[[robots.bricks]]\nname = \"second\"\nport = 6840\n",
            SAMPLE
        );
        let err = WorldConfig::from_toml(&text).unwrap_err();
        assert!(err.to_string().contains("more than one brick"));
    }

    #[test]
    fn unknown_device_type_fails_to_parse() {
        let text = format!(
            "{}\n[[robots.bricks.devices]]\ntype = \"laser\"\nport = \"in1\"\n",
            SAMPLE
        );
        assert!(matches!(
            WorldConfig::from_toml(&text),
            Err(ConfigError::Parse(_))
        ));
    }
}
