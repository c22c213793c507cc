use common::{BrickId, ConfigError, MotorError, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("no device at {address} on {brick}")]
    UnknownDevice { brick: BrickId, address: String },

    #[error("{address} on {brick} is not a {expected}")]
    WrongDeviceKind {
        brick: BrickId,
        address: String,
        expected: &'static str,
    },

    #[error("{0} is not part of this world")]
    UnknownBrick(BrickId),

    #[error("{0} has no speaker")]
    NoSpeaker(BrickId),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("sensor {address} produced no fresh value within {waited_ms}ms")]
    SensorTimeout { address: String, waited_ms: u64 },

    #[error("sensor gate closed")]
    GateClosed,

    #[error("motor command rejected: {0}")]
    Motor(#[from] MotorError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
