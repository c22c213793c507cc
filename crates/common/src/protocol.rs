//! JSON command protocol spoken between control programs and the simulator.
//!
//! Every message is a JSON object carrying a `type` discriminator. On the
//! socket each message travels in a fixed-size frame, right-padded with `#`
//! bytes; the padding is stripped again before decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Byte used to pad frames up to the configured message size.
pub const FRAME_PAD: u8 = b'#';

pub const DEFAULT_MESSAGE_SIZE: usize = 512;

const KNOWN_TYPES: [&str; 6] = [
    "RotateCommand",
    "StopCommand",
    "SoundCommand",
    "LedCommand",
    "DataRequest",
    "ConfigRequest",
];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty message")]
    Empty,

    #[error("message is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no `type` field")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("payload of {len} bytes exceeds frame size {max}")]
    Oversized { len: usize, max: usize },

    #[error("payload contains the reserved framing byte '#'")]
    ReservedByte,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Halt policy applied when a motor finishes (or is told to stop).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopAction {
    Coast,
    Brake,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotateCommand {
    pub address: String,
    pub speed: f64,
    pub distance: f64,
    pub stop_action: StopAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopCommand {
    pub address: String,
    pub speed: f64,
    pub stop_action: StopAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundCommand {
    pub message: String,
    pub duration: f64,
    #[serde(rename = "soundType")]
    pub sound_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedCommand {
    pub address: String,
    pub brightness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRequest {
    #[serde(default)]
    pub kwargs: DeviceQuery,
    pub class_name: String,
}

/// Keyword arguments a control program passes when looking up a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceQuery {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub driver_name: Option<DriverName>,
}

/// A driver filter: either one driver name or a list of acceptable ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DriverName {
    One(String),
    Any(Vec<String>),
}

impl DriverName {
    pub fn matches(&self, driver: &str) -> bool {
        match self {
            DriverName::One(name) => name == driver,
            DriverName::Any(names) => names.iter().any(|n| n == driver),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    RotateCommand(RotateCommand),
    StopCommand(StopCommand),
    SoundCommand(SoundCommand),
    LedCommand(LedCommand),
    DataRequest(DataRequest),
    ConfigRequest(ConfigRequest),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::RotateCommand(_) => "RotateCommand",
            Command::StopCommand(_) => "StopCommand",
            Command::SoundCommand(_) => "SoundCommand",
            Command::LedCommand(_) => "LedCommand",
            Command::DataRequest(_) => "DataRequest",
            Command::ConfigRequest(_) => "ConfigRequest",
        }
    }

    /// Whether the sender waits for a `{"value": ...}` reply.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Command::SoundCommand(_) | Command::LedCommand(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub value: Value,
}

impl Response {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { value: value.into() }
    }
}

/// Removes every framing byte from a received buffer.
pub fn strip_framing(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().copied().filter(|b| *b != FRAME_PAD).collect()
}

pub fn decode(bytes: &[u8]) -> Result<Command> {
    let payload = strip_framing(bytes);
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::Empty);
    }

    let raw: Value = serde_json::from_slice(&payload)?;
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    Ok(serde_json::from_value(raw)?)
}

pub fn encode_command(command: &Command) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(command)?)
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(response)?)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let payload = strip_framing(bytes);
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_slice(&payload)?)
}

/// Pads a payload with `#` up to exactly `size` bytes.
pub fn frame(payload: &[u8], size: usize) -> Result<Vec<u8>> {
    if payload.contains(&FRAME_PAD) {
        return Err(ProtocolError::ReservedByte);
    }
    if payload.len() > size {
        return Err(ProtocolError::Oversized {
            len: payload.len(),
            max: size,
        });
    }
    let mut framed = Vec::with_capacity(size);
    framed.extend_from_slice(payload);
    framed.resize(size, FRAME_PAD);
    Ok(framed)
}
