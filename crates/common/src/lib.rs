use serde::{Deserialize, Serialize};

pub mod config;
pub mod diagnostics;
pub mod led;
pub mod metrics;
pub mod motor;
pub mod protocol;

pub use config::{load_config, ConfigError, WorldConfig};
pub use diagnostics::SharedDiagnostics;
pub use led::{LedAddress, LedChannel, LedColor, LedSide};
pub use metrics::TickRecorder;
pub use motor::{MotorCommandProcessor, MotorError, MotorGeometry, MotorPlan};
pub use protocol::{Command, ProtocolError, Response, StopAction};

/// Prefix every EV3 port address carries on the wire.
pub const PORT_PREFIX: &str = "ev3-ports:";

/// Index of a simulated brick, assigned in configuration order across all robots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrickId(pub usize);

impl std::fmt::Display for BrickId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "brick{}", self.0)
    }
}

/// Expands a short port name (`outA`) to its full address (`ev3-ports:outA`).
pub fn normalize_port(port: &str) -> String {
    if port.starts_with(PORT_PREFIX) || port.contains(':') {
        port.to_string()
    } else {
        format!("{}{}", PORT_PREFIX, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_ports_gain_prefix() {
        assert_eq!(normalize_port("outA"), "ev3-ports:outA");
        assert_eq!(normalize_port("ev3-ports:in4"), "ev3-ports:in4");
        assert_eq!(normalize_port("led0:red:brick-status"), "led0:red:brick-status");
    }
}
