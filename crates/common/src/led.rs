//! Brick status LEDs.
//!
//! Each brick has two LEDs (`led0` left, `led1` right), each driven by a red
//! and a green channel. The displayed color is the palette entry closest to
//! the (red, green) brightness pair by Manhattan distance.

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LedSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedChannel {
    Red,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedColor {
    Amber,
    Black,
    Red,
    Green,
    Orange,
    Yellow,
}

const PALETTE: [(LedColor, f64, f64); 6] = [
    (LedColor::Amber, 1.0, 1.0),
    (LedColor::Black, 0.0, 0.0),
    (LedColor::Red, 1.0, 0.0),
    (LedColor::Green, 0.0, 1.0),
    (LedColor::Orange, 1.0, 0.5),
    (LedColor::Yellow, 0.1, 1.0),
];

/// Nearest palette color; a channel not yet set counts as 0.
pub fn nearest_color(red: Option<f64>, green: Option<f64>) -> LedColor {
    let red = red.unwrap_or(0.0);
    let green = green.unwrap_or(0.0);

    let mut best = PALETTE[0];
    let mut best_distance = f64::INFINITY;
    for entry in PALETTE {
        let distance = (entry.1 - red).abs() + (entry.2 - green).abs();
        if distance < best_distance {
            best = entry;
            best_distance = distance;
        }
    }
    best.0
}

/// A parsed `led<0|1>:<red|green>:brick-status` address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedAddress {
    pub side: LedSide,
    pub channel: LedChannel,
}

impl LedAddress {
    pub fn parse(address: &str) -> Result<Self, ProtocolError> {
        let mut parts = address.split(':');
        let side = match parts.next() {
            Some("led0") => LedSide::Left,
            Some("led1") => LedSide::Right,
            _ => return Err(ProtocolError::InvalidAddress(address.to_string())),
        };
        let channel = match parts.next() {
            Some("red") => LedChannel::Red,
            Some("green") => LedChannel::Green,
            _ => return Err(ProtocolError::InvalidAddress(address.to_string())),
        };
        Ok(Self { side, channel })
    }
}

/// Last brightness seen on each channel of one LED.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LedChannels {
    pub red: Option<f64>,
    pub green: Option<f64>,
}

impl LedChannels {
    pub fn set(&mut self, channel: LedChannel, brightness: f64) {
        match channel {
            LedChannel::Red => self.red = Some(brightness),
            LedChannel::Green => self.green = Some(brightness),
        }
    }

    /// The resolved color, once both channels have been written.
    pub fn color(&self) -> Option<LedColor> {
        match (self.red, self.green) {
            (Some(_), Some(_)) => Some(nearest_color(self.red, self.green)),
            _ => None,
        }
    }
}
