//! Conversion of motor commands into per-frame displacement jobs.
//!
//! A run of `distance` degrees at `speed` degrees per second lasts
//! `round(|distance| / |speed| * fps)` frames, each moving the same share of
//! the distance. A coasting stop appends a tail that bleeds the per-frame
//! displacement off by a fixed amount each frame until the motor is still.

use thiserror::Error;

use crate::protocol::StopAction;

/// Longest run accepted from a single command: one hour of simulated time.
const MAX_RUN_SECS: f64 = 3600.0;

#[derive(Debug, Error, PartialEq)]
pub enum MotorError {
    #[error("motor speed must be non-zero")]
    ZeroSpeed,

    #[error("coasting subtraction must be positive, got {0}")]
    InvalidCoasting(f64),

    #[error("frame rate must be positive")]
    InvalidFps,

    #[error("{0} must be a finite number")]
    NonFinite(&'static str),

    #[error("run of {frames} frames exceeds the allowed maximum of {max}")]
    RunTooLong { frames: f64, max: f64 },
}

pub type Result<T> = std::result::Result<T, MotorError>;

/// How motor degrees translate into the displacement unit a job carries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorGeometry {
    /// Wheel motors move the chassis `circumference * degrees / 360` units.
    Wheel { circumference: f64 },
    /// Arm motors work in degrees, mounted with inverted sign.
    Arm,
}

impl MotorGeometry {
    pub fn wheel(diameter: f64) -> Self {
        MotorGeometry::Wheel {
            circumference: std::f64::consts::PI * diameter,
        }
    }

    pub fn to_units(&self, degrees: f64) -> f64 {
        match self {
            MotorGeometry::Wheel { circumference } => circumference * degrees / 360.0,
            MotorGeometry::Arm => -degrees,
        }
    }

    pub fn to_degrees(&self, units: f64) -> f64 {
        match self {
            MotorGeometry::Wheel { circumference } => units * 360.0 / circumference,
            MotorGeometry::Arm => -units,
        }
    }
}

/// Per-frame displacement schedule produced for one motor command.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorPlan {
    pub frames: usize,
    pub per_frame: f64,
    pub coast: Vec<f64>,
    fps: u32,
}

impl MotorPlan {
    pub fn coast_frames(&self) -> usize {
        self.coast.len()
    }

    pub fn total_frames(&self) -> usize {
        self.frames + self.coast.len()
    }

    /// Simulated seconds until the motor comes to rest.
    pub fn run_time(&self) -> f64 {
        self.total_frames() as f64 / self.fps as f64
    }

    /// Every job of the plan in execution order: the run phase then the tail.
    pub fn jobs(&self) -> impl Iterator<Item = f64> + '_ {
        std::iter::repeat(self.per_frame)
            .take(self.frames)
            .chain(self.coast.iter().copied())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MotorCommandProcessor {
    fps: u32,
    coasting_sub: f64,
}

impl MotorCommandProcessor {
    pub fn new(fps: u32, coasting_sub: f64) -> Result<Self> {
        if fps == 0 {
            return Err(MotorError::InvalidFps);
        }
        if !coasting_sub.is_finite() || coasting_sub <= 0.0 {
            return Err(MotorError::InvalidCoasting(coasting_sub));
        }
        Ok(Self { fps, coasting_sub })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Most frames a single command may schedule.
    pub fn max_frames(&self) -> f64 {
        MAX_RUN_SECS * self.fps as f64
    }

    /// Rounds an exact frame count, refusing runs longer than `max_frames`.
    pub fn checked_frames(&self, exact: f64) -> Result<usize> {
        let max = self.max_frames();
        if exact.is_nan() || exact > max {
            return Err(MotorError::RunTooLong { frames: exact, max });
        }
        Ok(exact.round() as usize)
    }

    fn tail(&self, per_frame: f64, stop_action: StopAction) -> Result<Vec<f64>> {
        match stop_action {
            StopAction::Coast => {
                self.checked_frames(per_frame.abs() / self.coasting_sub)?;
                Ok(coasting_tail(per_frame, self.coasting_sub))
            }
            StopAction::Brake | StopAction::Hold => Ok(Vec::new()),
        }
    }

    /// Same frame rate with a different coasting subtraction.
    pub fn with_coasting(&self, coasting_sub: f64) -> Result<Self> {
        Self::new(self.fps, coasting_sub)
    }

    /// Plans a run of `distance` degrees at `speed` degrees per second.
    pub fn plan_rotate(
        &self,
        speed: f64,
        distance: f64,
        geometry: MotorGeometry,
        stop_action: StopAction,
    ) -> Result<MotorPlan> {
        if !speed.is_finite() {
            return Err(MotorError::NonFinite("speed"));
        }
        if !distance.is_finite() {
            return Err(MotorError::NonFinite("distance"));
        }
        if speed == 0.0 {
            return Err(MotorError::ZeroSpeed);
        }

        let frames = self.checked_frames(distance.abs() / speed.abs() * self.fps as f64)?;

        // The direction comes from the distance; a negative speed with a
        // negative distance still runs backwards.
        let per_frame = if frames == 0 {
            0.0
        } else {
            geometry.to_units(distance) / frames as f64
        };

        let coast = self.tail(per_frame, stop_action)?;

        Ok(MotorPlan {
            frames,
            per_frame,
            coast,
            fps: self.fps,
        })
    }

    /// Plans a stop from `speed` degrees per second: only a coasting tail.
    pub fn plan_stop(
        &self,
        speed: f64,
        geometry: MotorGeometry,
        stop_action: StopAction,
    ) -> Result<MotorPlan> {
        if !speed.is_finite() {
            return Err(MotorError::NonFinite("speed"));
        }

        let per_frame = geometry.to_units(speed / self.fps as f64);
        let coast = self.tail(per_frame, stop_action)?;

        Ok(MotorPlan {
            frames: 0,
            per_frame,
            coast,
            fps: self.fps,
        })
    }
}

/// Decelerating tail starting from `per_frame`.
///
/// Holds `round(|per_frame| / coasting_sub)` entries. Magnitudes shrink by
/// `coasting_sub` per frame, never cross zero, keep the sign of `per_frame`,
/// and the last entry is exactly zero.
pub fn coasting_tail(per_frame: f64, coasting_sub: f64) -> Vec<f64> {
    if !per_frame.is_finite() || !coasting_sub.is_finite() || coasting_sub <= 0.0 {
        return Vec::new();
    }

    let count = (per_frame.abs() / coasting_sub).round() as usize;
    let sign = per_frame.signum();
    let mut tail: Vec<f64> = (1..=count)
        .map(|i| sign * (per_frame.abs() - coasting_sub * i as f64).max(0.0))
        .collect();
    if let Some(last) = tail.last_mut() {
        *last = 0.0;
    }
    tail
}
