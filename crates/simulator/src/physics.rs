//! Rigid-body seam of the simulator.
//!
//! The update loop only needs to feed wheel speeds in, advance time, and read
//! poses back; [`PhysicsSpace`] captures that. [`KinematicSpace`] is the
//! built-in differential-drive model: no mass, no collision response, bodies
//! are simply kept on the board.

pub type BodyId = usize;

/// Position in millimetres and heading in radians, CCW from +x.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    /// Maps a point from the body frame (x forward, y left) to the world.
    pub fn transform(&self, local: (f64, f64)) -> (f64, f64) {
        let (sin, cos) = self.heading.sin_cos();
        (
            self.x + local.0 * cos - local.1 * sin,
            self.y + local.0 * sin + local.1 * cos,
        )
    }
}

pub trait PhysicsSpace: Send {
    fn add_body(&mut self, pose: Pose, wheel_base: f64) -> BodyId;

    /// Linear speeds of the left and right wheel, in units per second.
    fn set_wheel_speeds(&mut self, body: BodyId, left: f64, right: f64);

    fn set_pose(&mut self, body: BodyId, pose: Pose);

    fn step(&mut self, dt: f64);

    fn pose(&self, body: BodyId) -> Option<Pose>;
}

#[derive(Debug, Clone)]
struct Body {
    pose: Pose,
    wheel_base: f64,
    left: f64,
    right: f64,
}

/// Differential-drive kinematics inside a `width` x `height` field.
#[derive(Debug, Clone)]
pub struct KinematicSpace {
    bodies: Vec<Body>,
    width: f64,
    height: f64,
}

impl KinematicSpace {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            bodies: Vec::new(),
            width,
            height,
        }
    }
}

impl PhysicsSpace for KinematicSpace {
    fn add_body(&mut self, pose: Pose, wheel_base: f64) -> BodyId {
        self.bodies.push(Body {
            pose,
            wheel_base,
            left: 0.0,
            right: 0.0,
        });
        self.bodies.len() - 1
    }

    fn set_wheel_speeds(&mut self, body: BodyId, left: f64, right: f64) {
        if let Some(body) = self.bodies.get_mut(body) {
            body.left = left;
            body.right = right;
        }
    }

    fn set_pose(&mut self, body: BodyId, pose: Pose) {
        if let Some(body) = self.bodies.get_mut(body) {
            body.pose = pose;
        }
    }

    fn step(&mut self, dt: f64) {
        for body in &mut self.bodies {
            let linear = (body.left + body.right) / 2.0;
            let angular = (body.right - body.left) / body.wheel_base;
            let pose = body.pose;

            let (x, y, heading) = if angular.abs() < 1e-9 {
                (
                    pose.x + linear * pose.heading.cos() * dt,
                    pose.y + linear * pose.heading.sin() * dt,
                    pose.heading,
                )
            } else {
                // Arc of radius linear / angular around the instantaneous centre.
                let radius = linear / angular;
                let heading = pose.heading + angular * dt;
                (
                    pose.x + radius * (heading.sin() - pose.heading.sin()),
                    pose.y + radius * (pose.heading.cos() - heading.cos()),
                    heading,
                )
            };

            body.pose = Pose {
                x: x.clamp(0.0, self.width),
                y: y.clamp(0.0, self.height),
                heading: normalize_angle(heading),
            };
        }
    }

    fn pose(&self, body: BodyId) -> Option<Pose> {
        self.bodies.get(body).map(|b| b.pose)
    }
}

/// Wraps an angle into (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}
