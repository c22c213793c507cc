use common::config::{BoardConfig, FloorColor, RectConfig};

const EPSILON: f64 = 1e-9;

/// Axis-aligned rectangle with its origin at the lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn contains(&self, point: (f64, f64)) -> bool {
        point.0 >= self.x
            && point.0 <= self.x + self.width
            && point.1 >= self.y
            && point.1 <= self.y + self.height
    }

    /// Euclidean distance from `point` to the rectangle, 0 inside it.
    pub fn distance_to(&self, point: (f64, f64)) -> f64 {
        let dx = (self.x - point.0).max(point.0 - (self.x + self.width)).max(0.0);
        let dy = (self.y - point.1).max(point.1 - (self.y + self.height)).max(0.0);
        dx.hypot(dy)
    }

    /// Slab test. Returns the distance along the unit direction `dir` at
    /// which the ray enters the rectangle (0 when it starts inside).
    pub fn ray_entry(&self, origin: (f64, f64), dir: (f64, f64)) -> Option<f64> {
        let mut near = 0.0_f64;
        let mut far = f64::INFINITY;
        let axes = [
            (origin.0, dir.0, self.x, self.x + self.width),
            (origin.1, dir.1, self.y, self.y + self.height),
        ];
        for (o, d, lo, hi) in axes {
            if d.abs() < EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }
            let t1 = (lo - o) / d;
            let t2 = (hi - o) / d;
            near = near.max(t1.min(t2));
            far = far.min(t1.max(t2));
        }
        (near <= far).then_some(near)
    }
}

impl From<RectConfig> for Rect {
    fn from(r: RectConfig) -> Self {
        Rect {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }
    }
}

/// Static playing field: floor colors and obstacles.
#[derive(Debug, Clone)]
pub struct Board {
    bounds: Rect,
    contact_margin: f64,
    floor: FloorColor,
    zones: Vec<(Rect, FloorColor)>,
    obstacles: Vec<Rect>,
}

impl Board {
    pub fn from_config(config: &BoardConfig) -> Self {
        Self {
            bounds: Rect {
                x: 0.0,
                y: 0.0,
                width: config.width,
                height: config.height,
            },
            contact_margin: config.contact_margin,
            floor: config.floor,
            zones: config
                .zones
                .iter()
                .map(|z| (Rect::from(z.rect), z.color))
                .collect(),
            obstacles: config.obstacles.iter().copied().map(Rect::from).collect(),
        }
    }

    pub fn width(&self) -> f64 {
        self.bounds.width
    }

    pub fn height(&self) -> f64 {
        self.bounds.height
    }

    /// EV3 color code under `point`. Later zones are painted over earlier ones.
    pub fn color_at(&self, point: (f64, f64)) -> i64 {
        if !self.bounds.contains(point) {
            return FloorColor::None.code();
        }
        self.zones
            .iter()
            .rev()
            .find(|(rect, _)| rect.contains(point))
            .map_or(self.floor, |(_, color)| *color)
            .code()
    }

    /// True when `point` is within the contact margin of a wall or obstacle.
    pub fn in_contact(&self, point: (f64, f64)) -> bool {
        let b = &self.bounds;
        let to_wall = (point.0 - b.x)
            .min(b.x + b.width - point.0)
            .min(point.1 - b.y)
            .min(b.y + b.height - point.1);
        to_wall <= self.contact_margin
            || self
                .obstacles
                .iter()
                .any(|o| o.distance_to(point) <= self.contact_margin)
    }

    /// Distance from `origin` to the first wall or obstacle along `angle`.
    pub fn ray_distance(&self, origin: (f64, f64), angle: f64) -> f64 {
        let (sin, cos) = angle.sin_cos();
        let to_wall = self.distance_to_wall(origin, (cos, sin));
        self.obstacles
            .iter()
            .filter_map(|o| o.ray_entry(origin, (cos, sin)))
            .fold(to_wall, f64::min)
    }

    fn distance_to_wall(&self, origin: (f64, f64), dir: (f64, f64)) -> f64 {
        let b = &self.bounds;
        let axis = |o: f64, d: f64, lo: f64, hi: f64| {
            if d > EPSILON {
                (hi - o) / d
            } else if d < -EPSILON {
                (lo - o) / d
            } else {
                f64::INFINITY
            }
        };
        axis(origin.0, dir.0, b.x, b.x + b.width)
            .min(axis(origin.1, dir.1, b.y, b.y + b.height))
            .max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use common::config::ZoneConfig;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn board() -> Board {
        let config = BoardConfig {
            width: 1000.0,
            height: 500.0,
            contact_margin: 5.0,
            floor: FloorColor::White,
            zones: vec![
                ZoneConfig {
                    rect: RectConfig { x: 0.0, y: 0.0, width: 200.0, height: 200.0 },
                    color: FloorColor::Black,
                },
                ZoneConfig {
                    rect: RectConfig { x: 100.0, y: 100.0, width: 50.0, height: 50.0 },
                    color: FloorColor::Red,
                },
            ],
            obstacles: vec![RectConfig { x: 600.0, y: 200.0, width: 100.0, height: 100.0 }],
        };
        Board::from_config(&config)
    }

    #[test]
    fn floor_colors() {
        let board = board();
        assert_eq!(board.color_at((500.0, 400.0)), FloorColor::White.code());
        assert_eq!(board.color_at((50.0, 50.0)), FloorColor::Black.code());
        assert_eq!(board.color_at((120.0, 120.0)), FloorColor::Red.code());
        assert_eq!(board.color_at((-1.0, 10.0)), 0);
    }

    #[test]
    fn contact_with_walls_and_obstacles() {
        let board = board();
        assert!(board.in_contact((2.0, 250.0)));
        assert!(board.in_contact((597.0, 250.0)));
        assert!(board.in_contact((650.0, 250.0)));
        assert!(!board.in_contact((500.0, 250.0)));
    }

    #[test]
    fn ray_hits_nearest_surface() {
        let board = board();
        // Facing +x towards the obstacle.
        assert_relative_eq!(board.ray_distance((500.0, 250.0), 0.0), 100.0, epsilon = 1e-9);
        // Facing -x towards the left wall.
        assert_relative_eq!(board.ray_distance((500.0, 250.0), PI), 500.0, epsilon = 1e-9);
        // Facing +y, nothing but the top wall.
        assert_relative_eq!(board.ray_distance((500.0, 250.0), FRAC_PI_2), 250.0, epsilon = 1e-9);
        // Above the obstacle, looking along it.
        assert_relative_eq!(board.ray_distance((500.0, 400.0), 0.0), 500.0, epsilon = 1e-9);
    }

    #[test]
    fn ray_from_inside_obstacle_is_zero() {
        let board = board();
        assert_eq!(board.ray_distance((650.0, 250.0), 1.0), 0.0);
    }
}
