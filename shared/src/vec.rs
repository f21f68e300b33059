use serde::{Deserialize, Serialize};

pub fn fixed(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    let t = fixed(t.clamp(0.0, 1.0), 3);
    fixed(from + t * (to - from), 3)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(&self, other: &Vec2) -> Vec2 {
        Vec2 {
            x: fixed(self.x + other.x, 3),
            y: fixed(self.y + other.y, 3),
        }
    }

    pub fn lerp(&self, target: &Vec2, t: f64) -> Vec2 {
        Vec2 {
            x: lerp(self.x, target.x, t),
            y: lerp(self.y, target.y, t),
        }
    }
}
