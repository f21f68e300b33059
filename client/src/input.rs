//! Scripted input sources driving the headless client

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::MoveKey;

/// Produces the movement keys held down at a given moment
pub trait InputSource {
    fn sample(&mut self, now_secs: f64) -> Vec<MoveKey>;
}

/// Never presses anything
pub struct Idle;

impl InputSource for Idle {
    fn sample(&mut self, _now_secs: f64) -> Vec<MoveKey> {
        Vec::new()
    }
}

/// Walks a repeating right, down, left, up square
pub struct SquarePath {
    leg_secs: f64,
}

impl SquarePath {
    pub fn new(leg_secs: f64) -> Self {
        Self { leg_secs }
    }
}

impl InputSource for SquarePath {
    fn sample(&mut self, now_secs: f64) -> Vec<MoveKey> {
        let cycle = self.leg_secs * 4.0;
        let phase = now_secs.rem_euclid(cycle);
        match (phase / self.leg_secs) as usize {
            0 => vec![MoveKey::Right],
            1 => vec![MoveKey::Down],
            2 => vec![MoveKey::Left],
            _ => vec![MoveKey::Up],
        }
    }
}

/// Holds a seeded-random direction for a short spell, sometimes idling
pub struct Wander {
    rng: StdRng,
    held: Vec<MoveKey>,
    until_secs: f64,
}

impl Wander {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            held: Vec::new(),
            until_secs: 0.0,
        }
    }
}

impl InputSource for Wander {
    fn sample(&mut self, now_secs: f64) -> Vec<MoveKey> {
        if now_secs >= self.until_secs {
            const DIRECTIONS: [MoveKey; 4] =
                [MoveKey::Left, MoveKey::Right, MoveKey::Up, MoveKey::Down];
            self.held = if self.rng.gen_bool(0.2) {
                Vec::new()
            } else {
                let mut keys = vec![DIRECTIONS[self.rng.gen_range(0..4)]];
                if self.rng.gen_bool(0.3) {
                    let second = DIRECTIONS[self.rng.gen_range(0..4)];
                    if !keys.contains(&second) {
                        keys.push(second);
                    }
                }
                keys
            };
            self.until_secs = now_secs + self.rng.gen_range(0.2..1.5);
        }
        self.held.clone()
    }
}

/// Builds the source selected on the command line
pub fn source_for(pattern: &str, seed: u64) -> Box<dyn InputSource + Send> {
    match pattern {
        "idle" => Box::new(Idle),
        "wander" => Box::new(Wander::new(seed)),
        _ => Box::new(SquarePath::new(2.0)),
    }
}
