use crate::vec::{fixed, Vec2};
use crate::{AVATAR_HALF_EXTENT, AVATAR_SPEED, CLIENT_SPAWN, HOST_SPAWN, PHYSICS_STEP_SECS};
use crate::{WORLD_HEIGHT, WORLD_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKey {
    Left,
    Right,
    Up,
    Down,
}

impl MoveKey {
    pub fn token(&self) -> &'static str {
        match self {
            MoveKey::Left => "l",
            MoveKey::Right => "r",
            MoveKey::Up => "u",
            MoveKey::Down => "d",
        }
    }

    pub fn from_token(token: &str) -> Option<MoveKey> {
        match token {
            "l" => Some(MoveKey::Left),
            "r" => Some(MoveKey::Right),
            "u" => Some(MoveKey::Up),
            "d" => Some(MoveKey::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSample {
    pub keys: Vec<MoveKey>,
    pub time: f64,
    pub seq: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Bounds {
    pub fn for_half_extents(half: f64) -> Self {
        Self {
            x_min: half,
            x_max: WORLD_WIDTH - half,
            y_min: half,
            y_max: WORLD_HEIGHT - half,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

pub const ROLES: [Role; 2] = [Role::Host, Role::Client];

impl Role {
    pub fn index(&self) -> usize {
        match self {
            Role::Host => 0,
            Role::Client => 1,
        }
    }

    pub fn peer(&self) -> Role {
        match self {
            Role::Host => Role::Client,
            Role::Client => Role::Host,
        }
    }

    pub fn spawn(&self) -> Vec2 {
        match self {
            Role::Host => HOST_SPAWN,
            Role::Client => CLIENT_SPAWN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Avatar {
    pub pos: Vec2,
    pub prev_pos: Vec2,
    pub predicted: Vec2,
    pub half_extents: f64,
    pub limits: Bounds,
    pub inputs: Vec<InputSample>,
    pub last_input_seq: u32,
    pub last_input_time: f64,
}

impl Avatar {
    pub fn new(spawn: Vec2) -> Self {
        Self {
            pos: spawn,
            prev_pos: spawn,
            predicted: spawn,
            half_extents: AVATAR_HALF_EXTENT,
            limits: Bounds::for_half_extents(AVATAR_HALF_EXTENT),
            inputs: Vec::new(),
            last_input_seq: 0,
            last_input_time: 0.0,
        }
    }

    pub fn push_input(&mut self, sample: InputSample) {
        // Stale and duplicate sequences are dropped outright
        if sample.seq <= self.last_input_seq || self.inputs.iter().any(|s| s.seq == sample.seq) {
            return;
        }
        self.inputs.push(sample);
        // Sort by sequence to handle out-of-order packet delivery
        self.inputs.sort_by_key(|s| s.seq);
    }

    pub fn take_direction(&mut self) -> (i32, i32) {
        let dir = summed_direction(&self.inputs, self.last_input_seq);
        let newest = self
            .inputs
            .iter()
            .filter(|s| s.seq > self.last_input_seq)
            .last();
        if let Some(sample) = newest {
            self.last_input_seq = sample.seq;
            self.last_input_time = sample.time;
        }
        dir
    }

    pub fn clamp_to_bounds(&mut self) {
        self.pos.x = fixed(self.pos.x.clamp(self.limits.x_min, self.limits.x_max), 4);
        self.pos.y = fixed(self.pos.y.clamp(self.limits.y_min, self.limits.y_max), 4);
    }

    pub fn reset_to(&mut self, spawn: Vec2) {
        self.pos = spawn;
        self.prev_pos = spawn;
        self.predicted = spawn;
        self.inputs.clear();
    }
}

pub fn summed_direction(samples: &[InputSample], after_seq: u32) -> (i32, i32) {
    let mut x_dir = 0;
    let mut y_dir = 0;
    for sample in samples {
        if sample.seq <= after_seq {
            continue;
        }
        for key in &sample.keys {
            match key {
                MoveKey::Left => x_dir -= 1,
                MoveKey::Right => x_dir += 1,
                MoveKey::Up => y_dir -= 1,
                MoveKey::Down => y_dir += 1,
            }
        }
    }
    (x_dir, y_dir)
}

pub fn movement_vector(x_dir: i32, y_dir: i32) -> Vec2 {
    Vec2 {
        x: fixed(x_dir as f64 * AVATAR_SPEED * PHYSICS_STEP_SECS, 3),
        y: fixed(y_dir as f64 * AVATAR_SPEED * PHYSICS_STEP_SECS, 3),
    }
}

#[derive(Debug, Clone)]
pub struct AvatarPair {
    avatars: [Avatar; 2],
}

impl AvatarPair {
    pub fn new() -> Self {
        Self {
            avatars: [
                Avatar::new(Role::Host.spawn()),
                Avatar::new(Role::Client.spawn()),
            ],
        }
    }

    pub fn get(&self, role: Role) -> &Avatar {
        &self.avatars[role.index()]
    }

    pub fn get_mut(&mut self, role: Role) -> &mut Avatar {
        &mut self.avatars[role.index()]
    }
}

impl Default for AvatarPair {
    fn default() -> Self {
        Self::new()
    }
}
