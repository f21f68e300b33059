pub mod clock;
pub mod sim;
pub mod vec;
pub mod wire;

pub use clock::Clock;
pub use sim::{
    movement_vector, summed_direction, Avatar, AvatarPair, Bounds, InputSample, MoveKey, Role,
    ROLES,
};
pub use vec::{fixed, lerp, Vec2};
pub use wire::{
    decode_client_datagram, decode_server_datagram, ClientEvent, ClientMsg, FromClient, FromServer,
    ServerEvent, ServerMsg, Snapshot,
};

pub const WORLD_WIDTH: f64 = 720.0;
pub const WORLD_HEIGHT: f64 = 480.0;
pub const AVATAR_SIZE: f64 = 16.0;
pub const AVATAR_HALF_EXTENT: f64 = 8.0;
pub const AVATAR_SPEED: f64 = 120.0;
pub const PHYSICS_STEP_SECS: f64 = 0.015;
pub const TICK_INTERVAL_MS: u64 = 45;
pub const CLOCK_START_SECS: f64 = 0.016;
pub const CLOCK_STEP_SECS: f64 = 0.004;
pub const TIME_START_SECS: f64 = 0.01;

pub const HOST_SPAWN: Vec2 = Vec2 { x: 20.0, y: 20.0 };
pub const CLIENT_SPAWN: Vec2 = Vec2 { x: 500.0, y: 200.0 };
