//! # Movement Client Library
//!
//! This library provides the client side of the two-player movement demo. It
//! samples scripted input, predicts the local avatar ahead of the server,
//! interpolates the remote avatar from buffered snapshots, and reconciles
//! everything against the authoritative state the server broadcasts.
//!
//! ## Architecture Overview
//!
//! The client is built around a predictive netcode loop that keeps motion
//! responsive and smooth despite real network latency. Three mechanisms
//! cooperate every frame:
//!
//! ### Local Prediction
//! Each sampled input is queued locally and transmitted immediately. The
//! displayed position of the local avatar is recomputed by folding every
//! not-yet-acknowledged input onto the last server-confirmed position, so a
//! key press moves the avatar on the very frame it happens.
//!
//! ### Server Reconciliation
//! Every snapshot carries the sequence number of the last input the server
//! folded in. The client discards its queued inputs up to that sequence,
//! snaps the confirmed base to the server's reported position, and replays
//! the still-pending inputs on top. Corrections land on the confirmed base,
//! not on the display, so prediction errors heal without visible rubber
//! banding.
//!
//! ### Remote Interpolation
//! The remote avatar is rendered on a delayed timeline, a fixed offset behind
//! the estimated server clock. Snapshots are buffered in a ring and the pair
//! bracketing the delayed render time is blended, optionally smoothed with an
//! exponential follow, so remote motion stays continuous even though state
//! only arrives once per server tick.
//!
//! A naive mode bypasses all three and teleports avatars to each snapshot as
//! it arrives. It exists as the worse baseline the rest of this crate is
//! measured against.
//!
//! ## Module Organization
//!
//! ### Engine Module (`engine`)
//! The simulation core, free of any I/O:
//! - Input sequencing and the pending-input queue
//! - Prediction, reconciliation, and the snapshot ring
//! - Interpolation timeline and smoothing
//! - Clock sync, ping statistics, and connection labels
//!
//! ### Input Module (`input`)
//! Scripted input sources standing in for a keyboard:
//! - A square patrol route, a seeded random wander, and an idle source
//! - Deterministic per seed so runs can be reproduced
//!
//! ### Network Module (`network`)
//! The UDP transport driving the engine:
//! - Socket setup and the connect/disconnect lifecycle events
//! - Frame, ping, and status timers multiplexed with the socket
//! - Dispatch of decoded server messages into the engine
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::engine::EngineOptions;
//! use client::input::source_for;
//! use client::network::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = EngineOptions::default();
//!     let source = source_for("square", 7);
//!     let mut client = Client::new("127.0.0.1:4004", options, source).await?;
//!     client.run(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Philosophy
//!
//! ### Responsiveness First
//! The local avatar never waits for the server. Prediction applies inputs on
//! the frame they are sampled; the server's role is to correct, not to grant
//! permission.
//!
//! ### Deterministic Simulation
//! The client folds inputs with the exact fixed-point arithmetic the server
//! uses, from the shared crate, so a correct prediction lands on the same
//! number the server later confirms and reconciliation becomes a no-op.
//!
//! ### Graceful Degradation
//! Lost snapshots widen the interpolation bracket instead of freezing it,
//! late acknowledgements are skipped until a later snapshot resolves them,
//! and an out-of-range render time degrades to holding the oldest buffered
//! state.

pub mod engine;
pub mod input;
pub mod network;
