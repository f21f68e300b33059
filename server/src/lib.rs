//! # Movement Server Library
//!
//! This library provides the authoritative server for the two-player movement
//! demo. It owns the canonical avatar positions, folds client inputs into the
//! simulation at a fixed cadence, and broadcasts state snapshots that clients
//! reconcile their predictions against.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every session runs the definitive copy of the movement physics. Clients
//! predict locally for responsiveness, but the positions in the 45ms snapshot
//! broadcast always win; a client that disagrees is the one that corrects.
//!
//! ### Session Matchmaking
//! Connections are paired into two-seat sessions. The first arrival hosts and
//! waits; the next arrival joins and the session goes live. When either side
//! leaves, the survivor is told the session ended and is immediately reseated
//! through the same scan-or-host path, so a lone player is always waiting in
//! a fresh session rather than stranded in a dead one.
//!
//! ### State Broadcasting
//! Active sessions broadcast one snapshot per tick carrying both avatar
//! positions, the last acknowledged input sequence for each seat, and the
//! server clock. The acknowledgement is what lets clients discard confirmed
//! inputs and replay only the still-pending ones.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All lobby and session state is owned by one task. Datagrams and timer
//! deadlines are multiplexed through a single `tokio::select!`, so there are
//! no locks and no interleaving hazards; a session tick and an input for that
//! session can never race.
//!
//! ### Deadline-Driven Timers
//! Session ticks, the artificial-latency gate, and the connection timeout
//! sweep all expose their next deadline. The loop sleeps until the earliest
//! one instead of polling on a short interval. Tick rescheduling is
//! drift-corrected: the next deadline advances from the previous deadline,
//! not from whenever the loop happened to wake.
//!
//! ### UDP Text Protocol
//! One datagram is one UTF-8 message in the compact dot-delimited format
//! defined in `shared::wire` (JSON envelopes for lifecycle events). Loss of a
//! snapshot is tolerable by design; the next tick supersedes it.
//!
//! ## Module Organization
//!
//! - [`session`]: the two-seat session state machine, its tick timer, and the
//!   authoritative physics fold.
//! - [`lobby`]: connection registry, session placement, message routing, the
//!   input latency gate, and the timeout sweep.
//! - [`network`]: UDP socket front end driving the lobby, plus the spawned
//!   sender task that drains the outbound datagram queue.
//! - [`http`]: small `axum` endpoint serving the bootstrap avatar template.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Bind the realtime socket and run the lobby loop forever
//!     let mut server = Server::new("0.0.0.0:4004").await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod lobby;
pub mod network;
pub mod session;
