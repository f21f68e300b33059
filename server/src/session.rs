//! Two-seat session state machine and the authoritative physics tick.

use std::net::SocketAddr;

use log::{error, info};
use shared::{
    movement_vector, Avatar, AvatarPair, InputSample, Role, ServerEvent, ServerMsg, Snapshot,
    ROLES, TICK_INTERVAL_MS,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Datagram queued for the socket sender task.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub addr: SocketAddr,
    pub text: String,
}

pub fn queue_datagram(out: &mpsc::UnboundedSender<Outgoing>, addr: SocketAddr, text: String) {
    if let Err(e) = out.send(Outgoing { addr, text }) {
        error!("Failed to queue datagram for {}: {}", addr, e);
    }
}

/// Drift-corrected repeating deadline.
///
/// The first tick is due immediately. Each reschedule advances from the
/// previous deadline rather than from the wakeup time, so a late wakeup does
/// not shift the whole cadence; it only clamps forward when the loop has
/// fallen more than a full interval behind.
#[derive(Debug, Clone)]
pub struct TickTimer {
    interval_ms: u64,
    next_at: u64,
}

impl TickTimer {
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            next_at: now_ms,
        }
    }

    pub fn due(&self, now_ms: u64) -> bool {
        now_ms >= self.next_at
    }

    pub fn next_deadline_ms(&self) -> u64 {
        self.next_at
    }

    pub fn reschedule(&mut self, now_ms: u64) {
        self.next_at = (self.next_at + self.interval_ms).max(now_ms);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Host seated, waiting for a second participant.
    Awaiting,
    /// Both seats filled, simulation running.
    Active,
    /// Torn down, kept only until the lobby drops it.
    Ended,
}

/// A connection seated in a session.
#[derive(Debug, Clone, Copy)]
pub struct Participant {
    pub conn: Uuid,
    pub addr: SocketAddr,
}

/// One hosted pairing of two participants sharing a simulated world.
pub struct Session {
    pub id: Uuid,
    seats: [Option<Participant>; 2],
    avatars: AvatarPair,
    phase: SessionPhase,
    timer: TickTimer,
}

impl Session {
    pub fn new(host: Participant, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            seats: [Some(host), None],
            avatars: AvatarPair::new(),
            phase: SessionPhase::Awaiting,
            timer: TickTimer::new(TICK_INTERVAL_MS, now_ms),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn has_vacancy(&self) -> bool {
        self.phase == SessionPhase::Awaiting && self.seats.iter().any(|seat| seat.is_none())
    }

    pub fn role_of(&self, conn: Uuid) -> Option<Role> {
        ROLES
            .into_iter()
            .find(|role| self.seats[role.index()].map(|p| p.conn) == Some(conn))
    }

    pub fn participant(&self, role: Role) -> Option<&Participant> {
        self.seats[role.index()].as_ref()
    }

    pub fn avatar(&self, role: Role) -> &Avatar {
        self.avatars.get(role)
    }

    pub fn next_tick_ms(&self) -> u64 {
        self.timer.next_deadline_ms()
    }

    /// Seats a second participant and starts the simulation.
    ///
    /// Both avatars are reseeded at their spawn points and any queued inputs
    /// from the waiting period are discarded. The joiner learns who hosts via
    /// `s.j`, then both sides receive the same `s.r` restart marker.
    pub fn try_join(
        &mut self,
        joiner: Participant,
        server_time: f64,
        out: &mpsc::UnboundedSender<Outgoing>,
    ) -> bool {
        if self.phase != SessionPhase::Awaiting {
            return false;
        }
        let vacant = ROLES
            .into_iter()
            .find(|role| self.seats[role.index()].is_none());
        let role = match vacant {
            Some(role) => role,
            None => return false,
        };
        self.seats[role.index()] = Some(joiner);
        for seat_role in ROLES {
            self.avatars.get_mut(seat_role).reset_to(seat_role.spawn());
        }
        if let Some(host) = self.seats[Role::Host.index()] {
            let joined = ServerMsg::Joined(host.conn.to_string()).encode();
            queue_datagram(out, joiner.addr, joined);
        }
        let ready = ServerMsg::Ready(server_time).encode();
        for seat in self.seats.iter().flatten() {
            queue_datagram(out, seat.addr, ready.clone());
        }
        self.phase = SessionPhase::Active;
        info!("Session {} is live with both seats filled", self.id);
        true
    }

    pub fn handle_input(&mut self, role: Role, sample: InputSample) {
        self.avatars.get_mut(role).push_input(sample);
    }

    /// Runs one authoritative physics step and broadcasts the result.
    ///
    /// Queued inputs collapse into one net direction per avatar, so several
    /// packets that arrived since the last tick move the avatar a single
    /// step, not one step each.
    pub fn tick(&mut self, server_time: f64, out: &mpsc::UnboundedSender<Outgoing>) {
        if self.phase != SessionPhase::Active {
            return;
        }
        for role in ROLES {
            let avatar = self.avatars.get_mut(role);
            avatar.prev_pos = avatar.pos;
            let (x_dir, y_dir) = avatar.take_direction();
            avatar.pos = avatar.prev_pos.add(&movement_vector(x_dir, y_dir));
            avatar.clamp_to_bounds();
            avatar.inputs.clear();
        }
        let snapshot = Snapshot {
            positions: [
                self.avatars.get(Role::Host).pos,
                self.avatars.get(Role::Client).pos,
            ],
            last_input_seqs: [
                self.avatars.get(Role::Host).last_input_seq,
                self.avatars.get(Role::Client).last_input_seq,
            ],
            t: server_time,
        };
        if let Ok(json) = serde_json::to_string(&ServerEvent::Update(snapshot)) {
            for seat in self.seats.iter().flatten() {
                queue_datagram(out, seat.addr, json.clone());
            }
        }
    }

    /// Ticks if the deadline passed; the timer keeps its cadence even while
    /// the session is still awaiting a second participant.
    pub fn poll(&mut self, now_ms: u64, server_time: f64, out: &mpsc::UnboundedSender<Outgoing>) {
        if self.timer.due(now_ms) {
            self.timer.reschedule(now_ms);
            self.tick(server_time, out);
        }
    }

    /// Tears the session down because `leaving` is gone.
    ///
    /// If the session was live, the survivor is told the session ended and
    /// handed back to the caller for re-matchmaking.
    pub fn stop(
        &mut self,
        leaving: Uuid,
        out: &mpsc::UnboundedSender<Outgoing>,
    ) -> Option<Participant> {
        let was_active = self.phase == SessionPhase::Active;
        self.phase = SessionPhase::Ended;
        let mut remaining = None;
        for seat in self.seats.iter_mut() {
            if let Some(p) = seat.take() {
                if p.conn != leaving {
                    remaining = Some(p);
                }
            }
        }
        if !was_active {
            return None;
        }
        if let Some(p) = remaining {
            queue_datagram(out, p.addr, ServerMsg::Ended.encode());
        }
        remaining
    }
}
