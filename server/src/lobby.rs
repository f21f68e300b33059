//! Connection registry, session placement, and command routing
//!
//! This module is the hub between the socket loop and the sessions. It covers:
//! - Connection lifecycle (connect, explicit disconnect, timeout sweep)
//! - Seating connections into sessions (first vacancy wins, otherwise host)
//! - Routing decoded commands: inputs, pings, color changes, latency requests
//! - The artificial input-latency gate used to demonstrate lag handling
//!
//! All lobby state is owned by a single task. Every entry point takes the
//! caller's measured `now_ms`, so the whole lobby can be driven with injected
//! times in tests without touching a real clock or socket.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use log::{debug, info, warn};
use shared::{
    decode_client_datagram, ClientEvent, ClientMsg, Clock, FromClient, InputSample, ServerEvent,
    ServerMsg,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::{queue_datagram, Outgoing, Participant, Session, TickTimer};

/// Connections silent for longer than this are dropped by the sweep.
const PEER_TIMEOUT_MS: u64 = 5000;
/// Cadence of the timeout sweep.
const SWEEP_INTERVAL_MS: u64 = 1000;

/// Book-keeping for one connected peer
#[derive(Debug)]
struct Connection {
    /// Address datagrams from this peer arrive from
    addr: SocketAddr,
    /// Session this connection is currently seated in
    session: Option<Uuid>,
    /// When the last decodable command arrived, for the timeout sweep
    last_seen_ms: u64,
}

/// Holds input commands for a configured delay before delivery
///
/// Emulates a laggy uplink for demos: inputs are stamped with a release
/// deadline when they arrive and handed back in arrival order once the front
/// entry's deadline passes. Release stays strictly FIFO even if the delay is
/// reconfigured while entries are in flight.
struct LatencyGate {
    delay_ms: u64,
    queue: VecDeque<(u64, Uuid, InputSample)>,
}

impl LatencyGate {
    fn new() -> Self {
        Self {
            delay_ms: 0,
            queue: VecDeque::new(),
        }
    }

    /// True while inputs must pass through the gate, either because a delay
    /// is configured or because earlier entries are still queued.
    fn active(&self) -> bool {
        self.delay_ms > 0 || !self.queue.is_empty()
    }

    fn set_delay(&mut self, ms: u64) {
        self.delay_ms = ms;
    }

    fn push(&mut self, now_ms: u64, conn: Uuid, sample: InputSample) {
        self.queue.push_back((now_ms + self.delay_ms, conn, sample));
    }

    /// Pops every entry whose deadline has passed, in arrival order, stopping
    /// at the first entry that is still pending.
    fn take_due(&mut self, now_ms: u64) -> Vec<(Uuid, InputSample)> {
        let mut due = Vec::new();
        while let Some((deadline, _, _)) = self.queue.front() {
            if *deadline > now_ms {
                break;
            }
            if let Some((_, conn, sample)) = self.queue.pop_front() {
                due.push((conn, sample));
            }
        }
        due
    }

    fn next_release_ms(&self) -> Option<u64> {
        self.queue.front().map(|(deadline, _, _)| *deadline)
    }
}

/// Central registry pairing connections into sessions and routing commands
///
/// The lobby owns every session and connection record. The network driver
/// feeds it decoded datagrams through [`Lobby::on_datagram`] and wakes it via
/// [`Lobby::poll`] whenever the earliest deadline from
/// [`Lobby::next_deadline_ms`] passes.
pub struct Lobby {
    /// Live sessions indexed by their id
    sessions: HashMap<Uuid, Session>,
    /// Connected peers indexed by their assigned id
    connections: HashMap<Uuid, Connection>,
    /// Reverse lookup from socket address to connection id
    by_addr: HashMap<SocketAddr, Uuid>,
    /// Logical server clock, advanced by the driver's measured elapsed time
    clock: Clock,
    /// Artificial delay applied to input commands
    input_gate: LatencyGate,
    /// Schedules the 1 Hz connection timeout sweep
    sweep_timer: TickTimer,
    /// Outbound datagram queue drained by the socket sender task
    out: mpsc::UnboundedSender<Outgoing>,
}

impl Lobby {
    pub fn new(out: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self {
            sessions: HashMap::new(),
            connections: HashMap::new(),
            by_addr: HashMap::new(),
            clock: Clock::new(),
            input_gate: LatencyGate::new(),
            sweep_timer: TickTimer::new(SWEEP_INTERVAL_MS, 0),
            out,
        }
    }

    /// Feeds the logical clock with elapsed wall time measured by the driver.
    pub fn advance_clock(&mut self, dt: f64) {
        self.clock.advance(dt);
    }

    pub fn server_time(&self) -> f64 {
        self.clock.seconds()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Dispatches one raw datagram from the socket.
    ///
    /// JSON envelopes handle the connection lifecycle; everything else must
    /// decode to a dot-delimited command from an already-known address.
    /// Malformed or unattributable datagrams are dropped with a debug log.
    pub fn on_datagram(&mut self, now_ms: u64, addr: SocketAddr, text: &str) {
        match decode_client_datagram(text) {
            Some(FromClient::Event(ClientEvent::Connect)) => self.on_connect(now_ms, addr),
            Some(FromClient::Event(ClientEvent::Disconnect)) => {
                match self.by_addr.get(&addr).copied() {
                    Some(conn) => self.on_disconnect(now_ms, conn),
                    None => debug!("Disconnect event from unknown address {}", addr),
                }
            }
            Some(FromClient::Msg(msg)) => match self.by_addr.get(&addr).copied() {
                Some(conn) => self.on_msg(now_ms, conn, msg),
                None => debug!("Dropping command from unknown address {}", addr),
            },
            None => debug!("Dropping malformed datagram from {}", addr),
        }
    }

    /// Admits a new connection and seats it into a session.
    ///
    /// A repeated connect from the same address tears the old connection down
    /// first, mirroring a client restart. The peer learns its assigned id
    /// from the `onconnected` event before any session greeting arrives.
    fn on_connect(&mut self, now_ms: u64, addr: SocketAddr) {
        if let Some(existing) = self.by_addr.get(&addr).copied() {
            info!("Replacing existing connection {} from {}", existing, addr);
            self.on_disconnect(now_ms, existing);
        }
        let conn = Uuid::new_v4();
        self.connections.insert(
            conn,
            Connection {
                addr,
                session: None,
                last_seen_ms: now_ms,
            },
        );
        self.by_addr.insert(addr, conn);
        if let Ok(json) = serde_json::to_string(&ServerEvent::Connected { id: conn }) {
            queue_datagram(&self.out, addr, json);
        }
        info!("Connection {} established from {}", conn, addr);
        self.place(now_ms, conn);
    }

    /// Removes a connection and tears down the session it was seated in.
    fn on_disconnect(&mut self, now_ms: u64, conn: Uuid) {
        let connection = match self.connections.remove(&conn) {
            Some(connection) => connection,
            None => return,
        };
        self.by_addr.remove(&connection.addr);
        info!("Connection {} from {} closed", conn, connection.addr);
        if let Some(session_id) = connection.session {
            self.destroy_session(now_ms, session_id, conn);
        }
    }

    /// Seats a connection into the first session with a vacancy, or makes it
    /// host a fresh one (greeted with `s.h.<time>`).
    fn place(&mut self, now_ms: u64, conn: Uuid) {
        let participant = match self.connections.get(&conn) {
            Some(connection) => Participant {
                conn,
                addr: connection.addr,
            },
            None => return,
        };
        let server_time = self.clock.seconds();

        let mut joined = None;
        for (id, session) in self.sessions.iter_mut() {
            if session.try_join(participant, server_time, &self.out) {
                joined = Some(*id);
                break;
            }
        }

        let session_id = match joined {
            Some(id) => {
                info!("Connection {} joined session {}", conn, id);
                id
            }
            None => {
                let session = Session::new(participant, now_ms);
                let id = session.id;
                let greeting = ServerMsg::Hosting(server_time).encode();
                queue_datagram(&self.out, participant.addr, greeting);
                info!("Connection {} is hosting new session {}", conn, id);
                self.sessions.insert(id, session);
                id
            }
        };

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.session = Some(session_id);
        }
    }

    /// Stops a session and re-seats its surviving participant, if any.
    fn destroy_session(&mut self, now_ms: u64, session_id: Uuid, leaving: Uuid) {
        let mut session = match self.sessions.remove(&session_id) {
            Some(session) => session,
            None => return,
        };
        let remaining = session.stop(leaving, &self.out);
        info!("Session {} torn down", session_id);
        if let Some(participant) = remaining {
            if let Some(connection) = self.connections.get_mut(&participant.conn) {
                connection.session = None;
            }
            self.place(now_ms, participant.conn);
        }
    }

    /// Routes one decoded command from a known connection.
    fn on_msg(&mut self, now_ms: u64, conn: Uuid, msg: ClientMsg) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.last_seen_ms = now_ms;
        }
        match msg {
            ClientMsg::Input(sample) => {
                if self.input_gate.active() {
                    self.input_gate.push(now_ms, conn, sample);
                } else {
                    self.deliver_input(conn, sample);
                }
            }
            ClientMsg::Ping(stamp) => {
                if let Some(connection) = self.connections.get(&conn) {
                    let pong = ServerMsg::Pong(stamp).encode();
                    queue_datagram(&self.out, connection.addr, pong);
                }
            }
            ClientMsg::Color(color) => self.relay_color(conn, color),
            ClientMsg::FakeLatency(ms) => {
                warn!("Connection {} set artificial input latency to {}ms", conn, ms);
                // Gate deadlines are whole milliseconds
                self.input_gate.set_delay(ms.round() as u64);
            }
        }
    }

    /// Hands an input sample to the sender's avatar queue. Inputs for a
    /// connection that lost its session in the meantime are logged and
    /// dropped; the next snapshot acknowledgement sorts the client out.
    fn deliver_input(&mut self, conn: Uuid, sample: InputSample) {
        let session_id = match self.connections.get(&conn).and_then(|c| c.session) {
            Some(id) => id,
            None => {
                debug!("Dropping input from {} with no live session", conn);
                return;
            }
        };
        if let Some(session) = self.sessions.get_mut(&session_id) {
            if let Some(role) = session.role_of(conn) {
                session.handle_input(role, sample);
            }
        }
    }

    /// Relays a color announcement to the sender's session peer.
    fn relay_color(&mut self, conn: Uuid, color: String) {
        let session_id = match self.connections.get(&conn).and_then(|c| c.session) {
            Some(id) => id,
            None => return,
        };
        if let Some(session) = self.sessions.get(&session_id) {
            if let Some(role) = session.role_of(conn) {
                if let Some(peer) = session.participant(role.peer()) {
                    let relay = ServerMsg::PeerColor(color).encode();
                    queue_datagram(&self.out, peer.addr, relay);
                }
            }
        }
    }

    /// Runs everything whose deadline has passed: gated input release, due
    /// session ticks, and the 1 Hz timeout sweep.
    pub fn poll(&mut self, now_ms: u64) {
        for (conn, sample) in self.input_gate.take_due(now_ms) {
            self.deliver_input(conn, sample);
        }
        let server_time = self.clock.seconds();
        for session in self.sessions.values_mut() {
            session.poll(now_ms, server_time, &self.out);
        }
        if self.sweep_timer.due(now_ms) {
            self.sweep_timer.reschedule(now_ms);
            self.check_timeouts(now_ms);
        }
    }

    /// Earliest pending deadline across session ticks, gated inputs, and the
    /// timeout sweep, so the driver can sleep precisely.
    pub fn next_deadline_ms(&self) -> u64 {
        let mut deadline = self.sweep_timer.next_deadline_ms();
        for session in self.sessions.values() {
            deadline = deadline.min(session.next_tick_ms());
        }
        if let Some(release) = self.input_gate.next_release_ms() {
            deadline = deadline.min(release);
        }
        deadline
    }

    /// Drops connections that have been silent past the timeout, notifying
    /// them with a disconnect event on the way out in case they still listen.
    fn check_timeouts(&mut self, now_ms: u64) {
        let expired: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|(_, connection)| {
                now_ms.saturating_sub(connection.last_seen_ms) > PEER_TIMEOUT_MS
            })
            .map(|(conn, _)| *conn)
            .collect();
        for conn in expired {
            if let Some(connection) = self.connections.get(&conn) {
                warn!(
                    "Connection {} timed out after {}ms of silence",
                    conn, PEER_TIMEOUT_MS
                );
                if let Ok(json) = serde_json::to_string(&ServerEvent::Disconnect) {
                    queue_datagram(&self.out, connection.addr, json);
                }
            }
            self.on_disconnect(now_ms, conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{decode_server_datagram, FromServer, Role, Snapshot};

    const CONNECT: &str = r#"{"event":"connect"}"#;
    const DISCONNECT: &str = r#"{"event":"disconnect"}"#;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn new_lobby() -> (Lobby, mpsc::UnboundedReceiver<Outgoing>) {
        let (out, rx) = mpsc::unbounded_channel();
        (Lobby::new(out), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
        let mut datagrams = Vec::new();
        while let Ok(outgoing) = rx.try_recv() {
            datagrams.push(outgoing);
        }
        datagrams
    }

    fn snapshots(sent: &[Outgoing]) -> Vec<Snapshot> {
        sent.iter()
            .filter_map(|outgoing| match decode_server_datagram(&outgoing.text) {
                Some(FromServer::Event(ServerEvent::Update(snapshot))) => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    fn input(seq: u32) -> InputSample {
        InputSample {
            keys: vec![shared::MoveKey::Right],
            time: 0.1,
            seq,
        }
    }

    fn paired_lobby() -> (Lobby, mpsc::UnboundedReceiver<Outgoing>, SocketAddr, SocketAddr) {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        let b = addr(6002);
        lobby.on_datagram(0, a, CONNECT);
        lobby.on_datagram(0, b, CONNECT);
        drain(&mut rx);
        (lobby, rx, a, b)
    }

    #[test]
    fn test_first_connect_hosts_a_session() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);

        assert_eq!(lobby.connection_count(), 1);
        assert_eq!(lobby.session_count(), 1);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert!(sent[0].text.contains(r#""event":"onconnected""#));
        assert_eq!(sent[1].text, "s.h.0-016");
        assert!(sent.iter().all(|outgoing| outgoing.addr == a));
    }

    #[test]
    fn test_second_connect_fills_the_vacancy() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        let b = addr(6002);
        lobby.on_datagram(0, a, CONNECT);
        drain(&mut rx);
        lobby.on_datagram(0, b, CONNECT);

        assert_eq!(lobby.session_count(), 1);
        let sent = drain(&mut rx);
        // onconnected + s.j to the joiner, the same s.r to both
        assert_eq!(sent.len(), 4);
        assert!(sent[0].text.contains(r#""event":"onconnected""#));
        assert_eq!(sent[0].addr, b);
        assert!(sent[1].text.starts_with("s.j."));
        assert_eq!(sent[1].addr, b);
        assert!(sent[2].text.starts_with("s.r."));
        assert_eq!(sent[2].addr, a);
        assert_eq!(sent[3].text, sent[2].text);
        assert_eq!(sent[3].addr, b);
    }

    #[test]
    fn test_third_connect_hosts_a_second_session() {
        let (mut lobby, mut rx, _a, _b) = paired_lobby();
        let c = addr(6003);
        lobby.on_datagram(0, c, CONNECT);

        assert_eq!(lobby.session_count(), 2);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].text, "s.h.0-016");
        assert_eq!(sent[1].addr, c);
    }

    #[test]
    fn test_input_from_host_moves_host_avatar() {
        let (mut lobby, mut rx, a, _) = paired_lobby();
        lobby.on_datagram(0, a, "i.r.0-016.1");
        lobby.poll(0);

        let sent = drain(&mut rx);
        let broadcast = snapshots(&sent);
        assert_eq!(broadcast.len(), 2);
        assert_eq!(broadcast[0], broadcast[1]);
        assert_approx_eq!(broadcast[0].position(Role::Host).x, 21.8, 1e-9);
        assert_approx_eq!(broadcast[0].position(Role::Client).x, 500.0, 1e-9);
        assert_eq!(broadcast[0].last_input_seqs, [1, 0]);
    }

    #[test]
    fn test_disconnect_reseats_the_survivor() {
        let (mut lobby, mut rx, a, b) = paired_lobby();
        lobby.on_datagram(100, a, DISCONNECT);

        assert_eq!(lobby.connection_count(), 1);
        assert_eq!(lobby.session_count(), 1);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "s.e");
        assert_eq!(sent[0].addr, b);
        assert!(sent[1].text.starts_with("s.h."));
        assert_eq!(sent[1].addr, b);
    }

    #[test]
    fn test_reconnect_replaces_the_old_connection() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        lobby.on_datagram(50, a, CONNECT);

        assert_eq!(lobby.connection_count(), 1);
        assert_eq!(lobby.session_count(), 1);
        let sent = drain(&mut rx);
        // two full greetings, old session torn down in between
        assert_eq!(sent.len(), 4);
    }

    #[test]
    fn test_ping_echoes_the_stamp() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        drain(&mut rx);

        lobby.on_datagram(5, a, "p.123456");
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "s.p.123456");
        assert_eq!(sent[0].addr, a);
    }

    #[test]
    fn test_color_relays_to_the_peer_only() {
        let (mut lobby, mut rx, a, b) = paired_lobby();
        lobby.on_datagram(5, a, "c.#cc8822");

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "s.c.#cc8822");
        assert_eq!(sent[0].addr, b);
    }

    #[test]
    fn test_color_without_peer_goes_nowhere() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        drain(&mut rx);

        lobby.on_datagram(5, a, "c.#cc8822");
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_gate_delays_input_delivery() {
        let (mut lobby, mut rx, a, b) = paired_lobby();
        lobby.on_datagram(0, a, "l.100");
        lobby.on_datagram(0, a, "i.r.0-016.1");
        lobby.on_datagram(0, a, "p.7");
        lobby.on_datagram(0, a, "c.#cc8822");

        lobby.poll(0);
        let sent = drain(&mut rx);
        // Only inputs wait at the gate; ping and color pass straight through
        assert_eq!(sent[0].text, "s.p.7");
        assert_eq!(sent[0].addr, a);
        assert_eq!(sent[1].text, "s.c.#cc8822");
        assert_eq!(sent[1].addr, b);
        let early = snapshots(&sent);
        assert_eq!(early.len(), 2);
        assert_approx_eq!(early[0].position(Role::Host).x, 20.0, 1e-9);

        lobby.poll(100);
        let late = snapshots(&drain(&mut rx));
        assert!(!late.is_empty());
        assert_approx_eq!(late[0].position(Role::Host).x, 21.8, 1e-9);
    }

    #[test]
    fn test_fractional_latency_request_rounds_to_whole_ms() {
        let (mut lobby, mut rx, a, _) = paired_lobby();
        lobby.on_datagram(0, a, "l.62.5");
        lobby.on_datagram(0, a, "i.r.0-016.1");

        lobby.poll(62);
        let early = snapshots(&drain(&mut rx));
        assert!(!early.is_empty());
        assert_approx_eq!(early[0].position(Role::Host).x, 20.0, 1e-9);

        lobby.poll(63);
        let late = snapshots(&drain(&mut rx));
        assert!(!late.is_empty());
        assert_approx_eq!(late[0].position(Role::Host).x, 21.8, 1e-9);
    }

    #[test]
    fn test_gate_releases_in_arrival_order() {
        let mut gate = LatencyGate::new();
        let conn = Uuid::new_v4();
        gate.set_delay(100);
        gate.push(0, conn, input(1));
        // Lowering the delay must not let later entries overtake the queue
        gate.set_delay(10);
        gate.push(5, conn, input(2));

        assert_eq!(gate.next_release_ms(), Some(100));
        assert!(gate.take_due(50).is_empty());
        let due = gate.take_due(100);
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].1.seq, 1);
        assert_eq!(due[1].1.seq, 2);
        assert_eq!(gate.next_release_ms(), None);
    }

    #[test]
    fn test_silent_connection_is_swept() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        drain(&mut rx);

        lobby.poll(6000);
        assert_eq!(lobby.connection_count(), 0);
        assert_eq!(lobby.session_count(), 0);
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains(r#""event":"disconnect""#));
        assert_eq!(sent[0].addr, a);
    }

    #[test]
    fn test_ping_keeps_a_connection_alive() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        lobby.poll(3000);
        lobby.on_datagram(5500, a, "p.5500");
        lobby.poll(6500);

        assert_eq!(lobby.connection_count(), 1);
        drain(&mut rx);
    }

    #[test]
    fn test_commands_from_unknown_addresses_are_dropped() {
        let (mut lobby, mut rx) = new_lobby();
        lobby.on_datagram(0, addr(6009), "i.r.0-016.1");
        lobby.on_datagram(0, addr(6009), "l.100");
        lobby.on_datagram(0, addr(6009), DISCONNECT);

        assert_eq!(lobby.connection_count(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_malformed_datagrams_are_dropped() {
        let (mut lobby, mut rx) = new_lobby();
        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        drain(&mut rx);

        lobby.on_datagram(5, a, "garbage");
        lobby.on_datagram(5, a, "i.q.0-016.1");
        lobby.on_datagram(5, a, "{broken json");

        assert_eq!(lobby.connection_count(), 1);
        assert_eq!(lobby.session_count(), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_next_deadline_tracks_sessions_and_gate() {
        let (mut lobby, _rx) = new_lobby();
        // Only the sweep timer exists at first
        assert_eq!(lobby.next_deadline_ms(), 0);

        let a = addr(6001);
        lobby.on_datagram(0, a, CONNECT);
        lobby.poll(0);
        // Sweep rescheduled to 1000, session tick to 45
        assert_eq!(lobby.next_deadline_ms(), 45);
    }
}
