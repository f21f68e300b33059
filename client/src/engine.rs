use log::debug;
use shared::{
    fixed, movement_vector, summed_direction, Avatar, AvatarPair, ClientMsg, Clock, InputSample,
    MoveKey, Role, ServerMsg, Snapshot, Vec2, ROLES, TIME_START_SECS,
};
use std::collections::VecDeque;
use uuid::Uuid;

const SMOOTHING_RATE: f64 = 25.0;
const SNAPSHOTS_PER_SECOND: usize = 60;
const FPS_WINDOW_FRAMES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLabel {
    NotConnected,
    Connecting,
    Connected,
}

impl ConnectionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionLabel::NotConnected => "not-connected",
            ConnectionLabel::Connecting => "connecting",
            ConnectionLabel::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub naive: bool,
    pub prediction: bool,
    pub smoothing: bool,
    pub net_offset_ms: u64,
    pub buffer_secs: usize,
    pub color: String,
    pub fake_latency_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            naive: false,
            prediction: true,
            smoothing: true,
            net_offset_ms: 100,
            buffer_secs: 2,
            color: "#cc8822".to_string(),
            fake_latency_ms: 0,
        }
    }
}

struct FpsCounter {
    average: f64,
    acc: f64,
    frames: usize,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            average: 0.0,
            acc: 0.0,
            frames: 0,
        }
    }

    fn record(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let current = 1.0 / dt;
        self.acc += current;
        self.frames += 1;
        if self.frames >= FPS_WINDOW_FRAMES {
            self.average = self.acc / self.frames as f64;
            self.acc = current;
            self.frames = 1;
        }
    }
}

pub struct Engine {
    role: Role,
    label: ConnectionLabel,
    avatars: AvatarPair,
    // Last server-confirmed position of our own avatar
    confirmed: Vec2,
    input_seq: u32,
    clock: Clock,
    server_time: f64,
    client_time: f64,
    oldest_tick: f64,
    snapshots: VecDeque<Snapshot>,
    net_ping_ms: f64,
    net_latency_ms: f64,
    peer_color: Option<String>,
    my_id: Option<Uuid>,
    fps: FpsCounter,
    opts: EngineOptions,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        let role = Role::Client;
        Self {
            role,
            label: ConnectionLabel::NotConnected,
            avatars: AvatarPair::new(),
            confirmed: role.spawn(),
            input_seq: 0,
            clock: Clock::new(),
            server_time: TIME_START_SECS,
            client_time: TIME_START_SECS,
            oldest_tick: TIME_START_SECS,
            snapshots: VecDeque::new(),
            net_ping_ms: 0.0,
            net_latency_ms: 0.0,
            peer_color: None,
            my_id: None,
            fps: FpsCounter::new(),
            opts,
        }
    }

    pub fn begin_connect(&mut self) {
        self.label = ConnectionLabel::Connecting;
    }

    pub fn on_connected(&mut self, id: Uuid) {
        self.label = ConnectionLabel::Connected;
        self.my_id = Some(id);
        debug!("Assigned connection id {}", id);
    }

    pub fn on_transport_closed(&mut self) {
        self.label = ConnectionLabel::NotConnected;
    }

    pub fn on_server_msg(&mut self, now_ms: u64, msg: ServerMsg) -> Option<ClientMsg> {
        match msg {
            ServerMsg::Hosting(t) => {
                self.role = Role::Host;
                self.sync_clock(t);
                self.reset_positions();
                debug!("Hosting a session, server time {}", t);
                None
            }
            ServerMsg::Joined(host_id) => {
                self.role = Role::Client;
                self.reset_positions();
                debug!("Joined a session hosted by {}", host_id);
                None
            }
            ServerMsg::Ready(t) => {
                self.sync_clock(t);
                Some(ClientMsg::Color(self.opts.color.clone()))
            }
            ServerMsg::Ended => {
                debug!("Session ended, awaiting a new seat");
                None
            }
            ServerMsg::Pong(stamp) => {
                if let Ok(sent_ms) = stamp.parse::<f64>() {
                    self.net_ping_ms = now_ms as f64 - sent_ms;
                    self.net_latency_ms = self.net_ping_ms / 2.0;
                }
                None
            }
            ServerMsg::PeerColor(color) => {
                self.peer_color = Some(color);
                None
            }
        }
    }

    pub fn on_snapshot(&mut self, snapshot: Snapshot) {
        if !self.opts.naive {
            // A reordered snapshot would corrupt the time-ordered ring
            if let Some(newest) = self.snapshots.back() {
                if snapshot.t <= newest.t {
                    return;
                }
            }
        }

        self.server_time = snapshot.t;
        self.client_time = fixed(self.server_time - self.opts.net_offset_ms as f64 / 1000.0, 3);

        if self.opts.naive {
            for role in ROLES {
                self.avatars.get_mut(role).pos = snapshot.position(role);
            }
            return;
        }

        self.snapshots.push_back(snapshot);
        let cap = SNAPSHOTS_PER_SECOND * self.opts.buffer_secs;
        if self.snapshots.len() > cap {
            self.snapshots.pop_front();
        }
        if let Some(oldest) = self.snapshots.front() {
            self.oldest_tick = oldest.t;
        }
        self.reconcile();
    }

    pub fn frame(&mut self, raw_dt: f64, keys: Vec<MoveKey>) -> ClientMsg {
        self.clock.advance(raw_dt);
        let dt = fixed(raw_dt, 3);

        self.input_seq += 1;
        let sample = InputSample {
            keys,
            time: self.clock.seconds(),
            seq: self.input_seq,
        };
        // Naive mode never reconciles, so the pending queue would only grow
        if !self.opts.naive {
            self.avatars.get_mut(self.role).push_input(sample.clone());
            self.interpolate(dt);
            if self.opts.prediction {
                self.predict();
            }
        }

        self.fps.record(raw_dt);
        ClientMsg::Input(sample)
    }

    pub fn ping_msg(&self, now_ms: u64) -> ClientMsg {
        // Backdate the stamp so the simulated uplink delay shows in the estimate
        let stamp = now_ms.saturating_sub(self.opts.fake_latency_ms);
        ClientMsg::Ping(stamp.to_string())
    }

    fn sync_clock(&mut self, server_time: f64) {
        let estimate = fixed(server_time + self.net_latency_ms / 1000.0, 3);
        self.clock.set(estimate);
    }

    fn reset_positions(&mut self) {
        for role in ROLES {
            let spawn = role.spawn();
            self.avatars.get_mut(role).reset_to(spawn);
        }
        self.confirmed = self.role.spawn();
        self.snapshots.clear();
    }

    fn reconcile(&mut self) {
        let (server_pos, acked) = match self.snapshots.back() {
            Some(latest) => (latest.position(self.role), latest.last_input_seq(self.role)),
            None => return,
        };
        if acked == 0 {
            return;
        }

        let avatar = self.avatars.get_mut(self.role);
        let index = match avatar.inputs.iter().position(|s| s.seq == acked) {
            Some(index) => index,
            None => return,
        };

        let confirmed_sample = avatar.inputs[index].clone();
        avatar.inputs.drain(..=index);
        avatar.last_input_seq = confirmed_sample.seq;
        avatar.last_input_time = confirmed_sample.time;
        self.confirmed = server_pos;

        if self.opts.prediction {
            self.predict();
        }
    }

    fn predict(&mut self) {
        let confirmed = self.confirmed;
        let avatar = self.avatars.get_mut(self.role);
        let (x_dir, y_dir) = summed_direction(&avatar.inputs, avatar.last_input_seq);
        avatar.prev_pos = avatar.pos;
        avatar.predicted = confirmed.add(&movement_vector(x_dir, y_dir));
        avatar.pos = avatar.predicted;
        avatar.clamp_to_bounds();
    }

    fn interpolate(&mut self, dt: f64) {
        if self.snapshots.is_empty() {
            return;
        }
        let render_time = self.client_time;

        let (peer_target, own_target) = {
            let (previous, next) = bracket(&self.snapshots, render_time);
            let ratio = interp_ratio(previous.t, next.t, render_time);

            let peer = self.role.peer();
            let peer_target = previous.position(peer).lerp(&next.position(peer), ratio);
            let own_target = if self.opts.prediction {
                None
            } else {
                Some(previous.position(self.role).lerp(&next.position(self.role), ratio))
            };
            (peer_target, own_target)
        };

        self.follow(self.role.peer(), peer_target, dt);
        if let Some(target) = own_target {
            self.follow(self.role, target, dt);
        }
    }

    fn follow(&mut self, role: Role, target: Vec2, dt: f64) {
        let smoothing = self.opts.smoothing;
        let avatar = self.avatars.get_mut(role);
        if smoothing {
            avatar.pos = avatar.pos.lerp(&target, dt * SMOOTHING_RATE);
        } else {
            avatar.pos = target;
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn label(&self) -> ConnectionLabel {
        self.label
    }

    pub fn avatar(&self, role: Role) -> &Avatar {
        self.avatars.get(role)
    }

    pub fn my_id(&self) -> Option<Uuid> {
        self.my_id
    }

    pub fn peer_color(&self) -> Option<&str> {
        self.peer_color.as_deref()
    }

    pub fn local_time(&self) -> f64 {
        self.clock.seconds()
    }

    pub fn server_time(&self) -> f64 {
        self.server_time
    }

    pub fn client_time(&self) -> f64 {
        self.client_time
    }

    pub fn oldest_tick(&self) -> f64 {
        self.oldest_tick
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub fn ping_ms(&self) -> f64 {
        self.net_ping_ms
    }

    pub fn latency_ms(&self) -> f64 {
        self.net_latency_ms
    }

    pub fn fps_average(&self) -> f64 {
        self.fps.average
    }

    pub fn options(&self) -> &EngineOptions {
        &self.opts
    }
}

fn bracket(snapshots: &VecDeque<Snapshot>, render_time: f64) -> (&Snapshot, &Snapshot) {
    for i in 0..snapshots.len().saturating_sub(1) {
        let previous = &snapshots[i];
        let next = &snapshots[i + 1];
        if previous.t < render_time && render_time < next.t {
            return (previous, next);
        }
    }
    // No bracketing pair, hold on the oldest known state
    (&snapshots[0], &snapshots[0])
}

fn interp_ratio(previous_t: f64, next_t: f64, render_time: f64) -> f64 {
    let ratio = fixed((next_t - render_time) / (next_t - previous_t), 3);
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn snapshot(host: (f64, f64), client: (f64, f64), seqs: [u32; 2], t: f64) -> Snapshot {
        Snapshot {
            positions: [Vec2::new(host.0, host.1), Vec2::new(client.0, client.1)],
            last_input_seqs: seqs,
            t,
        }
    }

    fn plain_engine() -> Engine {
        Engine::new(EngineOptions {
            smoothing: false,
            ..EngineOptions::default()
        })
    }

    #[test]
    fn test_connection_label_transitions() {
        let mut engine = plain_engine();
        assert_eq!(engine.label().as_str(), "not-connected");
        engine.begin_connect();
        assert_eq!(engine.label().as_str(), "connecting");
        let id = Uuid::new_v4();
        engine.on_connected(id);
        assert_eq!(engine.label().as_str(), "connected");
        assert_eq!(engine.my_id(), Some(id));
        engine.on_transport_closed();
        assert_eq!(engine.label().as_str(), "not-connected");
    }

    #[test]
    fn test_frame_assigns_monotonic_sequences() {
        let mut engine = plain_engine();
        let first = engine.frame(0.016, vec![MoveKey::Right]);
        let second = engine.frame(0.016, vec![]);
        match (first, second) {
            (ClientMsg::Input(a), ClientMsg::Input(b)) => {
                assert_eq!(a.seq, 1);
                assert_eq!(b.seq, 2);
                assert!(b.time > a.time);
            }
            _ => panic!("Unexpected frame message"),
        }
    }

    #[test]
    fn test_prediction_advances_one_step_per_input() {
        let mut engine = plain_engine();
        engine.frame(0.016, vec![MoveKey::Right]);
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 501.8, 1e-9);
        engine.frame(0.016, vec![MoveKey::Right]);
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 503.6, 1e-9);
        assert_approx_eq!(engine.avatar(Role::Client).pos.y, 200.0, 1e-9);
    }

    #[test]
    fn test_prediction_clamps_to_world_bounds() {
        let mut engine = plain_engine();
        for _ in 0..130 {
            engine.frame(0.016, vec![MoveKey::Right]);
        }
        // 500 + 130 * 1.8 would be 734, held at the 712 limit
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 712.0, 1e-9);
    }

    #[test]
    fn test_naive_snapshot_teleports_without_buffering() {
        let mut engine = Engine::new(EngineOptions {
            naive: true,
            ..EngineOptions::default()
        });
        engine.on_snapshot(snapshot((10.0, 10.0), (20.0, 20.0), [0, 0], 0.5));

        assert_approx_eq!(engine.avatar(Role::Host).pos.x, 10.0, 1e-9);
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 20.0, 1e-9);
        assert_eq!(engine.snapshot_count(), 0);
        assert_approx_eq!(engine.server_time(), 0.5, 1e-9);
        assert_approx_eq!(engine.client_time(), 0.4, 1e-9);
    }

    #[test]
    fn test_snapshot_ring_evicts_oldest_at_capacity() {
        let mut engine = plain_engine();
        // buffer_secs 2 caps the ring at 120 entries
        for i in 0..125 {
            let t = fixed(0.045 * (i + 1) as f64, 3);
            engine.on_snapshot(snapshot((20.0, 20.0), (500.0, 200.0), [0, 0], t));
        }
        assert_eq!(engine.snapshot_count(), 120);
        assert_approx_eq!(engine.oldest_tick(), 0.27, 1e-9);
    }

    #[test]
    fn test_reordered_snapshot_is_dropped() {
        let mut engine = plain_engine();
        engine.on_snapshot(snapshot((100.0, 200.0), (500.0, 200.0), [0, 0], 1.0));
        engine.on_snapshot(snapshot((90.0, 200.0), (500.0, 200.0), [0, 0], 0.9));

        assert_eq!(engine.snapshot_count(), 1);
        assert_approx_eq!(engine.server_time(), 1.0, 1e-9);
    }

    #[test]
    fn test_reconcile_drains_acked_and_replays_rest() {
        let mut engine = plain_engine();
        for _ in 0..5 {
            engine.frame(0.016, vec![MoveKey::Right]);
        }
        engine.on_snapshot(snapshot((20.0, 20.0), (510.0, 200.0), [0, 3], 0.5));

        let avatar = engine.avatar(Role::Client);
        let queued: Vec<u32> = avatar.inputs.iter().map(|s| s.seq).collect();
        assert_eq!(queued, vec![4, 5]);
        assert_eq!(avatar.last_input_seq, 3);
        assert_approx_eq!(engine.confirmed.x, 510.0, 1e-9);
        // Two unacknowledged inputs replayed on the authoritative base
        assert_approx_eq!(avatar.pos.x, 513.6, 1e-9);
    }

    #[test]
    fn test_reconcile_skips_unknown_acknowledgement() {
        let mut engine = plain_engine();
        for _ in 0..3 {
            engine.frame(0.016, vec![MoveKey::Right]);
        }
        engine.on_snapshot(snapshot((20.0, 20.0), (510.0, 200.0), [0, 7], 0.5));

        assert_eq!(engine.avatar(Role::Client).inputs.len(), 3);
        assert_approx_eq!(engine.confirmed.x, 500.0, 1e-9);
    }

    #[test]
    fn test_reconcile_ignores_zero_acknowledgement() {
        let mut engine = plain_engine();
        engine.frame(0.016, vec![MoveKey::Right]);
        engine.on_snapshot(snapshot((20.0, 20.0), (500.0, 200.0), [0, 0], 0.5));

        assert_eq!(engine.avatar(Role::Client).inputs.len(), 1);
        assert_approx_eq!(engine.confirmed.x, 500.0, 1e-9);
    }

    #[test]
    fn test_interpolation_brackets_render_time() {
        let mut engine = plain_engine();
        engine.on_snapshot(snapshot((100.0, 200.0), (500.0, 200.0), [0, 0], 1.0));
        engine.on_snapshot(snapshot((118.0, 190.0), (500.0, 200.0), [0, 0], 1.045));
        engine.on_snapshot(snapshot((130.0, 180.0), (500.0, 200.0), [0, 0], 1.109));
        // render time 1.009 falls between the first two snapshots
        engine.frame(0.016, vec![]);

        let peer = engine.avatar(Role::Host);
        assert_approx_eq!(peer.pos.x, 114.4, 1e-9);
        assert_approx_eq!(peer.pos.y, 192.0, 1e-9);
    }

    #[test]
    fn test_interpolation_holds_oldest_without_bracket() {
        let mut engine = plain_engine();
        engine.on_snapshot(snapshot((300.0, 300.0), (500.0, 200.0), [0, 0], 5.0));
        engine.frame(0.016, vec![]);

        let peer = engine.avatar(Role::Host);
        assert_approx_eq!(peer.pos.x, 300.0, 1e-9);
        assert_approx_eq!(peer.pos.y, 300.0, 1e-9);
    }

    #[test]
    fn test_smoothing_eases_toward_the_target() {
        let mut engine = Engine::new(EngineOptions::default());
        engine.on_snapshot(snapshot((300.0, 300.0), (500.0, 200.0), [0, 0], 5.0));
        engine.frame(0.016, vec![]);

        // lerp factor 0.016 * 25 = 0.4 of the way from spawn (20, 20)
        let peer = engine.avatar(Role::Host);
        assert_approx_eq!(peer.pos.x, 132.0, 1e-9);
        assert_approx_eq!(peer.pos.y, 132.0, 1e-9);
    }

    #[test]
    fn test_disabled_prediction_follows_snapshots_instead() {
        let mut engine = Engine::new(EngineOptions {
            prediction: false,
            smoothing: false,
            ..EngineOptions::default()
        });
        for _ in 0..3 {
            engine.frame(0.016, vec![MoveKey::Right]);
        }
        // Local display has not moved without prediction
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 500.0, 1e-9);

        engine.on_snapshot(snapshot((20.0, 20.0), (505.4, 200.0), [0, 2], 5.0));
        // Acked inputs are still drained even though nothing is replayed
        assert_eq!(engine.avatar(Role::Client).inputs.len(), 1);
        assert_eq!(engine.avatar(Role::Client).last_input_seq, 2);
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 500.0, 1e-9);

        engine.frame(0.016, vec![]);
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 505.4, 1e-9);
    }

    #[test]
    fn test_pong_halves_the_round_trip() {
        let mut engine = plain_engine();
        let msg = engine.ping_msg(5000);
        assert_eq!(msg, ClientMsg::Ping("5000".to_string()));

        engine.on_server_msg(5240, ServerMsg::Pong("5000".to_string()));
        assert_approx_eq!(engine.ping_ms(), 240.0, 1e-9);
        assert_approx_eq!(engine.latency_ms(), 120.0, 1e-9);
    }

    #[test]
    fn test_ping_stamp_is_backdated_by_fake_latency() {
        let engine = Engine::new(EngineOptions {
            fake_latency_ms: 150,
            ..EngineOptions::default()
        });
        assert_eq!(engine.ping_msg(5000), ClientMsg::Ping("4850".to_string()));
    }

    #[test]
    fn test_clock_sync_folds_in_one_way_latency() {
        let mut engine = plain_engine();
        engine.on_server_msg(5240, ServerMsg::Pong("5000".to_string()));
        engine.on_server_msg(5240, ServerMsg::Hosting(10.0));

        assert_eq!(engine.role(), Role::Host);
        assert_approx_eq!(engine.local_time(), 10.12, 1e-9);
    }

    #[test]
    fn test_hosting_reseeds_both_avatars() {
        let mut engine = plain_engine();
        for _ in 0..4 {
            engine.frame(0.016, vec![MoveKey::Down]);
        }
        engine.on_snapshot(snapshot((23.0, 23.0), (500.0, 207.2), [1, 4], 0.5));
        assert_eq!(engine.snapshot_count(), 1);

        engine.on_server_msg(1000, ServerMsg::Hosting(0.016));

        assert_eq!(engine.role(), Role::Host);
        assert_eq!(engine.snapshot_count(), 0);
        assert_approx_eq!(engine.avatar(Role::Host).pos.x, 20.0, 1e-9);
        assert_approx_eq!(engine.avatar(Role::Client).pos.x, 500.0, 1e-9);
        assert_approx_eq!(engine.confirmed.x, 20.0, 1e-9);
        assert!(engine.avatar(Role::Host).inputs.is_empty());
    }

    #[test]
    fn test_ready_replies_with_own_color() {
        let mut engine = Engine::new(EngineOptions {
            color: "#00bb00".to_string(),
            ..EngineOptions::default()
        });
        let reply = engine.on_server_msg(0, ServerMsg::Ready(0.13));
        assert_eq!(reply, Some(ClientMsg::Color("#00bb00".to_string())));
    }

    #[test]
    fn test_peer_color_is_recorded() {
        let mut engine = plain_engine();
        assert_eq!(engine.peer_color(), None);
        engine.on_server_msg(0, ServerMsg::PeerColor("#2288cc".to_string()));
        assert_eq!(engine.peer_color(), Some("#2288cc"));
    }

    #[test]
    fn test_fps_average_over_ten_frame_windows() {
        let mut engine = plain_engine();
        assert_approx_eq!(engine.fps_average(), 0.0, 1e-9);
        for _ in 0..10 {
            engine.frame(0.02, vec![]);
        }
        assert_approx_eq!(engine.fps_average(), 50.0, 1e-6);
    }

    #[test]
    fn test_interp_ratio_degenerate_bracket_is_zero() {
        assert_approx_eq!(interp_ratio(1.0, 1.0, 1.0), 0.0, 1e-9);
        assert_approx_eq!(interp_ratio(1.0, 1.045, 1.009), 0.8, 1e-9);
    }
}
