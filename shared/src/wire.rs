//! Datagram text protocol.
//!
//! Every datagram is one UTF-8 string. Lifecycle events travel as small JSON
//! objects and are recognized by their leading `{`. Everything else is a
//! dot-delimited command:
//!
//! Client to server:
//! - `i.<keys>.<time>.<seq>` - input sample, keys joined with `-` (e.g. `l-u`,
//!   empty on idle frames)
//! - `p.<stamp>` - ping, stamp echoed back verbatim
//! - `c.<color>` - color announcement, relayed to the peer
//! - `l.<ms>` - request artificial input latency, fractional ms allowed
//!
//! Server to client:
//! - `s.h.<time>` - you are hosting, seeded with the session time
//! - `s.j.<id>` - you joined the session hosted by `<id>`
//! - `s.r.<time>` - session is ready, both sides restart from this time
//! - `s.e` - session ended, wait to be reseated
//! - `s.p.<stamp>` - ping echo
//! - `s.c.<color>` - peer color changed
//!
//! Times are fractional seconds with the decimal point swapped for `-` so the
//! dot delimiter stays unambiguous (`0.016` travels as `0-016`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sim::{InputSample, MoveKey, Role};
use crate::vec::Vec2;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMsg {
    Input(InputSample),
    Ping(String),
    Color(String),
    FakeLatency(f64),
}

impl ClientMsg {
    pub fn encode(&self) -> String {
        match self {
            ClientMsg::Input(sample) => {
                let keys: Vec<&str> = sample.keys.iter().map(|k| k.token()).collect();
                let time = format!("{:.3}", sample.time).replace('.', "-");
                format!("i.{}.{}.{}", keys.join("-"), time, sample.seq)
            }
            ClientMsg::Ping(stamp) => format!("p.{}", stamp),
            ClientMsg::Color(color) => format!("c.{}", color),
            ClientMsg::FakeLatency(ms) => format!("l.{}", ms),
        }
    }

    pub fn decode(text: &str) -> Option<ClientMsg> {
        let (tag, rest) = text.split_once('.')?;
        match tag {
            "i" => {
                let mut parts = rest.splitn(3, '.');
                let keys = parse_keys(parts.next()?)?;
                let time = decode_time(parts.next()?)?;
                let seq = parts.next()?.parse().ok()?;
                Some(ClientMsg::Input(InputSample { keys, time, seq }))
            }
            "p" => Some(ClientMsg::Ping(rest.to_string())),
            "c" => Some(ClientMsg::Color(rest.to_string())),
            "l" => rest
                .parse::<f64>()
                .ok()
                .filter(|ms| ms.is_finite())
                .map(ClientMsg::FakeLatency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    Hosting(f64),
    Joined(String),
    Ready(f64),
    Ended,
    Pong(String),
    PeerColor(String),
}

impl ServerMsg {
    pub fn encode(&self) -> String {
        match self {
            ServerMsg::Hosting(t) => format!("s.h.{}", encode_time(*t)),
            ServerMsg::Joined(host_id) => format!("s.j.{}", host_id),
            ServerMsg::Ready(t) => format!("s.r.{}", encode_time(*t)),
            ServerMsg::Ended => "s.e".to_string(),
            ServerMsg::Pong(stamp) => format!("s.p.{}", stamp),
            ServerMsg::PeerColor(color) => format!("s.c.{}", color),
        }
    }

    pub fn decode(text: &str) -> Option<ServerMsg> {
        let rest = text.strip_prefix("s.")?;
        if rest == "e" {
            return Some(ServerMsg::Ended);
        }
        let (tag, payload) = rest.split_once('.')?;
        match tag {
            "h" => Some(ServerMsg::Hosting(decode_time(payload)?)),
            "j" => Some(ServerMsg::Joined(payload.to_string())),
            "r" => Some(ServerMsg::Ready(decode_time(payload)?)),
            "p" => Some(ServerMsg::Pong(payload.to_string())),
            "c" => Some(ServerMsg::PeerColor(payload.to_string())),
            _ => None,
        }
    }
}

fn encode_time(t: f64) -> String {
    t.to_string().replace('.', "-")
}

fn decode_time(text: &str) -> Option<f64> {
    let value: f64 = text.replace('-', ".").parse().ok()?;
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

fn parse_keys(text: &str) -> Option<Vec<MoveKey>> {
    // Idle frames carry an empty token list
    if text.is_empty() {
        return Some(Vec::new());
    }
    text.split('-').map(MoveKey::from_token).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    Connect,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    #[serde(rename = "onconnected")]
    Connected { id: Uuid },
    #[serde(rename = "onserverupdate")]
    Update(Snapshot),
    #[serde(rename = "disconnect")]
    Disconnect,
}

/// Authoritative state broadcast, ordered `[host, client]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub positions: [Vec2; 2],
    #[serde(rename = "lastInputSeqs")]
    pub last_input_seqs: [u32; 2],
    pub t: f64,
}

impl Snapshot {
    pub fn position(&self, role: Role) -> Vec2 {
        self.positions[role.index()]
    }

    pub fn last_input_seq(&self, role: Role) -> u32 {
        self.last_input_seqs[role.index()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromClient {
    Event(ClientEvent),
    Msg(ClientMsg),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FromServer {
    Event(ServerEvent),
    Msg(ServerMsg),
}

pub fn decode_client_datagram(text: &str) -> Option<FromClient> {
    if text.starts_with('{') {
        serde_json::from_str(text).ok().map(FromClient::Event)
    } else {
        ClientMsg::decode(text).map(FromClient::Msg)
    }
}

pub fn decode_server_datagram(text: &str) -> Option<FromServer> {
    if text.starts_with('{') {
        serde_json::from_str(text).ok().map(FromServer::Event)
    } else {
        ServerMsg::decode(text).map(FromServer::Msg)
    }
}
