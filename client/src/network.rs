use crate::engine::{ConnectionLabel, Engine, EngineOptions};
use crate::input::InputSource;
use log::{debug, error, info, warn};
use shared::{decode_server_datagram, ClientEvent, ClientMsg, FromServer, ServerEvent};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, Instant};

const FRAME_INTERVAL_MS: u64 = 16;
const PING_INTERVAL_MS: u64 = 1000;
const STATUS_INTERVAL_MS: u64 = 5000;

pub struct Client {
    socket: UdpSocket,
    engine: Engine,
    source: Box<dyn InputSource + Send>,
    epoch: Instant,
    last_frame: Instant,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        opts: EngineOptions,
        source: Box<dyn InputSource + Send>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server_addr).await?;
        info!("Connecting to server at {}", server_addr);

        let now = Instant::now();
        Ok(Client {
            socket,
            engine: Engine::new(opts),
            source,
            epoch: now,
            last_frame: now,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    async fn send_text(&self, text: &str) {
        if let Err(e) = self.socket.send(text.as_bytes()).await {
            error!("Error sending datagram: {}", e);
        }
    }

    async fn send_msg(&self, msg: &ClientMsg) {
        self.send_text(&msg.encode()).await;
    }

    async fn send_event(&self, event: &ClientEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            self.send_text(&json).await;
        }
    }

    pub async fn disconnect(&mut self) {
        self.send_event(&ClientEvent::Disconnect).await;
        self.engine.on_transport_closed();
        info!("Disconnected from server");
    }

    async fn handle_datagram(&mut self, text: &str) {
        let now_ms = self.now_ms();
        match decode_server_datagram(text) {
            Some(FromServer::Event(ServerEvent::Connected { id })) => {
                info!("Connected with id {}", id);
                self.engine.on_connected(id);
                let fake = self.engine.options().fake_latency_ms;
                if fake > 0 {
                    self.send_msg(&ClientMsg::FakeLatency(fake as f64)).await;
                }
            }
            Some(FromServer::Event(ServerEvent::Update(snapshot))) => {
                self.engine.on_snapshot(snapshot);
            }
            Some(FromServer::Event(ServerEvent::Disconnect)) => {
                warn!("Server dropped this connection");
                self.engine.on_transport_closed();
            }
            Some(FromServer::Msg(msg)) => {
                if let Some(reply) = self.engine.on_server_msg(now_ms, msg) {
                    self.send_msg(&reply).await;
                }
            }
            None => debug!("Dropping unrecognized datagram"),
        }
    }

    fn log_status(&self) {
        let own = self.engine.avatar(self.engine.role()).pos;
        let peer = self.engine.avatar(self.engine.role().peer()).pos;
        info!(
            "{} as {:?} at ({:.1}, {:.1}), peer at ({:.1}, {:.1}), ping {:.0}ms, fps {:.0}",
            self.engine.label().as_str(),
            self.engine.role(),
            own.x,
            own.y,
            peer.x,
            peer.y,
            self.engine.ping_ms(),
            self.engine.fps_average(),
        );
    }

    pub async fn run(&mut self, run_secs: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
        self.engine.begin_connect();
        self.send_event(&ClientEvent::Connect).await;

        let mut frame_interval = interval(Duration::from_millis(FRAME_INTERVAL_MS));
        let mut ping_interval = interval(Duration::from_millis(PING_INTERVAL_MS));
        let mut status_interval = interval(Duration::from_millis(STATUS_INTERVAL_MS));
        let deadline = run_secs.map(|secs| self.epoch + Duration::from_secs(secs));

        let mut buffer = [0u8; 2048];

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("Run duration reached");
                    break;
                }
            }

            tokio::select! {
                result = self.socket.recv(&mut buffer) => {
                    match result {
                        Ok(len) => match std::str::from_utf8(&buffer[..len]) {
                            Ok(text) => self.handle_datagram(text.trim()).await,
                            Err(_) => debug!("Dropping non-text datagram"),
                        },
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                            sleep(Duration::from_millis(10)).await;
                        }
                    }
                },

                _ = frame_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(self.last_frame).as_secs_f64();
                    self.last_frame = now;

                    if self.engine.label() == ConnectionLabel::Connected {
                        let keys = self.source.sample(self.engine.local_time());
                        let msg = self.engine.frame(dt, keys);
                        self.send_msg(&msg).await;
                    }
                },

                _ = ping_interval.tick() => {
                    if self.engine.label() == ConnectionLabel::Connected {
                        let msg = self.engine.ping_msg(self.now_ms());
                        self.send_msg(&msg).await;
                    }
                },

                _ = status_interval.tick() => {
                    self.log_status();
                },
            }
        }

        self.disconnect().await;
        Ok(())
    }
}
