//! Server network layer wiring UDP datagrams and deadlines into the lobby

use crate::lobby::Lobby;
use crate::session::Outgoing;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

/// Messages sent from the receiver task to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Datagram { addr: SocketAddr, text: String },
}

/// Main server coordinating the socket tasks and the lobby
///
/// All simulation state lives in the [`Lobby`] and is touched only from
/// [`Server::run`]. The receiver and sender tasks just shuttle datagrams, so
/// no lock sits between the socket and the session logic.
pub struct Server {
    socket: Arc<UdpSocket>,
    lobby: Lobby,
    /// Zero point of the millisecond timeline handed to the lobby
    epoch: Instant,
    last_wake: Instant,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_rx: mpsc::UnboundedReceiver<Outgoing>,
}

impl Server {
    pub async fn new(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let epoch = Instant::now();

        Ok(Server {
            socket,
            lobby: Lobby::new(out_tx),
            epoch,
            last_wake: epoch,
            server_tx,
            server_rx,
            out_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming datagrams
    async fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match std::str::from_utf8(&buffer[..len]) {
                        Ok(text) => {
                            let text = text.trim().to_string();
                            if let Err(e) = server_tx.send(ServerMessage::Datagram { addr, text })
                            {
                                error!("Failed to hand datagram to main loop: {}", e);
                                break;
                            }
                        }
                        Err(_) => debug!("Dropping non-text datagram from {}", addr),
                    },
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outbound datagram queue
    async fn spawn_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                if let Err(e) = socket.send_to(outgoing.text.as_bytes(), outgoing.addr).await {
                    error!("Failed to send to {}: {}", outgoing.addr, e);
                }
            }
        });
    }

    /// Measures elapsed wall time, feeds the lobby clock, and returns the
    /// current position on the millisecond timeline.
    fn advance(&mut self) -> u64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_wake).as_secs_f64();
        self.last_wake = now;
        self.lobby.advance_clock(dt);
        now.duration_since(self.epoch).as_millis() as u64
    }

    /// Main server loop coordinating datagram handling and timed work
    ///
    /// Sleeps exactly until the lobby's next deadline instead of running a
    /// fixed-rate ticker, so an idle server wakes once per second for the
    /// timeout sweep while a busy one wakes per session tick.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver().await;
        self.spawn_sender().await;

        info!("Server started successfully");

        loop {
            let deadline = self.epoch + Duration::from_millis(self.lobby.next_deadline_ms());

            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Datagram { addr, text }) => {
                            let now_ms = self.advance();
                            self.lobby.on_datagram(now_ms, addr, &text);
                        }
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = time::sleep_until(deadline) => {},
            }

            let now_ms = self.advance();
            self.lobby.poll(now_ms);
        }

        Ok(())
    }
}
