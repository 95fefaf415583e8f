//! WebSocket server implementation
//!
//! Listens on a configurable port (falling back to the next free ones),
//! forwards session events to every client and routes client requests to the
//! message handler.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handler::MessageHandler;
use super::protocol::{ServerEnvelope, ServerMessage};
use crate::config::ServerSettings;
use crate::events::SessionEvent;

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// First port to try
    pub port: u16,
    /// Further ports tried when the first one is taken
    pub port_attempts: u16,
}

impl ServerConfig {
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            port_attempts: 0,
        }
    }

    pub fn with_port_attempts(mut self, attempts: u16) -> Self {
        self.port_attempts = attempts;
        self
    }

    /// Candidate ports in the order they are tried
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        let first = self.port;
        let last = first.saturating_add(self.port_attempts);
        first..=last
    }

    /// Get the socket address for a port
    pub fn socket_addr(&self, port: u16) -> String {
        format!("{}:{}", self.bind, port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self::new(settings.bind.clone(), settings.port).with_port_attempts(settings.port_attempts)
    }
}

/// WebSocket server for dashboard clients
pub struct WebSocketServer {
    config: ServerConfig,
    handler: MessageHandler,
    events: broadcast::Sender<SessionEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    pub fn new(
        config: ServerConfig,
        handler: MessageHandler,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler,
            events,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the first free port from the configured range
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let mut last_error = None;

        for port in self.config.ports() {
            let addr = self.config.socket_addr(port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    warn!("Port {} is in use, trying the next one", port);
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(match last_error {
            Some(e) => anyhow::Error::new(e).context(format!(
                "No free port between {} and {}",
                self.config.port,
                self.config.port.saturating_add(self.config.port_attempts)
            )),
            None => anyhow::anyhow!("No ports to try"),
        })
    }

    /// Bind and serve until shutdown
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until a shutdown signal arrives
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!("WebSocket server listening on ws://{}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let handler = self.handler.clone();
                            let events_rx = self.events.subscribe();
                            let shutdown_rx = self.shutdown_tx.subscribe();

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, handler, events_rx, shutdown_rx).await {
                                    error!("Connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let session_count = self.handler.manager().session_count().await;
        if session_count > 0 {
            info!("{} sessions still active at shutdown", session_count);
        }

        Ok(())
    }
}

fn encode(message: ServerMessage) -> anyhow::Result<Message> {
    Ok(Message::Text(ServerEnvelope::new(message).to_json()?))
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    handler: MessageHandler,
    mut events_rx: broadcast::Receiver<SessionEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    info!("New connection from {}", peer_addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    ws_sender
        .send(encode(ServerMessage::welcome(
            handler.manager().default_launch_command(),
        ))?)
        .await?;

    // Replay existing sessions; creations already replayed are skipped below
    let mut replayed: HashSet<Uuid> = HashSet::new();
    for session in handler.manager().list().await {
        replayed.insert(session.id);
        ws_sender
            .send(encode(ServerMessage::SessionCreated { session })?)
            .await?;
    }
    debug!("Sent welcome and {} sessions to {}", replayed.len(), peer_addr);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received message from {}: {} bytes", peer_addr, text.len());
                        if let Some(response) = handler.handle_text(&text).await {
                            ws_sender.send(encode(response)?).await?;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Received binary message from {} ({} bytes), ignoring", peer_addr, data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} requested close", peer_addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Connection closed by {}", peer_addr);
                        break;
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(SessionEvent::Created(session)) if replayed.remove(&session.id) => {}
                    Ok(event) => {
                        ws_sender.send(encode(ServerMessage::from(event))?).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Client {} lagged, {} events dropped", peer_addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Shutdown signal received, closing connection to {}", peer_addr);
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    info!("Connection from {} closed", peer_addr);
    Ok(())
}
