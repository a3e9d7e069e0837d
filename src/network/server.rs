//! WebSocket Game Server
//!
//! Async WebSocket transport for the crash game. Each connection gets its own
//! identity and outbound queue; start and cash-out requests are routed to the
//! [`SessionRegistry`], round events flow back through a per-connection sink.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::core::rng::entropy_factory;
use crate::game::engine::EngineConfig;
use crate::game::events::{EventSink, RoundEvent};
use crate::game::registry::SessionRegistry;
use crate::game::state::{ConnectionId, GameError, Stake};
use crate::network::protocol::{rejection_for, ClientMessage, ErrorCode, ServerError, ServerMessage};
use crate::TICK_INTERVAL_MS;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3001;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Period between multiplier ticks.
    pub tick_interval: Duration,
    /// Browser origin allowed to connect. `None` admits any origin.
    pub allowed_origin: Option<String>,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            tick_interval: Duration::from_millis(TICK_INTERVAL_MS),
            allowed_origin: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// Reads `BIND_ADDR` (IP), `PORT`, `MAX_CONNECTIONS`, `TICK_INTERVAL_MS`
    /// and `FRONTEND_URL` (allowed origin, `*` for any). Unset or malformed
    /// values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ip: IpAddr = env_parse("BIND_ADDR").unwrap_or_else(|| defaults.bind_addr.ip());
        let port: u16 = env_parse("PORT").unwrap_or(DEFAULT_PORT);
        let tick_ms: u64 = env_parse("TICK_INTERVAL_MS")
            .filter(|ms| *ms > 0)
            .unwrap_or(TICK_INTERVAL_MS);

        Self {
            bind_addr: SocketAddr::new(ip, port),
            max_connections: env_parse("MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            tick_interval: Duration::from_millis(tick_ms),
            allowed_origin: std::env::var("FRONTEND_URL")
                .ok()
                .and_then(|url| parse_origin(&url)),
            version: defaults.version,
        }
    }

    /// Ticker settings derived from this config.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            tick_interval: self.tick_interval,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}", key, raw);
            None
        }
    }
}

/// Configured origin, or `None` when any origin is allowed.
fn parse_origin(raw: &str) -> Option<String> {
    let origin = raw.trim().trim_end_matches('/');
    if origin.is_empty() || origin == "*" {
        None
    } else {
        Some(origin.to_string())
    }
}

/// Whether a handshake carrying `origin` may proceed.
///
/// Requests without an `Origin` header come from non-browser clients and are
/// admitted.
fn origin_allowed(allowed: Option<&str>, origin: Option<&str>) -> bool {
    match (allowed, origin) {
        (Some(allowed), Some(origin)) => allowed == origin.trim_end_matches('/'),
        _ => true,
    }
}

fn origin_rejection() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Origin not allowed".to_string()));
    *response.status_mut() = StatusCode::FORBIDDEN;
    response
}

/// Wait up to `grace` for `task` to finish, aborting it otherwise.
///
/// Returns true if the task finished on its own.
async fn join_or_abort(task: JoinHandle<()>, grace: Duration) -> bool {
    let abort = task.abort_handle();
    match tokio::time::timeout(grace, task).await {
        Ok(_) => true,
        Err(_) => {
            abort.abort();
            false
        }
    }
}

/// A reserved connection slot, given back on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    /// Reserve a slot unless `limit` are already taken.
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < limit).then_some(taken + 1)
            })
            .ok()
            .map(|_| Self(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,
}

/// Forwards a connection's round events to its outbound queue.
struct ClientSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl EventSink for ClientSink {
    fn emit(&self, event: RoundEvent) {
        if self.tx.send(event.into()).is_err() {
            debug!("Dropped {:?}: connection closed", event);
        }
    }
}

/// Connected client state.
struct ConnectedClient {
    /// Peer address.
    addr: SocketAddr,
    /// Connection time.
    connected_at: Instant,
}

type ClientMap = Arc<RwLock<BTreeMap<ConnectionId, ConnectedClient>>>;

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Live rounds.
    registry: Arc<SessionRegistry>,
    /// Connected clients.
    clients: ClientMap,
    /// Next connection identity.
    next_connection_id: AtomicU64,
    /// Connection slots in use, including handshakes in flight.
    slots: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server drawing crash points from OS entropy.
    pub fn new(config: ServerConfig) -> Self {
        let registry = SessionRegistry::with_random(entropy_factory(), config.engine());
        Self::with_registry(config, registry)
    }

    /// Create a server around an existing registry.
    pub fn with_registry(config: ServerConfig, registry: SessionRegistry) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            registry: Arc::new(registry),
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            next_connection_id: AtomicU64::new(1),
            slots: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind and run the server until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            match ConnectionSlot::acquire(&self.slots, self.config.max_connections) {
                                Some(slot) => self.handle_connection(stream, addr, slot),
                                None => {
                                    warn!("{}, rejecting {}", GameServerError::ConnectionLimitReached, addr);
                                }
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr, slot: ConnectionSlot) {
        let connection_id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let clients = self.clients.clone();
        let registry = self.registry.clone();
        let allowed_origin = self.config.allowed_origin.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;

            let check_origin = move |request: &Request, response: Response| {
                let origin = request
                    .headers()
                    .get("origin")
                    .and_then(|value| value.to_str().ok());
                if origin_allowed(allowed_origin.as_deref(), origin) {
                    Ok(response)
                } else {
                    warn!("Rejected origin {:?} from {}", origin, addr);
                    Err(origin_rejection())
                }
            };

            let ws_stream = match accept_hdr_async(stream, check_origin).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            info!("A player connected: {} from {}", connection_id, addr);

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();
            let sink: Arc<dyn EventSink> = Arc::new(ClientSink { tx: msg_tx.clone() });

            // Register client
            {
                let mut clients = clients.write().await;
                clients.insert(connection_id, ConnectedClient {
                    addr,
                    connected_at: Instant::now(),
                });
            }

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        let text = match msg {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                                Ok(text) => text,
                                Err(_) => {
                                    debug!("Non UTF-8 binary frame from {}", connection_id);
                                    continue;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", connection_id, e);
                                break;
                            }
                            _ => continue,
                        };

                        match ClientMessage::from_json(&text) {
                            Ok(client_msg) => {
                                Self::handle_client_message(
                                    connection_id,
                                    client_msg,
                                    &registry,
                                    &sink,
                                    &msg_tx,
                                ).await;
                            }
                            Err(e) => {
                                debug!("Invalid message from {}: {}", connection_id, e);
                                let _ = msg_tx.send(ServerMessage::Error(rejection_for(&text)));
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        });
                        break;
                    }
                }
            }

            // Cleanup: the round disappears without a crash or success event.
            registry.disconnect(connection_id).await;
            drop(sink);
            drop(msg_tx);
            if !join_or_abort(sender_task, Duration::from_secs(1)).await {
                debug!("Sender for {} did not drain in time", connection_id);
            }

            let removed = clients.write().await.remove(&connection_id);
            if let Some(client) = removed {
                info!(
                    "A player disconnected: {} ({}) after {:?}",
                    connection_id,
                    client.addr,
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        connection_id: ConnectionId,
        msg: ClientMessage,
        registry: &SessionRegistry,
        sink: &Arc<dyn EventSink>,
        sender: &mpsc::UnboundedSender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::StartGame { stake } => {
                let result = match Stake::parse(stake.as_ref()) {
                    Ok(stake) => registry
                        .create_session(connection_id, stake.value(), sink.clone())
                        .await
                        .map(|_| ()),
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {}
                    Err(e @ GameError::InvalidStake(_)) => {
                        warn!("Invalid stake from player {}: {}", connection_id, e);
                        let _ = sender.send(ServerMessage::Error(ServerError {
                            code: ErrorCode::InvalidStake,
                            message: e.to_string(),
                        }));
                    }
                    Err(e) => {
                        debug!("Start ignored for {}: {}", connection_id, e);
                    }
                }
            }
            ClientMessage::CashOut => {
                // Stale cash-outs are no-ops on the wire.
                let _ = registry.request_cash_out(connection_id).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::Pong {
                    timestamp,
                    server_time: chrono::Utc::now().timestamp_millis().max(0) as u64,
                });
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get live round count.
    pub async fn session_count(&self) -> usize {
        self.registry.active_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3001);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert_eq!(config.engine().tick_interval, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server = GameServer::new(config);

        assert_eq!(server.connection_count().await, 0);
        assert_eq!(server.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown_stops_serve() {
        let server = Arc::new(GameServer::new(ServerConfig::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let handle = tokio::spawn(async move { running.serve(listener).await });

        // Let serve subscribe before signalling.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[test]
    fn test_origin_rules() {
        assert_eq!(parse_origin("*"), None);
        assert_eq!(parse_origin("  "), None);
        assert_eq!(
            parse_origin("https://play.example.com/"),
            Some("https://play.example.com".to_string())
        );

        let allowed = Some("https://play.example.com");
        assert!(origin_allowed(None, Some("https://anything.example")));
        assert!(origin_allowed(allowed, Some("https://play.example.com")));
        assert!(origin_allowed(allowed, Some("https://play.example.com/")));
        assert!(origin_allowed(allowed, None));
        assert!(!origin_allowed(allowed, Some("https://evil.example")));
    }

    #[test]
    fn test_connection_slots_are_bounded() {
        let counter = Arc::new(AtomicUsize::new(0));

        let first = ConnectionSlot::acquire(&counter, 2).unwrap();
        let _second = ConnectionSlot::acquire(&counter, 2).unwrap();
        assert!(ConnectionSlot::acquire(&counter, 2).is_none());
        assert_eq!(counter.load(Ordering::Acquire), 2);

        drop(first);
        assert_eq!(counter.load(Ordering::Acquire), 1);
        assert!(ConnectionSlot::acquire(&counter, 2).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_sender_is_aborted() {
        let held = Arc::new(());
        let task = {
            let held = held.clone();
            tokio::spawn(async move {
                let _held = held;
                std::future::pending::<()>().await;
            })
        };

        assert!(!join_or_abort(task, Duration::from_secs(1)).await);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&held), 1);

        let done = tokio::spawn(async {});
        assert!(join_or_abort(done, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_client_sink_maps_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ClientSink { tx };
        let m = crate::core::multiplier::Multiplier::from_hundredths(142);

        sink.emit(RoundEvent::Success(m));
        assert_eq!(rx.recv().await, Some(ServerMessage::Success { multiplier: m }));
    }
}
