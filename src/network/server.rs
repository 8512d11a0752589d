//! WebSocket Game Server
//!
//! Async WebSocket server for player connections. Handles authentication,
//! wager and cashout requests, wallet and history queries, and fans the
//! round event stream out to every authenticated client.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::core::money::round_fiat;
use crate::game::error::GameError;
use crate::game::events::EventBus;
use crate::game::ledger::WagerLedger;
use crate::game::types::UserId;
use crate::network::auth::{validate_token, AuthConfig, AuthError};
use crate::network::protocol::{
    AuthRequest, AuthResult, CashoutResult, ClientMessage, CryptoHolding, ErrorCode,
    PlaceWagerRequest, RoundSummary, ServerError, ServerMessage, WagerAccepted, WalletInfo,
};
use crate::store::oracle::PriceOracle;
use crate::store::persist::GameStore;
use crate::store::shared::SharedState;

/// How many finished rounds a history request returns.
const HISTORY_LIMIT: usize = 50;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle timeout before a silent connection is dropped.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080"
                .parse()
                .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 8080))),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Build from environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.bind_addr = parsed;
            }
        }
        if let Ok(max) = std::env::var("MAX_CONNECTIONS") {
            if let Ok(parsed) = max.parse() {
                config.max_connections = parsed;
            }
        }
        config
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
}

/// Connected client state.
struct ConnectedClient {
    /// Account identity, set after auth.
    user: Option<UserId>,
    /// Connection time.
    #[allow(dead_code)]
    connected_at: Instant,
    /// Last activity.
    last_activity: Instant,
    /// Message sender (for direct messaging to client).
    #[allow(dead_code)]
    sender: mpsc::Sender<ServerMessage>,
}

/// Everything a connection task needs to serve requests.
struct Services<S, P, O> {
    auth: AuthConfig,
    store: Arc<P>,
    oracle: Arc<O>,
    ledger: Arc<WagerLedger<S, P, O>>,
    version: String,
}

/// The game server.
pub struct GameServer<S, P, O> {
    config: ServerConfig,
    services: Arc<Services<S, P, O>>,
    clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
    events: EventBus,
    shutdown_tx: broadcast::Sender<()>,
}

impl<S, P, O> GameServer<S, P, O>
where
    S: SharedState,
    P: GameStore,
    O: PriceOracle,
{
    /// Create a new game server.
    pub fn new(
        config: ServerConfig,
        auth: AuthConfig,
        store: Arc<P>,
        oracle: Arc<O>,
        ledger: Arc<WagerLedger<S, P, O>>,
        events: EventBus,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let services = Arc::new(Services {
            auth,
            store,
            oracle,
            ledger,
            version: config.version.clone(),
        });

        Self {
            config,
            services,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            events,
            shutdown_tx,
        }
    }

    /// Run the server until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Game server listening on {}", self.config.bind_addr);

        let cleanup_clients = self.clients.clone();
        let idle_timeout = self.config.idle_timeout;
        let cleanup_handle = tokio::spawn(async move {
            Self::run_cleanup_loop(cleanup_clients, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connected = self.clients.read().await.len();
                            if connected >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
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

        cleanup_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let services = self.services.clone();
        let mut events_rx = self.events.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            {
                let mut clients = clients.write().await;
                clients.insert(
                    addr,
                    ConnectedClient {
                        user: None,
                        connected_at: Instant::now(),
                        last_activity: Instant::now(),
                        sender: msg_tx.clone(),
                    },
                );
            }

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

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error(ServerError {
                                            code: ErrorCode::InvalidMessage,
                                            message: "Invalid message format".to_string(),
                                        })).await;
                                        continue;
                                    }
                                };

                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                Self::handle_client_message(
                                    addr,
                                    client_msg,
                                    &clients,
                                    &services,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: unix_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    event = events_rx.recv() => {
                        match event {
                            Ok(event) => {
                                // Round events only reach authenticated
                                // clients.
                                let authed = {
                                    let clients = clients.read().await;
                                    clients.get(&addr).map(|c| c.user.is_some()).unwrap_or(false)
                                };
                                if authed {
                                    let _ = msg_tx.send(ServerMessage::Event(event)).await;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(missed)) => {
                                warn!("Client {} lagged, skipped {} events", addr, missed);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            clients.write().await.remove(&addr);
            info!("Client {} cleaned up", addr);
        });
    }

    /// Handle a client message.
    async fn handle_client_message(
        addr: SocketAddr,
        msg: ClientMessage,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        services: &Arc<Services<S, P, O>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Auth(auth) => {
                Self::handle_auth(addr, auth, clients, services, sender).await;
            }
            ClientMessage::PlaceWager(req) => {
                let Some(user) = Self::authenticated_user(addr, clients, sender).await else {
                    return;
                };
                Self::handle_place_wager(user, req, services, sender).await;
            }
            ClientMessage::Cashout => {
                let Some(user) = Self::authenticated_user(addr, clients, sender).await else {
                    return;
                };
                Self::handle_cashout(user, services, sender).await;
            }
            ClientMessage::Wallet => {
                let Some(user) = Self::authenticated_user(addr, clients, sender).await else {
                    return;
                };
                Self::handle_wallet(user, services, sender).await;
            }
            ClientMessage::History => {
                let Some(_user) = Self::authenticated_user(addr, clients, sender).await else {
                    return;
                };
                Self::handle_history(services, sender).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: unix_millis(),
                    })
                    .await;
            }
        }
    }

    /// Handle authentication. Tokens must verify and the subject must
    /// already have an account.
    async fn handle_auth(
        addr: SocketAddr,
        auth: AuthRequest,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        services: &Arc<Services<S, P, O>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let claims = match validate_token(&auth.token, &services.auth) {
            Ok(claims) => claims,
            Err(err) => {
                debug!("Auth failed for {}: {}", addr, err);
                let code = match err {
                    AuthError::Expired => ErrorCode::TokenExpired,
                    AuthError::NotConfigured => ErrorCode::InternalError,
                    _ => ErrorCode::InvalidToken,
                };
                let _ = sender
                    .send(ServerMessage::AuthResult(AuthResult {
                        success: false,
                        username: None,
                        error: Some(err.to_string()),
                        server_version: services.version.clone(),
                    }))
                    .await;
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code,
                        message: err.to_string(),
                    }))
                    .await;
                return;
            }
        };

        let user = claims.user_id();
        let account = match services.store.account(&user).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                let _ = sender
                    .send(ServerMessage::AuthResult(AuthResult {
                        success: false,
                        username: None,
                        error: Some("no account for this identity".to_string()),
                        server_version: services.version.clone(),
                    }))
                    .await;
                return;
            }
            Err(err) => {
                error!("Account lookup failed for {}: {}", addr, err);
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::StoreUnavailable,
                        message: err.to_string(),
                    }))
                    .await;
                return;
            }
        };

        {
            let mut clients = clients.write().await;
            if let Some(client) = clients.get_mut(&addr) {
                client.user = Some(user.clone());
            }
        }

        info!("Client {} authenticated as {}", addr, account.username);
        let _ = sender
            .send(ServerMessage::AuthResult(AuthResult {
                success: true,
                username: Some(account.username),
                error: None,
                server_version: services.version.clone(),
            }))
            .await;
    }

    async fn handle_place_wager(
        user: UserId,
        req: PlaceWagerRequest,
        services: &Arc<Services<S, P, O>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match services
            .ledger
            .place_wager(&user, req.amount_fiat, req.unit, req.auto_cashout)
            .await
        {
            Ok(wager) => {
                let _ = sender
                    .send(ServerMessage::WagerAccepted(WagerAccepted {
                        round_id: wager.round.to_string(),
                        amount_fiat: wager.amount_fiat,
                        amount_crypto: wager.amount_crypto,
                        unit: wager.unit,
                        auto_cashout: wager.auto_cashout,
                    }))
                    .await;
            }
            Err(err) => {
                let _ = sender.send(game_error_message(&err)).await;
            }
        }
    }

    async fn handle_cashout(
        user: UserId,
        services: &Arc<Services<S, P, O>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match services.ledger.cashout(&user, None).await {
            Ok(receipt) => {
                let _ = sender
                    .send(ServerMessage::CashoutResult(CashoutResult {
                        multiplier: receipt.multiplier,
                        winnings_fiat: receipt.winnings_fiat,
                    }))
                    .await;
            }
            Err(err) => {
                let _ = sender.send(game_error_message(&err)).await;
            }
        }
    }

    /// Wallet snapshot with each crypto position valued at the current
    /// oracle price.
    async fn handle_wallet(
        user: UserId,
        services: &Arc<Services<S, P, O>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let account = match services.store.account(&user).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::AuthFailed,
                        message: "account not found".to_string(),
                    }))
                    .await;
                return;
            }
            Err(err) => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::StoreUnavailable,
                        message: err.to_string(),
                    }))
                    .await;
                return;
            }
        };

        let prices = match services.oracle.prices().await {
            Ok(prices) => prices,
            Err(err) => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::PricesUnavailable,
                        message: err.to_string(),
                    }))
                    .await;
                return;
            }
        };

        let mut total = account.wallet.fiat;
        let mut crypto = Vec::new();
        for (&unit, &balance) in &account.wallet.crypto {
            // A missing quote for a non-zero holding would silently
            // understate the total, so refuse the snapshot instead.
            let fiat_value = match prices.price(unit) {
                Some(price) => round_fiat(balance * price),
                None if balance == 0.0 => 0.0,
                None => {
                    let _ = sender
                        .send(ServerMessage::Error(ServerError {
                            code: ErrorCode::PricesUnavailable,
                            message: format!("no price for {unit}"),
                        }))
                        .await;
                    return;
                }
            };
            total += fiat_value;
            crypto.push(CryptoHolding {
                unit,
                balance,
                fiat_value,
            });
        }

        let _ = sender
            .send(ServerMessage::Wallet(WalletInfo {
                fiat: account.wallet.fiat,
                crypto,
                total_fiat_value: round_fiat(total),
            }))
            .await;
    }

    async fn handle_history(
        services: &Arc<Services<S, P, O>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match services.store.round_history(HISTORY_LIMIT).await {
            Ok(rounds) => {
                let rounds = rounds.iter().map(RoundSummary::from_round).collect();
                let _ = sender.send(ServerMessage::History { rounds }).await;
            }
            Err(err) => {
                let _ = sender
                    .send(ServerMessage::Error(ServerError {
                        code: ErrorCode::StoreUnavailable,
                        message: err.to_string(),
                    }))
                    .await;
            }
        }
    }

    /// Resolve the authenticated user for a connection, or push a
    /// not-authenticated error.
    async fn authenticated_user(
        addr: SocketAddr,
        clients: &Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Option<UserId> {
        let user = {
            let clients = clients.read().await;
            clients.get(&addr).and_then(|c| c.user.clone())
        };
        if user.is_none() {
            let _ = sender
                .send(ServerMessage::Error(ServerError {
                    code: ErrorCode::NotAuthenticated,
                    message: "authenticate first".to_string(),
                }))
                .await;
        }
        user
    }

    /// Drop connections idle past the timeout.
    async fn run_cleanup_loop(
        clients: Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>,
        idle_timeout: Duration,
    ) {
        let mut interval = interval(Duration::from_secs(60));

        loop {
            interval.tick().await;

            let now = Instant::now();
            let to_remove: Vec<_> = {
                let clients = clients.read().await;
                clients
                    .iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, _)| *addr)
                    .collect()
            };

            for addr in to_remove {
                if clients.write().await.remove(&addr).is_some() {
                    info!("Removed idle client {}", addr);
                }
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

fn game_error_message(err: &GameError) -> ServerMessage {
    ServerMessage::Error(ServerError {
        code: err.into(),
        message: err.to_string(),
    })
}

fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::money::{CryptoUnit, PriceTable};
    use crate::game::types::UserAccount;
    use crate::store::oracle::StaticOracle;
    use crate::store::persist::MemoryStore;
    use crate::store::shared::MemorySharedState;

    type TestServer = GameServer<MemorySharedState, MemoryStore, StaticOracle>;

    fn test_services(
        store: Arc<MemoryStore>,
        oracle: Arc<StaticOracle>,
    ) -> Arc<Services<MemorySharedState, MemoryStore, StaticOracle>> {
        let ledger = Arc::new(WagerLedger::new(
            Arc::new(MemorySharedState::new()),
            store.clone(),
            oracle.clone(),
            EventBus::new(64),
        ));
        Arc::new(Services {
            auth: AuthConfig::default(),
            store,
            oracle,
            ledger,
            version: "test".to_string(),
        })
    }

    fn test_server() -> GameServer<MemorySharedState, MemoryStore, StaticOracle> {
        let shared = Arc::new(MemorySharedState::new());
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(StaticOracle::with_defaults());
        let events = EventBus::new(64);
        let ledger = Arc::new(WagerLedger::new(
            shared,
            store.clone(),
            oracle.clone(),
            events.clone(),
        ));
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        GameServer::new(config, AuthConfig::default(), store, oracle, ledger, events)
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = test_server();
        assert_eq!(server.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = test_server();
        server.shutdown();
        // Should not panic
    }

    /// A non-zero holding with no quote must refuse the snapshot rather
    /// than value the holding at zero.
    #[tokio::test]
    async fn test_wallet_refused_when_holding_has_no_price() {
        let store = Arc::new(MemoryStore::new());
        let table: PriceTable = [(CryptoUnit::Btc, 50_000.0)].into_iter().collect();
        let services = test_services(store.clone(), Arc::new(StaticOracle::new(table)));

        let user = UserId::new("u1");
        let mut account = UserAccount::new(user.clone(), "alice", 1000.0);
        account.wallet.credit_crypto(CryptoUnit::Eth, 0.5);
        store.upsert_account(account).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        TestServer::handle_wallet(user.clone(), &services, &tx).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::PricesUnavailable),
            other => panic!("expected error, got {:?}", other),
        }

        // A zero balance in the unpriced unit does not block the snapshot.
        let mut account = UserAccount::new(user.clone(), "alice", 1000.0);
        account.wallet.crypto.insert(CryptoUnit::Eth, 0.0);
        account.wallet.credit_crypto(CryptoUnit::Btc, 0.002);
        store.upsert_account(account).await.unwrap();

        TestServer::handle_wallet(user, &services, &tx).await;
        match rx.recv().await.unwrap() {
            ServerMessage::Wallet(info) => assert_eq!(info.total_fiat_value, 1100.0),
            other => panic!("expected wallet, got {:?}", other),
        }
    }

    /// Every command except auth and ping requires a bound identity,
    /// history included.
    #[tokio::test]
    async fn test_history_requires_authentication() {
        let store = Arc::new(MemoryStore::new());
        let services = test_services(store, Arc::new(StaticOracle::with_defaults()));
        let clients = Arc::new(RwLock::new(BTreeMap::new()));
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        TestServer::handle_client_message(addr, ClientMessage::History, &clients, &services, &tx)
            .await;
        match rx.recv().await.unwrap() {
            ServerMessage::Error(err) => assert_eq!(err.code, ErrorCode::NotAuthenticated),
            other => panic!("expected error, got {:?}", other),
        }
    }
}
