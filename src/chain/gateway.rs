//! Chain gateway for Ethereum JSON-RPC connectivity.
//!
//! Owns the provider connection: bounded connect retries, sync detection for
//! local development nodes, and a periodic health check that reconnects when
//! the node drops. Being disconnected is a normal operating state here; callers
//! read [`ChainGateway::status`] and fall back accordingly.

use crate::chain::error::ChainError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant};

/// Substrings that mark an RPC URL as a local development node.
const LOCAL_NODE_MARKERS: [&str; 3] = ["localhost", "127.0.0.1", "ethereum-node"];

/// A JSON-RPC 2.0 request channel.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError>;
}

/// Builds a transport for a connection attempt.
pub type TransportFactory =
    Arc<dyn Fn(&GatewayConfig) -> Result<Arc<dyn RpcTransport>, ChainError> + Send + Sync>;

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
    data: Option<Value>,
}

/// HTTP JSON-RPC transport backed by reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: &str, request_timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ChainError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Factory producing a fresh [`HttpTransport`] per connection attempt.
    pub fn factory() -> TransportFactory {
        Arc::new(|config: &GatewayConfig| {
            let transport = HttpTransport::new(&config.url, config.timeout)?;
            Ok(Arc::new(transport) as Arc<dyn RpcTransport>)
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::ConnectionFailed {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::DecodeError(format!("{} response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            let data = err.data.map(|value| match value {
                Value::String(s) => s,
                other => other
                    .get("data")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.to_string()),
            });
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
                data,
            });
        }

        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub url: String,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_count: 3,
            retry_delay: Duration::from_millis(2000),
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Read-only connection snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub url: String,
    pub is_connected: bool,
    pub is_local_node: bool,
    pub is_syncing: bool,
    pub sync_progress: u8,
    pub current_block: u64,
    pub highest_block: u64,
    pub chain_id: Option<u64>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SyncState {
    is_syncing: bool,
    progress: u8,
    current_block: Option<u64>,
    highest_block: Option<u64>,
}

/// Whether the URL points at a local development node.
pub fn is_local_url(url: &str) -> bool {
    LOCAL_NODE_MARKERS.iter().any(|marker| url.contains(marker))
}

/// Parse a JSON-RPC hex quantity such as `"0x1a"`.
pub fn parse_quantity(value: &Value) -> Result<u64, ChainError> {
    let raw = value
        .as_str()
        .ok_or_else(|| ChainError::DecodeError(format!("expected hex quantity, got {}", value)))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::DecodeError(format!("invalid quantity {}: {}", raw, e)))
}

fn sync_progress(current: u64, highest: u64) -> u8 {
    if highest == 0 {
        return 0;
    }
    ((current as f64 / highest as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Ethereum node gateway.
pub struct ChainGateway {
    config: GatewayConfig,

    /// Builds a transport for each connection attempt.
    factory: TransportFactory,

    /// RPC URL points at a local development node.
    is_local: bool,

    /// Transport from the last successful connect, if any.
    transport: RwLock<Option<Arc<dyn RpcTransport>>>,

    /// Snapshot reported by the status endpoint.
    status: RwLock<ConnectionStatus>,
}

impl ChainGateway {
    /// Create a gateway. No connection is attempted until [`connect`](Self::connect).
    pub fn new(config: GatewayConfig, factory: TransportFactory) -> Self {
        let is_local = is_local_url(&config.url);
        let status = ConnectionStatus {
            url: config.url.clone(),
            is_local_node: is_local,
            ..Default::default()
        };

        Self {
            config,
            factory,
            is_local,
            transport: RwLock::new(None),
            status: RwLock::new(status),
        }
    }

    /// Gateway using the reqwest HTTP transport.
    pub fn http(config: GatewayConfig) -> Self {
        Self::new(config, HttpTransport::factory())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_local_node(&self) -> bool {
        self.is_local
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    pub fn is_reachable(&self) -> bool {
        self.status.read().is_connected && self.transport.read().is_some()
    }

    /// Connect with bounded retries and a fixed delay between attempts.
    pub async fn connect(&self) -> Result<(), ChainError> {
        let attempts = self.config.retry_count.max(1);
        let mut last_error = ChainError::NotConnected;

        for attempt in 1..=attempts {
            info!(
                "Connecting to Ethereum node at {} (attempt {}/{})",
                self.config.url, attempt, attempts
            );

            match self.connect_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempt, e);
                    last_error = e;
                    if attempt < attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        error!(
            "Unable to connect to Ethereum node at {} after {} attempts",
            self.config.url, attempts
        );
        Err(last_error)
    }

    /// A single connection attempt bounded by the configured timeout.
    pub async fn connect_once(&self) -> Result<(), ChainError> {
        self.status.write().last_attempt = Some(Utc::now());

        let result = match timeout(self.config.timeout, self.handshake()).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::ConnectionFailed {
                url: self.config.url.clone(),
                reason: format!("timed out after {:?}", self.config.timeout),
            }),
        };

        match result {
            Ok((transport, chain_id, block, sync)) => {
                *self.transport.write() = Some(transport);
                let mut status = self.status.write();
                status.is_connected = true;
                status.chain_id = Some(chain_id);
                status.current_block = block;
                status.last_success = Some(Utc::now());
                status.last_error = None;
                Self::apply_sync(&mut status, sync);
                info!(
                    "Connected to chain {} at block {} (local: {})",
                    chain_id, block, self.is_local
                );
                Ok(())
            }
            Err(e) => {
                self.mark_down(&e);
                Err(e)
            }
        }
    }

    async fn handshake(
        &self,
    ) -> Result<(Arc<dyn RpcTransport>, u64, u64, Option<SyncState>), ChainError> {
        let transport = (self.factory)(&self.config)?;
        let chain_id = parse_quantity(&transport.request("eth_chainId", json!([])).await?)?;
        let block = parse_quantity(&transport.request("eth_blockNumber", json!([])).await?)?;

        let sync = if self.is_local {
            Some(Self::check_sync_status(transport.as_ref()).await)
        } else {
            None
        };

        Ok((transport, chain_id, block, sync))
    }

    /// Best-effort `eth_syncing` probe. A failed probe assumes the node is syncing.
    async fn check_sync_status(transport: &dyn RpcTransport) -> SyncState {
        match transport.request("eth_syncing", json!([])).await {
            Ok(Value::Bool(false)) | Ok(Value::Null) => SyncState {
                is_syncing: false,
                progress: 100,
                current_block: None,
                highest_block: None,
            },
            Ok(progress) => {
                let current = progress
                    .get("currentBlock")
                    .and_then(|v| parse_quantity(v).ok())
                    .unwrap_or(0);
                let highest = progress
                    .get("highestBlock")
                    .and_then(|v| parse_quantity(v).ok())
                    .unwrap_or(0);
                debug!("Node syncing: {}/{}", current, highest);
                SyncState {
                    is_syncing: true,
                    progress: sync_progress(current, highest),
                    current_block: Some(current),
                    highest_block: Some(highest),
                }
            }
            Err(e) => {
                warn!("Sync status query failed, assuming node is syncing: {}", e);
                SyncState {
                    is_syncing: true,
                    progress: 0,
                    current_block: None,
                    highest_block: None,
                }
            }
        }
    }

    fn apply_sync(status: &mut ConnectionStatus, sync: Option<SyncState>) {
        let Some(sync) = sync else {
            return;
        };
        status.is_syncing = sync.is_syncing;
        status.sync_progress = sync.progress;
        if let Some(highest) = sync.highest_block {
            status.highest_block = highest;
        }
        if let Some(current) = sync.current_block {
            status.current_block = status.current_block.max(current);
        } else if !sync.is_syncing {
            status.highest_block = status.current_block;
        }
    }

    fn mark_down(&self, err: &ChainError) {
        *self.transport.write() = None;
        let mut status = self.status.write();
        status.is_connected = false;
        status.last_error = Some(err.to_string());
    }

    /// Refresh block height and sync state, reconnecting when the node is down.
    /// Never fails; problems are logged and retried on the next tick.
    pub async fn health_check(&self) {
        let transport = self.transport.read().clone();
        let Some(transport) = transport else {
            debug!("Health check: not connected, reconnecting");
            if let Err(e) = self.connect().await {
                warn!("Health check reconnect failed: {}", e);
            }
            return;
        };

        let refreshed = match transport.request("eth_blockNumber", json!([])).await {
            Ok(value) => parse_quantity(&value),
            Err(e) => Err(e),
        };

        match refreshed {
            Ok(block) => {
                let sync = if self.is_local {
                    Some(Self::check_sync_status(transport.as_ref()).await)
                } else {
                    None
                };
                let mut status = self.status.write();
                status.current_block = block;
                status.last_success = Some(Utc::now());
                Self::apply_sync(&mut status, sync);
                debug!("Health check OK: block {}", block);
            }
            Err(e) => {
                warn!("Health check failed, marking connection down: {}", e);
                self.mark_down(&e);
                if let Err(e) = self.connect().await {
                    warn!("Health check reconnect failed: {}", e);
                }
            }
        }
    }

    /// Run [`health_check`](Self::health_check) on a fixed interval.
    pub fn spawn_health_monitor(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                gateway.health_check().await;
            }
        })
    }

    /// Issue a raw JSON-RPC call over the current connection.
    ///
    /// Transport failures mark the connection down so the next health check
    /// reconnects and the accessor stops routing to the live contract.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let transport = self
            .transport
            .read()
            .clone()
            .ok_or(ChainError::NotConnected)?;

        match transport.request(method, params).await {
            Err(e) if e.is_transport() => {
                self.mark_down(&e);
                Err(e)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for ChainGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainGateway")
            .field("url", &self.config.url)
            .field("is_local", &self.is_local)
            .field("status", &*self.status.read())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Transport answering from a handler closure.
    pub(crate) struct ScriptedTransport<F>(pub F);

    #[async_trait]
    impl<F> RpcTransport for ScriptedTransport<F>
    where
        F: Fn(&str, &Value) -> Result<Value, ChainError> + Send + Sync,
    {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ChainError> {
            (self.0)(method, &params)
        }
    }

    fn node(method: &str, _params: &Value) -> Result<Value, ChainError> {
        match method {
            "eth_chainId" => Ok(json!("0x7a69")),
            "eth_blockNumber" => Ok(json!("0x10")),
            "eth_syncing" => Ok(json!({"currentBlock": "0x32", "highestBlock": "0x64"})),
            other => Err(ChainError::Rpc {
                code: -32601,
                message: format!("method {} not found", other),
                data: None,
            }),
        }
    }

    fn config(url: &str) -> GatewayConfig {
        GatewayConfig {
            url: url.to_string(),
            retry_count: 3,
            retry_delay: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        }
    }

    pub(crate) fn connected_factory() -> TransportFactory {
        Arc::new(|_: &GatewayConfig| Ok(Arc::new(ScriptedTransport(node)) as Arc<dyn RpcTransport>))
    }

    #[test]
    fn test_local_url_detection() {
        assert!(is_local_url("http://localhost:8545"));
        assert!(is_local_url("http://127.0.0.1:8545"));
        assert!(is_local_url("http://ethereum-node:8545"));
        assert!(!is_local_url("https://mainnet.infura.io/v3/key"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&json!("0x10")).unwrap(), 16);
        assert_eq!(parse_quantity(&json!("0x")).unwrap(), 0);
        assert!(parse_quantity(&json!(16)).is_err());
    }

    #[test]
    fn test_sync_progress_rounds() {
        assert_eq!(sync_progress(1, 3), 33);
        assert_eq!(sync_progress(2, 3), 67);
        assert_eq!(sync_progress(5, 0), 0);
    }

    #[tokio::test]
    async fn test_connect_local_node_reads_sync_state() {
        let gateway = ChainGateway::new(config("http://localhost:8545"), connected_factory());
        gateway.connect().await.unwrap();

        let status = gateway.status();
        assert!(status.is_connected);
        assert!(status.is_local_node);
        assert_eq!(status.chain_id, Some(31337));
        assert!(status.is_syncing);
        assert_eq!(status.sync_progress, 50);
        assert_eq!(status.highest_block, 100);
        assert!(status.last_success.is_some());
        assert!(gateway.is_reachable());
    }

    #[tokio::test]
    async fn test_sync_failure_assumes_syncing() {
        let factory: TransportFactory = Arc::new(|_: &GatewayConfig| {
            Ok(Arc::new(ScriptedTransport(|method: &str, params: &Value| {
                if method == "eth_syncing" {
                    Err(ChainError::Rpc {
                        code: -32000,
                        message: "unsupported".to_string(),
                        data: None,
                    })
                } else {
                    node(method, params)
                }
            })) as Arc<dyn RpcTransport>)
        });
        let gateway = ChainGateway::new(config("http://ethereum-node:8545"), factory);
        gateway.connect().await.unwrap();
        let status = gateway.status();
        assert!(status.is_connected);
        assert!(status.is_syncing);
    }

    #[tokio::test]
    async fn test_connect_retries_then_fails() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let factory: TransportFactory = Arc::new(move |config: &GatewayConfig| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ChainError::ConnectionFailed {
                url: config.url.clone(),
                reason: "connection refused".to_string(),
            })
        });

        let gateway = ChainGateway::new(config("http://remote:8545"), factory);
        let result = gateway.connect().await;

        assert!(matches!(result, Err(ChainError::ConnectionFailed { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let status = gateway.status();
        assert!(!status.is_connected);
        assert!(status.last_attempt.is_some());
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_call_without_connection() {
        let gateway = ChainGateway::new(config("http://remote:8545"), connected_factory());
        assert_eq!(
            gateway.call("eth_blockNumber", json!([])).await,
            Err(ChainError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_transport_failure_marks_down_and_health_check_reconnects() {
        let healthy = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = healthy.clone();
        let factory: TransportFactory = Arc::new(move |_: &GatewayConfig| {
            let flag = flag.clone();
            Ok(Arc::new(ScriptedTransport(move |method: &str, params: &Value| {
                if flag.load(Ordering::SeqCst) {
                    node(method, params)
                } else {
                    Err(ChainError::ConnectionFailed {
                        url: "http://remote:8545".to_string(),
                        reason: "reset".to_string(),
                    })
                }
            })) as Arc<dyn RpcTransport>)
        });

        let gateway = ChainGateway::new(config("http://remote:8545"), factory);
        gateway.connect().await.unwrap();

        healthy.store(false, Ordering::SeqCst);
        assert!(gateway.call("eth_blockNumber", json!([])).await.is_err());
        assert!(!gateway.is_reachable());

        healthy.store(true, Ordering::SeqCst);
        gateway.health_check().await;
        assert!(gateway.is_reachable());
        assert_eq!(gateway.status().current_block, 16);
    }
}
