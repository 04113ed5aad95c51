use anyhow::{Result, bail};
use clap::Parser;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use reqwest::{Client, Method};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tunnel_relay_common::{
    ErrorCode, HttpRequest, HttpResponse, Message, TunnelError,
    constants::{
        HEARTBEAT_INTERVAL_SECS, RECONNECT_MAX_DELAY_MS, RECONNECT_MIN_DELAY_MS,
        RECONNECT_MULTIPLIER,
    },
    decode_body, generate_client_id, headers_to_map,
    validation::validate_client_id,
};
use url::Url;

type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// CLI arguments for the tunnel agent
#[derive(Parser, Debug)]
#[command(name = "tunnel-agent")]
#[command(about = "Expose a local HTTP service through a tunnel relay", long_about = None)]
#[command(version)]
struct Args {
    /// Local port to forward requests to
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Local host address
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Relay control endpoint
    #[arg(
        short,
        long,
        env = "TTF_ENDPOINT",
        default_value = "ws://127.0.0.1:8080/connect"
    )]
    endpoint: String,

    /// Authentication token sent in the auth frame
    #[arg(short, long, env = "TTF_TOKEN")]
    token: String,

    /// Stable client identity; the relay maps it to the same subdomain every time
    #[arg(short, long, env = "TTF_CLIENT_ID")]
    client_id: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Connection timeout in seconds
    #[arg(long, default_value = "10")]
    connect_timeout: u64,

    /// Request timeout in seconds
    #[arg(long, default_value = "25")]
    request_timeout: u64,
}

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct Config {
    /// Local service address (e.g., "http://127.0.0.1:3000")
    pub local_address: String,

    /// Relay control endpoint
    pub websocket_url: Url,

    pub token: String,

    pub client_id: String,

    /// Connection and handshake timeout
    pub connect_timeout: Duration,

    /// Request timeout when calling local service
    pub request_timeout: Duration,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,

    /// Reconnection strategy
    pub reconnect_config: ReconnectConfig,
}

/// Reconnection configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl ReconnectConfig {
    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_millis(
            ((current.as_millis() as f64 * self.multiplier).min(self.max_delay.as_millis() as f64))
                as u64,
        )
    }
}

impl Config {
    fn from_args(args: Args) -> Result<Self> {
        let websocket_url = Url::parse(&args.endpoint)?;
        if !matches!(websocket_url.scheme(), "ws" | "wss") {
            bail!("Endpoint must be a ws:// or wss:// URL: {}", args.endpoint);
        }

        let client_id = args.client_id.unwrap_or_else(generate_client_id);
        validate_client_id(&client_id)?;

        Ok(Self {
            local_address: format!("http://{}:{}", args.host, args.port),
            websocket_url,
            token: args.token,
            client_id,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect_config: ReconnectConfig {
                min_delay: Duration::from_millis(RECONNECT_MIN_DELAY_MS),
                max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
                multiplier: RECONNECT_MULTIPLIER,
            },
        })
    }
}

/// Connection state tracking
#[derive(Debug, Clone)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected { public_url: String },
    Reconnecting { attempt: usize },
}

/// Connection manager handles the control connection lifecycle and reconnection
pub struct ConnectionManager {
    config: Config,
    connection_state: Arc<Mutex<ConnectionState>>,
}

impl ConnectionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            connection_state: Arc::new(Mutex::new(ConnectionState::Disconnected)),
        }
    }

    /// Main run loop with automatic reconnection
    pub async fn run(&self) -> Result<()> {
        let mut reconnect_delay = self.config.reconnect_config.min_delay;
        let mut attempt = 0;

        loop {
            *self.connection_state.lock().await = ConnectionState::Connecting;

            match self.establish_connection().await {
                Ok((ws_stream, public_url)) => {
                    info!("Tunnel established: {}", public_url);
                    reconnect_delay = self.config.reconnect_config.min_delay;
                    attempt = 0;

                    // Handle the connection until it drops
                    if let Err(e) = self.handle_connection(ws_stream).await {
                        error!("Connection error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to connect: {}", e);
                }
            }

            attempt += 1;
            *self.connection_state.lock().await = ConnectionState::Reconnecting { attempt };

            info!(
                "Reconnecting in {:?} (attempt {})",
                reconnect_delay, attempt
            );
            tokio::time::sleep(reconnect_delay).await;

            reconnect_delay = self.config.reconnect_config.next_delay(reconnect_delay);
        }
    }

    /// Open the control connection and perform the auth/init handshake
    async fn establish_connection(&self) -> Result<(WebSocket, String)> {
        debug!("Connecting to {}", self.config.websocket_url);

        let (mut ws_stream, _) = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(self.config.websocket_url.as_str()),
        )
        .await
        .map_err(|_| TunnelError::ConnectionError("Connection timeout".to_string()))?
        .map_err(|e| TunnelError::ConnectionError(e.to_string()))?;

        let auth = Message::Auth {
            token: self.config.token.clone(),
            client_id: self.config.client_id.clone(),
        };
        ws_stream
            .send(WsMessage::Text(auth.to_json()?.into()))
            .await
            .map_err(|e| TunnelError::WebSocketError(format!("Failed to send auth: {}", e)))?;

        debug!("Sent auth for client {}, waiting for init", self.config.client_id);

        // The relay closes the socket without a reply when the token is rejected
        let handshake = tokio::time::timeout(self.config.connect_timeout, async {
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        if let Ok(Message::Init { url, .. }) = Message::from_json(&text) {
                            *self.connection_state.lock().await = ConnectionState::Connected {
                                public_url: url.clone(),
                            };
                            return Ok(url);
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        return Err(TunnelError::ConnectionError(
                            "Relay closed connection during handshake (check the token)"
                                .to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(TunnelError::WebSocketError(e.to_string()));
                    }
                    _ => {}
                }
            }
            Err(TunnelError::ConnectionError(
                "Connection closed before handshake".to_string(),
            ))
        });

        let public_url = handshake.await.map_err(|_| {
            TunnelError::ConnectionError("Connection handshake timeout".to_string())
        })??;

        Ok((ws_stream, public_url))
    }

    /// Handle active WebSocket connection with split read/write tasks
    async fn handle_connection(&self, ws_stream: WebSocket) -> Result<()> {
        let (write, read) = ws_stream.split();

        let (outgoing_tx, outgoing_rx) = mpsc::channel(100);

        let write_handle = tokio::spawn(spawn_write_task(write, outgoing_rx));

        let read_handle = tokio::spawn(spawn_read_task(
            read,
            outgoing_tx.clone(),
            self.config.local_address.clone(),
            self.config.request_timeout,
        ));

        let heartbeat_handle = tokio::spawn(spawn_heartbeat_task(
            outgoing_tx.clone(),
            self.config.heartbeat_interval,
        ));

        // Wait for any task to complete (usually means connection dropped)
        tokio::select! {
            result = write_handle => {
                warn!("Write task ended: {:?}", result);
            }
            result = read_handle => {
                warn!("Read task ended: {:?}", result);
            }
            result = heartbeat_handle => {
                warn!("Heartbeat task ended: {:?}", result);
            }
        }

        let previous = std::mem::replace(
            &mut *self.connection_state.lock().await,
            ConnectionState::Disconnected,
        );
        if let ConnectionState::Connected { public_url } = previous {
            info!("Tunnel {} disconnected", public_url);
        }

        Ok(())
    }
}

/// Write task sends outgoing messages through WebSocket
async fn spawn_write_task(
    mut write: SplitSink<WebSocket, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
) -> Result<()> {
    while let Some(message) = outgoing_rx.recv().await {
        if let Err(e) = write.send(message).await {
            error!("Failed to send message: {}", e);
            break;
        }
    }

    debug!("Write task exiting");
    Ok(())
}

/// Read task receives incoming messages and dispatches them
async fn spawn_read_task(
    mut read: SplitStream<WebSocket>,
    outgoing_tx: mpsc::Sender<WsMessage>,
    local_address: String,
    request_timeout: Duration,
) -> Result<()> {
    let client = Client::builder()
        .timeout(request_timeout)
        .build()
        .map_err(|e| TunnelError::HttpError(e.to_string()))?;

    while let Some(message) = read.next().await {
        match message {
            Ok(WsMessage::Text(text)) => {
                if let Err(e) = handle_text_message(&text, &outgoing_tx, &client, &local_address) {
                    error!("Error handling message: {}", e);
                }
            }
            Ok(WsMessage::Binary(_)) => {
                warn!("Received unexpected binary message");
            }
            Ok(WsMessage::Close(_)) => {
                info!("Relay closed connection");
                break;
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    debug!("Read task exiting");
    Ok(())
}

/// Handle incoming text messages
fn handle_text_message(
    text: &str,
    outgoing_tx: &mpsc::Sender<WsMessage>,
    client: &Client,
    local_address: &str,
) -> Result<()> {
    let message: Message = serde_json::from_str(text)
        .map_err(|e| TunnelError::InvalidMessage(format!("Failed to parse message: {}", e)))?;

    match message {
        Message::Request(request) => {
            debug!("Received request: {} {}", request.method, request.uri);

            // Each request is served concurrently; responses may leave out of order
            let client = client.clone();
            let local_address = local_address.to_string();
            let outgoing_tx = outgoing_tx.clone();

            tokio::spawn(async move {
                let reply = handle_http_request(request, &client, &local_address).await;
                match reply.to_json() {
                    Ok(json) => {
                        if let Err(e) = outgoing_tx.send(WsMessage::Text(json.into())).await {
                            error!("Failed to queue reply: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to encode reply: {}", e),
                }
            });
        }

        Message::Init { url, .. } => {
            info!("Public URL: {}", url);
        }

        Message::Pong => {
            debug!("Received pong");
        }

        other => {
            debug!("Ignoring {} frame", other.kind());
        }
    }

    Ok(())
}

/// Drop headers that describe the relay hop rather than the request itself
fn forwardable(name: &str) -> bool {
    !name.eq_ignore_ascii_case("host")
}

/// Serve one relayed request from the local service, producing a `response` or `error` frame
async fn handle_http_request(request: HttpRequest, client: &Client, local_address: &str) -> Message {
    let start_time = Instant::now();
    let request_id = request.request_id.clone();

    let agent_error = |code: ErrorCode, message: String| Message::Error {
        request_id: Some(request_id.clone()),
        code,
        message,
    };

    let Ok(method) = Method::from_bytes(request.method.as_bytes()) else {
        return agent_error(
            ErrorCode::InvalidRequest,
            format!("Unsupported HTTP method: {}", request.method),
        );
    };

    let body = match decode_body(&request.body) {
        Ok(body) => body,
        Err(e) => {
            return agent_error(
                ErrorCode::InvalidRequest,
                format!("Failed to decode body: {}", e),
            );
        }
    };

    let url = format!("{}{}", local_address, request.uri);
    debug!("Forwarding: {} {}", method, url);

    let mut req_builder = client.request(method, &url);
    for (name, values) in request.headers.iter().filter(|(name, _)| forwardable(name)) {
        for value in values {
            req_builder = req_builder.header(name, value);
        }
    }
    if !body.is_empty() {
        req_builder = req_builder.body(body);
    }

    let response = match req_builder.send().await {
        Ok(response) => response,
        Err(e) => {
            error!("Local service error: {}", e);
            let code = if e.is_timeout() {
                ErrorCode::Timeout
            } else {
                ErrorCode::LocalServiceUnavailable
            };
            return agent_error(code, e.to_string());
        }
    };

    let status_code = response.status().as_u16();
    let headers = headers_to_map(response.headers());
    let body_bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return agent_error(ErrorCode::InternalError, e.to_string()),
    };

    let mut http_response = HttpResponse::new(request_id.clone(), status_code).with_body(&body_bytes);
    http_response.headers = headers;
    http_response.processing_time_ms = start_time.elapsed().as_millis() as u64;

    debug!(
        "Response: {} ({}ms)",
        status_code, http_response.processing_time_ms
    );

    Message::Response(http_response)
}

/// Heartbeat task sends periodic ping messages
async fn spawn_heartbeat_task(
    outgoing_tx: mpsc::Sender<WsMessage>,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    let ping_json = Message::Ping.to_json()?;

    loop {
        ticker.tick().await;

        if let Err(e) = outgoing_tx
            .send(WsMessage::Text(ping_json.clone().into()))
            .await
        {
            error!("Failed to send heartbeat: {}", e);
            break;
        }

        debug!("Sent heartbeat");
    }

    debug!("Heartbeat task exiting");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Tunnel agent v{}", env!("CARGO_PKG_VERSION"));
    info!("Local service: {}:{}", args.host, args.port);
    info!("Relay endpoint: {}", args.endpoint);

    let config = Config::from_args(args)?;
    info!("Client ID: {}", config.client_id);

    let manager = ConnectionManager::new(config);

    // Run until interrupted
    tokio::select! {
        result = manager.run() => {
            error!("Connection manager exited: {:?}", result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down gracefully...");
        }
    }

    Ok(())
}
