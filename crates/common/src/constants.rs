/// Default time the relay waits for a `response` frame before answering 504 (30 seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Time a freshly opened control connection has to send its `auth` frame (10 seconds)
pub const AUTH_TIMEOUT_SECS: u64 = 10;

/// Interval of the relay's backstop sweep over pending requests (5 seconds)
pub const PENDING_SWEEP_INTERVAL_SECS: u64 = 5;

/// Heartbeat interval the agent uses to keep the control connection alive (30 seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Idle period after which intermediaries commonly drop a WebSocket (10 minutes)
pub const WEBSOCKET_IDLE_TIMEOUT_SECS: u64 = 600;

/// Maximum request/response body size carried through the tunnel (10 MB)
pub const MAX_BODY_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// Depth of the per-connection outbound frame queue
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Minimum delay for exponential backoff reconnection (1 second)
pub const RECONNECT_MIN_DELAY_MS: u64 = 1000;

/// Maximum delay for exponential backoff reconnection (60 seconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 60000;

/// Multiplier for exponential backoff reconnection
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Default address of the control (WebSocket) listener
pub const DEFAULT_CONTROL_ADDR: &str = "0.0.0.0:8080";

/// Default address of the public HTTP listener
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:3000";

/// Header attached to every response the relay generates itself
pub const TUNNEL_ERROR_HEADER: &str = "x-tunnel-error";
