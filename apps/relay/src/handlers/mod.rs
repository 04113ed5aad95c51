//! Handler modules
//!
//! Transport-facing entry points: the control WebSocket, the public HTTP fallback,
//! operational endpoints and the background sweeper.

pub mod cleanup;
pub mod connect;
pub mod forwarding;
pub mod status;


pub use cleanup::sweep_pending;
pub use connect::control_upgrade;
pub use forwarding::forward_request;
pub use status::{health, status};
