//! Live notification channel over WebSocket.
//!
//! Provides the connection manager, heartbeat pings and the HTTP upgrade
//! handler used by the `/ws/{client_id}` route.

mod handler;
mod heartbeat;
pub mod manager;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::{ConnectionError, ConnectionId, ConnectionState, Registration, SendOutcome, WsManager};
