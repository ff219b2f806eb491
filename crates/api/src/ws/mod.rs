//! WebSocket infrastructure for streamed calculation sessions.
//!
//! Provides connection management, heartbeat monitoring, the event
//! envelope, the per-connection session orchestrator, and the HTTP upgrade
//! handler used by Axum routes.

pub mod events;
mod handler;
mod heartbeat;
pub mod manager;
pub mod session;

pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
