//! Gateway: HTTP + WebSocket surface on a single port.
//!
//! HTTP carries the provider webhook routes and the history/delete/stats
//! endpoints; WebSocket carries the join/leave subscription protocol
//! (req/res frames plus server-pushed events).

pub mod connections;
pub mod protocol;
mod server;

pub use connections::Connections;
pub use protocol::{WsRequest, WsResponse};
pub use server::run_gateway;
