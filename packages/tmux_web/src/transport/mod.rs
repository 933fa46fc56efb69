//! WebSocket transport between browser terminals and attached PTYs.
//!
//! Submodules:
//! - `framing` — classifying inbound frames, parsing the `?resize=` query
//! - `registry` — connection id → live PTY binding
//! - `socket` — per-connection loop: attach, stream, tear down

pub mod framing;
pub mod registry;
pub mod socket;

pub use framing::{InboundFrame, parse_resize_query};
pub use registry::{Binding, ConnectionId, ConnectionRegistry};
pub use socket::{ConnectionState, websocket_handler};
