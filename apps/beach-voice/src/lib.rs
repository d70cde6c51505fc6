//! Signaling relay between browser clients and a realtime speech API: issues
//! ephemeral credentials and answers WebRTC offers over a WebSocket control
//! channel.

pub mod channel;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod peer;
pub mod peer_state;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod state;
pub mod testing;
pub mod websocket;

pub use routes::build_router;
pub use state::RelayState;
