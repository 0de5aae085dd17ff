//! Live streaming session transport.
//!
//! * [`messages`]: setup message, realtime-input frames and server event
//!   parsing.
//! * [`transport`]: [`LiveConnector`] trait and its WebSocket
//!   implementation [`WsConnector`].

pub mod messages;
pub mod transport;

pub use messages::{
    build_setup_message, parse_server_message, realtime_input_json, MediaBlob, OutboundFrame,
    ServerEvent, SetupMessage, IMAGE_MIME,
};
pub use transport::{LiveConnector, LiveLink, TransportError, WsConnector};
