//! Relay wire protocol and WebSocket transport

pub mod protocol;
pub mod transport;

pub use protocol::{GameMessage, Heading, MessageType, Payload, Player, PlayerId, Position, ProtocolError};
pub use transport::{Transport, TransportError, TransportEvent, WsTransport};
