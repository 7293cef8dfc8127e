//! Network layer: the accepting gateway and the transport abstraction
//! sessions speak through.

pub mod gateway;
pub mod transport;

pub use gateway::Gateway;
pub use transport::{CloseClass, Inbound, SendStatus, Transport, TransportError, WsTransport};
