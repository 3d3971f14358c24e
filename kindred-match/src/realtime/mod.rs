//! Realtime delivery
//!
//! The [`RealtimeGateway`] owns the [`ConnectionRegistry`] and a single
//! wildcard subscription to the Result Bus, fanning each published result
//! out to every live connection of its user.

pub mod gateway;
pub mod protocol;
pub mod registry;

pub use gateway::{ConnectionHandle, GatewayError, RealtimeGateway};
pub use protocol::{ClientMessage, ServerMessage};
pub use registry::{Connection, ConnectionRegistry, DeliveryReport};
