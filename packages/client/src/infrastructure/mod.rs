//! Infrastructure layer: wire codec, transports and the directory client.

pub mod directory;
pub mod dto;
pub mod stomp;
pub mod transport;
