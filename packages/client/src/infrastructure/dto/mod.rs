//! Data Transfer Objects (DTOs) for the hub and the directory.
//!
//! DTOs are organized by protocol:
//! - `http`: directory REST payloads (also embedded in some hub pushes)
//! - `websocket`: hub push payloads and publish bodies

pub mod conversion;
pub mod http;
pub mod websocket;
