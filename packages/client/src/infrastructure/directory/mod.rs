//! Directory implementations.

pub mod http;

pub use http::HttpDirectoryService;
