//! Discovery backend implementations.

pub mod http;

pub use http::HttpDiscoveryBackend;
