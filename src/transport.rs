//! Network transport for backend dispatch.

pub mod http;

pub use http::HttpClientPool;
