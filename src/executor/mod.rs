//! Built-in fetch executors

pub mod http;

pub use http::{HttpConfig, HttpFetcher};
