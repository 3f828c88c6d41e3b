//! HTTP façade exposing the dispatch engine over a small JSON API.

pub mod relay_server;

pub use relay_server::*;
