//! Adapter bridging internal order-lifecycle requests (create, get-status,
//! cancel) to a partner pharmacy-order HTTP API.

pub mod config;
pub mod httpclient;
pub mod metrics;
pub mod orders;
pub mod server;
