pub mod cli;
pub mod config;
pub mod connection;
pub mod directory;
pub mod error;
pub mod handlers;
pub mod heartbeat;
pub mod lifecycle;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod routes;
pub mod state;
pub mod store;
pub mod store_redis;
pub mod telemetry;
