pub mod config;
pub mod ndjson;
pub mod store;
pub mod telemetry;
