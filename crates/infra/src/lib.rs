//! Infrastructure layer: balance engines, Postgres wiring, configuration.

pub mod api_keys;
pub mod balance;
pub mod config;
pub mod schema;
