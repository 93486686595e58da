//! Bootstrap helpers for the `WatchParty` server

pub mod config;

pub use config::load_config;
