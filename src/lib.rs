//! env-cleaner: lifecycle engine for ephemeral environments.
//!
//! Crawlers discover environments through platform connectors and record
//! them in the registry; the deleter reclaims them once their deadline has
//! passed; the stale notifier offers owners a single-use extension link
//! shortly before that. The binary in `main.rs` wires these together.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod connector;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod store;
