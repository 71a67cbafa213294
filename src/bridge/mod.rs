//! Web terminal bridge over SSH.
//!
//! This module is organized into the following submodules:
//!
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy and connect-error classification
//! - `session`: russh client handler
//! - `auth`: Authentication strategies
//! - `factory`: Opening authenticated sessions and PTY shell channels
//! - `client`: russh implementation of the session factory
//! - `connection`: One live interactive shell and its lifecycle
//! - `registry`: Concurrent registry of live connections
//! - `delivery`: Terminal event sink and in-process subscriber fan-out
//! - `terminal`: Output pump and input forwarding
//! - `diagnostics`: Fixed read-only host diagnostics over exec channels
//! - `cache`: TTL cache of the latest metrics per host
//! - `credentials`: Host credential lookup
//! - `service`: Inbound facade converting results into response envelopes
//! - `routes`: HTTP and WebSocket endpoints

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod delivery;
pub mod diagnostics;
pub mod error;
pub mod factory;
pub mod registry;
pub mod routes;
pub mod service;
pub mod session;
pub mod terminal;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use error::BridgeError;
pub use service::BridgeService;
