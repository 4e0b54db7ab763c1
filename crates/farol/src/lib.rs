//! Farol - client-side service discovery over an etcd v2-style keyspace
//!
//! This crate provides:
//! - HTTP client for the keyspace API (get, put, delete, long-poll watch)
//! - Service records with a JSON wire codec and typed properties
//! - Session-scoped registration with TTL lease keepalive
//! - A watch loop reconciling store events into a local registry
//! - A discovery container tying connect, register, and query together

pub mod config;
pub mod container;
pub mod error;
pub mod key;
pub mod kv;
pub mod lease;
pub mod listener;
pub mod registry;
pub mod service;
pub mod watch;

// Container re-exports
pub use config::DiscoveryConfig;
pub use container::{DiscoveryContainer, ENDPOINT_ID_PROP};
pub use error::{DiscoveryError, Result};

// Model re-exports
pub use key::ServiceKey;
pub use listener::{DiscoveryEvent, DiscoveryListener, FnListener, NoopListener};
pub use service::{Property, PropertyValue, ServiceRecord, ServiceType};
