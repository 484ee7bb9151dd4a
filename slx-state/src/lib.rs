pub mod accounts;
pub mod api;
pub mod api_keys;
pub mod billing;
pub mod config;
pub mod datastore;
pub mod error;
pub mod provision;
pub mod usage;

// Re-export key types for easier use
pub use datastore::{Datastore, MemoryStore, StoreError};
pub use error::StateError;
