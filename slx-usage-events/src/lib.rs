pub mod events;
pub mod errors;

// Re-export key types
pub use events::{Method, UsageEvent};
pub use errors::UsageEventError;
