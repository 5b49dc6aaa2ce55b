// Pipeline stages
pub mod artifact;
pub mod engine;
pub mod materialize;
pub mod placeholder;
pub mod plan;
pub mod render;
pub mod synthesize;

pub mod error;
pub mod store;

// Public modules for CLI access
pub mod defaults;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
