// Public modules
pub mod artifact;
pub mod build;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod git;
pub mod manifest;
pub mod trigger;
pub mod workflow;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
