//! # RecallHub Common Library
//!
//! Shared code for the RecallHub services including:
//! - Error types
//! - Event types (RecallEvent enum) and the broadcast event bus
//! - Configuration loading and data-directory resolution

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
