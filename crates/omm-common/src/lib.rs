//! OMM Common - Shared types and utilities
//!
//! This crate provides the namespace types, the error taxonomy and the
//! configuration used by every OMM component.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DEFAULT_MAX_REQUEST_BYTES, OmConfig};
pub use error::{ErrorCategory, OmError, OmResult, ResultCode};
pub use types::*;
