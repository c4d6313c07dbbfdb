//! # Civic Core
//!
//! Foundational types shared by the civic job-processing crates: the
//! unified error type, pagination primitives and logging initialization.

pub mod error;
pub mod pagination;
pub mod telemetry;

pub use error::*;
pub use pagination::*;

/// A specialized `Result` type for civic operations.
pub type CivicResult<T> = Result<T, CivicError>;
