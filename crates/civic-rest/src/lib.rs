//! # Civic REST
//!
//! Admin HTTP surface for the civic job worker: dead-letter listing and
//! requeue, the queue metrics snapshot, Prometheus text and health checks.

pub mod controllers;
pub mod extractors;
pub mod middleware;
pub mod responses;
pub mod router;
pub mod state;

pub use router::*;
pub use state::*;
