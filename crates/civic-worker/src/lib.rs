//! # Civic Worker
//!
//! Application handlers for the `report-processing` and `notifications`
//! queues, the HTTP clients they talk to, and the process bootstrap.

pub mod app;
pub mod clients;
pub mod handlers;
pub mod model;
