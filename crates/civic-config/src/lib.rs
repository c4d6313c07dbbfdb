//! # Civic Config
//!
//! Layered configuration for the civic job worker: TOML files, a `.env`
//! file and `CIVIC__`-prefixed environment variables, merged into one
//! [`AppConfig`] that embeds the job system's [`civic_jobs::JobsConfig`].

mod app_config;
mod loader;

pub use app_config::*;
pub use loader::*;
