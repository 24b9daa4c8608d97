//! # ptsync-core
//!
//! Domain types and configuration for the PT permit synchronization
//! pipeline: environments, dataset references, the attribute row model,
//! row filters, sync modes, and `settings.json` loading/validation.

pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::ConfigError;
