//! Configuration module for the image gather engine
//!
//! Handles loading configuration from TOML files, environment variable overrides
//! and validation of the poll loop settings.

pub mod config;

pub use config::*;
