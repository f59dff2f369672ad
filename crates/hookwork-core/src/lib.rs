//! Shared types, host config schema, settings, and errors for hookwork.

pub mod config;
pub mod error;
pub mod settings;
pub mod types;
