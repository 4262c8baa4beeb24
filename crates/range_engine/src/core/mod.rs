//! # Core Engine Module
//!
//! Shared configuration for the index builders and the range simulator.
//!
//! ## Organization
//!
//! - **Config**: Concrete configuration structs for every subsystem
//! - **Foundation**: Low-level utilities (math, collections, logging)

pub mod config;

// Re-export foundation modules for convenience
pub use crate::foundation;

// Re-export commonly used config types
pub use config::{BuildConfig, Config, ConfigError, EngineConfig, SimulatorConfig};
