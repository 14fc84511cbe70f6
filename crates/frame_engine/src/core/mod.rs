//! Core engine types
//!
//! Holds the unified configuration consumed by every subsystem.

pub mod config;

pub use config::{EngineConfig, FRAMES_IN_FLIGHT};
