//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the loading core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the other crates depend on. It
//! establishes the logging conventions and event broadcasting mechanisms used
//! throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::LoaderConfig;
pub use error::{Error, Result};
pub use events::{EventBus, LoaderEvent};
