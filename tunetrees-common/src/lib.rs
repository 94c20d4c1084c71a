//! # TuneTrees Common Library
//!
//! Shared code for the TuneTrees practice services including:
//! - Error type and result alias
//! - Timestamp parsing and sitdown-date resolution
//! - Configuration loading (CLI > environment > TOML > compiled defaults)
//! - Practice event types and the EventBus
//! - SQLite schema initialization and row models

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{EventBus, PracticeEvent};
