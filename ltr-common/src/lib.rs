//! # Lingtrain Common Library
//!
//! Shared code for the Lingtrain alignment services including:
//! - Error and result types
//! - Configuration loading and root folder resolution
//! - Event types (AlignerEvent enum) and the event bus
//! - Server-Sent Events helpers
//! - Service database initialization

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
