//! # Templog Common Library
//!
//! Shared code for templog device binaries:
//! - Reading model (`Reading`, `Measurement`)
//! - Configuration loading and validation
//! - Hour-bucket time helpers
//! - Logging initialisation
//! - Common error type

pub mod config;
pub mod error;
pub mod logging;
pub mod reading;
pub mod time;

pub use error::{Error, Result};
pub use reading::{Measurement, Reading};
pub use time::HourBucket;
