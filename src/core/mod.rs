//! Core foundational modules: configuration, errors, coordinate math,
//! content addressing, and small shared utilities.

pub mod config;
pub mod coords;
pub mod error;
pub mod hash;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
