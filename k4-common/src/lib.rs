//! # K4 Common Library
//!
//! Shared code for the K4 cryptanalysis crates:
//! - Error types
//! - Bootstrap configuration loading and path resolution
//! - Logging setup for binaries
//! - Static language resources (n-gram tables, wordlist, letter frequencies)
//! - Alphabet helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod resources;
pub mod text;

pub use error::{Error, Result};
pub use resources::{LanguageResources, NgramTable, Wordlist};
