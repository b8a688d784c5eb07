//! Common utilities shared by the loader, the engine and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Parse a `NAME=VALUE` assignment as given on the command line
pub fn parse_assignment(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        None
    } else {
        Some((name.to_string(), value.to_string()))
    }
}
