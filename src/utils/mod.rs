use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

/// Read a JSON file into a typed value. Bootstrap balance files and
/// prefunded-account lists go through here.
pub fn load_and_parse<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let raw = fs::read(path.as_ref())
        .with_context(|| format!("failed to read {}", path.as_ref().display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.as_ref().display()))
}
