//! # Result Output
//!
//! Downstream CI steps read librarian's results from an environment file
//! (the `GITHUB_ENV` convention): one `KEY=value` line per result, appended
//! so that earlier steps' values survive.

use crate::error::{Error, Result};
use log::info;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Appends `KEY=value\n` to `env_file`, creating the file if needed.
pub fn append_env(env_file: &Path, key: &str, value: &str) -> Result<()> {
    if key.is_empty() || key.contains('=') || key.contains('\n') {
        return Err(Error::Config {
            message: format!("invalid environment key '{}'", key),
        });
    }
    if value.contains('\n') {
        return Err(Error::Config {
            message: format!("value for {} must be a single line", key),
        });
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(env_file)?;
    writeln!(file, "{}={}", key, value)?;
    info!("Wrote {} to {}", key, env_file.display());
    Ok(())
}

/// Appends to `env_file` when one is configured; otherwise only logs.
pub fn emit(env_file: Option<&Path>, key: &str, value: &str) -> Result<()> {
    match env_file {
        Some(path) => append_env(path, key, value),
        None => {
            info!("{}={}", key, value);
            Ok(())
        }
    }
}
