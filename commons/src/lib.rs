//! Common utilities for the package-registry clients.

#![deny(missing_docs)]

pub mod expiry;
pub mod testing;

use anyhow::{bail, format_err, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read an access token from the first line of a credentials file.
pub fn read_credentials<P: AsRef<Path>>(credentials_path: P) -> Result<String> {
    let path = credentials_path.as_ref();
    let file = File::open(path).context(format!("could not open '{}'", path.display()))?;

    let first_line = BufReader::new(file)
        .lines()
        .next()
        .ok_or_else(|| format_err!("empty credentials."))?;

    let token = first_line?.trim_end().to_string();

    if token.is_empty() {
        bail!("found an empty first line in '{}'", path.display())
    }

    Ok(token)
}
