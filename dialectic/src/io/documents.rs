//! Reading the requirements and reading/writing the specification document.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::io::workspace::{diagnose_write, write_atomic};

/// Read the requirements document. Missing or blank requirements are a setup error.
pub fn read_requirements(path: &Path) -> Result<String> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read requirements {}", path.display()))?;
    if contents.trim().is_empty() {
        bail!("requirements file {} is empty", path.display());
    }
    Ok(contents)
}

/// Read the specification if one exists. A blank file counts as absent.
pub fn read_specification(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(None),
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read specification {}", path.display())),
    }
}

/// Write the specification atomically. Failures carry a write diagnostic.
pub fn write_specification(path: &Path, contents: &str) -> Result<()> {
    write_atomic(path, contents.as_bytes()).map_err(|err| {
        let diag = diagnose_write(path);
        err.context(format!("write specification {} ({diag})", path.display()))
    })
}
