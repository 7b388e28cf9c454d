//! CLI commands

use std::path::Path;

use crate::{Error, Result};

pub mod apply;

/// Read a whole file, naming it in the error
pub fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })
}
