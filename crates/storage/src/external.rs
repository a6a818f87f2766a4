// SPDX-License-Identifier: MIT

//! External payload files.
//!
//! Parts larger than the threshold live as files under the external
//! payload directory; the part row stores the bare filename. Writes are
//! atomic: data goes to `<name>.tmp`, is fsynced and renamed into place.
//! Deletion is deferred until the enclosing transaction commits; a
//! rollback leaves the file for the janitor to reclaim.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use satchel_core::{Id, Part};

use crate::datastore::StorageError;

/// Payloads above this many bytes are stored as files.
pub const EXTERNAL_PAYLOAD_THRESHOLD: i64 = 4096;

/// Filename for a part's payload. The revision makes replacing a payload
/// a write-new-then-delete-old sequence, never an in-place overwrite.
pub fn external_file_name(part_id: Id, rev: i32) -> String {
    format!("{part_id}_r{rev}")
}

/// Atomically writes `data` to `dir/name`.
pub fn write_external_file(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(dir)?;
    let final_path = dir.join(name);
    let tmp_path = dir.join(format!("{name}.tmp"));
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(final_path)
}

/// Checks that an external part's file exists and matches its recorded
/// size.
pub fn verify_external_part(dir: &Path, part: &Part) -> Result<(), StorageError> {
    let Some(name) = part.data.as_deref() else {
        return Err(StorageError::InvalidData(format!(
            "external part {} has no file name",
            part.id
        )));
    };
    let name = std::str::from_utf8(name)
        .map_err(|_| StorageError::InvalidData(format!("part {} file name not UTF-8", part.id)))?;
    let path = dir.join(name);
    let meta = std::fs::metadata(&path).map_err(|_| {
        StorageError::NotFound(format!("external file {}", path.display()))
    })?;
    if meta.len() as i64 != part.datasize {
        return Err(StorageError::InvalidData(format!(
            "external file {} has size {}, part records {}",
            path.display(),
            meta.len(),
            part.datasize
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "external_tests.rs"]
mod tests;
