//! SHA-256 verification of downloaded files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{ManagerError, ManagerResult};

const BUFFER_SIZE: usize = 64 * 1024;

/// Lowercase hex SHA-256 of a file's contents.
pub fn file_sha256(path: &Path) -> ManagerResult<String> {
    let read_error = |e| ManagerError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let mut file = File::open(path).map_err(read_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer).map_err(read_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a staged file against the catalog checksum.
///
/// Comparison ignores ASCII case. The reported filename drops the
/// staging suffix so messages name the dataset file.
pub fn verify_sha256(path: &Path, expected: &str) -> ManagerResult<()> {
    let actual = file_sha256(path)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = match filename.strip_suffix(crate::storage::PARTIAL_SUFFIX) {
        Some(stripped) => stripped.to_string(),
        None => filename,
    };
    Err(ManagerError::ChecksumMismatch {
        filename,
        expected: expected.to_string(),
        actual,
    })
}
