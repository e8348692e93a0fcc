pub mod wav_file;

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::models::error::SessionError;

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Create `<prefix>_<YYYYmmdd_HHMMSS>.<ext>` in `dir`, never overwriting.
///
/// A second file in the same second gets a `_1`, `_2`, ... suffix. The
/// file is opened read-write so callers can patch what they wrote.
pub fn create_timestamped(dir: &Path, prefix: &str, ext: &str) -> Result<(File, PathBuf), SessionError> {
    fs::create_dir_all(dir)
        .map_err(|e| SessionError::StorageError(format!("failed to create directory: {}", e)))?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{prefix}_{stamp}.{ext}"),
            n => format!("{prefix}_{stamp}_{n}.{ext}"),
        };
        let path = dir.join(name);
        match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(SessionError::StorageError(format!("failed to create file: {}", e))),
        }
    }
    Err(SessionError::StorageError(format!(
        "no free file name for {prefix}_{stamp} in {}",
        dir.display()
    )))
}
