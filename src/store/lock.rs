//! Exclusive advisory lock on a store file, held for as long as the guard lives.
//!
//! Another process opening the same file blocks in [`FileLock::acquire`]
//! until the holder drops its guard (or exits).

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

use fs2::FileExt;

/// An open, exclusively locked file. Unlocks on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Open (creating if needed) `path` for read/write and lock it.
    ///
    /// Tries a non-blocking lock first so that contention shows up in the
    /// logs, then blocks.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                tracing::info!("{} is locked by another process, waiting", path.display());
                file.lock_exclusive()?;
            }
            Err(e) => return Err(e),
        }

        Ok(Self { file })
    }

    /// Try to lock without blocking. `Ok(None)` if another process holds it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn file(&self) -> &File {
        &self.file
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// fs2 surfaces contention as a raw OS error that does not always map to
/// `WouldBlock` (EAGAIN is 11 on Linux, 35 on macOS).
fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || matches!(e.raw_os_error(), Some(11) | Some(35))
}
