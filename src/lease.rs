use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{info, warn};

pub const LEASE_FILE: &str = "cycle.lock";

/// Single-writer arbitration for the shared cycle clock. Every process on a
/// data directory competes for an exclusive advisory lock on `cycle.lock`.
/// Only the holder ticks, persists the checkpoint or replays payouts; the
/// rest observe. The OS drops the lock when the holder exits, and the next
/// process to acquire it catches up from the last checkpoint.
pub trait WriterLease {
    /// Returns true if this process holds the lease after the call.
    fn try_acquire(&mut self) -> bool;
    fn is_held(&self) -> bool;
    fn release(&mut self);
}

#[derive(Debug)]
pub struct FileLease {
    path: PathBuf,
    file: Option<File>,
}

impl FileLease {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(LEASE_FILE),
            file: None,
        }
    }

    fn open_and_lock(&self) -> io::Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        file.try_lock_exclusive()?;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(file)
    }
}

impl WriterLease for FileLease {
    fn try_acquire(&mut self) -> bool {
        if self.file.is_some() {
            return true;
        }
        match self.open_and_lock() {
            Ok(file) => {
                info!(path = %self.path.display(), "acquired writer lease");
                self.file = Some(file);
                true
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => false,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "writer lease unavailable");
                false
            }
        }
    }

    fn is_held(&self) -> bool {
        self.file.is_some()
    }

    fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
            info!(path = %self.path.display(), "released writer lease");
        }
    }
}

impl Drop for FileLease {
    fn drop(&mut self) {
        self.release();
    }
}
