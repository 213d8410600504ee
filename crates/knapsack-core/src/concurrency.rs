//! Per-identity build locks and process shutdown signaling.

use crate::CoreError;
use fs2::FileExt;
use knapsack_schema::BuildId;
use knapsack_store::StoreLayout;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C handler once per process. The first signal requests
/// shutdown so in-flight hashing can abort cleanly; a second signal exits
/// immediately.
pub fn install_signal_handler() {
    let result = ctrlc::set_handler(|| {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(1);
        }
        eprintln!("shutdown requested, finishing current step (Ctrl-C again to force)");
    });
    if let Err(err) = result {
        warn!(%err, "signal handler not installed");
    }
}

/// Whether a shutdown was requested. The engine threads this into identity
/// hashing as its cancellation signal.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Advisory exclusive lock scoped to one build identity.
///
/// Holding the lock is the caller's proof that it alone may publish that
/// identity; the store's artifact and receipt for the id are only written
/// under it. Released on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    fn open(layout: &StoreLayout, id: &BuildId) -> Result<(File, PathBuf), CoreError> {
        let path = layout.locks_dir().join(format!("{id}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        Ok((file, path))
    }

    /// Block until the lock for `id` is held.
    pub fn acquire(layout: &StoreLayout, id: &BuildId) -> Result<Self, CoreError> {
        let (file, path) = Self::open(layout, id)?;
        file.lock_exclusive().map_err(|e| {
            CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e))
        })?;
        debug!(path = %path.display(), "acquired build lock");
        Ok(Self { file, path })
    }

    /// Take the lock if it is free; `None` when another holder has it.
    pub fn try_acquire(layout: &StoreLayout, id: &BuildId) -> Result<Option<Self>, CoreError> {
        let (file, path) = Self::open(layout, id)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(_) => Ok(None),
        }
    }

    /// The lock file backing this lock.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            warn!(path = %self.path.display(), %err, "failed to release build lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_layout() -> (tempfile::TempDir, StoreLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path().join("store"));
        layout.initialize().unwrap();
        (dir, layout)
    }

    #[test]
    fn acquire_then_release_then_reacquire() {
        let (_dir, layout) = temp_layout();
        let id = BuildId::new("abc123");
        let lock = BuildLock::acquire(&layout, &id).unwrap();
        drop(lock);
        let again = BuildLock::try_acquire(&layout, &id).unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn try_acquire_while_held_returns_none() {
        let (_dir, layout) = temp_layout();
        let id = BuildId::new("abc123");
        let _held = BuildLock::acquire(&layout, &id).unwrap();
        let second = BuildLock::try_acquire(&layout, &id).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn different_identities_do_not_contend() {
        let (_dir, layout) = temp_layout();
        let _first = BuildLock::acquire(&layout, &BuildId::new("aaa")).unwrap();
        let second = BuildLock::try_acquire(&layout, &BuildId::new("bbb")).unwrap();
        assert!(second.is_some());
    }

    #[test]
    fn shutdown_flag_defaults_to_false() {
        assert!(!shutdown_requested());
    }
}
