use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{AppError, AppResult};

pub const BACKUP_ACCESS_DENIED: &str = "BACKUP/ACCESS_DENIED";

/// Grants scoped read access to a user-selected file. The grant lasts as
/// long as the returned guard.
pub trait FileAccess: Send + Sync {
    fn acquire(&self, path: &Path) -> AppResult<AccessGuard>;
}

/// Releases its grant when dropped, on every exit path.
pub struct AccessGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl AccessGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unscoped() -> Self {
        Self { release: None }
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGuard")
            .field("scoped", &self.release.is_some())
            .finish()
    }
}

/// Plain filesystem access: the file must exist and be a regular file.
/// Keeps a count of outstanding grants.
#[derive(Debug, Clone, Default)]
pub struct LocalFileAccess {
    active: Arc<AtomicUsize>,
}

impl LocalFileAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_grants(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl FileAccess for LocalFileAccess {
    fn acquire(&self, path: &Path) -> AppResult<AccessGuard> {
        let meta = std::fs::metadata(path).map_err(|err| {
            AppError::new(BACKUP_ACCESS_DENIED, "Backup file cannot be opened")
                .with_context("path", path.display().to_string())
                .with_cause(err)
        })?;
        if !meta.is_file() {
            return Err(
                AppError::new(BACKUP_ACCESS_DENIED, "Backup path is not a file")
                    .with_context("path", path.display().to_string()),
            );
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        let active = self.active.clone();
        Ok(AccessGuard::new(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }
}
