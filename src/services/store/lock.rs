//! 缓冲目录锁
//!
//! 进程内互斥锁 + 目录下 `.lock` 文件的排他文件锁。
//! 追加写入与同步快照都必须持有该锁。

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;

use crate::error::{AppError, AppResult};

pub const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, Clone)]
pub struct FolderLock {
    folder: PathBuf,
    inner: Arc<Mutex<()>>,
}

/// 持锁期间有效，Drop 时无条件释放
pub struct FolderLockGuard<'a> {
    file: File,
    _guard: MutexGuard<'a, ()>,
}

impl FolderLock {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            inner: Arc::new(Mutex::new(())),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn lock_path(&self) -> PathBuf {
        self.folder.join(LOCK_FILE_NAME)
    }

    /// 阻塞获取目录锁（目录不存在时自动创建）
    pub fn acquire(&self) -> AppResult<FolderLockGuard<'_>> {
        let guard = self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(folder = %self.folder.display(), "目录锁曾被 panic 线程持有，继续使用");
            poisoned.into_inner()
        });

        fs::create_dir_all(&self.folder)?;
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        FileExt::lock_exclusive(&file).map_err(|e| {
            AppError::lock(format!("{}: {}", self.lock_path().display(), e))
        })?;

        Ok(FolderLockGuard {
            file,
            _guard: guard,
        })
    }
}

impl Drop for FolderLockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = ?e, "释放目录文件锁失败");
        }
    }
}
