//! 记录存储模块
//!
//! 记录先追加到本地缓冲文件，再由调度器异步同步到远端

mod datasets;
mod lock;

pub use datasets::{DatasetsStore, StoreState};
pub use lock::{FolderLock, FolderLockGuard, LOCK_FILE_NAME};

use crate::error::AppResult;
use crate::models::Record;

/// 记录存储 - 观测层只依赖该接口
pub trait Store: Send + Sync {
    /// 追加一条记录（在调用方线程同步执行）
    fn add(&self, record: &Record) -> AppResult<()>;
}
