//! Hub 远端仓库与定时提交
//!
//! 负责把本地缓冲目录同步到 Hub 数据集仓库。

pub mod api;
pub mod scheduler;

pub use api::{CommitFile, CommitInfo, HubApi, RemoteRepository, RepoSpec};
pub use scheduler::{CommitOutcome, CommitScheduler};
