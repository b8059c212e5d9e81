// Commit Scheduler
//
// 定时把本地缓冲目录提交到 Hub 数据集仓库：
// - 独立线程 + 单线程 tokio 运行时，不阻塞写入方
// - 定时触发 / 手动触发 / 停止前最后一次推送
// - 仅上传内容有变化的文件（SHA-256 比对）

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::api::{CommitFile, CommitInfo, RemoteRepository, RepoSpec};
use crate::error::{AppError, AppResult};
use crate::models::{StoreConfig, DEFAULT_REVISION};
use crate::services::store::{FolderLock, LOCK_FILE_NAME};

const COMMIT_SUMMARY: &str = "Scheduled Commit";
const SQUASH_MESSAGE: &str = "Super-squash history";

type TriggerReply = oneshot::Sender<AppResult<CommitOutcome>>;

/// 一次推送的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// 没有变更文件，未发起远端请求
    Skipped,
    Committed {
        repo_id: String,
        files: Vec<String>,
        commit: CommitInfo,
    },
}

/// 定时提交调度器
pub struct CommitScheduler {
    repo_name: String,
    trigger_tx: mpsc::UnboundedSender<TriggerReply>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CommitScheduler {
    /// 启动调度线程（不做任何网络请求）
    pub fn start(
        config: StoreConfig,
        repo_name: impl Into<String>,
        remote: Arc<dyn RemoteRepository>,
        lock: FolderLock,
    ) -> AppResult<Self> {
        let repo_name = repo_name.into();
        let worker = Worker::new(config, repo_name.clone(), remote, lock)?;

        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let handle = std::thread::Builder::new()
            .name(format!("commit-scheduler-{}", repo_name))
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!(error = ?e, "创建调度器运行时失败");
                        return;
                    }
                };
                runtime.block_on(worker.run(trigger_rx, cancel_clone));
            })?;

        tracing::debug!(repo_name = %repo_name, "提交调度器已启动");

        Ok(Self {
            repo_name,
            trigger_tx,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// 请求立即推送，返回结果接收端
    pub fn trigger(&self) -> AppResult<oneshot::Receiver<AppResult<CommitOutcome>>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger_tx
            .send(reply_tx)
            .map_err(|_| AppError::scheduler("调度器已停止"))?;
        Ok(reply_rx)
    }

    /// 立即推送并等待结果
    pub async fn push_to_hub(&self) -> AppResult<CommitOutcome> {
        self.trigger()?
            .await
            .map_err(|_| AppError::scheduler("调度器已停止"))?
    }

    /// 同步版本（不可在异步上下文中调用）
    pub fn push_to_hub_blocking(&self) -> AppResult<CommitOutcome> {
        self.trigger()?
            .blocking_recv()
            .map_err(|_| AppError::scheduler("调度器已停止"))?
    }

    /// 停止调度器：执行最后一次推送后等待线程退出（可重复调用）
    pub fn stop(&self) -> AppResult<()> {
        self.cancel.cancel();

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| AppError::scheduler(format!("调度线程异常退出: {}", self.repo_name)))?;
            tracing::info!(repo_name = %self.repo_name, "提交调度器已停止");
        }

        Ok(())
    }
}

impl Drop for CommitScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "停止提交调度器失败");
        }
    }
}

/// 快照中的单个文件
struct SnapshotFile {
    relative: String,
    content: Vec<u8>,
    digest: Vec<u8>,
}

/// 调度线程内部状态
struct Worker {
    config: StoreConfig,
    repo_name: String,
    remote: Arc<dyn RemoteRepository>,
    lock: FolderLock,
    allow_patterns: Vec<glob::Pattern>,
    ignore_patterns: Vec<glob::Pattern>,
    repo_id: Option<String>,
    last_uploaded: HashMap<String, Vec<u8>>,
}

impl Worker {
    fn new(
        config: StoreConfig,
        repo_name: String,
        remote: Arc<dyn RemoteRepository>,
        lock: FolderLock,
    ) -> AppResult<Self> {
        let allow_patterns = compile_patterns(config.allow_patterns.as_deref())?;
        let ignore_patterns = compile_patterns(config.ignore_patterns.as_deref())?;

        Ok(Self {
            config,
            repo_name,
            remote,
            lock,
            allow_patterns,
            ignore_patterns,
            repo_id: None,
            last_uploaded: HashMap::new(),
        })
    }

    async fn run(
        mut self,
        mut trigger_rx: mpsc::UnboundedReceiver<TriggerReply>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成，跳过
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // 停止前最后一次推送
                    match self.push_to_hub().await {
                        Ok(outcome) => tracing::info!(
                            repo_name = %self.repo_name,
                            outcome = ?outcome,
                            "停止前推送完成"
                        ),
                        Err(e) => tracing::error!(
                            repo_name = %self.repo_name,
                            error = %e,
                            "停止前推送失败，未同步的记录仅保留在本地"
                        ),
                    }
                    break;
                }
                Some(reply) = trigger_rx.recv() => {
                    let result = self.push_to_hub().await;
                    let _ = reply.send(result);
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.push_to_hub().await {
                        tracing::error!(
                            repo_name = %self.repo_name,
                            error = %e,
                            "定时推送失败，将在下个周期重试"
                        );
                    }
                }
            }
        }
    }

    async fn push_to_hub(&mut self) -> AppResult<CommitOutcome> {
        let snapshot = self.snapshot()?;
        if snapshot.is_empty() {
            tracing::debug!(repo_name = %self.repo_name, "没有变更文件，跳过提交");
            return Ok(CommitOutcome::Skipped);
        }

        let token = self.config.resolve_token().ok_or(AppError::AuthRequired)?;
        let repo_id = self.ensure_remote(&token).await?;

        let files: Vec<CommitFile> = snapshot
            .iter()
            .map(|file| CommitFile {
                path_in_repo: self.remote_path(&file.relative),
                content: file.content.clone(),
            })
            .collect();

        let revision = self.config.revision().to_string();
        let commit = self
            .remote
            .create_commit(&token, &repo_id, &revision, COMMIT_SUMMARY, &files)
            .await?;

        for file in &snapshot {
            self.last_uploaded
                .insert(file.relative.clone(), file.digest.clone());
        }

        tracing::info!(
            repo_id = %repo_id,
            revision = %revision,
            files = files.len(),
            commit = ?commit.commit_oid,
            "定时提交完成"
        );

        if self.config.squash_history {
            self.remote
                .super_squash(&token, &repo_id, &revision, SQUASH_MESSAGE)
                .await?;
            tracing::debug!(repo_id = %repo_id, "提交历史已压缩");
        }

        Ok(CommitOutcome::Committed {
            repo_id,
            files: files.into_iter().map(|f| f.path_in_repo).collect(),
            commit,
        })
    }

    /// 首次推送时确认身份、创建仓库与分支，结果缓存
    async fn ensure_remote(&mut self, token: &str) -> AppResult<String> {
        if let Some(repo_id) = &self.repo_id {
            return Ok(repo_id.clone());
        }

        let owner = match &self.config.org_name {
            Some(org) => org.clone(),
            None => self.remote.whoami(token).await?,
        };

        let spec = RepoSpec {
            owner,
            name: self.repo_name.clone(),
            private: self.config.private,
        };
        let repo_id = spec.repo_id();
        self.remote.create_repo(token, &spec).await?;

        let revision = self.config.revision();
        if revision != DEFAULT_REVISION {
            self.remote.create_branch(token, &repo_id, revision).await?;
        }

        tracing::info!(repo_id = %repo_id, revision = %revision, "远端数据集仓库就绪");
        self.repo_id = Some(repo_id.clone());
        Ok(repo_id)
    }

    /// 持锁读取所有变更文件
    fn snapshot(&self) -> AppResult<Vec<SnapshotFile>> {
        let _guard = self.lock.acquire()?;
        let folder = self.lock.folder();

        let mut files = Vec::new();
        for path in list_files(folder)? {
            let Some(relative) = relative_path(folder, &path) else {
                continue;
            };
            if !self.should_upload(&relative) {
                continue;
            }

            let content = fs::read(&path)?;
            let digest = Sha256::digest(&content).to_vec();
            if self.last_uploaded.get(&relative) == Some(&digest) {
                continue;
            }

            files.push(SnapshotFile {
                relative,
                content,
                digest,
            });
        }

        files.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(files)
    }

    fn should_upload(&self, relative: &str) -> bool {
        if !self.allow_patterns.is_empty()
            && !self.allow_patterns.iter().any(|p| p.matches(relative))
        {
            return false;
        }
        !self.ignore_patterns.iter().any(|p| p.matches(relative))
    }

    fn remote_path(&self, relative: &str) -> String {
        match self
            .config
            .path_in_repo
            .as_deref()
            .map(|p| p.trim_matches('/'))
        {
            Some(prefix) if !prefix.is_empty() => format!("{}/{}", prefix, relative),
            _ => relative.to_string(),
        }
    }
}

fn compile_patterns(patterns: Option<&[String]>) -> AppResult<Vec<glob::Pattern>> {
    patterns
        .unwrap_or_default()
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| AppError::config(format!("非法匹配模式 {}: {}", p, e)))
        })
        .collect()
}

/// 递归列出目录下的普通文件（不含根目录的锁文件）
fn list_files(folder: &Path) -> AppResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !folder.exists() {
        return Ok(files);
    }

    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if dir == folder && entry.file_name() == LOCK_FILE_NAME {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    Ok(files)
}

/// 相对路径，统一使用 `/` 分隔
fn relative_path(folder: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(folder).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
