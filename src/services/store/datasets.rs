// Datasets Store
//
// 本地 JSON Lines 缓冲 + Hub 数据集定时同步：
// - connect 只保存配置，不做 I/O
// - 每个表首次写入时创建（或复用）同步调度器
// - shutdown / Drop 时每个调度器各自执行最后一次推送

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{FolderLock, Store};
use crate::error::{AppError, AppResult};
use crate::models::{validate_table_name, Record, StoreConfig};
use crate::services::hub::{CommitOutcome, CommitScheduler, HubApi, RemoteRepository};

/// 存储生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// 已配置，尚未写入任何记录
    Configured,
    /// 至少有一个同步调度器在运行
    Active,
    /// 正在执行最后一次推送
    Draining,
    Terminated,
}

struct Inner {
    state: StoreState,
    /// 表名 -> 调度器（共用仓库的表指向同一个调度器）
    schedulers: HashMap<String, Arc<CommitScheduler>>,
}

/// Hub 数据集存储
pub struct DatasetsStore {
    config: StoreConfig,
    lock: FolderLock,
    remote: Arc<dyn RemoteRepository>,
    inner: Mutex<Inner>,
}

impl DatasetsStore {
    /// 创建存储实例（仅校验并保存配置）
    pub fn connect(config: StoreConfig) -> AppResult<Self> {
        let remote = Arc::new(HubApi::from_config(&config)?);
        Self::with_remote(config, remote)
    }

    /// 使用自定义远端仓库实现创建存储
    pub fn with_remote(config: StoreConfig, remote: Arc<dyn RemoteRepository>) -> AppResult<Self> {
        config.validate()?;
        let lock = FolderLock::new(&config.folder_path);

        Ok(Self {
            config,
            lock,
            remote,
            inner: Mutex::new(Inner {
                state: StoreState::Configured,
                schedulers: HashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn folder_path(&self) -> &Path {
        self.lock.folder()
    }

    pub fn state(&self) -> StoreState {
        self.inner().state
    }

    /// 已写入过的表（按名称排序）
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.inner().schedulers.keys().cloned().collect();
        tables.sort();
        tables
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取表对应的调度器，首次出现时创建
    ///
    /// 配置了 repo_name 时所有表共用一个仓库，否则每个表使用同名仓库；
    /// 每个调度器都上传整个缓冲目录。
    fn scheduler_for(&self, table_name: &str) -> AppResult<Arc<CommitScheduler>> {
        let mut inner = self.inner();

        match inner.state {
            StoreState::Draining | StoreState::Terminated => {
                return Err(AppError::scheduler("存储已关闭，无法写入"));
            }
            StoreState::Configured | StoreState::Active => {}
        }

        if let Some(scheduler) = inner.schedulers.get(table_name) {
            return Ok(Arc::clone(scheduler));
        }

        let repo_name = self
            .config
            .repo_name
            .clone()
            .unwrap_or_else(|| table_name.to_string());

        let existing = inner
            .schedulers
            .values()
            .find(|s| s.repo_name() == repo_name)
            .cloned();

        let scheduler = match existing {
            Some(scheduler) => scheduler,
            None => {
                let scheduler = CommitScheduler::start(
                    self.config.clone(),
                    repo_name.clone(),
                    Arc::clone(&self.remote),
                    self.lock.clone(),
                )?;
                tracing::info!(
                    table = %table_name,
                    repo_name = %repo_name,
                    folder = %self.lock.folder().display(),
                    every_minutes = self.config.every,
                    "已为表创建同步调度器"
                );
                Arc::new(scheduler)
            }
        };

        inner
            .schedulers
            .insert(table_name.to_string(), Arc::clone(&scheduler));
        inner.state = StoreState::Active;
        Ok(scheduler)
    }

    /// 去重后的调度器列表
    fn unique_schedulers(schedulers: &HashMap<String, Arc<CommitScheduler>>) -> Vec<Arc<CommitScheduler>> {
        let mut unique: Vec<Arc<CommitScheduler>> = Vec::new();
        for scheduler in schedulers.values() {
            if !unique.iter().any(|s| Arc::ptr_eq(s, scheduler)) {
                unique.push(Arc::clone(scheduler));
            }
        }
        unique.sort_by(|a, b| a.repo_name().cmp(b.repo_name()));
        unique
    }

    /// 追加一条记录到表的本地缓冲文件
    pub fn add(&self, record: &Record) -> AppResult<()> {
        validate_table_name(record.table_name())?;
        self.scheduler_for(record.table_name())?;

        let mut line = record.to_line()?;
        line.push('\n');

        // guard 离开作用域时无条件释放
        let _guard = self.lock.acquire()?;
        let path = self.lock.folder().join(record.file_name());
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        tracing::trace!(table = %record.table_name(), path = %path.display(), "记录已写入缓冲文件");
        Ok(())
    }

    /// 立即同步所有表并等待结果
    pub async fn flush(&self) -> AppResult<Vec<CommitOutcome>> {
        let schedulers = Self::unique_schedulers(&self.inner().schedulers);

        let mut outcomes = Vec::with_capacity(schedulers.len());
        for scheduler in schedulers {
            outcomes.push(scheduler.push_to_hub().await?);
        }
        Ok(outcomes)
    }

    /// 同步版本的 flush（不可在异步上下文中调用）
    pub fn flush_blocking(&self) -> AppResult<Vec<CommitOutcome>> {
        let schedulers = Self::unique_schedulers(&self.inner().schedulers);

        schedulers
            .iter()
            .map(|scheduler| scheduler.push_to_hub_blocking())
            .collect()
    }

    /// 关闭存储：每个调度器执行最后一次推送后退出（可重复调用）
    pub fn shutdown(&self) -> AppResult<()> {
        let schedulers = {
            let mut inner = self.inner();
            if inner.state == StoreState::Terminated {
                return Ok(());
            }
            inner.state = StoreState::Draining;
            Self::unique_schedulers(&std::mem::take(&mut inner.schedulers))
        };

        let mut first_error = None;
        for scheduler in schedulers {
            if let Err(e) = scheduler.stop() {
                tracing::error!(repo_name = %scheduler.repo_name(), error = %e, "调度器停止失败");
                first_error.get_or_insert(e);
            }
        }

        self.inner().state = StoreState::Terminated;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Store for DatasetsStore {
    fn add(&self, record: &Record) -> AppResult<()> {
        DatasetsStore::add(self, record)
    }
}

impl Drop for DatasetsStore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "关闭数据集存储失败");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::hub::scheduler::tests::MemoryRepository;
    use serde_json::{json, Value};
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    fn create_test_store(folder: &Path, remote: Arc<MemoryRepository>) -> DatasetsStore {
        let config = StoreConfig {
            folder_path: folder.to_path_buf(),
            token: Some("hf_test".to_string()),
            ..Default::default()
        };
        DatasetsStore::with_remote(config, remote).unwrap()
    }

    fn chat_record(content: &str) -> Record {
        Record::new("chat")
            .with_json_field("messages", &json!([{"role": "user", "content": content}]))
            .unwrap()
            .with_field("response", "hello")
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_connect_is_inactive() {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("store");
        let store = create_test_store(&folder, MemoryRepository::new("alice"));

        assert_eq!(store.state(), StoreState::Configured);
        assert!(store.tables().is_empty());
        assert!(!folder.exists());
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let config = StoreConfig {
            every: -1.0,
            ..Default::default()
        };
        assert!(DatasetsStore::with_remote(config, MemoryRepository::new("alice")).is_err());

        // 换算后为零的间隔
        let config = StoreConfig {
            every: 1e-300,
            ..Default::default()
        };
        assert!(DatasetsStore::with_remote(config, MemoryRepository::new("alice")).is_err());
    }

    #[test]
    fn test_add_writes_expected_line() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(temp.path(), MemoryRepository::new("alice"));

        store.add(&chat_record("hi")).unwrap();

        let content = fs::read_to_string(temp.path().join("data_chat.json")).unwrap();
        assert_eq!(
            content,
            "{\"table_name\": \"chat\", \"messages\": \"[{\\\"role\\\": \\\"user\\\", \\\"content\\\": \\\"hi\\\"}]\", \"response\": \"hello\", \"synced_at\": null}\n"
        );
        assert_eq!(store.state(), StoreState::Active);
        assert_eq!(store.tables(), vec!["chat".to_string()]);
    }

    #[test]
    fn test_non_ascii_content_is_escaped() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(temp.path(), MemoryRepository::new("alice"));

        let record = Record::new("chat")
            .with_json_field("messages", &json!([{"role": "user", "content": "héllo 你好"}]))
            .unwrap()
            .with_field("response", "café");
        store.add(&record).unwrap();

        let content = fs::read_to_string(temp.path().join("data_chat.json")).unwrap();
        assert_eq!(
            content,
            "{\"table_name\": \"chat\", \"messages\": \"[{\\\"role\\\": \\\"user\\\", \\\"content\\\": \\\"h\\\\u00e9llo \\\\u4f60\\\\u597d\\\"}]\", \"response\": \"caf\\u00e9\", \"synced_at\": null}\n"
        );

        let rows = read_lines(&temp.path().join("data_chat.json"));
        let messages: Value = serde_json::from_str(rows[0]["messages"].as_str().unwrap()).unwrap();
        assert_eq!(messages[0]["content"], "héllo 你好");
        assert_eq!(rows[0]["response"], "café");
    }

    #[test]
    fn test_structured_fields_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(temp.path(), MemoryRepository::new("alice"));

        let messages = json!([{"role": "user", "content": "hi"}, {"role": "assistant", "content": "yo"}]);
        let record = Record::new("chat")
            .with_json_field("messages", &messages)
            .unwrap();
        store.add(&record).unwrap();

        let rows = read_lines(&temp.path().join("data_chat.json"));
        assert_eq!(rows.len(), 1);
        let parsed: Value = serde_json::from_str(rows[0]["messages"].as_str().unwrap()).unwrap();
        assert_eq!(parsed, messages);
        assert_eq!(rows[0]["synced_at"], Value::Null);
    }

    #[test]
    fn test_concurrent_adds_produce_intact_lines() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(create_test_store(temp.path(), MemoryRepository::new("alice")));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..25 {
                        let content = format!("thread-{}-{}-{}", t, i, "x".repeat(512));
                        store.add(&chat_record(&content)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let rows = read_lines(&temp.path().join("data_chat.json"));
        assert_eq!(rows.len(), 200);
        assert!(rows.iter().all(|row| row["table_name"] == "chat"));
    }

    #[test]
    fn test_two_stores_same_folder_no_cross_contamination() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        let first = create_test_store(temp.path(), remote.clone());
        let second = create_test_store(temp.path(), remote);

        first.add(&Record::new("alpha").with_field("n", 1)).unwrap();
        second.add(&Record::new("beta").with_field("n", 2)).unwrap();

        let alpha = read_lines(&temp.path().join("data_alpha.json"));
        let beta = read_lines(&temp.path().join("data_beta.json"));
        assert_eq!(alpha.len(), 1);
        assert_eq!(beta.len(), 1);
        assert_eq!(alpha[0]["table_name"], "alpha");
        assert_eq!(beta[0]["table_name"], "beta");
    }

    #[test]
    fn test_invalid_table_name_rejected() {
        let temp = TempDir::new().unwrap();
        let store = create_test_store(temp.path(), MemoryRepository::new("alice"));

        assert!(store.add(&Record::new("../escape")).is_err());
        assert_eq!(store.state(), StoreState::Configured);
    }

    #[tokio::test]
    async fn test_flush_with_defaults_uses_user_namespace() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        let store = create_test_store(temp.path(), remote.clone());

        store.add(&chat_record("hi")).unwrap();
        let outcomes = store.flush().await.unwrap();
        assert_eq!(outcomes.len(), 1);

        let local = fs::read(temp.path().join("data_chat.json")).unwrap();
        assert_eq!(remote.file("alice/chat", "data_chat.json").unwrap(), local);
        assert!(remote.calls().contains(&"whoami".to_string()));
    }

    #[tokio::test]
    async fn test_each_table_repo_receives_whole_folder() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        let store = create_test_store(temp.path(), remote.clone());

        store.add(&Record::new("alpha").with_field("n", 1)).unwrap();
        store.add(&Record::new("beta").with_field("n", 2)).unwrap();
        let outcomes = store.flush().await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let expected = vec!["data_alpha.json".to_string(), "data_beta.json".to_string()];
        assert_eq!(remote.paths("alice/alpha"), expected);
        assert_eq!(remote.paths("alice/beta"), expected);
    }

    #[tokio::test]
    async fn test_shared_repo_uploads_whole_folder() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        let config = StoreConfig {
            folder_path: temp.path().to_path_buf(),
            token: Some("hf_test".to_string()),
            org_name: Some("acme".to_string()),
            repo_name: Some("logs".to_string()),
            path_in_repo: Some("data".to_string()),
            ..Default::default()
        };
        let store = DatasetsStore::with_remote(config, remote.clone()).unwrap();

        store.add(&Record::new("alpha").with_field("n", 1)).unwrap();
        store.add(&Record::new("beta").with_field("n", 2)).unwrap();
        let outcomes = store.flush().await.unwrap();

        // 两个表共用一个调度器
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            remote.paths("acme/logs"),
            vec!["data/data_alpha.json".to_string(), "data/data_beta.json".to_string()]
        );
    }

    #[test]
    fn test_shutdown_flushes_and_terminates() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        let store = create_test_store(temp.path(), remote.clone());

        store.add(&chat_record("bye")).unwrap();
        store.shutdown().unwrap();

        assert_eq!(store.state(), StoreState::Terminated);
        assert!(remote.file("alice/chat", "data_chat.json").is_some());
        assert!(store.add(&chat_record("late")).is_err());
        store.shutdown().unwrap();
    }

    #[test]
    fn test_drop_flushes() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        {
            let store = create_test_store(temp.path(), remote.clone());
            store.add(&chat_record("dropped")).unwrap();
        }
        assert!(remote.file("alice/chat", "data_chat.json").is_some());
    }

    #[test]
    fn test_flush_blocking() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryRepository::new("alice");
        let store = create_test_store(temp.path(), remote.clone());

        store.add(&chat_record("sync")).unwrap();
        let outcomes = store.flush_blocking().unwrap();
        assert!(matches!(outcomes[0], CommitOutcome::Committed { .. }));
    }
}
