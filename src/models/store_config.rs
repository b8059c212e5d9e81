//! 数据集存储配置
//!
//! 支持从 TOML 文件加载，令牌与 Hub 地址可由环境变量兜底

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

pub const DEFAULT_DATA_FOLDER: &str = "store";
pub const DEFAULT_EVERY_MINUTES: f64 = 5.0;
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";

pub const TOKEN_ENV: &str = "HF_TOKEN";
pub const ENDPOINT_ENV: &str = "HF_ENDPOINT";
pub const HOME_ENV: &str = "HF_HOME";

/// 数据集存储配置（存储开始运行后不再修改）
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// 仓库所属组织，缺省时使用当前登录用户名
    pub org_name: Option<String>,
    /// 仓库名，缺省时使用记录的表名
    pub repo_name: Option<String>,
    /// 本地缓冲目录
    pub folder_path: PathBuf,
    /// 同步间隔（分钟）
    pub every: f64,
    /// 远端路径前缀
    pub path_in_repo: Option<String>,
    pub revision: Option<String>,
    pub private: Option<bool>,
    pub token: Option<String>,
    pub allow_patterns: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
    /// 每次推送后压缩提交历史
    pub squash_history: bool,
    pub endpoint: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            org_name: None,
            repo_name: None,
            folder_path: PathBuf::from(DEFAULT_DATA_FOLDER),
            every: DEFAULT_EVERY_MINUTES,
            path_in_repo: None,
            revision: None,
            private: None,
            token: None,
            allow_patterns: None,
            ignore_patterns: None,
            squash_history: false,
            endpoint: None,
        }
    }
}

// 令牌不出现在日志里
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("org_name", &self.org_name)
            .field("repo_name", &self.repo_name)
            .field("folder_path", &self.folder_path)
            .field("every", &self.every)
            .field("path_in_repo", &self.path_in_repo)
            .field("revision", &self.revision)
            .field("private", &self.private)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("allow_patterns", &self.allow_patterns)
            .field("ignore_patterns", &self.ignore_patterns)
            .field("squash_history", &self.squash_history)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl StoreConfig {
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: StoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> AppResult<()> {
        if every_to_duration(self.every).is_none() {
            return Err(AppError::config(format!(
                "every 必须为正数（分钟）且可转换为有效间隔，当前值: {}",
                self.every
            )));
        }

        for (key, value) in [("org_name", &self.org_name), ("repo_name", &self.repo_name)] {
            if let Some(value) = value {
                if value.is_empty() || value.contains('/') {
                    return Err(AppError::config(format!("{} 非法: {:?}", key, value)));
                }
            }
        }

        for patterns in [&self.allow_patterns, &self.ignore_patterns]
            .into_iter()
            .flatten()
        {
            for pattern in patterns {
                glob::Pattern::new(pattern)
                    .map_err(|e| AppError::config(format!("非法匹配模式 {}: {}", pattern, e)))?;
            }
        }

        Ok(())
    }

    /// 同步间隔
    ///
    /// 非法值（未经 validate）回退到默认间隔
    pub fn interval(&self) -> Duration {
        every_to_duration(self.every)
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_EVERY_MINUTES * 60.0))
    }

    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or(DEFAULT_REVISION)
    }

    /// 解析访问令牌
    ///
    /// 优先级：显式配置 > HF_TOKEN 环境变量 > 本地令牌文件
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                std::env::var(TOKEN_ENV)
                    .ok()
                    .filter(|t| !t.trim().is_empty())
            })
            .or_else(read_token_file)
    }

    /// 解析 Hub 地址
    pub fn resolve_endpoint(&self) -> String {
        self.endpoint
            .clone()
            .or_else(|| std::env::var(ENDPOINT_ENV).ok())
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

/// 分钟数转为非零间隔，溢出、非正数或非有限值返回 None
fn every_to_duration(every: f64) -> Option<Duration> {
    if !every.is_finite() || every <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(every * 60.0)
        .ok()
        .filter(|d| !d.is_zero())
}

/// 本地令牌文件路径（`$HF_HOME/token` 或 `~/.cache/huggingface/token`）
pub fn token_file_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if !home.trim().is_empty() {
            return Some(PathBuf::from(home).join("token"));
        }
    }
    dirs::home_dir().map(|home| home.join(".cache").join("huggingface").join("token"))
}

fn read_token_file() -> Option<String> {
    let path = token_file_path()?;
    let token = fs::read_to_string(&path).ok()?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        tracing::debug!(path = %path.display(), "使用本地令牌文件");
        Some(token.to_string())
    }
}
