use std::fmt::Display;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON 解析错误: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML 解析错误: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),
    #[error("未找到可用的访问令牌，请设置 token 或 HF_TOKEN 环境变量")]
    AuthRequired,
    #[error("Hub 请求失败 (HTTP {status}): {message}")]
    Hub { status: u16, message: String },
    #[error("上游接口返回错误 (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("配置错误: {0}")]
    Config(String),
    #[error("文件锁错误: {0}")]
    Lock(String),
    #[error("调度器错误: {0}")]
    Scheduler(String),
    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn config<E: Display>(err: E) -> Self {
        Self::Config(err.to_string())
    }

    pub fn lock<E: Display>(err: E) -> Self {
        Self::Lock(err.to_string())
    }

    pub fn scheduler<E: Display>(err: E) -> Self {
        Self::Scheduler(err.to_string())
    }

    /// 是否为鉴权失败（缺少令牌或 Hub 返回 401）
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::Hub { status: 401, .. })
    }
}
