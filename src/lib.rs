//! Chat Completion 调用观测
//!
//! 包装 OpenAI 兼容客户端，把每次调用记录为数据集行，
//! 先追加到本地缓冲文件，再定时提交到 Hub 数据集仓库。

pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{AppError, AppResult};
pub use models::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Record, Role, StoreConfig,
};
pub use services::hub::{CommitOutcome, HubApi, RemoteRepository};
pub use services::observer::{wrap_openai, ChatCompletionClient, ObservedClient, OpenAiClient};
pub use services::store::{DatasetsStore, Store, StoreState};
