// 观测层 - 包装 Chat Completion 客户端
//
// 职责：
// - 记录调用开始时间与耗时
// - 将请求/响应转换为数据集记录
// - 写入存储（失败只记日志，不影响调用方拿到响应）

mod client;
mod context;
mod observed;
mod record;

pub use client::{ChatCompletionClient, OpenAiClient, DEFAULT_OPENAI_BASE_URL};
pub use context::CallContext;
pub use observed::{wrap_openai, ObservedClient, DEFAULT_TABLE_NAME};
pub use record::{build_chat_record, CHAT_JSON_FIELDS};
