//! Chat Completion 客户端
//!
//! `ChatCompletionClient` 是被包装的接口，`OpenAiClient` 是基于 reqwest 的
//! OpenAI 兼容实现（OpenAI、HF Inference、vLLM 等）。

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::models::{ChatCompletionRequest, ChatCompletionResponse};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn create(&self, request: &ChatCompletionRequest) -> AppResult<ChatCompletionResponse>;
}

/// OpenAI 兼容客户端
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// `base_url` 包含版本前缀，例如 `https://api-inference.huggingface.co/v1/`
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(600))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    /// 从 OPENAI_BASE_URL / OPENAI_API_KEY 环境变量创建
    pub fn from_env() -> AppResult<Self> {
        let base_url =
            std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        Self::new(base_url, std::env::var(API_KEY_ENV).ok())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatCompletionClient for OpenAiClient {
    async fn create(&self, request: &ChatCompletionRequest) -> AppResult<ChatCompletionResponse> {
        let url = self.completions_url();
        tracing::debug!(url = %url, model = %request.model, "发送 Chat Completion 请求");

        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Chat Completion 请求失败");
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let completion: ChatCompletionResponse = serde_json::from_slice(&body)?;
        Ok(completion)
    }
}
