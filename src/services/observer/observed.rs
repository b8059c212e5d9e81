// 观测包装器
//
// 对调用方透明：返回值与被包装客户端完全一致，
// 记录构建或写入失败只记录日志

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{build_chat_record, CallContext, ChatCompletionClient, OpenAiClient};
use crate::error::AppResult;
use crate::models::{ChatCompletionRequest, ChatCompletionResponse};
use crate::services::store::Store;

pub const DEFAULT_TABLE_NAME: &str = "openai_records";

/// 带观测能力的客户端
pub struct ObservedClient<C> {
    inner: C,
    store: Arc<dyn Store>,
    table_name: String,
    tags: Vec<String>,
    properties: Map<String, Value>,
}

impl<C: ChatCompletionClient> ObservedClient<C> {
    pub fn new(inner: C, store: Arc<dyn Store>) -> Self {
        Self {
            inner,
            store,
            table_name: DEFAULT_TABLE_NAME.to_string(),
            tags: Vec::new(),
            properties: Map::new(),
        }
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// 记录调用结果（失败只写日志）
    fn observe(
        &self,
        request: &ChatCompletionRequest,
        outcome: Result<&ChatCompletionResponse, &crate::error::AppError>,
        context: &CallContext,
    ) {
        let record = match build_chat_record(
            &self.table_name,
            &self.tags,
            &self.properties,
            request,
            outcome,
            context,
        ) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(
                    table = %self.table_name,
                    model = %request.model,
                    error = ?e,
                    "构建观测记录失败"
                );
                return;
            }
        };

        match self.store.add(&record) {
            Ok(()) => tracing::debug!(
                table = %self.table_name,
                model = %request.model,
                duration_ms = context.elapsed_ms(),
                "观测记录已写入"
            ),
            Err(e) => tracing::error!(
                table = %self.table_name,
                model = %request.model,
                error = %e,
                "写入观测记录失败"
            ),
        }
    }
}

#[async_trait]
impl<C: ChatCompletionClient> ChatCompletionClient for ObservedClient<C> {
    async fn create(&self, request: &ChatCompletionRequest) -> AppResult<ChatCompletionResponse> {
        let context = CallContext::start();
        let result = self.inner.create(request).await;
        self.observe(request, result.as_ref(), &context);
        result
    }
}

/// 包装 OpenAI 兼容客户端
pub fn wrap_openai(client: OpenAiClient, store: Arc<dyn Store>) -> ObservedClient<OpenAiClient> {
    ObservedClient::new(client, store)
}
