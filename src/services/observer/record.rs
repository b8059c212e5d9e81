// 记录构建层
//
// 职责：把一次调用（请求 + 响应或错误）转换为数据集记录，永不 panic

use serde_json::{Map, Value};

use super::CallContext;
use crate::error::AppError;
use crate::models::{ChatCompletionRequest, ChatCompletionResponse, Record};

/// 需要序列化为字符串的结构化字段
pub const CHAT_JSON_FIELDS: [&str; 6] = [
    "messages",
    "tool_calls",
    "function_call",
    "tags",
    "properties",
    "raw_response",
];

/// 构建 Chat Completion 记录
///
/// 字段顺序固定，失败的调用同样生成记录（error 字段非空，响应相关字段为 null）
pub fn build_chat_record(
    table_name: &str,
    tags: &[String],
    properties: &Map<String, Value>,
    request: &ChatCompletionRequest,
    outcome: Result<&ChatCompletionResponse, &AppError>,
    context: &CallContext,
) -> serde_json::Result<Record> {
    let response = outcome.ok();
    let choice = response.and_then(|r| r.first_choice());
    let usage = response.and_then(|r| r.usage.as_ref());

    let id = response
        .map(|r| r.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // 请求采样参数在前，包装器级别的 properties 覆盖同名键
    let mut merged_properties = request.sampling_params();
    for (key, value) in properties {
        merged_properties.insert(key.clone(), value.clone());
    }

    let raw_response = match response {
        Some(r) => serde_json::to_value(r)?,
        None => Value::Null,
    };

    let mut record = Record::new(table_name)
        .with_field("id", id)
        .with_field("model", request.model.clone())
        .with_field("timestamp", context.started_at.to_rfc3339())
        .with_field("messages", serde_json::to_value(&request.messages)?)
        .with_field(
            "assistant_message",
            choice.and_then(|c| c.message.text()).map_or(Value::Null, Value::String),
        )
        .with_field(
            "completion_tokens",
            usage.map_or(Value::Null, |u| Value::from(u.completion_tokens)),
        )
        .with_field(
            "prompt_tokens",
            usage.map_or(Value::Null, |u| Value::from(u.prompt_tokens)),
        )
        .with_field(
            "total_tokens",
            usage.map_or(Value::Null, |u| Value::from(u.total_tokens)),
        )
        .with_field(
            "finish_reason",
            choice
                .and_then(|c| c.finish_reason.clone())
                .map_or(Value::Null, Value::String),
        )
        .with_field(
            "tool_calls",
            choice
                .and_then(|c| c.message.tool_calls.clone())
                .unwrap_or(Value::Null),
        )
        .with_field(
            "function_call",
            choice
                .and_then(|c| c.message.function_call.clone())
                .unwrap_or(Value::Null),
        )
        .with_field("tags", serde_json::to_value(tags)?)
        .with_field("properties", Value::Object(merged_properties))
        .with_field(
            "error",
            outcome.err().map_or(Value::Null, |e| Value::String(e.to_string())),
        )
        .with_field("raw_response", raw_response)
        .with_field("duration_ms", context.elapsed_ms());

    for field in CHAT_JSON_FIELDS {
        record.mark_json_field(field);
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;
    use serde_json::json;

    fn sample_response() -> ChatCompletionResponse {
        serde_json::from_value(json!({
            "id": "chatcmpl-42",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "Qwen/Qwen2.5-Coder-32B-Instruct",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "joke", "arguments": "{}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
        }))
        .unwrap()
    }

    fn sample_request() -> ChatCompletionRequest {
        let mut request = ChatCompletionRequest::new(
            "Qwen/Qwen2.5-Coder-32B-Instruct",
            vec![ChatMessage::user("Tell me a joke.")],
        );
        request.temperature = Some(0.5);
        request
    }

    #[test]
    fn test_success_record_fields() {
        let response = sample_response();
        let mut properties = Map::new();
        properties.insert("env".to_string(), json!("test"));

        let record = build_chat_record(
            "openai_records",
            &["demo".to_string()],
            &properties,
            &sample_request(),
            Ok(&response),
            &CallContext::start(),
        )
        .unwrap();

        let keys: Vec<&str> = record.fields().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "id",
                "model",
                "timestamp",
                "messages",
                "assistant_message",
                "completion_tokens",
                "prompt_tokens",
                "total_tokens",
                "finish_reason",
                "tool_calls",
                "function_call",
                "tags",
                "properties",
                "error",
                "raw_response",
                "duration_ms"
            ]
        );

        let row = record.to_value().unwrap();
        assert_eq!(row["table_name"], "openai_records");
        assert_eq!(row["id"], "chatcmpl-42");
        assert_eq!(row["assistant_message"], Value::Null);
        assert_eq!(row["total_tokens"], 19);
        assert_eq!(row["finish_reason"], "tool_calls");
        assert_eq!(row["error"], Value::Null);
        // 函数调用为空：保持 null
        assert_eq!(row["function_call"], Value::Null);

        let tool_calls: Value = serde_json::from_str(row["tool_calls"].as_str().unwrap()).unwrap();
        assert_eq!(tool_calls[0]["function"]["name"], "joke");

        let properties: Value = serde_json::from_str(row["properties"].as_str().unwrap()).unwrap();
        assert_eq!(properties, json!({"temperature": 0.5, "env": "test"}));

        let raw: Value = serde_json::from_str(row["raw_response"].as_str().unwrap()).unwrap();
        assert_eq!(raw["id"], "chatcmpl-42");
    }

    #[test]
    fn test_error_record() {
        let error = AppError::Upstream {
            status: 500,
            message: "boom".to_string(),
        };

        let record = build_chat_record(
            "openai_records",
            &[],
            &Map::new(),
            &sample_request(),
            Err(&error),
            &CallContext::start(),
        )
        .unwrap();

        let row = record.to_value().unwrap();
        assert!(row["error"].as_str().unwrap().contains("boom"));
        assert!(uuid::Uuid::parse_str(row["id"].as_str().unwrap()).is_ok());
        assert_eq!(row["raw_response"], Value::Null);
        assert_eq!(row["prompt_tokens"], Value::Null);
        // 空 tags 原样保留为数组
        assert_eq!(row["tags"], json!([]));

        let messages: Value = serde_json::from_str(row["messages"].as_str().unwrap()).unwrap();
        assert_eq!(messages, json!([{"role": "user", "content": "Tell me a joke."}]));
    }
}
