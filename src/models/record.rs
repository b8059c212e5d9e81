//! 数据集记录
//!
//! 一条 Record 对应本地缓冲文件中的一行 JSON

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::utils::json::{is_truthy, to_dataset_string};

/// 行内保留字段
const TABLE_NAME_KEY: &str = "table_name";
const SYNCED_AT_KEY: &str = "synced_at";

/// 一次被捕获的交互
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    table_name: String,
    fields: Map<String, Value>,
    json_fields: Vec<String>,
    synced_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            fields: Map::new(),
            json_fields: Vec::new(),
            synced_at: None,
        }
    }

    /// 追加普通字段（按插入顺序写出）
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// 追加结构化字段，写入时会被序列化为 JSON 字符串
    pub fn with_json_field(
        mut self,
        name: impl Into<String>,
        value: &impl Serialize,
    ) -> serde_json::Result<Self> {
        let name = name.into();
        let value = serde_json::to_value(value)?;
        self.set(name.clone(), value);
        self.mark_json_field(name);
        Ok(self)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn mark_json_field(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.json_fields.contains(&name) {
            self.json_fields.push(name);
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn json_fields(&self) -> &[String] {
        &self.json_fields
    }

    /// 同步时间（目前上传后不会回写，始终为空）
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    /// 本地缓冲文件名
    pub fn file_name(&self) -> String {
        table_file_name(&self.table_name)
    }

    /// 构建写入文件的对象
    ///
    /// 顺序：table_name、各字段（插入顺序）、synced_at。
    /// 结构化字段仅在为真值时转为字符串，空值原样保留。
    pub fn to_value(&self) -> serde_json::Result<Value> {
        let mut row = Map::with_capacity(self.fields.len() + 2);
        row.insert(
            TABLE_NAME_KEY.to_string(),
            Value::String(self.table_name.clone()),
        );

        for (name, value) in &self.fields {
            if name == TABLE_NAME_KEY || name == SYNCED_AT_KEY {
                continue;
            }

            let value = if self.json_fields.contains(name) && is_truthy(value) {
                Value::String(to_dataset_string(value)?)
            } else {
                value.clone()
            };
            row.insert(name.clone(), value);
        }

        row.insert(SYNCED_AT_KEY.to_string(), Value::Null);
        Ok(Value::Object(row))
    }

    /// 序列化为单行文本（不含换行符）
    pub fn to_line(&self) -> serde_json::Result<String> {
        to_dataset_string(&self.to_value()?)
    }
}

/// 表对应的本地文件名
pub fn table_file_name(table_name: &str) -> String {
    format!("data_{}.json", table_name)
}

/// 校验表名（表名会直接作为文件名的一部分）
pub fn validate_table_name(table_name: &str) -> AppResult<()> {
    if table_name.trim().is_empty() {
        return Err(AppError::config("表名不能为空"));
    }
    if table_name.contains(['/', '\\']) || table_name.contains("..") {
        return Err(AppError::config(format!("非法表名: {}", table_name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_line_format() {
        let record = Record::new("chat")
            .with_json_field("messages", &json!([{"role": "user", "content": "hi"}]))
            .unwrap()
            .with_field("response", "hello");

        assert_eq!(
            record.to_line().unwrap(),
            r#"{"table_name": "chat", "messages": "[{\"role\": \"user\", \"content\": \"hi\"}]", "response": "hello", "synced_at": null}"#
        );
    }

    #[test]
    fn test_json_field_round_trip() {
        let tool_calls = json!([{"id": "call_1", "function": {"name": "f", "arguments": "{}"}}]);
        let record = Record::new("chat")
            .with_json_field("tool_calls", &tool_calls)
            .unwrap();

        let row: Value = serde_json::from_str(&record.to_line().unwrap()).unwrap();
        let text = row["tool_calls"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed, tool_calls);
    }

    #[test]
    fn test_falsy_json_fields_kept_as_is() {
        let record = Record::new("chat")
            .with_json_field("tags", &Vec::<String>::new())
            .unwrap()
            .with_json_field("properties", &Value::Null)
            .unwrap();

        let row = record.to_value().unwrap();
        assert_eq!(row["tags"], json!([]));
        assert_eq!(row["properties"], Value::Null);
    }

    #[test]
    fn test_reserved_keys_not_overridden() {
        let record = Record::new("chat")
            .with_field("table_name", "other")
            .with_field("synced_at", "2024-01-01");

        let row = record.to_value().unwrap();
        assert_eq!(row["table_name"], "chat");
        assert_eq!(row["synced_at"], Value::Null);
        assert_eq!(row.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_file_name() {
        assert_eq!(Record::new("chat").file_name(), "data_chat.json");
        assert_eq!(table_file_name("openai_records"), "data_openai_records.json");
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("chat").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("  ").is_err());
        assert!(validate_table_name("a/b").is_err());
        assert!(validate_table_name("..").is_err());
    }
}
