//! Hub 仓库接口
//!
//! 只覆盖定时提交需要的最小接口：whoami、建仓、建分支、提交、压缩历史

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::models::StoreConfig;

const REPO_TYPE: &str = "dataset";

/// 待提交文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFile {
    pub path_in_repo: String,
    pub content: Vec<u8>,
}

/// 建仓参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub owner: String,
    pub name: String,
    pub private: Option<bool>,
}

impl RepoSpec {
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// 提交结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommitInfo {
    #[serde(default, rename = "commitOid")]
    pub commit_oid: Option<String>,
    #[serde(default, rename = "commitUrl")]
    pub commit_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhoAmIResponse {
    name: String,
}

/// 远端版本化仓库
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// 返回令牌所属用户名
    async fn whoami(&self, token: &str) -> AppResult<String>;

    /// 创建数据集仓库（已存在视为成功）
    async fn create_repo(&self, token: &str, spec: &RepoSpec) -> AppResult<()>;

    /// 创建分支（已存在视为成功）
    async fn create_branch(&self, token: &str, repo_id: &str, branch: &str) -> AppResult<()>;

    /// 在指定分支上提交一组文件
    async fn create_commit(
        &self,
        token: &str,
        repo_id: &str,
        revision: &str,
        summary: &str,
        files: &[CommitFile],
    ) -> AppResult<CommitInfo>;

    /// 将分支历史压缩为单个提交
    async fn super_squash(
        &self,
        token: &str,
        repo_id: &str,
        revision: &str,
        message: &str,
    ) -> AppResult<()>;
}

/// 基于 HTTP 的 Hub 客户端
#[derive(Debug, Clone)]
pub struct HubApi {
    client: reqwest::Client,
    endpoint: String,
}

impl HubApi {
    pub fn new(endpoint: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("observers/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &StoreConfig) -> AppResult<Self> {
        Self::new(config.resolve_endpoint())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn repo_url(&self, repo_id: &str, action: &str, revision: &str) -> String {
        format!(
            "{}/api/{}s/{}/{}/{}",
            self.endpoint,
            REPO_TYPE,
            repo_id,
            action,
            urlencoding::encode(revision)
        )
    }

    /// 检查响应状态，失败时转为 AppError::Hub
    async fn check(response: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(AppError::Hub {
            status: status.as_u16(),
            message: hub_error_message(&message),
        })
    }
}

#[async_trait]
impl RemoteRepository for HubApi {
    async fn whoami(&self, token: &str) -> AppResult<String> {
        let response = self
            .client
            .get(format!("{}/api/whoami-v2", self.endpoint))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AppError::AuthRequired);
        }

        let info: WhoAmIResponse = Self::check(response).await?.json().await?;
        Ok(info.name)
    }

    async fn create_repo(&self, token: &str, spec: &RepoSpec) -> AppResult<()> {
        let mut body = json!({
            "name": spec.name,
            "organization": spec.owner,
            "type": REPO_TYPE,
        });
        if let Some(private) = spec.private {
            body["private"] = json!(private);
        }

        let response = self
            .client
            .post(format!("{}/api/repos/create", self.endpoint))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            tracing::debug!(repo_id = %spec.repo_id(), "数据集仓库已存在");
            return Ok(());
        }

        Self::check(response).await?;
        tracing::info!(repo_id = %spec.repo_id(), "已创建数据集仓库");
        Ok(())
    }

    async fn create_branch(&self, token: &str, repo_id: &str, branch: &str) -> AppResult<()> {
        let response = self
            .client
            .post(self.repo_url(repo_id, "branch", branch))
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        Self::check(response).await?;
        Ok(())
    }

    async fn create_commit(
        &self,
        token: &str,
        repo_id: &str,
        revision: &str,
        summary: &str,
        files: &[CommitFile],
    ) -> AppResult<CommitInfo> {
        let payload = commit_payload(summary, files)?;

        let response = self
            .client
            .post(self.repo_url(repo_id, "commit", revision))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;

        let info: CommitInfo = Self::check(response).await?.json().await?;
        Ok(info)
    }

    async fn super_squash(
        &self,
        token: &str,
        repo_id: &str,
        revision: &str,
        message: &str,
    ) -> AppResult<()> {
        let response = self
            .client
            .post(self.repo_url(repo_id, "super-squash", revision))
            .bearer_auth(token)
            .json(&json!({ "message": message }))
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }
}

/// 构建 ndjson 提交体：首行为 header，其后每个文件一行
pub fn commit_payload(summary: &str, files: &[CommitFile]) -> AppResult<String> {
    let mut lines = Vec::with_capacity(files.len() + 1);
    lines.push(serde_json::to_string(&json!({
        "key": "header",
        "value": { "summary": summary, "description": "" },
    }))?);

    for file in files {
        lines.push(serde_json::to_string(&json!({
            "key": "file",
            "value": {
                "path": file.path_in_repo,
                "content": BASE64.encode(&file.content),
                "encoding": "base64",
            },
        }))?);
    }

    let mut payload = lines.join("\n");
    payload.push('\n');
    Ok(payload)
}

/// 提取 Hub 错误体中的 error 字段，非 JSON 时原样返回
fn hub_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
