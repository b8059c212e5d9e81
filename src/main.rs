use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use observers::models::{ChatCompletionRequest, ChatMessage, StoreConfig};
use observers::services::hub::CommitOutcome;
use observers::services::observer::{wrap_openai, ChatCompletionClient, OpenAiClient};
use observers::services::store::DatasetsStore;
use observers::utils::{init_logger, LogConfig, LogLevel};

/// 发送一次 Chat Completion 请求并把记录同步到 Hub 数据集
#[derive(Debug, Parser)]
#[command(name = "observers", version)]
struct Cli {
    /// 存储配置文件（TOML）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OpenAI 兼容接口地址（包含 /v1）
    #[arg(long, env = "OPENAI_BASE_URL", default_value = observers::services::observer::DEFAULT_OPENAI_BASE_URL)]
    base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(short, long)]
    model: String,

    #[arg(short, long)]
    prompt: String,

    #[arg(long)]
    system: Option<String>,

    /// 记录表名
    #[arg(long, default_value = observers::services::observer::DEFAULT_TABLE_NAME)]
    table: String,

    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    #[arg(long)]
    log_json: bool,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = init_logger(&LogConfig {
        level: cli.log_level,
        json: cli.log_json,
        log_dir: cli.log_dir.clone(),
    })
    .context("初始化日志失败")?;

    let store_config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?,
        None => StoreConfig::default(),
    };
    tracing::debug!(config = ?store_config, "存储配置");

    let store = Arc::new(DatasetsStore::connect(store_config).context("创建数据集存储失败")?);
    let client = OpenAiClient::new(&cli.base_url, cli.api_key.clone())
        .context("创建 Chat Completion 客户端失败")?;
    let observed = wrap_openai(client, store.clone())
        .with_table_name(&cli.table)
        .with_tags(cli.tags.clone());

    let mut messages = Vec::new();
    if let Some(system) = &cli.system {
        messages.push(ChatMessage::system(system.as_str()));
    }
    messages.push(ChatMessage::user(cli.prompt.as_str()));
    let request = ChatCompletionRequest::new(&cli.model, messages);

    let response = observed
        .create(&request)
        .await
        .context("Chat Completion 请求失败")?;

    if let Some(text) = response.first_choice().and_then(|c| c.message.text()) {
        println!("{}", text);
    }

    for outcome in store.flush().await.context("同步数据集失败")? {
        match outcome {
            CommitOutcome::Committed { repo_id, files, .. } => {
                tracing::info!(repo_id = %repo_id, files = ?files, "记录已同步");
            }
            CommitOutcome::Skipped => tracing::info!("没有需要同步的记录"),
        }
    }

    store.shutdown().context("关闭数据集存储失败")?;
    Ok(())
}
