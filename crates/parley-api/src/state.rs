//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both the CLI and the
//! HTTP server. `ChatService` is generic over its collaborators; AppState pins
//! them to the SQLite repositories and HTTP adapters from parley-infra.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use parley_core::background::BackgroundTasks;
use parley_core::chat::service::{ChatDeps, ChatService};
use parley_infra::config::{load_config, resolve_data_dir};
use parley_infra::llm::HttpLlmProviderFactory;
use parley_infra::notify::TracingNotifier;
use parley_infra::sqlite::context::SqliteContextRepository;
use parley_infra::sqlite::memory::SqliteMemoryRepository;
use parley_infra::sqlite::pool::{DatabasePool, default_database_url};
use parley_infra::sqlite::task_config::SqliteTaskConfigRepository;
use parley_infra::tools::gateway::HttpToolGateway;
use parley_types::config::ParleyConfig;

/// Concrete type alias for the chat service pinned to infra implementations.
pub type ConcreteChatService = ChatService<
    SqliteTaskConfigRepository,
    SqliteMemoryRepository,
    SqliteContextRepository,
    HttpLlmProviderFactory,
    HttpToolGateway,
    TracingNotifier,
>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub task_configs: Arc<SqliteTaskConfigRepository>,
    pub config: Arc<ParleyConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the database and
    /// wire the services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;
        let pool = DatabasePool::new(&default_database_url(&data_dir))
            .await
            .context("failed to open the Parley database")?;

        Self::from_parts(data_dir, config, pool)
    }

    pub fn from_parts(
        data_dir: PathBuf,
        config: ParleyConfig,
        pool: DatabasePool,
    ) -> anyhow::Result<Self> {
        let llm_factory =
            HttpLlmProviderFactory::new(Duration::from_secs(config.llm.request_timeout_secs))
                .context("failed to build the LLM HTTP client")?;

        let tools = HttpToolGateway::new(reqwest::Client::new(), config.tools.gateway_url.clone());
        if !tools.is_enabled() {
            info!("No tool gateway configured, chat runs without tools");
        }

        let chat_service = ChatService::new(
            &config,
            ChatDeps {
                task_configs: SqliteTaskConfigRepository::new(pool.clone()),
                memory: Arc::new(SqliteMemoryRepository::new(pool.clone())),
                contexts: Arc::new(SqliteContextRepository::new(pool.clone())),
                llm_factory: Arc::new(llm_factory),
                tools: Arc::new(tools),
                notifier: Arc::new(TracingNotifier),
                background: BackgroundTasks::new(),
            },
        );

        Ok(Self {
            chat_service: Arc::new(chat_service),
            task_configs: Arc::new(SqliteTaskConfigRepository::new(pool)),
            config: Arc::new(config),
            data_dir,
        })
    }
}
