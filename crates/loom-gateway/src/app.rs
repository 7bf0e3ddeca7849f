use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use loom_core::config::ServerConfig;
use loom_executor::Executor;
use loom_llm::{LlmClient, LlmProvider};
use loom_session::SessionRegistry;
use loom_store::Store;

/// Central shared state — passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let store = Arc::new(Store::open(&config.store.path)?);
        let api_key = std::env::var("OPENAI_API_KEY").ok();
        let llm: Arc<dyn LlmProvider> = Arc::new(LlmClient::new(
            api_key,
            config.llm.base_url.clone(),
            config.llm.model.clone(),
            config.llm.request_timeout_secs,
        ));
        let executor = Arc::new(Executor::new(config.executor.timeout_secs));
        let registry = SessionRegistry::new(
            store,
            llm,
            executor,
            std::path::PathBuf::from(&config.uploads.dir),
            Duration::from_secs(config.session.idle_timeout_secs),
            config.session.max_steps,
        );

        Ok(Self {
            config,
            registry,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::http::health::healthz))
        .route(
            "/api/chats",
            get(crate::http::chats::list_chats).post(crate::http::chats::create_chat),
        )
        .route(
            "/api/chats/{id}",
            get(crate::http::chats::get_chat).delete(crate::http::chats::delete_chat),
        )
        .route("/api/chats/{id}/messages", post(crate::http::messages::send_message))
        .route("/api/chats/{id}/subscribe", get(crate::http::subscribe::subscribe))
        .route("/api/chats/{id}/files", post(crate::http::files::upload_file))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
