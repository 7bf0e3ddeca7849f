use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use loom_executor::Executor;
use loom_llm::LlmProvider;
use loom_store::{Chat, Store, DEFAULT_TITLE};
use tracing::info;
use uuid::Uuid;

use crate::actor::{self, ChatSnapshot, SessionConfig, SessionHandle};
use crate::error::{Result, SessionError};
use crate::tools::{ExecuteCommandTool, Tool};

/// Shared dependencies every session actor needs, plus the live-session map.
///
/// A chat with no running actor is not "dead" — it just hasn't been touched
/// recently. `get_or_start` lazily reconstitutes it from the store; there is
/// no auto-restart on crash.
pub struct SessionRegistry {
    store: Arc<Store>,
    llm: Arc<dyn LlmProvider>,
    executor: Arc<Executor>,
    uploads_dir: PathBuf,
    idle_timeout: Duration,
    max_steps: usize,
    live: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<dyn LlmProvider>,
        executor: Arc<Executor>,
        uploads_dir: PathBuf,
        idle_timeout: Duration,
        max_steps: usize,
    ) -> Self {
        Self {
            store,
            llm,
            executor,
            uploads_dir,
            idle_timeout,
            max_steps,
            live: DashMap::new(),
        }
    }

    pub fn create_chat(&self, title: Option<String>) -> Result<Chat> {
        let id = Uuid::new_v4().simple().to_string()[..16].to_string();
        let title = title.filter(|t| !t.is_empty()).unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Ok(self.store.create(&id, &title)?)
    }

    pub fn list_chats(&self) -> Result<Vec<loom_store::ChatSummary>> {
        Ok(self.store.list()?)
    }

    /// True if a session actor for this chat is currently running.
    pub fn is_online(&self, id: &str) -> bool {
        self.live.get(id).map(|h| !h.is_closed()).unwrap_or(false)
    }

    /// Count of session actors currently running (used by the health probe).
    pub fn live_count(&self) -> usize {
        self.live.iter().filter(|entry| !entry.is_closed()).count()
    }

    pub fn delete_chat(&self, id: &str) -> Result<()> {
        self.live.remove(id);
        Ok(self.store.delete(id)?)
    }

    pub fn chat_snapshot(&self, id: &str) -> Result<ChatSnapshot> {
        let chat = map_not_found(id, self.store.get(id))?;
        Ok(ChatSnapshot {
            id: chat.id,
            title: chat.title,
            created_at: chat.created_at,
            messages: chat.messages,
        })
    }

    /// Return a handle to the chat's live actor, spawning one if none is
    /// currently running. Fails if the chat does not exist in the store.
    pub async fn get_or_start(&self, id: &str) -> Result<SessionHandle> {
        if let Some(handle) = self.live.get(id) {
            if !handle.is_closed() {
                return Ok(handle.clone());
            }
        }
        self.live.remove(id);

        let chat = map_not_found(id, self.store.get(id))?;

        let work_dir = self.uploads_dir.join(id);
        std::fs::create_dir_all(&work_dir).map_err(|e| {
            tracing::error!(chat_id = %id, error = %e, "failed to create session work dir");
            SessionError::NotFound { id: id.to_string() }
        })?;

        let tools: Vec<Box<dyn Tool>> = vec![Box::new(ExecuteCommandTool::new(self.executor.clone()))];

        let config = SessionConfig {
            id: id.to_string(),
            store: self.store.clone(),
            llm: self.llm.clone(),
            tools: Arc::new(tools),
            work_dir,
            idle_timeout: self.idle_timeout,
            max_steps: self.max_steps,
        };

        let snapshot = ChatSnapshot {
            id: chat.id,
            title: chat.title,
            created_at: chat.created_at,
            messages: chat.messages,
        };

        info!(chat_id = %id, "spawning session actor");
        let handle = actor::spawn(config, snapshot);
        self.live.insert(id.to_string(), handle.clone());
        Ok(handle)
    }
}

/// Translate a store lookup into `SessionError::NotFound` specifically when
/// the chat is absent, rather than folding it into the generic `Store` variant.
fn map_not_found(id: &str, result: loom_store::Result<Chat>) -> Result<Chat> {
    match result {
        Ok(chat) => Ok(chat),
        Err(loom_store::StoreError::NotFound { .. }) => Err(SessionError::NotFound { id: id.to_string() }),
        Err(other) => Err(SessionError::Store(other)),
    }
}
