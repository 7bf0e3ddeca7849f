use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::{Chat, ChatSummary, Message};

/// Durable single-writer key-value store of chats, keyed by chat id.
///
/// All operations serialize through one `Mutex<Connection>` — there is only
/// ever one writer, matching the single-writer contract every caller relies
/// on for consistency between in-memory session state and what's on disk.
pub struct Store {
    db: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the backing database file at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// In-memory store, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn list(&self) -> Result<Vec<ChatSummary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, title, created_at FROM chats ORDER BY created_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ChatSummary {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get(&self, id: &str) -> Result<Chat> {
        let db = self.db.lock().unwrap();
        row_to_chat(&db, id)?.ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        Ok(row_to_chat(&db, id)?.is_some())
    }

    pub fn create(&self, id: &str, title: &str) -> Result<Chat> {
        let created_at = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO chats (id, title, created_at, messages) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, created_at, "[]"],
        )?;
        debug!(id, title, "created chat");
        Ok(Chat {
            id: id.to_string(),
            title: title.to_string(),
            created_at,
            messages: Vec::new(),
        })
    }

    /// Replace the entire message log for `id`. No-op if `id` is absent.
    pub fn save_messages(&self, id: &str, messages: &[Message]) -> Result<()> {
        let json = serde_json::to_string(messages)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE chats SET messages = ?1 WHERE id = ?2",
            params![json, id],
        )?;
        Ok(())
    }

    /// No-op if `id` is absent.
    pub fn update_title(&self, id: &str, title: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE chats SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        Ok(())
    }

    /// Idempotent — deleting an absent id is a success.
    pub fn delete(&self, id: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute("DELETE FROM chats WHERE id = ?1", params![id])?;
        Ok(())
    }
}

fn row_to_chat(db: &Connection, id: &str) -> Result<Option<Chat>> {
    let row: Option<(String, String, String, String)> = db
        .query_row(
            "SELECT id, title, created_at, messages FROM chats WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    match row {
        Some((id, title, created_at, messages_json)) => {
            let messages: Vec<Message> = serde_json::from_str(&messages_json)?;
            Ok(Some(Chat {
                id,
                title,
                created_at,
                messages,
            }))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCallRecord;

    #[test]
    fn create_then_get_returns_empty_messages() {
        let store = Store::open_in_memory().unwrap();
        store.create("abc123", "New Chat").unwrap();
        let chat = store.get("abc123").unwrap();
        assert_eq!(chat.title, "New Chat");
        assert!(chat.messages.is_empty());
    }

    #[test]
    fn get_missing_returns_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store.get("missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn save_messages_round_trips() {
        let store = Store::open_in_memory().unwrap();
        store.create("c1", "New Chat").unwrap();
        let messages = vec![
            Message::user("hello"),
            Message::assistant(
                "",
                vec![ToolCallRecord {
                    id: "t1".into(),
                    name: "execute_command".into(),
                    arguments: "{\"command\":\"ls\"}".into(),
                }],
            ),
            Message::tool("t1", "{\"success\":true}"),
        ];
        store.save_messages("c1", &messages).unwrap();
        let chat = store.get("c1").unwrap();
        assert_eq!(chat.messages, messages);
    }

    #[test]
    fn save_messages_on_absent_id_is_noop() {
        let store = Store::open_in_memory().unwrap();
        store.save_messages("nope", &[Message::user("x")]).unwrap();
    }

    #[test]
    fn delete_twice_is_noop() {
        let store = Store::open_in_memory().unwrap();
        store.create("c2", "New Chat").unwrap();
        store.delete("c2").unwrap();
        store.delete("c2").unwrap();
        assert!(store.get("c2").is_err());
    }

    #[test]
    fn list_orders_newest_first() {
        let store = Store::open_in_memory().unwrap();
        store.create("old", "Old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create("new", "New").unwrap();
        let summaries = store.list().unwrap();
        assert_eq!(summaries[0].id, "new");
        assert_eq!(summaries[1].id, "old");
    }

    #[test]
    fn update_title_persists() {
        let store = Store::open_in_memory().unwrap();
        store.create("c3", "New Chat").unwrap();
        store.update_title("c3", "hello there").unwrap();
        assert_eq!(store.get("c3").unwrap().title, "hello there");
    }
}
