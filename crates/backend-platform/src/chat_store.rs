use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

use backend_core::Chat;
use thiserror::Error;

use crate::json_file::{JsonFileError, read_json, write_json};

#[derive(Debug, Error)]
pub enum ChatStoreError {
    #[error("chat store file failure: {0}")]
    File(#[from] JsonFileError),
}

/// Durable per-session chat history, ascending by `created_at`.
pub trait ChatStore: Send + Sync {
    fn load_messages(&self, session_id: &str) -> Result<Vec<Chat>, ChatStoreError>;

    fn append(&self, session_id: &str, chat: &Chat) -> Result<(), ChatStoreError>;
}

impl<S: ChatStore + ?Sized> ChatStore for Arc<S> {
    fn load_messages(&self, session_id: &str) -> Result<Vec<Chat>, ChatStoreError> {
        (**self).load_messages(session_id)
    }

    fn append(&self, session_id: &str, chat: &Chat) -> Result<(), ChatStoreError> {
        (**self).append(session_id, chat)
    }
}

/// Insert keeping ascending order; an identical message is stored once.
fn insert_ordered(history: &mut Vec<Chat>, chat: &Chat) -> bool {
    if history.iter().any(|existing| existing == chat) {
        return false;
    }
    let idx = history.partition_point(|existing| existing.created_at <= chat.created_at);
    history.insert(idx, chat.clone());
    true
}

#[derive(Clone, Default)]
pub struct InMemoryChatStore {
    data: Arc<RwLock<HashMap<String, Vec<Chat>>>>,
}

impl ChatStore for InMemoryChatStore {
    fn load_messages(&self, session_id: &str) -> Result<Vec<Chat>, ChatStoreError> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        Ok(data.get(session_id).cloned().unwrap_or_default())
    }

    fn append(&self, session_id: &str, chat: &Chat) -> Result<(), ChatStoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        insert_ordered(data.entry(session_id.to_owned()).or_default(), chat);
        Ok(())
    }
}

/// One JSON file per session under a data directory.
pub struct JsonFileChatStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileChatStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("chat-{}.json", encode_file_stem(session_id)))
    }
}

/// Keep ASCII alphanumerics and `-`; every other byte becomes `_xx` hex, so
/// distinct ids never share a file.
fn encode_file_stem(id: &str) -> String {
    let mut encoded = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("_{byte:02x}"));
        }
    }
    encoded
}

impl ChatStore for JsonFileChatStore {
    fn load_messages(&self, session_id: &str) -> Result<Vec<Chat>, ChatStoreError> {
        Ok(read_json(&self.session_path(session_id))?.unwrap_or_default())
    }

    fn append(&self, session_id: &str, chat: &Chat) -> Result<(), ChatStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.session_path(session_id);
        let mut history: Vec<Chat> = read_json(&path)?.unwrap_or_default();
        if insert_ordered(&mut history, chat) {
            write_json(&path, &history)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use backend_core::ChatDirection;
    use chrono::{TimeZone, Utc};

    use super::*;

    fn chat(secs: i64, text: &str) -> Chat {
        let created_at = Utc
            .timestamp_opt(1_644_900_000 + secs, 0)
            .single()
            .expect("valid timestamp");
        Chat::new(ChatDirection::Inbound, text, created_at)
    }

    #[test]
    fn in_memory_store_keeps_sessions_apart_and_ordered() {
        let store = InMemoryChatStore::default();
        store.append("u-2", &chat(2, "b")).expect("append");
        store.append("u-2", &chat(1, "a")).expect("append");
        store.append("u-3", &chat(5, "other")).expect("append");

        let history = store.load_messages("u-2").expect("load");
        let texts: Vec<&str> = history.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, ["a", "b"]);
        assert_eq!(store.load_messages("unknown").expect("load").len(), 0);
    }

    #[test]
    fn file_store_survives_reopen_and_skips_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileChatStore::new(dir.path());
        store.append("u/2", &chat(1, "a")).expect("append");
        store.append("u/2", &chat(1, "a")).expect("duplicate append");
        store.append("u/2", &chat(3, "c")).expect("append");

        let reopened = JsonFileChatStore::new(dir.path());
        let history = reopened.load_messages("u/2").expect("load");
        assert_eq!(history, vec![chat(1, "a"), chat(3, "c")]);
    }

    #[test]
    fn file_store_keeps_similar_ids_in_separate_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileChatStore::new(dir.path());
        store.append("a.b", &chat(1, "dot")).expect("append");
        store.append("a_b", &chat(2, "underscore")).expect("append");
        store.append("a/b", &chat(3, "slash")).expect("append");

        for (id, text) in [("a.b", "dot"), ("a_b", "underscore"), ("a/b", "slash")] {
            let history = store.load_messages(id).expect("load");
            let texts: Vec<&str> = history.iter().map(|c| c.text.as_str()).collect();
            assert_eq!(texts, [text], "history of {id}");
        }
        assert_eq!(encode_file_stem("u-2"), "u-2");
        assert_eq!(encode_file_stem("a_b"), "a_5fb");
    }
}
