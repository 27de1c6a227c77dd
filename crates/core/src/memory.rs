use std::collections::HashMap;
use std::path::PathBuf;

use ao_domain::Message;
use async_trait::async_trait;
use parking_lot::RwLock;

/// Append-only per-conversation message log. `append` never reorders
/// and never interleaves messages from concurrent `send` calls on the same key — the Turn
/// Engine is responsible for serializing writes to a given key (it does so by holding the
/// per-conversation [`crate::cancel_map`]-style registration for the duration of one turn).
///
/// A duplicate message id within a conversation is a programming error, not a recoverable
/// one: implementations panic rather than silently dropping or overwriting.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn get(&self, key: &str) -> Vec<Message>;
    async fn append(&self, key: &str, items: Vec<Message>);
    async fn set(&self, key: &str, items: Vec<Message>);
    async fn delete(&self, key: &str);
    async fn keys(&self) -> Vec<String>;
    async fn clear(&self);
    async fn export_snapshot(&self, key: &str) -> Option<Vec<Message>>;
    async fn import_snapshot(&self, key: &str, items: Vec<Message>);
}

fn assert_no_duplicate_ids(key: &str, existing: &[Message], incoming: &[Message]) {
    for item in incoming {
        if existing.iter().any(|m| m.id == item.id) {
            panic!("duplicate message id appended to conversation {key}: {}", item.id);
        }
    }
}

/// The default Memory Store: a concurrent map keyed by conversation id, each value a
/// lock-guarded `Vec<Message>`. This is what the Turn Engine's own tests use.
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get(&self, key: &str) -> Vec<Message> {
        self.conversations.read().get(key).cloned().unwrap_or_default()
    }

    async fn append(&self, key: &str, items: Vec<Message>) {
        if items.is_empty() {
            return;
        }
        let mut guard = self.conversations.write();
        let entry = guard.entry(key.to_string()).or_default();
        assert_no_duplicate_ids(key, entry, &items);
        entry.extend(items);
    }

    async fn set(&self, key: &str, items: Vec<Message>) {
        self.conversations.write().insert(key.to_string(), items);
    }

    async fn delete(&self, key: &str) {
        self.conversations.write().remove(key);
    }

    async fn keys(&self) -> Vec<String> {
        self.conversations.read().keys().cloned().collect()
    }

    async fn clear(&self) {
        self.conversations.write().clear();
    }

    async fn export_snapshot(&self, key: &str) -> Option<Vec<Message>> {
        self.conversations.read().get(key).cloned()
    }

    async fn import_snapshot(&self, key: &str, items: Vec<Message>) {
        self.conversations.write().insert(key.to_string(), items);
    }
}

/// A second, file-backed Memory Store: appends one JSON line per message under a
/// per-conversation `.jsonl` file. Offered as a reference implementation of the
/// same trait, not as the one true persistence layer — the on-disk layout it chooses is this
/// store's own business, not a contract the engine relies on.
pub struct FileBackedStore {
    base_dir: PathBuf,
    cache: RwLock<HashMap<String, Vec<Message>>>,
}

impl FileBackedStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FileBackedStore {
            base_dir: base_dir.into(),
            cache: RwLock::default(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.jsonl"))
    }

    async fn load(&self, key: &str) -> Vec<Message> {
        if let Some(cached) = self.cache.read().get(key) {
            return cached.clone();
        }
        let path = self.path_for(key);
        let messages = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| match serde_json::from_str::<Message>(line) {
                    Ok(msg) => Some(msg),
                    Err(e) => {
                        tracing::warn!(key, error = %e, "skipping malformed transcript line");
                        None
                    }
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        self.cache.write().insert(key.to_string(), messages.clone());
        messages
    }
}

#[async_trait]
impl MemoryStore for FileBackedStore {
    async fn get(&self, key: &str) -> Vec<Message> {
        self.load(key).await
    }

    async fn append(&self, key: &str, items: Vec<Message>) {
        if items.is_empty() {
            return;
        }
        let mut current = self.load(key).await;
        assert_no_duplicate_ids(key, &current, &items);

        if tokio::fs::create_dir_all(&self.base_dir).await.is_ok() {
            let mut buf = String::new();
            for item in &items {
                if let Ok(json) = serde_json::to_string(item) {
                    buf.push_str(&json);
                    buf.push('\n');
                }
            }
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(key))
                .await
            {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(buf.as_bytes()).await {
                        tracing::warn!(key, error = %e, "failed to append transcript");
                    }
                }
                Err(e) => tracing::warn!(key, error = %e, "failed to open transcript for append"),
            }
        }

        current.extend(items);
        self.cache.write().insert(key.to_string(), current);
    }

    async fn set(&self, key: &str, items: Vec<Message>) {
        self.cache.write().insert(key.to_string(), items);
    }

    async fn delete(&self, key: &str) {
        self.cache.write().remove(key);
        let _ = tokio::fs::remove_file(self.path_for(key)).await;
    }

    async fn keys(&self) -> Vec<String> {
        self.cache.read().keys().cloned().collect()
    }

    async fn clear(&self) {
        let keys: Vec<String> = self.cache.read().keys().cloned().collect();
        for key in keys {
            let _ = tokio::fs::remove_file(self.path_for(&key)).await;
        }
        self.cache.write().clear();
    }

    async fn export_snapshot(&self, key: &str) -> Option<Vec<Message>> {
        Some(self.load(key).await)
    }

    async fn import_snapshot(&self, key: &str, items: Vec<Message>) {
        self.cache.write().insert(key.to_string(), items);
    }
}
