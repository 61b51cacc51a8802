//! Member directory
//!
//! Bots cannot ask Telegram for the full member list of a group, so the
//! directory is built from what the bot sees: every message author, new
//! members, and administrator lists. Each change is written through to the
//! configured [`DirectoryStore`].

use crate::storage::{DirectorySnapshot, DirectoryStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A chat participant as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Member {
    /// Platform user id
    #[serde(default)]
    pub id: i64,
    /// Name shown in clients
    #[serde(default)]
    pub display_name: String,
    /// Public username without the leading `@`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    /// Bots are remembered but never mentioned
    #[serde(default)]
    pub is_bot: bool,
}

impl Member {
    /// Create a human member.
    #[must_use]
    pub fn new(id: i64, display_name: impl Into<String>, handle: Option<&str>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            handle: handle.map(str::to_string),
            is_bot: false,
        }
    }

    /// Mark this member as a bot account.
    #[must_use]
    pub const fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }

    /// Whether this member may appear in a broadcast.
    #[must_use]
    pub const fn is_mentionable(&self) -> bool {
        !self.is_bot
    }
}

/// Known members of a single chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ChatDirectory {
    members: BTreeMap<i64, Member>,
}

impl ChatDirectory {
    /// Insert or overwrite a member. Returns true if anything changed.
    pub fn upsert(&mut self, member: Member) -> bool {
        match self.members.get(&member.id) {
            Some(existing) if *existing == member => false,
            _ => {
                self.members.insert(member.id, member);
                true
            }
        }
    }

    /// Look up a member by id.
    #[must_use]
    pub fn get(&self, member_id: i64) -> Option<&Member> {
        self.members.get(&member_id)
    }

    /// Members that may be mentioned, ordered by id.
    pub fn mentionable(&self) -> impl Iterator<Item = &Member> {
        self.members.values().filter(|m| m.is_mentionable())
    }

    /// Number of stored members, bots included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when no member has been observed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Write-through cache of chat members.
pub struct MemberDirectory {
    chats: RwLock<DirectorySnapshot>,
    store: Arc<dyn DirectoryStore>,
    /// Serializes persists; taken before the snapshot is cloned
    persist_lock: Mutex<()>,
}

impl MemberDirectory {
    /// Create an empty directory backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self {
            chats: RwLock::new(DirectorySnapshot::new()),
            store,
            persist_lock: Mutex::new(()),
        }
    }

    /// Create a directory and fill it from `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read.
    pub async fn load(store: Arc<dyn DirectoryStore>) -> Result<Self, StorageError> {
        let directory = Self::new(store);
        directory.reload().await?;
        Ok(directory)
    }

    /// Replace the in-memory state with the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document cannot be read.
    pub async fn reload(&self) -> Result<(), StorageError> {
        let snapshot = self.store.load_directory().await?;
        let members: usize = snapshot.values().map(ChatDirectory::len).sum();
        info!(
            "Member directory loaded: {} chats, {} members",
            snapshot.len(),
            members
        );
        *self.chats.write().await = snapshot;
        Ok(())
    }

    /// Record a member seen in `chat_id`. Last observation wins.
    ///
    /// Persistence failures are logged; the in-memory state stays
    /// authoritative.
    pub async fn observe(&self, chat_id: i64, member: Member) {
        if member.id == 0 {
            return;
        }
        let member_id = member.id;
        let changed = self
            .chats
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .upsert(member);

        if changed {
            debug!(chat_id, member_id, "Member observed");
            if let Err(e) = self.persist().await {
                warn!("Failed to persist member directory: {}", e);
            }
        }
    }

    /// Mentionable members of `chat_id`, ordered by id.
    pub async fn resolve(&self, chat_id: i64) -> Vec<Member> {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .map(|chat| chat.mentionable().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of mentionable members known for `chat_id`.
    pub async fn mentionable_count(&self, chat_id: i64) -> usize {
        self.chats
            .read()
            .await
            .get(&chat_id)
            .map_or(0, |chat| chat.mentionable().count())
    }

    /// Copy of the whole directory.
    pub async fn snapshot(&self) -> DirectorySnapshot {
        self.chats.read().await.clone()
    }

    /// Write the whole directory to storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot().await;
        self.store.save_directory(&snapshot).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{JsonFileStore, MockDirectoryStore};
    use crate::testing::mock_store_noop;

    #[tokio::test]
    async fn test_observe_then_resolve() {
        let directory = MemberDirectory::new(Arc::new(mock_store_noop()));

        directory
            .observe(100, Member::new(2, "Bob", None))
            .await;
        directory
            .observe(100, Member::new(1, "Alice", Some("alice")))
            .await;

        let members = directory.resolve(100).await;
        let ids: Vec<i64> = members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(directory.resolve(200).await.is_empty());
    }

    #[tokio::test]
    async fn test_last_observation_wins() {
        let directory = MemberDirectory::new(Arc::new(mock_store_noop()));

        directory.observe(1, Member::new(5, "Old Name", None)).await;
        directory
            .observe(1, Member::new(5, "New Name", Some("newname")))
            .await;

        let members = directory.resolve(1).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].display_name, "New Name");
        assert_eq!(members[0].handle.as_deref(), Some("newname"));
    }

    #[tokio::test]
    async fn test_bots_are_stored_but_not_resolved() {
        let directory = MemberDirectory::new(Arc::new(mock_store_noop()));

        directory
            .observe(1, Member::new(9, "Helper", Some("helper_bot")).bot())
            .await;
        directory.observe(1, Member::new(3, "Dana", None)).await;

        let resolved = directory.resolve(1).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, 3);
        assert_eq!(directory.mentionable_count(1).await, 1);
        assert_eq!(directory.snapshot().await[&1].len(), 2);
    }

    #[tokio::test]
    async fn test_persists_only_on_change() {
        let mut store = MockDirectoryStore::new();
        store.expect_save_directory().times(2).returning(|_| Ok(()));
        let directory = MemberDirectory::new(Arc::new(store));

        let member = Member::new(4, "Eve", None);
        directory.observe(1, member.clone()).await;
        directory.observe(1, member.clone()).await;
        directory
            .observe(1, Member::new(4, "Eve Renamed", None))
            .await;
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_state() {
        let mut store = MockDirectoryStore::new();
        store
            .expect_save_directory()
            .returning(|_| Err(StorageError::Config("disk full".into())));
        let directory = MemberDirectory::new(Arc::new(store));

        directory.observe(1, Member::new(8, "Frank", None)).await;

        assert_eq!(directory.resolve(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_reads_store() -> Result<(), StorageError> {
        let mut chat = ChatDirectory::default();
        chat.upsert(Member::new(1, "Alice", Some("alice")));
        let mut snapshot = DirectorySnapshot::new();
        snapshot.insert(42, chat);

        let mut store = MockDirectoryStore::new();
        store
            .expect_load_directory()
            .times(1)
            .returning(move || Ok(snapshot.clone()));

        let directory = MemberDirectory::load(Arc::new(store)).await?;
        assert_eq!(directory.resolve(42).await[0].display_name, "Alice");
        Ok(())
    }

    #[tokio::test]
    async fn test_member_without_id_is_ignored() {
        let mut store = MockDirectoryStore::new();
        store.expect_save_directory().never();
        let directory = MemberDirectory::new(Arc::new(store));

        directory.observe(1, Member::new(0, "Nobody", None)).await;

        assert!(directory.resolve(1).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_observes_reach_the_file() -> Result<(), StorageError> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("members.json");
        let directory = Arc::new(MemberDirectory::new(Arc::new(JsonFileStore::new(&path))));

        let tasks: Vec<_> = (1..=8i64)
            .map(|chat| {
                let directory = directory.clone();
                tokio::spawn(async move {
                    for id in 1..=25 {
                        directory
                            .observe(-chat, Member::new(id, format!("User {id}"), None))
                            .await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await
                .map_err(|e| StorageError::Config(e.to_string()))?;
        }

        let reloaded = MemberDirectory::load(Arc::new(JsonFileStore::new(&path))).await?;
        let expected = directory.snapshot().await;
        assert_eq!(expected.len(), 8);
        assert!(expected.values().all(|chat| chat.len() == 25));
        assert_eq!(reloaded.snapshot().await, expected);
        Ok(())
    }
}
