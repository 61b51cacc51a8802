use rollcall_core::config::BroadcastSettings;
use rollcall_core::directory::{Member, MemberDirectory};
use rollcall_core::engine::{BroadcastEngine, BroadcastOutcome};
use rollcall_core::platform::{ChatKind, ChatPlatform, MessageHandle, PlatformError, RenderMode};
use rollcall_core::storage::JsonFileStore;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outbound {
    Send { chat_id: i64, text: String },
    Edit { message_id: i32, text: String },
}

#[derive(Default)]
struct RecordingPlatform {
    outbound: Mutex<Vec<Outbound>>,
    next_id: AtomicI32,
    admins: Vec<Member>,
}

impl RecordingPlatform {
    fn with_admins(admins: Vec<Member>) -> Self {
        Self {
            admins,
            ..Self::default()
        }
    }

    async fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.outbound.lock().await)
    }
}

#[async_trait::async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn send_message(
        &self,
        chat_id: i64,
        text: String,
        _render_mode: RenderMode,
        _suppress_link_preview: bool,
    ) -> Result<MessageHandle, PlatformError> {
        self.outbound
            .lock()
            .await
            .push(Outbound::Send { chat_id, text });
        Ok(MessageHandle {
            chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        text: String,
        _render_mode: RenderMode,
        _suppress_link_preview: bool,
    ) -> Result<(), PlatformError> {
        self.outbound.lock().await.push(Outbound::Edit {
            message_id: handle.message_id,
            text,
        });
        Ok(())
    }

    async fn list_administrators(&self, _chat_id: i64) -> Result<Vec<Member>, PlatformError> {
        Ok(self.admins.clone())
    }
}

fn fast_settings() -> BroadcastSettings {
    BroadcastSettings {
        inter_message_delay_ms: 0,
        ..BroadcastSettings::default()
    }
}

fn mention_lines(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .nth(1)
        .map(|body| body.lines().collect())
        .unwrap_or_default()
}

async fn engine_in(dir: &tempfile::TempDir, platform: Arc<RecordingPlatform>) -> BroadcastEngine {
    let store = Arc::new(JsonFileStore::new(dir.path().join("members.json")));
    let directory = MemberDirectory::load(store)
        .await
        .expect("directory should load");
    BroadcastEngine::new(platform, Arc::new(directory), &fast_settings())
}

#[tokio::test]
async fn small_chat_broadcast_then_cooldown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let platform = Arc::new(RecordingPlatform::default());
    let engine = engine_in(&dir, platform.clone()).await;

    let alice = Member::new(1, "Alice", Some("alice"));
    engine.handle_passive_observation(100, &alice).await;
    engine
        .handle_passive_observation(100, &Member::new(2, "Bob", None))
        .await;
    engine
        .handle_passive_observation(100, &Member::new(3, "Carol", Some("carol")))
        .await;

    let start = Instant::now();
    let outcome = engine
        .handle_broadcast_command_at(100, ChatKind::Group, &alice, start)
        .await;
    assert_eq!(outcome, BroadcastOutcome::Sent(1));

    let outbound = platform.take().await;
    assert_eq!(outbound.len(), 2, "placeholder plus one edit: {outbound:?}");
    let Outbound::Edit { message_id, text } = &outbound[1] else {
        panic!("expected the placeholder to be edited, got {outbound:?}");
    };
    assert_eq!(*message_id, 1);
    assert!(text.contains("(3 members)"));
    assert_eq!(mention_lines(text).len(), 3);

    let second = engine
        .handle_broadcast_command_at(100, ChatKind::Group, &alice, start + Duration::from_secs(5))
        .await;
    let BroadcastOutcome::Rejected(reason) = second else {
        panic!("expected a rejection, got {second:?}");
    };
    let remaining: u64 = reason
        .split_whitespace()
        .find_map(|word| word.parse().ok())
        .expect("reason mentions the remaining seconds");
    assert!((1..=30).contains(&remaining));
    assert!(platform.take().await.is_empty(), "rejections send nothing");

    let third = engine
        .handle_broadcast_command_at(100, ChatKind::Group, &alice, start + Duration::from_secs(31))
        .await;
    assert_eq!(third, BroadcastOutcome::Sent(1));
}

#[tokio::test]
async fn large_chat_is_split_into_three_parts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let platform = Arc::new(RecordingPlatform::default());
    let engine = engine_in(&dir, platform.clone()).await;

    for id in 1..=120 {
        engine
            .handle_passive_observation(200, &Member::new(id, format!("Member {id}"), None))
            .await;
    }

    let requester = Member::new(1, "Member 1", None);
    let outcome = engine
        .handle_broadcast_command(200, ChatKind::Supergroup, &requester)
        .await;
    assert_eq!(outcome, BroadcastOutcome::Sent(3));

    let outbound = platform.take().await;
    let texts: Vec<&str> = outbound
        .iter()
        .skip(1)
        .map(|o| match o {
            Outbound::Send { text, .. } | Outbound::Edit { text, .. } => text.as_str(),
        })
        .collect();
    let counts: Vec<usize> = texts.iter().map(|t| mention_lines(t).len()).collect();
    assert_eq!(counts, vec![50, 50, 20]);
    assert!(texts[1].contains("part 2 of 3"));
    assert!(texts[2].contains("part 3 of 3"));
    assert!(matches!(outbound[1], Outbound::Edit { .. }));
    assert!(matches!(
        outbound[2],
        Outbound::Send { chat_id: 200, .. }
    ));
}

#[tokio::test]
async fn directory_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let platform = Arc::new(RecordingPlatform::default());

    let before = {
        let engine = engine_in(&dir, platform.clone()).await;
        engine
            .handle_passive_observation(-1, &Member::new(10, "Dora", Some("dora")))
            .await;
        engine
            .handle_passive_observation(-1, &Member::new(11, "Eli", None))
            .await;
        engine
            .handle_passive_observation(-2, &Member::new(12, "Finn", None).bot())
            .await;
        engine.flush().await.expect("flush");
        engine.directory().snapshot().await
    };

    let engine = engine_in(&dir, platform).await;
    assert_eq!(engine.directory().snapshot().await, before);
    assert_eq!(engine.known_members(-1).await, 2);
    assert_eq!(engine.known_members(-2).await, 0);
}

#[tokio::test]
async fn empty_directory_uses_administrators() {
    let dir = tempfile::tempdir().expect("tempdir");
    let platform = Arc::new(RecordingPlatform::with_admins(vec![
        Member::new(50, "Owner", Some("owner")),
        Member::new(51, "Deputy", None),
    ]));
    let engine = engine_in(&dir, platform.clone()).await;

    let requester = Member::new(52, "Newcomer", None);
    let outcome = engine
        .handle_broadcast_command(300, ChatKind::Group, &requester)
        .await;
    assert_eq!(outcome, BroadcastOutcome::Sent(1));

    let outbound = platform.take().await;
    let Outbound::Edit { text, .. } = &outbound[1] else {
        panic!("expected an edit, got {outbound:?}");
    };
    assert!(text.contains("@owner"));
    assert!(text.contains("tg://user?id=51"));
    assert!(text.contains("tg://user?id=52"));
}
