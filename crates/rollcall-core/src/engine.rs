//! Broadcast orchestration.
//!
//! A broadcast moves through
//! `Idle -> Admitted -> Resolving -> Formatting -> Planning -> Sending -> Done`.
//! It can be rejected before admission (wrong chat type, cooldown) and can
//! fail while resolving members or while sending. Failures never escape the
//! single command invocation.

use crate::config::BroadcastSettings;
use crate::directory::{Member, MemberDirectory};
use crate::mention;
use crate::planner::{admins_header, everyone_header, BroadcastPlan, BroadcastPlanner};
use crate::platform::{ChatKind, ChatPlatform, MessageHandle, PlatformError, RenderMode};
use crate::rate_limiter::{Admission, RateLimiter};
use crate::storage::StorageError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder shown while members are collected.
pub const COLLECTING_TEXT: &str = "🔄 Collecting members...";

/// Everything that can stop a broadcast
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// Broadcasts only make sense in groups
    #[error("broadcast requested outside of a group")]
    WrongChatType,
    /// The chat is cooling down
    #[error("rate limited for another {remaining_secs}s")]
    RateLimited {
        /// Whole seconds until the next broadcast is allowed
        remaining_secs: u64,
    },
    /// Neither the directory nor the administrator list produced anyone
    #[error("no members could be resolved")]
    NoMembersResolvable,
    /// A send or edit failed
    #[error("failed to send broadcast: {0}")]
    PlatformSendFailure(PlatformError),
    /// The administrator lookup failed
    #[error("administrator lookup failed: {0}")]
    PlatformLookupFailure(PlatformError),
    /// The member directory could not be written
    #[error("member directory I/O failed: {0}")]
    CacheIo(#[from] StorageError),
}

impl BroadcastError {
    /// Text shown to the user for this error.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::WrongChatType => "❌ This command only works in groups!".to_string(),
            Self::RateLimited { remaining_secs } => {
                format!("⏳ Please wait {remaining_secs} seconds before the next broadcast.")
            }
            Self::NoMembersResolvable | Self::PlatformLookupFailure(_) => {
                "❌ Could not get the member list.\nMake sure the bot is an administrator of the group."
                    .to_string()
            }
            Self::PlatformSendFailure(_) | Self::CacheIo(_) => {
                "❌ Something went wrong while mentioning members.".to_string()
            }
        }
    }

    /// Rejections happen before admission and are answered with a reply.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::WrongChatType | Self::RateLimited { .. })
    }
}

/// What the command layer should tell the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Refused before anything was sent; reply with the text.
    Rejected(String),
    /// Started but did not finish; the engine has already reported it in
    /// the chat.
    Failed(String),
    /// Every part was delivered.
    Sent(usize),
}

impl From<BroadcastError> for BroadcastOutcome {
    fn from(error: BroadcastError) -> Self {
        if error.is_rejection() {
            Self::Rejected(error.user_message())
        } else {
            Self::Failed(error.user_message())
        }
    }
}

/// Progress of a single broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStage {
    /// Command received.
    Idle,
    /// Passed the chat-type guard and the cooldown.
    Admitted,
    /// Collecting members.
    Resolving,
    /// Rendering mentions.
    Formatting,
    /// Chunking mentions into messages.
    Planning,
    /// Delivering messages.
    Sending,
    /// Every part delivered.
    Done,
}

/// Who a broadcast addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every known member of the chat.
    Everyone,
    /// Only the chat's administrators, fetched live.
    Administrators,
}

impl Audience {
    fn header(self) -> fn(usize) -> String {
        match self {
            Self::Everyone => everyone_header,
            Self::Administrators => admins_header,
        }
    }
}

struct DeliveryFailure {
    error: BroadcastError,
    stage: BroadcastStage,
    delivered: usize,
}

impl DeliveryFailure {
    const fn new(error: BroadcastError, stage: BroadcastStage, delivered: usize) -> Self {
        Self {
            error,
            stage,
            delivered,
        }
    }
}

/// Orchestrates rate limiting, member resolution, rendering and delivery.
pub struct BroadcastEngine {
    platform: Arc<dyn ChatPlatform>,
    directory: Arc<MemberDirectory>,
    rate_limiter: RateLimiter,
    planner: BroadcastPlanner,
    inter_message_delay: Duration,
    platform_timeout: Duration,
}

impl BroadcastEngine {
    /// Create an engine from settings.
    #[must_use]
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        directory: Arc<MemberDirectory>,
        settings: &BroadcastSettings,
    ) -> Self {
        Self {
            platform,
            directory,
            rate_limiter: RateLimiter::new(settings.cooldown()),
            planner: BroadcastPlanner::new(settings.broadcast_chunk_size, settings.mention_layout),
            inter_message_delay: settings.inter_message_delay(),
            platform_timeout: settings.platform_timeout(),
        }
    }

    /// The member directory fed by this engine.
    #[must_use]
    pub const fn directory(&self) -> &Arc<MemberDirectory> {
        &self.directory
    }

    /// The per-chat cooldown.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Mention every known member of the chat.
    pub async fn handle_broadcast_command(
        &self,
        chat_id: i64,
        chat_kind: ChatKind,
        requester: &Member,
    ) -> BroadcastOutcome {
        self.handle_broadcast_command_at(chat_id, chat_kind, requester, Instant::now())
            .await
    }

    /// [`Self::handle_broadcast_command`] with an explicit clock reading.
    pub async fn handle_broadcast_command_at(
        &self,
        chat_id: i64,
        chat_kind: ChatKind,
        requester: &Member,
        now: Instant,
    ) -> BroadcastOutcome {
        self.broadcast(Audience::Everyone, chat_id, chat_kind, requester, now)
            .await
    }

    /// Mention the chat's administrators only.
    pub async fn handle_admin_broadcast_command(
        &self,
        chat_id: i64,
        chat_kind: ChatKind,
        requester: &Member,
    ) -> BroadcastOutcome {
        self.broadcast(
            Audience::Administrators,
            chat_id,
            chat_kind,
            requester,
            Instant::now(),
        )
        .await
    }

    /// Feed a message author into the directory.
    pub async fn handle_passive_observation(&self, chat_id: i64, sender: &Member) {
        self.directory.observe(chat_id, sender.clone()).await;
    }

    /// Number of members a broadcast in `chat_id` would mention right now.
    pub async fn known_members(&self, chat_id: i64) -> usize {
        self.directory.mentionable_count(chat_id).await
    }

    /// Write the directory to storage; called once at shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::CacheIo`] if the write fails.
    pub async fn flush(&self) -> Result<(), BroadcastError> {
        self.directory.persist().await?;
        Ok(())
    }

    async fn broadcast(
        &self,
        audience: Audience,
        chat_id: i64,
        chat_kind: ChatKind,
        requester: &Member,
        now: Instant,
    ) -> BroadcastOutcome {
        debug!(chat_id, ?audience, stage = ?BroadcastStage::Idle, "Broadcast requested");

        if !chat_kind.is_group_like() {
            return BroadcastError::WrongChatType.into();
        }

        self.directory.observe(chat_id, requester.clone()).await;

        if let Admission::Denied { remaining_secs } =
            self.rate_limiter.try_admit(chat_id, now).await
        {
            return BroadcastError::RateLimited { remaining_secs }.into();
        }
        info!(
            chat_id,
            requester = requester.id,
            ?audience,
            stage = ?BroadcastStage::Admitted,
            "Broadcast admitted"
        );

        let placeholder = match self.send(chat_id, COLLECTING_TEXT.to_string(), RenderMode::Plain).await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(chat_id, "Failed to send placeholder: {}", e);
                return BroadcastError::PlatformSendFailure(e).into();
            }
        };

        match self
            .deliver(audience, chat_id, requester.id, placeholder)
            .await
        {
            Ok(parts) => {
                info!(chat_id, parts, stage = ?BroadcastStage::Done, "Broadcast delivered");
                BroadcastOutcome::Sent(parts)
            }
            Err(failure) => {
                warn!(
                    chat_id,
                    stage = ?failure.stage,
                    delivered = failure.delivered,
                    "Broadcast failed: {}",
                    failure.error
                );
                self.report_failure(placeholder, &failure).await;
                failure.error.into()
            }
        }
    }

    async fn deliver(
        &self,
        audience: Audience,
        chat_id: i64,
        requester_id: i64,
        placeholder: MessageHandle,
    ) -> Result<usize, DeliveryFailure> {
        let members = match audience {
            Audience::Everyone => self.resolve_members(chat_id, requester_id).await,
            Audience::Administrators => self.resolve_administrators(chat_id).await,
        }
        .map_err(|e| DeliveryFailure::new(e, BroadcastStage::Resolving, 0))?;

        debug!(chat_id, members = members.len(), stage = ?BroadcastStage::Formatting);
        let mentions = mention::render_all(&members);

        debug!(chat_id, stage = ?BroadcastStage::Planning);
        let plan = self.planner.plan(&mentions, audience.header());

        self.send_plan(chat_id, placeholder, &plan).await?;
        Ok(plan.len())
    }

    /// Cached members, warming the directory from the administrator list
    /// when it knows nobody besides the requester.
    async fn resolve_members(
        &self,
        chat_id: i64,
        requester_id: i64,
    ) -> Result<Vec<Member>, BroadcastError> {
        let cached = self.directory.resolve(chat_id).await;
        if cached.iter().any(|m| m.id != requester_id) {
            return Ok(cached);
        }

        debug!(chat_id, "Directory is cold, warming from administrators");
        let admins = self
            .call(self.platform.list_administrators(chat_id))
            .await
            .map_err(BroadcastError::PlatformLookupFailure)?;
        for admin in admins {
            self.directory.observe(chat_id, admin).await;
        }

        let members = self.directory.resolve(chat_id).await;
        if members.is_empty() {
            return Err(BroadcastError::NoMembersResolvable);
        }
        Ok(members)
    }

    async fn resolve_administrators(&self, chat_id: i64) -> Result<Vec<Member>, BroadcastError> {
        let admins = self
            .call(self.platform.list_administrators(chat_id))
            .await
            .map_err(BroadcastError::PlatformLookupFailure)?;

        let mut mentionable = Vec::with_capacity(admins.len());
        for admin in admins {
            if admin.is_mentionable() {
                mentionable.push(admin.clone());
            }
            self.directory.observe(chat_id, admin).await;
        }
        mentionable.sort_by_key(|m| m.id);
        mentionable.dedup_by_key(|m| m.id);

        if mentionable.is_empty() {
            return Err(BroadcastError::NoMembersResolvable);
        }
        Ok(mentionable)
    }

    /// Part 1 replaces the placeholder, later parts are new messages sent
    /// one after another. Stops at the first error.
    async fn send_plan(
        &self,
        chat_id: i64,
        placeholder: MessageHandle,
        plan: &BroadcastPlan,
    ) -> Result<(), DeliveryFailure> {
        for message in &plan.messages {
            debug!(
                chat_id,
                part = message.part_index,
                total = message.total_parts,
                stage = ?BroadcastStage::Sending
            );
            let result = if message.part_index == 1 {
                self.edit(placeholder, message.text.clone(), RenderMode::Html)
                    .await
            } else {
                tokio::time::sleep(self.inter_message_delay).await;
                self.send(chat_id, message.text.clone(), RenderMode::Html)
                    .await
                    .map(|_| ())
            };

            if let Err(e) = result {
                return Err(DeliveryFailure::new(
                    BroadcastError::PlatformSendFailure(e),
                    BroadcastStage::Sending,
                    message.part_index - 1,
                ));
            }
        }
        Ok(())
    }

    /// Tell the chat what went wrong without touching delivered parts.
    async fn report_failure(&self, placeholder: MessageHandle, failure: &DeliveryFailure) {
        let text = failure.error.user_message();
        let result = if failure.delivered == 0 {
            self.edit(placeholder, text, RenderMode::Plain).await
        } else {
            self.send(placeholder.chat_id, text, RenderMode::Plain)
                .await
                .map(|_| ())
        };
        if let Err(e) = result {
            warn!(chat_id = placeholder.chat_id, "Failed to report broadcast failure: {}", e);
        }
    }

    async fn send(
        &self,
        chat_id: i64,
        text: String,
        render_mode: RenderMode,
    ) -> Result<MessageHandle, PlatformError> {
        self.call(self.platform.send_message(chat_id, text, render_mode, true))
            .await
    }

    async fn edit(
        &self,
        handle: MessageHandle,
        text: String,
        render_mode: RenderMode,
    ) -> Result<(), PlatformError> {
        self.call(self.platform.edit_message(handle, text, render_mode, true))
            .await
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, PlatformError>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        tokio::time::timeout(self.platform_timeout, fut)
            .await
            .map_err(|_| PlatformError::Timeout(self.platform_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockChatPlatform;
    use crate::testing::{mock_platform_lookup_denied, mock_platform_ok, mock_store_noop};
    use mockall::predicate::*;
    use mockall::Sequence;

    fn settings() -> BroadcastSettings {
        BroadcastSettings {
            inter_message_delay_ms: 0,
            ..BroadcastSettings::default()
        }
    }

    fn engine_with(platform: MockChatPlatform) -> BroadcastEngine {
        let directory = Arc::new(MemberDirectory::new(Arc::new(mock_store_noop())));
        BroadcastEngine::new(Arc::new(platform), directory, &settings())
    }

    fn requester() -> Member {
        Member::new(1, "Alice", Some("alice"))
    }

    #[tokio::test]
    async fn test_private_chat_is_rejected_without_platform_calls() {
        let mut platform = MockChatPlatform::new();
        platform.expect_send_message().never();
        platform.expect_list_administrators().never();
        let engine = engine_with(platform);

        let outcome = engine
            .handle_broadcast_command(1, ChatKind::Private, &requester())
            .await;

        assert_eq!(
            outcome,
            BroadcastOutcome::Rejected(BroadcastError::WrongChatType.user_message())
        );
        assert_eq!(engine.known_members(1).await, 0);
    }

    #[tokio::test]
    async fn test_cold_directory_is_warmed_from_administrators() {
        let admins = vec![
            Member::new(2, "Bob", Some("bob")),
            Member::new(3, "Helper", Some("helper_bot")).bot(),
        ];
        let engine = engine_with(mock_platform_ok(admins));

        let outcome = engine
            .handle_broadcast_command(-100, ChatKind::Supergroup, &requester())
            .await;

        assert_eq!(outcome, BroadcastOutcome::Sent(1));
        assert_eq!(engine.known_members(-100).await, 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_edits_placeholder() {
        let engine = engine_with(mock_platform_lookup_denied());

        let outcome = engine
            .handle_broadcast_command(-100, ChatKind::Group, &requester())
            .await;

        assert_eq!(
            outcome,
            BroadcastOutcome::Failed(BroadcastError::NoMembersResolvable.user_message())
        );
    }

    #[tokio::test]
    async fn test_placeholder_failure_is_reported_as_failed() {
        let mut platform = MockChatPlatform::new();
        platform
            .expect_send_message()
            .times(1)
            .returning(|_, _, _, _| Err(PlatformError::Unreachable("offline".into())));
        platform.expect_list_administrators().never();
        let engine = engine_with(platform);

        let outcome = engine
            .handle_broadcast_command(-100, ChatKind::Group, &requester())
            .await;

        assert!(matches!(outcome, BroadcastOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_part_one_edits_placeholder_then_parts_are_sent_in_order() {
        let mut platform = MockChatPlatform::new();
        let mut seq = Sequence::new();

        platform
            .expect_send_message()
            .with(eq(-7), eq(COLLECTING_TEXT.to_string()), eq(RenderMode::Plain), eq(true))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat_id, _, _, _| {
                Ok(MessageHandle {
                    chat_id,
                    message_id: 10,
                })
            });
        platform
            .expect_edit_message()
            .withf(|handle, text, mode, _| {
                handle.message_id == 10
                    && text.starts_with(&everyone_header(60))
                    && *mode == RenderMode::Html
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        platform
            .expect_send_message()
            .withf(|_, text, _, _| text.starts_with("<b>Continued...</b> (part 2 of 2)"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat_id, _, _, _| {
                Ok(MessageHandle {
                    chat_id,
                    message_id: 11,
                })
            });

        let engine = engine_with(platform);
        for id in 1..=60 {
            engine
                .handle_passive_observation(-7, &Member::new(id, format!("User {id}"), None))
                .await;
        }

        let outcome = engine
            .handle_broadcast_command(-7, ChatKind::Group, &requester())
            .await;

        assert_eq!(outcome, BroadcastOutcome::Sent(2));
    }

    #[tokio::test]
    async fn test_send_error_mid_sequence_keeps_delivered_parts() {
        let mut platform = MockChatPlatform::new();
        let mut seq = Sequence::new();

        platform
            .expect_send_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat_id, _, _, _| {
                Ok(MessageHandle {
                    chat_id,
                    message_id: 1,
                })
            });
        platform
            .expect_edit_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(()));
        platform
            .expect_send_message()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Err(PlatformError::Api("Too Many Requests".into())));
        // The failure notice is a new message; part 1 is never edited again
        platform
            .expect_send_message()
            .with(
                always(),
                eq(BroadcastError::PlatformSendFailure(PlatformError::Timeout(Duration::ZERO))
                    .user_message()),
                always(),
                always(),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chat_id, _, _, _| {
                Ok(MessageHandle {
                    chat_id,
                    message_id: 3,
                })
            });

        let engine = engine_with(platform);
        for id in 1..=120 {
            engine
                .handle_passive_observation(-9, &Member::new(id, format!("User {id}"), None))
                .await;
        }

        let outcome = engine
            .handle_broadcast_command(-9, ChatKind::Group, &requester())
            .await;

        assert!(matches!(outcome, BroadcastOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_admin_broadcast_mentions_only_humans() {
        let mut platform = MockChatPlatform::new();
        let admins = vec![
            Member::new(5, "Root", Some("root")),
            Member::new(6, "Moderator", None),
            Member::new(7, "Guard", Some("guard_bot")).bot(),
        ];
        platform
            .expect_list_administrators()
            .returning(move |_| Ok(admins.clone()));
        platform.expect_send_message().returning(|chat_id, _, _, _| {
            Ok(MessageHandle {
                chat_id,
                message_id: 1,
            })
        });
        platform
            .expect_edit_message()
            .withf(|_, text, _, _| {
                text.starts_with(&admins_header(2))
                    && text.contains("@root")
                    && text.contains("tg://user?id=6")
                    && !text.contains("guard_bot")
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let engine = engine_with(platform);
        let outcome = engine
            .handle_admin_broadcast_command(-3, ChatKind::Group, &requester())
            .await;

        assert_eq!(outcome, BroadcastOutcome::Sent(1));
    }

    #[test]
    fn test_error_classification() {
        assert!(BroadcastError::WrongChatType.is_rejection());
        assert!(BroadcastError::RateLimited { remaining_secs: 3 }.is_rejection());
        assert!(!BroadcastError::NoMembersResolvable.is_rejection());
        assert!(BroadcastError::RateLimited { remaining_secs: 12 }
            .user_message()
            .contains("12 seconds"));
    }
}
