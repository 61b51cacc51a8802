//! Message chunking for broadcasts.
//!
//! Splits an ordered list of mentions into parts of at most `chunk_size`
//! mentions. The first part carries the caller's header, later parts a
//! "part i of N" header.

use crate::config::{MentionLayout, DEFAULT_CHUNK_SIZE};
use crate::mention::MentionToken;
use std::ops::Range;

/// One outbound message of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMessage {
    /// Full message text, header included
    pub text: String,
    /// 1-based position in the plan
    pub part_index: usize,
    /// Number of messages in the plan
    pub total_parts: usize,
    /// Mentions carried by this message
    pub mention_count: usize,
    /// Positions of those mentions in the planned input
    pub mention_range: Range<usize>,
}

/// Messages of a broadcast, already in send order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BroadcastPlan {
    /// Messages to send, part 1 first
    pub messages: Vec<PlannedMessage>,
}

impl BroadcastPlan {
    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Header of the first message of a broadcast to everyone.
#[must_use]
pub fn everyone_header(total: usize) -> String {
    format!("📢 <b>Attention, everyone!</b> ({total} members)\n\n")
}

/// Header of the first message of a broadcast to administrators.
#[must_use]
pub fn admins_header(total: usize) -> String {
    format!("👑 <b>Attention, administrators!</b> ({total})\n\n")
}

/// Header of every message after the first.
#[must_use]
pub fn continuation_header(part_index: usize, total_parts: usize) -> String {
    format!("<b>Continued...</b> (part {part_index} of {total_parts})\n\n")
}

/// Builds [`BroadcastPlan`]s.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastPlanner {
    chunk_size: usize,
    layout: MentionLayout,
}

impl Default for BroadcastPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, MentionLayout::default())
    }
}

impl BroadcastPlanner {
    /// Create a planner; a zero chunk size is treated as one.
    #[must_use]
    pub fn new(chunk_size: usize, layout: MentionLayout) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            layout,
        }
    }

    /// Maximum mentions per message.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Separator placed between mentions.
    #[must_use]
    pub const fn separator(&self) -> &'static str {
        self.layout.separator()
    }

    /// Split `mentions` into messages.
    ///
    /// `header` receives the total mention count and produces the prefix of
    /// the first message.
    ///
    /// # Examples
    ///
    /// ```
    /// use rollcall_core::config::MentionLayout;
    /// use rollcall_core::directory::Member;
    /// use rollcall_core::mention::render_all;
    /// use rollcall_core::planner::{everyone_header, BroadcastPlanner};
    ///
    /// let members: Vec<Member> = (1..=120)
    ///     .map(|id| Member::new(id, format!("User {id}"), None))
    ///     .collect();
    /// let plan = BroadcastPlanner::new(50, MentionLayout::Lines)
    ///     .plan(&render_all(&members), everyone_header);
    ///
    /// let counts: Vec<usize> = plan.messages.iter().map(|m| m.mention_count).collect();
    /// assert_eq!(counts, vec![50, 50, 20]);
    /// ```
    #[must_use]
    pub fn plan<H>(&self, mentions: &[MentionToken], header: H) -> BroadcastPlan
    where
        H: Fn(usize) -> String,
    {
        if mentions.is_empty() {
            return BroadcastPlan::default();
        }

        let total_parts = mentions.len().div_ceil(self.chunk_size);
        let messages = mentions
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let part_index = i + 1;
                let start = i * self.chunk_size;
                let prefix = if part_index == 1 {
                    header(mentions.len())
                } else {
                    continuation_header(part_index, total_parts)
                };
                PlannedMessage {
                    text: format!("{prefix}{}", self.join(chunk)),
                    part_index,
                    total_parts,
                    mention_count: chunk.len(),
                    mention_range: start..start + chunk.len(),
                }
            })
            .collect();

        BroadcastPlan { messages }
    }

    fn join(&self, chunk: &[MentionToken]) -> String {
        chunk
            .iter()
            .map(MentionToken::as_str)
            .collect::<Vec<_>>()
            .join(self.separator())
    }
}
