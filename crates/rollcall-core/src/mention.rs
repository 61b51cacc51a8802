//! Mention rendering.
//!
//! A member with a public username is mentioned as `@username`; anyone else
//! gets an HTML link to `tg://user?id=...`, which Telegram turns into a
//! notifying mention.

use crate::directory::Member;
use crate::utils::truncate_utf16;
use std::fmt;

/// Name used when a member has no display name.
pub const FALLBACK_DISPLAY_NAME: &str = "User";

/// Longest visible name in a link mention, in UTF-16 code units.
///
/// Telegram caps a first name at 64 characters, but a full name can be twice
/// that. With this cap a full part of 50 mentions stays under the 4096
/// character message limit.
pub const MAX_DISPLAY_NAME_UNITS: usize = 64;

/// A rendered, ready-to-send mention.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MentionToken(String);

impl MentionToken {
    /// The rendered markup.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MentionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MentionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Render a member as a mention.
///
/// # Examples
///
/// ```
/// use rollcall_core::directory::Member;
/// use rollcall_core::mention::render;
///
/// assert_eq!(render(&Member::new(1, "Alice", Some("alice"))).as_str(), "@alice");
/// assert_eq!(
///     render(&Member::new(2, "Bob", None)).as_str(),
///     r#"<a href="tg://user?id=2">Bob</a>"#
/// );
/// ```
#[must_use]
pub fn render(member: &Member) -> MentionToken {
    if let Some(handle) = member.handle.as_deref().map(str::trim) {
        let handle = handle.trim_start_matches('@');
        if !handle.is_empty() {
            return MentionToken(format!("@{handle}"));
        }
    }

    let name = truncate_utf16(member.display_name.trim(), MAX_DISPLAY_NAME_UNITS).trim_end();
    let name = if name.is_empty() {
        FALLBACK_DISPLAY_NAME
    } else {
        name
    };
    MentionToken(format!(
        r#"<a href="tg://user?id={}">{}</a>"#,
        member.id,
        html_escape::encode_text(name)
    ))
}

/// Render every member in order.
#[must_use]
pub fn render_all(members: &[Member]) -> Vec<MentionToken> {
    members.iter().map(render).collect()
}
