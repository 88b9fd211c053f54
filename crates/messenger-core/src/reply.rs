use serde::{Deserialize, Serialize};

use crate::types::Message;

/// Placeholder shown when the quoted message is not in the loaded window.
pub const UNAVAILABLE_REPLY_TEXT: &str = "a deleted message";
/// Placeholder shown when the quoted message was recalled.
pub const RECALLED_REPLY_TEXT: &str = "a recalled message";

const SUMMARY_MAX_CHARS: usize = 80;

/// What the reply indicator of a message shows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplyPreview {
    /// The quoted message is in the loaded window.
    Quoted {
        message_id: String,
        sender_id: String,
        summary: String,
    },
    /// The quoted message is deleted or outside the loaded window.
    Unavailable,
}

impl ReplyPreview {
    pub fn display_text(&self) -> &str {
        match self {
            Self::Quoted { summary, .. } => summary,
            Self::Unavailable => UNAVAILABLE_REPLY_TEXT,
        }
    }
}

/// Resolves reply references against the loaded window only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyResolver;

impl ReplyResolver {
    /// Look up `reply_to_id` in `window`. Never fetches outside it.
    pub fn resolve(&self, reply_to_id: &str, window: &[Message]) -> ReplyPreview {
        window
            .iter()
            .find(|message| message.id == reply_to_id)
            .map(|quoted| ReplyPreview::Quoted {
                message_id: quoted.id.clone(),
                sender_id: quoted.sender_id.clone(),
                summary: summarize(quoted),
            })
            .unwrap_or(ReplyPreview::Unavailable)
    }
}

/// Short text describing a message, as shown inside a reply indicator.
pub fn summarize(message: &Message) -> String {
    if message.is_recalled {
        return RECALLED_REPLY_TEXT.to_owned();
    }

    if let Some(content) = message
        .content
        .as_deref()
        .map(str::trim)
        .filter(|content| !content.is_empty())
    {
        return truncate(content, SUMMARY_MAX_CHARS);
    }

    match message.media_files.as_slice() {
        [] => String::new(),
        [single] => format!("[{}]", single.category.label()),
        many => format!("[{} attachments]", many.len()),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
