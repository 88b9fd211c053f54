//! Per-conversation theming as a pure mapping to bubble paint.

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::ConversationError, types::Message};

/// Opaque RGB color, serialized as `#rrggbb`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);
    pub const BLACK: Color = Color::rgb(0x00, 0x00, 0x00);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl FromStr for Color {
    type Err = ConversationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex = value.trim().trim_start_matches('#');
        let invalid = || ConversationError::invalid_input(format!("invalid color '{value}'"));
        if hex.len() != 6 || !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

impl TryFrom<String> for Color {
    type Error = ConversationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

/// Background of recalled bubbles, regardless of theme.
pub const RECALLED_BACKGROUND: Color = Color::rgb(0xf0, 0xf2, 0xf5);
/// Text of recalled bubbles, regardless of theme.
pub const RECALLED_TEXT: Color = Color::rgb(0x8a, 0x8d, 0x91);

/// Local rendering theme of one conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTheme {
    pub background_color: Color,
    pub message_color: Color,
}

impl Default for ConversationTheme {
    fn default() -> Self {
        Self {
            background_color: Color::WHITE,
            message_color: Color::rgb(0x00, 0x84, 0xff),
        }
    }
}

/// Colors used to paint one message bubble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BubblePaint {
    pub background_color: Color,
    pub text_color: Color,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThemeResolver;

impl ThemeResolver {
    /// Recalled bubbles are always muted. Otherwise the bubble takes the theme
    /// message color, with white text for own messages and black for the
    /// partner's.
    pub fn paint(
        &self,
        _message: &Message,
        theme: &ConversationTheme,
        is_own_message: bool,
        is_recalled: bool,
    ) -> BubblePaint {
        if is_recalled {
            return BubblePaint {
                background_color: RECALLED_BACKGROUND,
                text_color: RECALLED_TEXT,
            };
        }

        BubblePaint {
            background_color: theme.message_color,
            text_color: if is_own_message {
                Color::WHITE
            } else {
                Color::BLACK
            },
        }
    }
}

/// Local per-conversation theme overrides with a shared default.
#[derive(Debug, Clone, Default)]
pub struct ThemeRegistry {
    default_theme: ConversationTheme,
    overrides: HashMap<String, ConversationTheme>,
}

impl ThemeRegistry {
    pub fn new(default_theme: ConversationTheme) -> Self {
        Self {
            default_theme,
            overrides: HashMap::new(),
        }
    }

    pub fn resolve(&self, conversation_id: &str) -> ConversationTheme {
        self.overrides
            .get(conversation_id)
            .copied()
            .unwrap_or(self.default_theme)
    }

    pub fn set_override(&mut self, conversation_id: impl Into<String>, theme: ConversationTheme) {
        self.overrides.insert(conversation_id.into(), theme);
    }

    pub fn clear_override(&mut self, conversation_id: &str) {
        self.overrides.remove(conversation_id);
    }
}
