//! Environment-driven configuration for the smoke binary.

use std::{env, time::Duration};

use messenger_core::{Color, ConversationTheme, RetryPolicy};
use messenger_runtime::RuntimeConfig;
use thiserror::Error;

const DEFAULT_VIEWER_ID: &str = "viewer";
const DEFAULT_PARTNER_ID: &str = "partner";
const DEFAULT_TIMELINE_MAX_ITEMS: usize = 500;
const DEFAULT_RESUBSCRIBE_BASE_MS: u64 = 250;
const DEFAULT_RESUBSCRIBE_MAX_MS: u64 = 8_000;
const DEFAULT_RESUBSCRIBE_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    pub viewer_id: String,
    pub partner_id: String,
    pub timeline_max_items: usize,
    pub theme: ConversationTheme,
    pub resubscribe_base_ms: u64,
    pub resubscribe_max_ms: u64,
    pub resubscribe_max_attempts: u32,
    /// Artificial delay applied to every store write.
    pub store_latency_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let viewer_id = optional_trimmed(&mut lookup, "MESSENGER_VIEWER_ID")
            .unwrap_or_else(|| DEFAULT_VIEWER_ID.to_owned());
        let partner_id = optional_trimmed(&mut lookup, "MESSENGER_PARTNER_ID")
            .unwrap_or_else(|| DEFAULT_PARTNER_ID.to_owned());
        if viewer_id == partner_id {
            return Err(ConfigError::InvalidValue {
                key: "MESSENGER_PARTNER_ID",
                value: partner_id,
                reason: "must differ from MESSENGER_VIEWER_ID".to_owned(),
            });
        }

        let timeline_max_items = parse_number(
            &mut lookup,
            "MESSENGER_TIMELINE_MAX_ITEMS",
            DEFAULT_TIMELINE_MAX_ITEMS,
        )?;
        if timeline_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MESSENGER_TIMELINE_MAX_ITEMS",
                value: timeline_max_items.to_string(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let defaults = ConversationTheme::default();
        let theme = ConversationTheme {
            background_color: parse_color(
                &mut lookup,
                "MESSENGER_THEME_BACKGROUND",
                defaults.background_color,
            )?,
            message_color: parse_color(
                &mut lookup,
                "MESSENGER_THEME_MESSAGE",
                defaults.message_color,
            )?,
        };

        Ok(Self {
            viewer_id,
            partner_id,
            timeline_max_items,
            theme,
            resubscribe_base_ms: parse_number(
                &mut lookup,
                "MESSENGER_RESUBSCRIBE_BASE_MS",
                DEFAULT_RESUBSCRIBE_BASE_MS,
            )?,
            resubscribe_max_ms: parse_number(
                &mut lookup,
                "MESSENGER_RESUBSCRIBE_MAX_MS",
                DEFAULT_RESUBSCRIBE_MAX_MS,
            )?,
            resubscribe_max_attempts: parse_number(
                &mut lookup,
                "MESSENGER_RESUBSCRIBE_MAX_ATTEMPTS",
                DEFAULT_RESUBSCRIBE_MAX_ATTEMPTS,
            )?,
            store_latency_ms: parse_number(&mut lookup, "MESSENGER_STORE_LATENCY_MS", 0)?,
        })
    }

    pub fn store_latency(&self) -> Duration {
        Duration::from_millis(self.store_latency_ms)
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            timeline_max_items: self.timeline_max_items,
            default_theme: self.theme,
            resubscribe: RetryPolicy::new(self.resubscribe_base_ms, self.resubscribe_max_ms)
                .with_max_attempts(self.resubscribe_max_attempts),
            ..RuntimeConfig::default()
        }
    }
}

fn optional_trimmed<F>(lookup: &mut F, key: &str) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_number<T, F>(lookup: &mut F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed(lookup, key) else {
        return Ok(default);
    };
    value.parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        key,
        reason: err.to_string(),
        value,
    })
}

fn parse_color<F>(lookup: &mut F, key: &'static str, default: Color) -> Result<Color, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed(lookup, key) else {
        return Ok(default);
    };
    value.parse().map_err(|err: messenger_core::ConversationError| {
        ConfigError::InvalidValue {
            key,
            reason: err.message,
            value,
        }
    })
}
