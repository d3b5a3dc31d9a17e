// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;

use anyhow::Result;
use derive_builder::Builder;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Path of an optional TOML file with chat format settings.
pub const DYN_CHAT_FORMAT_CONFIG_PATH: &str = "DYN_CHAT_FORMAT_CONFIG_PATH";

/// Prefix of the environment variables overriding individual settings.
pub const DYN_CHAT_FORMAT_ENV_PREFIX: &str = "DYN_CHAT_FORMAT_";

const DEFAULT_GRAMMAR_MAX_WHITESPACE: usize = 20;

static SETTINGS: OnceLock<ChatFormatSettings> = OnceLock::new();

/// Engine settings
#[derive(Serialize, Deserialize, Validate, Debug, Builder, Clone, PartialEq)]
#[builder(build_fn(private, name = "build_internal"), derive(Debug, Serialize))]
pub struct ChatFormatSettings {
    /// Remove the first newline after a Jinja block tag.
    /// Set this at runtime with environment variable DYN_CHAT_FORMAT_TRIM_BLOCKS.
    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub trim_blocks: bool,

    /// Strip whitespace before a Jinja block tag on the same line.
    /// Set this at runtime with environment variable DYN_CHAT_FORMAT_LSTRIP_BLOCKS.
    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub lstrip_blocks: bool,

    /// Upper bound on the indentation the `ws` grammar rule accepts after a newline.
    /// Set this at runtime with environment variable DYN_CHAT_FORMAT_GRAMMAR_MAX_WHITESPACE.
    #[validate(range(min = 1, max = 64))]
    #[builder(default = "DEFAULT_GRAMMAR_MAX_WHITESPACE")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub grammar_max_whitespace: usize,

    /// Whether requests allow parallel tool calls unless they say otherwise.
    /// Set this at runtime with environment variable DYN_CHAT_FORMAT_PARALLEL_TOOL_CALLS_DEFAULT.
    #[builder(default = "true")]
    #[builder_field_attr(serde(skip_serializing_if = "Option::is_none"))]
    pub parallel_tool_calls_default: bool,
}

impl Default for ChatFormatSettings {
    fn default() -> Self {
        ChatFormatSettings {
            trim_blocks: true,
            lstrip_blocks: true,
            grammar_max_whitespace: DEFAULT_GRAMMAR_MAX_WHITESPACE,
            parallel_tool_calls_default: true,
        }
    }
}

impl ChatFormatSettings {
    pub fn builder() -> ChatFormatSettingsBuilder {
        ChatFormatSettingsBuilder::default()
    }

    pub(crate) fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(ChatFormatSettings::default()));
        if let Ok(path) = std::env::var(DYN_CHAT_FORMAT_CONFIG_PATH)
            && !path.is_empty()
        {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(DYN_CHAT_FORMAT_ENV_PREFIX).filter_map(|k| {
            let full_key = format!("{DYN_CHAT_FORMAT_ENV_PREFIX}{}", k.as_str());
            // filters out empty environment variables and the config path itself
            match std::env::var(&full_key) {
                Ok(v) if !v.is_empty() && full_key != DYN_CHAT_FORMAT_CONFIG_PATH => Some(k.into()),
                _ => None,
            }
        }))
    }

    /// Load the settings from the environment and an optional configuration file.
    /// Configuration is prioritized in the following order, where the last has the lowest priority:
    /// 1. Environment variables prefixed with `DYN_CHAT_FORMAT_`
    /// 2. The TOML file named by `DYN_CHAT_FORMAT_CONFIG_PATH`
    /// 3. Built-in defaults
    pub fn from_settings() -> Result<ChatFormatSettings> {
        let settings: ChatFormatSettings = Self::figment().extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Process-wide settings, loaded on first use.
    pub fn global() -> &'static ChatFormatSettings {
        SETTINGS.get_or_init(|| {
            Self::from_settings().unwrap_or_else(|err| {
                tracing::warn!(error = %err, "invalid chat format settings, using defaults");
                ChatFormatSettings::default()
            })
        })
    }
}

impl ChatFormatSettingsBuilder {
    /// Build and validate the settings
    pub fn build(&self) -> Result<ChatFormatSettings> {
        let settings = self.build_internal()?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Check if a string is truthy.
///
/// Truthy values: "1", "true", "on", "yes" (case-insensitive)
pub fn is_truthy(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "1" | "true" | "on" | "yes")
}

/// Check if a string is falsey.
///
/// Falsey values: "0", "false", "off", "no" (case-insensitive)
pub fn is_falsey(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "0" | "false" | "off" | "no")
}

/// Parse a string as a boolean value, returning an error if invalid.
pub fn parse_bool(val: &str) -> Result<bool> {
    if is_truthy(val) {
        Ok(true)
    } else if is_falsey(val) {
        Ok(false)
    } else {
        anyhow::bail!(
            "Invalid boolean value: '{}'. Expected one of: true/false, 1/0, on/off, yes/no",
            val
        )
    }
}

/// Check if an environment variable is truthy.
///
/// Returns `false` if the environment variable is not set or is invalid.
pub fn env_is_truthy(env: &str) -> bool {
    match std::env::var(env) {
        Ok(val) => is_truthy(val.as_str()),
        Err(_) => false,
    }
}
