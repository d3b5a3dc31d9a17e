// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Declarative per-family descriptors.
//!
//! A [`FormatDescriptor`] captures everything that differs between model families: the
//! literal delimiters around tool calls, reasoning and responses, the JSON shape of one
//! tool call, and a handful of capability flags. The prompt and parser halves of the
//! engine are written once against this record; adding a family means adding an entry
//! to the descriptor table, never a new code path.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::protocols::ToolCall;

mod table;

pub use table::descriptor_for;

/// Stable identifier of a model family's chat format.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ChatFormat {
    #[serde(rename = "content_only")]
    #[strum(serialize = "content_only")]
    ContentOnly,
    #[serde(rename = "generic")]
    #[strum(serialize = "generic")]
    Generic,
    #[serde(rename = "mistral_nemo")]
    #[strum(serialize = "mistral_nemo")]
    MistralNemo,
    #[serde(rename = "magistral")]
    #[strum(serialize = "magistral")]
    Magistral,
    #[serde(rename = "command_r7b")]
    #[strum(serialize = "command_r7b")]
    CommandR7B,
    #[serde(rename = "llama3_x")]
    #[strum(serialize = "llama3_x")]
    Llama3x,
    #[serde(rename = "llama3_x_builtin_tools")]
    #[strum(serialize = "llama3_x_builtin_tools")]
    Llama3xBuiltinTools,
    #[serde(rename = "hermes_2_pro")]
    #[strum(serialize = "hermes_2_pro")]
    Hermes2Pro,
    #[serde(rename = "qwen3")]
    #[strum(serialize = "qwen3")]
    Qwen3,
    #[serde(rename = "deepseek_r1")]
    #[strum(serialize = "deepseek_r1")]
    DeepSeekR1,
    #[serde(rename = "firefunction_v2")]
    #[strum(serialize = "firefunction_v2")]
    FirefunctionV2,
    #[serde(rename = "phi4_mini")]
    #[strum(serialize = "phi4_mini")]
    Phi4Mini,
    #[serde(rename = "nemotron_deci")]
    #[strum(serialize = "nemotron_deci")]
    NemotronDeci,
    #[serde(rename = "granite")]
    #[strum(serialize = "granite")]
    Granite,
    #[serde(rename = "jamba")]
    #[strum(serialize = "jamba")]
    Jamba,
    #[serde(rename = "hunyuan_a13b")]
    #[strum(serialize = "hunyuan_a13b")]
    HunyuanA13B,
    #[serde(rename = "kimi_thinking")]
    #[strum(serialize = "kimi_thinking")]
    KimiThinking,
    #[serde(rename = "mistral_small")]
    #[strum(serialize = "mistral_small")]
    MistralSmall,
}

impl ChatFormat {
    pub fn as_str(&self) -> &'static str {
        (*self).into()
    }
}

bitflags! {
    /// Capabilities of a format family.
    ///
    /// ```rust
    /// use dynamo_chat_format::formats::FormatFlags;
    /// let flags = FormatFlags::PARSE_TOOLS | FormatFlags::PARALLEL_TOOLS;
    /// assert!(flags.contains(FormatFlags::PARSE_TOOLS));
    /// assert!(!flags.contains(FormatFlags::HAS_REASONING));
    /// ```
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FormatFlags: u8 {
        /// Output may contain tool calls.
        const PARSE_TOOLS = 1 << 0;
        /// The tool grammar stays inert until a trigger is observed.
        const LAZY_GRAMMAR = 1 << 1;
        /// More than one tool call per turn.
        const PARALLEL_TOOLS = 1 << 2;
        /// Output may open with a reasoning region.
        const HAS_REASONING = 1 << 3;
        /// The prompt opens the reasoning region, so output may start inside it.
        const THINKING_OPEN = 1 << 4;
        /// The family exposes built-in tools that are not described by JSON schema.
        const BUILTIN_TOOLS = 1 << 5;
    }
}

/// Literal delimiters of the optional output regions. `None` means the region is
/// absent or implicit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPatterns {
    pub tool_prefix: Option<String>,
    pub tool_suffix: Option<String>,
    /// The tool prefix is the opening of the JSON payload itself (e.g. `{"name":`)
    /// rather than a separate marker.
    #[serde(default)]
    pub tool_prefix_in_payload: bool,
    pub thinking_start: Option<String>,
    pub thinking_end: Option<String>,
    pub response_start: Option<String>,
    pub response_end: Option<String>,
}

impl TokenPatterns {
    pub fn tools(mut self, prefix: &str, suffix: Option<&str>) -> Self {
        self.tool_prefix = Some(prefix.to_string());
        self.tool_suffix = suffix.map(str::to_string);
        self
    }

    /// Tool calls open with `prefix`, which is also the start of the call object.
    pub fn tools_in_payload(mut self, prefix: &str) -> Self {
        self.tool_prefix = Some(prefix.to_string());
        self.tool_suffix = None;
        self.tool_prefix_in_payload = true;
        self
    }

    pub fn thinking(mut self, start: &str, end: &str) -> Self {
        self.thinking_start = Some(start.to_string());
        self.thinking_end = Some(end.to_string());
        self
    }

    pub fn response(mut self, start: &str, end: &str) -> Self {
        self.response_start = Some(start.to_string());
        self.response_end = Some(end.to_string());
        self
    }

    /// Every declared delimiter, in declaration order.
    pub fn delimiters(&self) -> impl Iterator<Item = &str> {
        [
            &self.tool_prefix,
            &self.tool_suffix,
            &self.thinking_start,
            &self.thinking_end,
            &self.response_start,
            &self.response_end,
        ]
        .into_iter()
        .filter_map(|t| t.as_deref())
    }
}

/// Wire shape of one tool call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTemplate {
    /// Keys of a call object, in emission order.
    pub tool_properties: Vec<String>,
    pub required_properties: Vec<String>,
    /// Property name to regular expression the (string) value must match.
    pub property_patterns: BTreeMap<String, String>,
    pub wrap_in_array: bool,
    /// GBNF production for the tool-call region with `{prefix}`, `{tool_calls}` and
    /// `{suffix}` placeholders. Empty means `{prefix} {tool_calls} {suffix}`.
    pub root_rule_template: String,
    pub name_key: String,
    pub arguments_key: String,
    pub id_key: Option<String>,
}

impl SchemaTemplate {
    /// Template whose role keys are inferred from the property list: `name`, then
    /// `arguments` (or `parameters`), then `id` when listed. Every listed property is
    /// required until [`SchemaTemplate::required`] says otherwise.
    pub fn new(properties: &[&str]) -> Self {
        let has = |p: &str| properties.contains(&p);
        let arguments_key = if !has("arguments") && has("parameters") {
            "parameters"
        } else {
            "arguments"
        };
        SchemaTemplate {
            tool_properties: properties.iter().map(|p| p.to_string()).collect(),
            required_properties: properties.iter().map(|p| p.to_string()).collect(),
            property_patterns: BTreeMap::new(),
            wrap_in_array: false,
            root_rule_template: String::new(),
            name_key: "name".to_string(),
            arguments_key: arguments_key.to_string(),
            id_key: has("id").then(|| "id".to_string()),
        }
    }

    pub fn required(mut self, properties: &[&str]) -> Self {
        self.required_properties = properties.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn pattern(mut self, property: &str, pattern: &str) -> Self {
        self.property_patterns
            .insert(property.to_string(), pattern.to_string());
        self
    }

    pub fn wrap_in_array(mut self) -> Self {
        self.wrap_in_array = true;
        self
    }

    pub fn root_rule(mut self, template: &str) -> Self {
        self.root_rule_template = template.to_string();
        self
    }

    pub fn keys(mut self, name: &str, arguments: &str, id: Option<&str>) -> Self {
        self.name_key = name.to_string();
        self.arguments_key = arguments.to_string();
        self.id_key = id.map(str::to_string);
        self
    }

    pub fn is_required(&self, property: &str) -> bool {
        self.required_properties.iter().any(|p| p == property)
    }
}

/// Message rewrites applied before a family's chat template is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePreprocessor {
    /// Describe the available tools and the call syntax in the system message.
    ToolSystemPrompt,
    /// As `ToolSystemPrompt`, and replay tool traffic as plain user/assistant turns
    /// for templates without tool roles.
    ToolResponsesAsUser,
    /// As `ToolSystemPrompt`, plus the Llama 3.x `Environment: ipython` header and
    /// built-in tool list.
    Llama3BuiltinTools,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    pub format: ChatFormat,
    pub name: String,
    pub flags: FormatFlags,
    pub tokens: TokenPatterns,
    pub schema: SchemaTemplate,
    /// Regex over the whole output; its first capture marks where the tool-call region
    /// begins.
    pub trigger_pattern: Option<String>,
    /// Literal tokens that must never be split by tokenization.
    pub preserved_tokens: Vec<String>,
    pub preprocessor: Option<MessagePreprocessor>,
}

impl FormatDescriptor {
    pub fn new(format: ChatFormat, name: &str) -> Self {
        FormatDescriptor {
            format,
            name: name.to_string(),
            flags: FormatFlags::empty(),
            tokens: TokenPatterns::default(),
            schema: SchemaTemplate::default(),
            trigger_pattern: None,
            preserved_tokens: Vec::new(),
            preprocessor: None,
        }
    }

    pub fn with_flags(mut self, flags: FormatFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_tokens(mut self, tokens: TokenPatterns) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_schema(mut self, schema: SchemaTemplate) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_trigger_pattern(mut self, pattern: &str) -> Self {
        self.trigger_pattern = Some(pattern.to_string());
        self
    }

    pub fn with_preserved_tokens(mut self, tokens: &[&str]) -> Self {
        self.preserved_tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: MessagePreprocessor) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn parses_tools(&self) -> bool {
        self.flags.contains(FormatFlags::PARSE_TOOLS)
    }

    pub fn allows_parallel_tools(&self) -> bool {
        self.flags.contains(FormatFlags::PARALLEL_TOOLS)
    }

    pub fn has_reasoning(&self) -> bool {
        self.flags.contains(FormatFlags::HAS_REASONING)
    }

    /// True when the tool prefix is the opening of the JSON payload itself
    /// (e.g. `{"name":`) rather than a separate marker.
    pub fn prefix_opens_payload(&self) -> bool {
        self.tokens.tool_prefix_in_payload && self.tokens.tool_prefix.is_some()
    }

    /// Encode tool calls the way this family emits them, delimiters included.
    pub fn render_tool_calls(&self, calls: &[ToolCall]) -> String {
        if calls.is_empty() {
            return String::new();
        }
        let prefix = if self.prefix_opens_payload() {
            ""
        } else {
            self.tokens.tool_prefix.as_deref().unwrap_or_default()
        };
        let suffix = self.tokens.tool_suffix.as_deref().unwrap_or_default();
        let objects: Vec<String> = calls.iter().map(|c| self.schema.encode_call(c)).collect();

        if self.schema.wrap_in_array {
            format!("{prefix}[{}]{suffix}", objects.join(", "))
        } else {
            objects
                .iter()
                .map(|o| format!("{prefix}{o}{suffix}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_format_names_round_trip() {
        for format in ChatFormat::iter() {
            let name = format.as_str();
            assert_eq!(ChatFormat::from_str(name).unwrap(), format);
            assert_eq!(format.to_string(), name);
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{name}\""));
        }
    }

    #[test]
    fn test_format_names_are_case_insensitive() {
        assert_eq!(
            ChatFormat::from_str("Hermes_2_Pro").unwrap(),
            ChatFormat::Hermes2Pro
        );
        assert!(ChatFormat::from_str("hermes").is_err());
    }

    #[test]
    fn test_schema_template_infers_role_keys() {
        let schema = SchemaTemplate::new(&["name", "parameters"]);
        assert_eq!(schema.name_key, "name");
        assert_eq!(schema.arguments_key, "parameters");
        assert_eq!(schema.id_key, None);

        let schema = SchemaTemplate::new(&["name", "arguments", "id"]).required(&["name"]);
        assert_eq!(schema.id_key.as_deref(), Some("id"));
        assert!(schema.is_required("name"));
        assert!(!schema.is_required("id"));
    }

    #[test]
    fn test_render_tool_calls_wraps_in_array() {
        let descriptor = descriptor_for(ChatFormat::MistralNemo);
        let calls = vec![
            ToolCall::new("abcdefghi", "a", "{}"),
            ToolCall::new("123456789", "b", r#"{"x":1}"#),
        ];
        assert_eq!(
            descriptor.render_tool_calls(&calls),
            r#"[TOOL_CALLS][{"name":"a","arguments":{},"id":"abcdefghi"}, {"name":"b","arguments":{"x":1},"id":"123456789"}]"#
        );
    }

    #[test]
    fn test_render_tool_calls_one_region_per_call() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let calls = vec![
            ToolCall::new("1", "a", "{}"),
            ToolCall::new("2", "b", "{}"),
        ];
        assert_eq!(
            descriptor.render_tool_calls(&calls),
            "<tool_call>{\"name\":\"a\",\"arguments\":{}}</tool_call>\n<tool_call>{\"name\":\"b\",\"arguments\":{}}</tool_call>"
        );
    }

    #[test]
    fn test_marker_prefix_is_rendered() {
        for format in [
            ChatFormat::Generic,
            ChatFormat::MistralNemo,
            ChatFormat::Magistral,
            ChatFormat::MistralSmall,
        ] {
            let descriptor = descriptor_for(format);
            assert!(!descriptor.prefix_opens_payload(), "{format}");
            let rendered =
                descriptor.render_tool_calls(&[ToolCall::new("abcdefghi", "f", "{}")]);
            assert!(rendered.starts_with("[TOOL_CALLS][{"), "{format}: {rendered}");
        }
    }

    #[test]
    fn test_only_llama3_prefix_opens_payload() {
        for format in ChatFormat::iter() {
            assert_eq!(
                descriptor_for(format).prefix_opens_payload(),
                format == ChatFormat::Llama3x,
                "{format}"
            );
        }
    }

    #[test]
    fn test_payload_prefix_is_not_duplicated() {
        let descriptor = descriptor_for(ChatFormat::Llama3x);
        assert!(descriptor.prefix_opens_payload());
        let rendered = descriptor.render_tool_calls(&[ToolCall::new("x", "f", r#"{"a":true}"#)]);
        assert_eq!(rendered, r#"{"name":"f","parameters":{"a":true}}"#);
    }
}
