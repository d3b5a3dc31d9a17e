// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{
    ChatFormat, FormatDescriptor, FormatFlags, MessagePreprocessor, SchemaTemplate, TokenPatterns,
};

const TOOLS_LAZY: FormatFlags = FormatFlags::PARSE_TOOLS.union(FormatFlags::LAZY_GRAMMAR);
const TOOLS_LAZY_PARALLEL: FormatFlags = TOOLS_LAZY.union(FormatFlags::PARALLEL_TOOLS);

/// Mistral tool call ids: exactly nine alphanumerics.
const MISTRAL_ID_PATTERN: &str = "^[a-zA-Z0-9]{9}$";

/// The built-in descriptor of `format`.
pub fn descriptor_for(format: ChatFormat) -> FormatDescriptor {
    match format {
        ChatFormat::ContentOnly => FormatDescriptor::content_only(),
        ChatFormat::Generic => FormatDescriptor::generic(),
        ChatFormat::MistralNemo => FormatDescriptor::mistral_nemo(),
        ChatFormat::Magistral => FormatDescriptor::magistral(),
        ChatFormat::CommandR7B => FormatDescriptor::command_r7b(),
        ChatFormat::Llama3x => FormatDescriptor::llama3_x(),
        ChatFormat::Llama3xBuiltinTools => FormatDescriptor::llama3_x_builtin_tools(),
        ChatFormat::Hermes2Pro => FormatDescriptor::hermes_2_pro(),
        ChatFormat::Qwen3 => FormatDescriptor::qwen3(),
        ChatFormat::DeepSeekR1 => FormatDescriptor::deepseek_r1(),
        ChatFormat::FirefunctionV2 => FormatDescriptor::firefunction_v2(),
        ChatFormat::Phi4Mini => FormatDescriptor::phi4_mini(),
        ChatFormat::NemotronDeci => FormatDescriptor::nemotron_deci(),
        ChatFormat::Granite => FormatDescriptor::granite(),
        ChatFormat::Jamba => FormatDescriptor::jamba(),
        ChatFormat::HunyuanA13B => FormatDescriptor::hunyuan_a13b(),
        ChatFormat::KimiThinking => FormatDescriptor::kimi_thinking(),
        ChatFormat::MistralSmall => FormatDescriptor::mistral_small(),
    }
}

impl FormatDescriptor {
    pub fn content_only() -> Self {
        FormatDescriptor::new(ChatFormat::ContentOnly, "Content-only")
            .with_flags(FormatFlags::HAS_REASONING)
            .with_tokens(TokenPatterns::default().thinking("<think>", "</think>"))
    }

    pub fn generic() -> Self {
        FormatDescriptor::new(ChatFormat::Generic, "Generic")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("[TOOL_CALLS]", None))
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_trigger_pattern(r"[\s\S]*?(\[TOOL_CALLS\])[\s\S]*")
            .with_preserved_tokens(&["[TOOL_CALLS]"])
            .with_preprocessor(MessagePreprocessor::ToolResponsesAsUser)
    }

    pub fn mistral_nemo() -> Self {
        FormatDescriptor::new(ChatFormat::MistralNemo, "Mistral Nemo")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("[TOOL_CALLS]", None))
            .with_schema(
                SchemaTemplate::new(&["name", "arguments", "id"])
                    .pattern("id", MISTRAL_ID_PATTERN)
                    .wrap_in_array(),
            )
            .with_preserved_tokens(&["[TOOL_CALLS]"])
    }

    pub fn magistral() -> Self {
        FormatDescriptor::new(ChatFormat::Magistral, "Magistral")
            .with_flags(TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING)
            .with_tokens(
                TokenPatterns::default()
                    .tools("[TOOL_CALLS]", None)
                    .thinking("[THINK]", "[/THINK]"),
            )
            .with_schema(
                SchemaTemplate::new(&["name", "arguments", "id"])
                    .pattern("id", MISTRAL_ID_PATTERN)
                    .wrap_in_array(),
            )
            .with_preserved_tokens(&["[TOOL_CALLS]", "[THINK]", "[/THINK]"])
    }

    pub fn command_r7b() -> Self {
        FormatDescriptor::new(ChatFormat::CommandR7B, "Command R7B")
            .with_flags(TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING)
            .with_tokens(
                TokenPatterns::default()
                    .tools("<|START_ACTION|>", Some("<|END_ACTION|>"))
                    .thinking("<|START_THINKING|>", "<|END_THINKING|>")
                    .response("<|START_RESPONSE|>", "<|END_RESPONSE|>"),
            )
            .with_schema(
                SchemaTemplate::new(&["tool_call_id", "tool_name", "parameters"])
                    .keys("tool_name", "parameters", Some("tool_call_id"))
                    .pattern("tool_call_id", "^[0-9]{1,10}$")
                    .wrap_in_array(),
            )
            .with_trigger_pattern(
                r"(?:<\|START_THINKING\|>[\s\S]*?<\|END_THINKING\|>\s*)?(<\|START_ACTION\|>)[\s\S]*",
            )
            .with_preserved_tokens(&[
                "<|START_ACTION|>",
                "<|END_ACTION|>",
                "<|START_RESPONSE|>",
                "<|END_RESPONSE|>",
                "<|START_THINKING|>",
                "<|END_THINKING|>",
            ])
    }

    pub fn llama3_x() -> Self {
        FormatDescriptor::new(ChatFormat::Llama3x, "Llama 3.x")
            .with_flags(TOOLS_LAZY)
            .with_tokens(
                TokenPatterns::default()
                    .tools_in_payload("{\"name\":")
                    .thinking("<think>", "</think>"),
            )
            .with_schema(SchemaTemplate::new(&["name", "parameters"]).root_rule("{tool_calls}"))
            .with_trigger_pattern(r#"[\s\S]*?(\{"name":)[\s\S]*"#)
    }

    pub fn llama3_x_builtin_tools() -> Self {
        FormatDescriptor::new(
            ChatFormat::Llama3xBuiltinTools,
            "Llama 3.x with builtin tools",
        )
        .with_flags(TOOLS_LAZY | FormatFlags::BUILTIN_TOOLS)
        .with_tokens(TokenPatterns::default().tools("<|python_tag|>", None))
        .with_schema(SchemaTemplate::new(&["name", "parameters"]))
        .with_trigger_pattern(r"[\s\S]*?(<\|python_tag\|>)[\s\S]*")
        .with_preserved_tokens(&["<|python_tag|>"])
        .with_preprocessor(MessagePreprocessor::Llama3BuiltinTools)
    }

    pub fn hermes_2_pro() -> Self {
        FormatDescriptor::new(ChatFormat::Hermes2Pro, "Hermes 2 Pro")
            .with_flags(TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING)
            .with_tokens(
                TokenPatterns::default()
                    .tools("<tool_call>", Some("</tool_call>"))
                    .thinking("<think>", "</think>"),
            )
            .with_schema(SchemaTemplate::new(&["name", "arguments"]))
            .with_preserved_tokens(&["<think>", "</think>", "<tool_call>", "</tool_call>"])
    }

    pub fn qwen3() -> Self {
        FormatDescriptor::new(ChatFormat::Qwen3, "Qwen3")
            .with_flags(TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING)
            .with_tokens(
                TokenPatterns::default()
                    .tools("<tool_call>", Some("</tool_call>"))
                    .thinking("<think>", "</think>"),
            )
            .with_schema(SchemaTemplate::new(&["name", "arguments"]))
            .with_trigger_pattern(
                r"(?:<think>[\s\S]*?</think>\s*)?[\s\S]*?(<tool_call>)[\s\S]*",
            )
            .with_preserved_tokens(&["<think>", "</think>", "<tool_call>", "</tool_call>"])
    }

    pub fn deepseek_r1() -> Self {
        FormatDescriptor::new(ChatFormat::DeepSeekR1, "DeepSeek R1")
            .with_flags(
                TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING | FormatFlags::THINKING_OPEN,
            )
            .with_tokens(
                TokenPatterns::default()
                    .tools("<｜tool▁calls▁begin｜>", Some("<｜tool▁calls▁end｜>"))
                    .thinking("<think>", "</think>"),
            )
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_preserved_tokens(&[
                "<think>",
                "</think>",
                "<｜tool▁calls▁begin｜>",
                "<｜tool▁calls▁end｜>",
            ])
    }

    pub fn firefunction_v2() -> Self {
        FormatDescriptor::new(ChatFormat::FirefunctionV2, "FireFunction v2")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("functools", None))
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
    }

    pub fn phi4_mini() -> Self {
        FormatDescriptor::new(ChatFormat::Phi4Mini, "Phi-4 mini")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("<|tool_call|>", Some("<|/tool_call|>")))
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_preserved_tokens(&["<|tool_call|>", "<|/tool_call|>"])
    }

    pub fn nemotron_deci() -> Self {
        FormatDescriptor::new(ChatFormat::NemotronDeci, "Llama Nemotron (Deci)")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("<TOOLCALL>", Some("</TOOLCALL>")))
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_preserved_tokens(&["<TOOLCALL>", "</TOOLCALL>"])
    }

    pub fn granite() -> Self {
        FormatDescriptor::new(ChatFormat::Granite, "Granite")
            .with_flags(TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING)
            .with_tokens(
                TokenPatterns::default()
                    .tools("<|tool_call|>", None)
                    .thinking("<think>", "</think>")
                    .response("<response>", "</response>"),
            )
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_preserved_tokens(&[
                "<|tool_call|>",
                "<think>",
                "</think>",
                "<response>",
                "</response>",
            ])
    }

    pub fn jamba() -> Self {
        FormatDescriptor::new(ChatFormat::Jamba, "Jamba")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("<tool_calls>", Some("</tool_calls>")))
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_preserved_tokens(&["<tool_calls>", "</tool_calls>"])
    }

    pub fn hunyuan_a13b() -> Self {
        FormatDescriptor::new(ChatFormat::HunyuanA13B, "Hunyuan A13B")
            .with_flags(TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING)
            .with_tokens(
                TokenPatterns::default()
                    .tools("<tool_calls>", Some("</tool_calls>"))
                    .thinking("<think>", "</think>")
                    .response("<answer>", "</answer>"),
            )
            .with_schema(SchemaTemplate::new(&["name", "arguments"]).wrap_in_array())
            .with_preserved_tokens(&[
                "<think>",
                "</think>",
                "<answer>",
                "</answer>",
                "<tool_calls>",
                "</tool_calls>",
            ])
    }

    pub fn kimi_thinking() -> Self {
        FormatDescriptor::new(ChatFormat::KimiThinking, "Kimi K2 Thinking")
            .with_flags(
                TOOLS_LAZY_PARALLEL | FormatFlags::HAS_REASONING | FormatFlags::THINKING_OPEN,
            )
            .with_tokens(
                TokenPatterns::default()
                    .tools(
                        "<|tool_calls_section_begin|>",
                        Some("<|tool_calls_section_end|>"),
                    )
                    .thinking("<think>", "</think>"),
            )
            .with_schema(
                SchemaTemplate::new(&["id", "name", "arguments"])
                    .pattern("id", r"^functions\.[a-zA-Z0-9_\-]+:[0-9]+$")
                    .wrap_in_array(),
            )
            .with_preserved_tokens(&[
                "<think>",
                "</think>",
                "<|tool_calls_section_begin|>",
                "<|tool_calls_section_end|>",
            ])
    }

    pub fn mistral_small() -> Self {
        FormatDescriptor::new(ChatFormat::MistralSmall, "Mistral Small")
            .with_flags(TOOLS_LAZY_PARALLEL)
            .with_tokens(TokenPatterns::default().tools("[TOOL_CALLS]", None))
            .with_schema(
                SchemaTemplate::new(&["name", "arguments", "id"])
                    .required(&["name", "arguments"])
                    .pattern("id", MISTRAL_ID_PATTERN)
                    .wrap_in_array(),
            )
            .with_preserved_tokens(&["[TOOL_CALLS]"])
            .with_preprocessor(MessagePreprocessor::ToolSystemPrompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_format_has_a_descriptor() {
        for format in ChatFormat::iter() {
            assert_eq!(descriptor_for(format).format, format);
        }
    }

    #[test]
    fn test_declared_patterns_compile() {
        for format in ChatFormat::iter() {
            let descriptor = descriptor_for(format);
            if let Some(trigger) = &descriptor.trigger_pattern {
                let re = Regex::new(trigger).unwrap();
                assert_eq!(re.captures_len(), 2, "{format}: exactly one capture group");
            }
            for pattern in descriptor.schema.property_patterns.values() {
                Regex::new(pattern).unwrap();
            }
        }
    }

    #[test]
    fn test_tool_formats_declare_a_prefix() {
        for format in ChatFormat::iter() {
            let descriptor = descriptor_for(format);
            if descriptor.parses_tools() {
                assert!(descriptor.tokens.tool_prefix.is_some(), "{format}");
                let schema = &descriptor.schema;
                assert!(schema.tool_properties.contains(&schema.name_key), "{format}");
                assert!(schema.tool_properties.contains(&schema.arguments_key), "{format}");
            } else {
                assert!(!descriptor.allows_parallel_tools(), "{format}");
            }
        }
    }

    #[test]
    fn test_trigger_pattern_captures_prefix() {
        let descriptor = descriptor_for(ChatFormat::CommandR7B);
        let re = Regex::new(descriptor.trigger_pattern.as_deref().unwrap()).unwrap();
        let text = "<|START_THINKING|>plan<|END_THINKING|>\n<|START_ACTION|>[]<|END_ACTION|>";
        let caps = re.captures(text).unwrap();
        assert_eq!(&caps[1], "<|START_ACTION|>");
    }
}
