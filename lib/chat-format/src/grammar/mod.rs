// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Generation grammar construction.
//!
//! Grammars are emitted as GBNF text for a grammar-constrained decoder. A tool grammar
//! constrains only the delimiters and the JSON of the tool-call region; free text and
//! reasoning are never constrained.

mod gbnf;
mod json_schema;
mod pattern;

pub use gbnf::{GbnfGrammar, json_string_literal, literal, object_rule_body, rule_name};
pub use json_schema::JsonSchemaConverter;
pub use pattern::regex_to_gbnf;

use serde::Serialize;
use serde_json::Value;

use crate::config::ChatFormatSettings;
use crate::error::{Result, SchemaConflict};
use crate::formats::{FormatDescriptor, FormatFlags};
use crate::protocols::{GenerationRequest, ToolChoice};
use crate::schema;

/// Default shape of the tool-call region.
const DEFAULT_ROOT_RULE_TEMPLATE: &str = "{prefix} {tool_calls} {suffix}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltGrammar {
    pub text: String,
    /// Inert until a trigger is observed in the output.
    pub lazy: bool,
    /// True for grammars over the tool-call region, false for response-format grammars.
    pub for_tools: bool,
}

/// Build the generation grammar for `request` under `descriptor`.
///
/// Returns `None` when there is nothing to constrain: the family does not parse tools
/// (or tools are disabled for this request) and no `response_format` was supplied.
pub fn build(
    request: &GenerationRequest,
    descriptor: &FormatDescriptor,
) -> Result<Option<BuiltGrammar>> {
    let settings = ChatFormatSettings::global();
    let tools = request.active_tools();

    if descriptor.parses_tools() && !tools.is_empty() {
        let mut grammar = GbnfGrammar::new(settings.grammar_max_whitespace);
        let parallel = request.parallel_tool_calls && descriptor.allows_parallel_tools();
        let instantiated = schema::instantiate(&descriptor.schema, tools, parallel, &mut grammar)?;
        let ws = grammar.ws();

        let tokens = &descriptor.tokens;
        let template = match descriptor.schema.root_rule_template.as_str() {
            "" => DEFAULT_ROOT_RULE_TEMPLATE,
            template => template,
        };
        let prefix = match tokens.tool_prefix.as_deref() {
            Some(prefix) if !descriptor.prefix_opens_payload() => literal(prefix),
            _ => String::new(),
        };
        let suffix = tokens.tool_suffix.as_deref().map(literal).unwrap_or_default();
        let region = template
            .replace("{prefix}", &prefix)
            .replace("{tool_calls}", &instantiated.root_rule)
            .replace("{suffix}", &suffix);
        let region = region.split_whitespace().collect::<Vec<_>>().join(" ");
        let region = grammar.add_rule("tool-call-region", region);

        let repeat_regions =
            parallel && !descriptor.schema.wrap_in_array && tokens.tool_suffix.is_some();
        let mut root = if repeat_regions {
            format!("{region} ( {ws} {region} )*")
        } else {
            region
        };

        if descriptor.has_reasoning()
            && let (Some(start), Some(end)) = (&tokens.thinking_start, &tokens.thinking_end)
        {
            let start = if descriptor.flags.contains(FormatFlags::THINKING_OPEN) {
                format!("( {} )?", literal(start))
            } else {
                literal(start)
            };
            let text = grammar.add_rule("thinking-text", r"[^\x00]*");
            let thinking = grammar.add_rule(
                "thinking",
                format!("{start} {text} {} {ws}", literal(end)),
            );
            root = format!("{thinking}? {root}");
        }
        grammar.set_rule("root", root);

        let lazy = descriptor.flags.contains(FormatFlags::LAZY_GRAMMAR)
            && request.tool_choice != ToolChoice::Required;
        tracing::debug!(
            format = %descriptor.format,
            tools = tools.len(),
            parallel,
            lazy,
            "built tool-call grammar"
        );
        return Ok(Some(BuiltGrammar {
            text: grammar.render(),
            lazy,
            for_tools: true,
        }));
    }

    if let Some(response_format) = &request.response_format {
        let text = response_format_grammar(response_format, settings.grammar_max_whitespace)?;
        tracing::debug!(format = %descriptor.format, "built response-format grammar");
        return Ok(Some(BuiltGrammar {
            text,
            lazy: false,
            for_tools: false,
        }));
    }

    Ok(None)
}

/// Grammar for a response constrained by a JSON schema.
///
/// Accepts a bare JSON schema, an OpenAI `{"type": "json_schema", "json_schema": {"schema":
/// ...}}` object, or `{"type": "json_object"}` for any JSON object.
pub fn response_format_grammar(
    response_format: &Value,
    max_whitespace: usize,
) -> Result<String, SchemaConflict> {
    let any_object = serde_json::json!({"type": "object"});
    let schema = match response_format.get("type").and_then(Value::as_str) {
        Some("json_object") => &any_object,
        Some("json_schema") => response_format
            .get("json_schema")
            .and_then(|s| s.get("schema"))
            .ok_or_else(|| SchemaConflict::InvalidResponseFormat {
                reason: "json_schema.schema is missing".to_string(),
            })?,
        Some("text") => {
            return Err(SchemaConflict::InvalidResponseFormat {
                reason: "text responses are not constrained".to_string(),
            });
        }
        _ => response_format,
    };

    let mut grammar = GbnfGrammar::new(max_whitespace);
    let rule = JsonSchemaConverter::new(&mut grammar, schema)
        .visit(schema, "root")
        .map_err(|reason| SchemaConflict::InvalidResponseFormat { reason })?;
    if rule != "root" {
        grammar.set_rule("root", rule);
    }
    Ok(grammar.render())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{ChatFormat, descriptor_for};
    use crate::protocols::{ChatMessage, ToolSpec};
    use serde_json::json;

    fn request(format: ChatFormat) -> crate::protocols::GenerationRequestBuilder {
        GenerationRequest::builder()
            .format(format)
            .messages(vec![ChatMessage::user("What is the weather in Paris?")])
            .tools(vec![ToolSpec::new(
                "get_weather",
                json!({
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                }),
            )])
    }

    #[test]
    fn test_no_grammar_without_tools_or_response_format() {
        let request = GenerationRequest::builder()
            .format(ChatFormat::Hermes2Pro)
            .build()
            .unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::Hermes2Pro)).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_no_tool_grammar_for_content_only() {
        let request = request(ChatFormat::ContentOnly).build().unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::ContentOnly)).unwrap();
        assert!(built.is_none());
    }

    #[test]
    fn test_tool_choice_none_disables_tool_grammar() {
        let request = request(ChatFormat::MistralNemo)
            .tool_choice(ToolChoice::None)
            .build()
            .unwrap();
        assert!(
            build(&request, &descriptor_for(ChatFormat::MistralNemo))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_mistral_nemo_grammar() {
        let request = request(ChatFormat::MistralNemo)
            .parallel_tool_calls(true)
            .build()
            .unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::MistralNemo))
            .unwrap()
            .unwrap();
        assert!(built.lazy);
        assert!(built.for_tools);
        assert!(built.text.starts_with("root ::= tool-call-region\n"));
        assert!(built.text.contains(r#"tool-call-region ::= "[TOOL_CALLS]" tool-calls"#));
        assert!(built.text.contains(r#"tool-calls ::= "[" ws tool-call ( "," ws tool-call )* "]" ws"#));
    }

    #[test]
    fn test_required_tool_choice_is_eager() {
        let request = request(ChatFormat::MistralNemo)
            .tool_choice(ToolChoice::Required)
            .build()
            .unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::MistralNemo))
            .unwrap()
            .unwrap();
        assert!(!built.lazy);
    }

    #[test]
    fn test_parallel_regions_repeat() {
        let request = request(ChatFormat::Hermes2Pro)
            .parallel_tool_calls(true)
            .build()
            .unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::Hermes2Pro))
            .unwrap()
            .unwrap();
        assert!(built.text.starts_with(
            "root ::= thinking? tool-call-region ( ws tool-call-region )*\n"
        ));
        assert!(built.text.contains(r#"tool-call-region ::= "<tool_call>" tool-calls "</tool_call>""#));
        assert!(built.text.contains(r#"thinking ::= "<think>" thinking-text "</think>" ws"#));
    }

    #[test]
    fn test_parallel_disabled_by_request() {
        let request = request(ChatFormat::Hermes2Pro)
            .parallel_tool_calls(false)
            .build()
            .unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::Hermes2Pro))
            .unwrap()
            .unwrap();
        assert!(built.text.starts_with("root ::= thinking? tool-call-region\n"));
    }

    #[test]
    fn test_open_thinking_start_is_optional() {
        let request = request(ChatFormat::DeepSeekR1).build().unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::DeepSeekR1))
            .unwrap()
            .unwrap();
        assert!(built.text.contains(r#"thinking ::= ( "<think>" )? thinking-text "</think>" ws"#));
    }

    #[test]
    fn test_payload_prefix_is_not_emitted_twice() {
        let request = request(ChatFormat::Llama3x).build().unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::Llama3x))
            .unwrap()
            .unwrap();
        assert!(built.text.contains("tool-call-region ::= tool-calls\n"));
        assert!(built.text.contains(r#""\"name\"" ws ":" ws "\"get_weather\"" ws"#));
    }

    #[test]
    fn test_response_format_grammar() {
        let request = GenerationRequest::builder()
            .format(ChatFormat::ContentOnly)
            .response_format(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "answer",
                    "schema": {
                        "type": "object",
                        "properties": {"answer": {"type": "integer"}},
                        "required": ["answer"]
                    }
                }
            }))
            .build()
            .unwrap();
        let built = build(&request, &descriptor_for(ChatFormat::ContentOnly))
            .unwrap()
            .unwrap();
        assert!(!built.lazy);
        assert!(!built.for_tools);
        assert!(built.text.starts_with(r#"root ::= "{" ws root-answer-kv "}" ws"#));
    }

    #[test]
    fn test_json_object_response_format() {
        let text = response_format_grammar(&json!({"type": "json_object"}), 20).unwrap();
        assert!(text.starts_with("root ::= object\n"));
    }

    #[test]
    fn test_invalid_response_format() {
        let err = response_format_grammar(&json!({"type": "json_schema"}), 20).unwrap_err();
        assert!(matches!(err, SchemaConflict::InvalidResponseFormat { .. }));
    }
}
