// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Generic output parser.
//!
//! [`parse`] splits raw model output into reasoning, tool calls and content using only
//! the delimiters and flags of a [`FormatDescriptor`]. Each region is either resolved,
//! legitimately absent, or truncated by the end of generation; only a tool-call region
//! that cannot be decoded or validated is an error, and that error never discards the
//! reasoning, content or earlier calls already recovered.

use serde::Serialize;
use serde_json::Value;

use crate::error::MalformedToolCall;
use crate::formats::{FormatDescriptor, FormatFlags};
use crate::protocols::{ChatMessage, Role, ToolCall};
use crate::schema::PropertyValidator;

/// Terminal state of one parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    /// Every region that was opened was also closed.
    #[default]
    Complete,
    /// Output stopped inside a region. Not an error: generation may be continued.
    Partial,
    /// A tool-call region was present but unusable.
    Malformed(MalformedToolCall),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedMessage {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    /// Calls in document order.
    pub tool_calls: Vec<ToolCall>,
    pub status: ParseStatus,
}

impl ParsedMessage {
    pub fn is_complete(&self) -> bool {
        self.status == ParseStatus::Complete
    }

    pub fn is_partial(&self) -> bool {
        self.status == ParseStatus::Partial
    }

    pub fn malformed(&self) -> Option<&MalformedToolCall> {
        match &self.status {
            ParseStatus::Malformed(err) => Some(err),
            _ => None,
        }
    }

    /// The assistant turn this output represents, ready to be appended to history.
    pub fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: self.content,
            reasoning_content: self.reasoning,
            tool_calls: self.tool_calls,
            ..Default::default()
        }
    }

    fn mark_partial(&mut self) {
        if self.status == ParseStatus::Complete {
            self.status = ParseStatus::Partial;
        }
    }
}

/// Parse raw model output produced under `descriptor`.
pub fn parse(raw: &str, descriptor: &FormatDescriptor) -> ParsedMessage {
    let mut parsed = ParsedMessage::default();

    let Some(rest) = extract_reasoning(raw, descriptor, &mut parsed) else {
        return parsed;
    };

    let remainder = if descriptor.parses_tools() {
        extract_tool_calls(&rest, descriptor, &mut parsed)
    } else {
        rest
    };

    parsed.content = extract_content(&remainder, descriptor, &mut parsed);
    tracing::trace!(
        format = %descriptor.format,
        tool_calls = parsed.tool_calls.len(),
        status = ?parsed.status,
        "parsed model output"
    );
    parsed
}

/// Split off the reasoning region. Returns the text that follows it, or `None` when
/// the output ended inside the region.
///
/// Extraction is keyed on the declared thinking delimiters alone. A family may emit a
/// reasoning region without [`FormatFlags::HAS_REASONING`], which only governs whether
/// the grammar allows one.
fn extract_reasoning(
    raw: &str,
    descriptor: &FormatDescriptor,
    parsed: &mut ParsedMessage,
) -> Option<String> {
    let tokens = &descriptor.tokens;
    let (Some(start), Some(end)) = (&tokens.thinking_start, &tokens.thinking_end) else {
        return Some(raw.to_string());
    };

    let start_at = raw.find(start.as_str());
    let end_at = raw.find(end.as_str());

    match (start_at, end_at) {
        // the prompt opened the region, so output begins inside it
        (None, Some(end_at)) if descriptor.flags.contains(FormatFlags::THINKING_OPEN) => {
            parsed.reasoning = non_empty(&raw[..end_at]);
            Some(raw[end_at + end.len()..].to_string())
        }
        (Some(start_at), _) => {
            let before = &raw[..start_at];
            let inner_start = start_at + start.len();
            match raw[inner_start..].find(end.as_str()) {
                Some(len) => {
                    parsed.reasoning = non_empty(&raw[inner_start..inner_start + len]);
                    let after = &raw[inner_start + len + end.len()..];
                    Some(format!("{before}{after}"))
                }
                None => {
                    parsed.reasoning = non_empty(&raw[inner_start..]);
                    parsed.mark_partial();
                    None
                }
            }
        }
        _ => Some(raw.to_string()),
    }
}

/// Pull every tool-call region out of `text`, returning the text outside them.
fn extract_tool_calls(
    text: &str,
    descriptor: &FormatDescriptor,
    parsed: &mut ParsedMessage,
) -> String {
    let Some(prefix) = descriptor.tokens.tool_prefix.as_deref() else {
        return text.to_string();
    };
    let suffix = descriptor.tokens.tool_suffix.as_deref();
    let validator = match PropertyValidator::new(&descriptor.schema) {
        Ok(validator) => validator,
        Err(err) => {
            parsed.status =
                ParseStatus::Malformed(MalformedToolCall::new(text, err.to_string()));
            return text.to_string();
        }
    };

    let mut outside = String::new();
    let mut cursor = 0;
    let mut calls = Vec::new();

    while let Some(found) = text[cursor..].find(prefix) {
        let prefix_at = cursor + found;
        outside.push_str(&text[cursor..prefix_at]);
        let region_start = if descriptor.prefix_opens_payload() {
            prefix_at
        } else {
            prefix_at + prefix.len()
        };

        let region = match next_region(text, region_start, suffix) {
            Region::Closed { value, span, end } => {
                cursor = end;
                value.map(|v| (v, span))
            }
            Region::Truncated => {
                parsed.mark_partial();
                cursor = text.len();
                break;
            }
        };

        let extracted = region.and_then(|(value, span)| {
            let objects = call_objects(value, descriptor, span)?;
            objects
                .iter()
                .map(|object| validator.validate(object, span))
                .collect::<Result<Vec<_>, _>>()
        });

        match extracted {
            Ok(mut region_calls) => calls.append(&mut region_calls),
            Err(err) => {
                tracing::warn!(
                    format = %descriptor.format,
                    reason = %err.reason,
                    property = ?err.property,
                    "malformed tool call"
                );
                parsed.status = ParseStatus::Malformed(err);
                // earlier calls survive only while they respect the one-call limit
                if calls.len() <= 1 || descriptor.allows_parallel_tools() {
                    parsed.tool_calls = calls;
                }
                return outside;
            }
        }
    }
    outside.push_str(&text[cursor..]);

    if calls.len() > 1 && !descriptor.allows_parallel_tools() {
        let err = MalformedToolCall::new(
            text,
            format!(
                "{} tool calls emitted but {} allows one call per turn",
                calls.len(),
                descriptor.format
            ),
        );
        tracing::warn!(
            format = %descriptor.format,
            calls = calls.len(),
            "parallel tool calls rejected"
        );
        parsed.status = ParseStatus::Malformed(err);
        return outside;
    }

    parsed.tool_calls = calls;
    outside
}

enum Region<'a> {
    /// The region ended; `value` is the decoded payload and `end` the offset just past it.
    Closed {
        value: Result<Value, MalformedToolCall>,
        span: &'a str,
        end: usize,
    },
    /// Output stopped before the payload was complete.
    Truncated,
}

fn next_region<'a>(text: &'a str, start: usize, suffix: Option<&str>) -> Region<'a> {
    // decode first: a suffix inside a JSON string must not end the region
    let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => {
            let end = start + stream.byte_offset();
            let span = &text[start..end];
            let Some(suffix) = suffix else {
                return Region::Closed {
                    value: Ok(value),
                    span,
                    end,
                };
            };
            if let Some(after) = text[end..].trim_start().strip_prefix(suffix) {
                return Region::Closed {
                    value: Ok(value),
                    span,
                    end: text.len() - after.len(),
                };
            }
            match text[end..].find(suffix) {
                Some(len) => Region::Closed {
                    value: Err(MalformedToolCall::new(
                        &text[start..end + len],
                        "unexpected text before tool-call suffix",
                    )),
                    span: &text[start..end + len],
                    end: end + len + suffix.len(),
                },
                None => Region::Closed {
                    value: Ok(value),
                    span,
                    end,
                },
            }
        }
        Some(Err(e)) if e.is_eof() => Region::Truncated,
        Some(Err(e)) => {
            let closing = suffix.and_then(|s| text[start..].find(s).map(|len| (len, s.len())));
            let (span_end, end) = match closing {
                Some((len, suffix_len)) => (start + len, start + len + suffix_len),
                None => (text.len(), text.len()),
            };
            let span = &text[start..span_end];
            Region::Closed {
                value: Err(MalformedToolCall::new(span, e.to_string())),
                span,
                end,
            }
        }
        None => Region::Truncated,
    }
}

/// The call objects contained in one decoded region.
fn call_objects(
    value: Value,
    descriptor: &FormatDescriptor,
    span: &str,
) -> Result<Vec<Value>, MalformedToolCall> {
    match value {
        Value::Array(items) if descriptor.schema.wrap_in_array => {
            if items.is_empty() {
                Err(MalformedToolCall::new(span, "empty tool call array"))
            } else {
                Ok(items)
            }
        }
        Value::Array(_) => Err(MalformedToolCall::new(
            span,
            "expected a single tool call object, found an array",
        )),
        value => Ok(vec![value]),
    }
}

fn extract_content(
    text: &str,
    descriptor: &FormatDescriptor,
    parsed: &mut ParsedMessage,
) -> Option<String> {
    let tokens = &descriptor.tokens;
    if let (Some(start), Some(end)) = (&tokens.response_start, &tokens.response_end)
        && let Some(start_at) = text.find(start.as_str())
    {
        let inner = &text[start_at + start.len()..];
        return match inner.find(end.as_str()) {
            Some(len) => non_empty(&inner[..len]),
            None => {
                parsed.mark_partial();
                non_empty(inner)
            }
        };
    }

    let mut content = text.to_string();
    let strip_tool_tokens = !descriptor.prefix_opens_payload();
    let delimiters = tokens
        .delimiters()
        .filter(|d| {
            strip_tool_tokens
                || (Some(*d) != tokens.tool_prefix.as_deref()
                    && Some(*d) != tokens.tool_suffix.as_deref())
        })
        .chain(descriptor.preserved_tokens.iter().map(String::as_str));
    for delimiter in delimiters {
        if !delimiter.is_empty() {
            content = content.replace(delimiter, "");
        }
    }
    non_empty(&content)
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{ChatFormat, descriptor_for};
    use rstest::rstest;
    use serde_json::json;

    fn args(call: &ToolCall) -> Value {
        call.arguments_value()
    }

    #[test]
    fn test_wrapped_array_tool_call() {
        let descriptor = descriptor_for(ChatFormat::Generic);
        let parsed = parse(
            r#"[TOOL_CALLS][{"name":"lookup","arguments":{"q":"x"}}]"#,
            &descriptor,
        );
        assert!(parsed.is_complete());
        assert_eq!(parsed.content, None);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name(), "lookup");
        assert_eq!(args(&parsed.tool_calls[0]), json!({"q": "x"}));
        assert!(parsed.tool_calls[0].id.starts_with("call-"));
    }

    #[test]
    fn test_reasoning_then_content() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse("<think>reasoning</think>final answer", &descriptor);
        assert!(parsed.is_complete());
        assert_eq!(parsed.reasoning.as_deref(), Some("reasoning"));
        assert_eq!(parsed.content.as_deref(), Some("final answer"));
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_truncated_reasoning_is_partial() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse("<think>reasoning", &descriptor);
        assert!(parsed.is_partial());
        assert_eq!(parsed.reasoning.as_deref(), Some("reasoning"));
        assert_eq!(parsed.content, None);
    }

    #[test]
    fn test_open_reasoning_without_start_tag() {
        let descriptor = descriptor_for(ChatFormat::DeepSeekR1);
        let parsed = parse("the prompt opened this</think>\n\nHello!", &descriptor);
        assert!(parsed.is_complete());
        assert_eq!(parsed.reasoning.as_deref(), Some("the prompt opened this"));
        assert_eq!(parsed.content.as_deref(), Some("Hello!"));

        let parsed = parse("Hello!", &descriptor);
        assert_eq!(parsed.reasoning, None);
        assert_eq!(parsed.content.as_deref(), Some("Hello!"));
    }

    #[test]
    fn test_hermes_multiple_regions_keep_order() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let raw = concat!(
            "Let me check.\n",
            "<tool_call>\n{\"name\": \"a\", \"arguments\": {\"x\": 1}}\n</tool_call>\n",
            "<tool_call>{\"name\": \"b\", \"arguments\": {}}</tool_call>"
        );
        let parsed = parse(raw, &descriptor);
        assert!(parsed.is_complete());
        let names: Vec<&str> = parsed.tool_calls.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(parsed.content.as_deref(), Some("Let me check."));
    }

    #[test]
    fn test_missing_suffix_with_complete_json() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse(r#"<tool_call>{"name": "a", "arguments": {}}"#, &descriptor);
        assert!(parsed.is_complete());
        assert_eq!(parsed.tool_calls.len(), 1);
    }

    #[test]
    fn test_truncated_tool_call_is_partial() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse(r#"Sure. <tool_call>{"name": "a", "argu"#, &descriptor);
        assert!(parsed.is_partial());
        assert!(parsed.tool_calls.is_empty());
        assert_eq!(parsed.content.as_deref(), Some("Sure."));
    }

    #[test]
    fn test_prefix_without_suffix_reads_one_value() {
        let descriptor = descriptor_for(ChatFormat::Llama3x);
        let parsed = parse(
            r#"{"name": "get_weather", "parameters": {"location": "Paris"}}"#,
            &descriptor,
        );
        assert!(parsed.is_complete());
        assert_eq!(parsed.tool_calls[0].name(), "get_weather");
        assert_eq!(args(&parsed.tool_calls[0]), json!({"location": "Paris"}));
        assert_eq!(parsed.content, None);
    }

    #[test]
    fn test_suffix_inside_string_argument() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse(
            r#"<tool_call>{"name": "echo", "arguments": {"text": "</tool_call>"}}</tool_call>"#,
            &descriptor,
        );
        assert!(parsed.is_complete());
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(args(&parsed.tool_calls[0]), json!({"text": "</tool_call>"}));
        assert_eq!(parsed.content, None);
    }

    #[test]
    fn test_text_between_payload_and_suffix_is_malformed() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse(
            r#"<tool_call>{"name": "a", "arguments": {}} extra</tool_call>after"#,
            &descriptor,
        );
        let err = parsed.malformed().expect("malformed");
        assert_eq!(err.span, r#"{"name": "a", "arguments": {}} extra"#);
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_reasoning_without_reasoning_flag() {
        let descriptor = descriptor_for(ChatFormat::Llama3x);
        assert!(!descriptor.has_reasoning());
        let parsed = parse(
            r#"<think>plan</think>{"name": "f", "parameters": {}}"#,
            &descriptor,
        );
        assert!(parsed.is_complete());
        assert_eq!(parsed.reasoning.as_deref(), Some("plan"));
        assert_eq!(parsed.content, None);
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name(), "f");
    }

    #[test]
    fn test_invalid_json_is_malformed_and_keeps_reasoning() {
        let descriptor = descriptor_for(ChatFormat::Qwen3);
        let parsed = parse(
            "<think>plan</think>Calling.<tool_call>{\"name\": nope}</tool_call>",
            &descriptor,
        );
        let err = parsed.malformed().expect("malformed");
        assert_eq!(err.span, "{\"name\": nope}");
        assert_eq!(parsed.reasoning.as_deref(), Some("plan"));
        assert_eq!(parsed.content.as_deref(), Some("Calling."));
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_malformed_call_keeps_earlier_calls() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let raw = concat!(
            "<tool_call>{\"name\": \"a\", \"arguments\": {}}</tool_call>",
            "<tool_call>{\"arguments\": {}}</tool_call>"
        );
        let parsed = parse(raw, &descriptor);
        let err = parsed.malformed().expect("malformed");
        assert_eq!(err.property.as_deref(), Some("name"));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name(), "a");
    }

    #[rstest]
    #[case("abcdefghi", true)]
    #[case("abcdefgh", false)]
    #[case("abcdefghij", false)]
    #[case("abcd-fghi", false)]
    fn test_mistral_id_pattern(#[case] id: &str, #[case] accepted: bool) {
        let descriptor = descriptor_for(ChatFormat::MistralNemo);
        let raw = format!(
            r#"[TOOL_CALLS][{{"name": "lookup", "arguments": {{}}, "id": "{id}"}}]"#
        );
        let parsed = parse(&raw, &descriptor);
        if accepted {
            assert!(parsed.is_complete());
            assert_eq!(parsed.tool_calls[0].id, id);
        } else {
            let err = parsed.malformed().expect("malformed");
            assert_eq!(err.property.as_deref(), Some("id"));
            assert!(parsed.tool_calls.is_empty());
        }
    }

    #[test]
    fn test_parallel_calls_rejected_without_capability() {
        let descriptor = descriptor_for(ChatFormat::Llama3x);
        assert!(!descriptor.allows_parallel_tools());
        let parsed = parse(
            r#"{"name": "a", "parameters": {}}; {"name": "b", "parameters": {}}"#,
            &descriptor,
        );
        assert!(parsed.malformed().is_some());
        assert!(parsed.tool_calls.is_empty());

        let parsed = parse(r#"{"name": "a", "parameters": {}}"#, &descriptor);
        assert!(parsed.is_complete());
        assert_eq!(parsed.tool_calls.len(), 1);
    }

    #[test]
    fn test_malformed_call_after_parallel_calls_keeps_none() {
        let descriptor = descriptor_for(ChatFormat::Llama3x);
        let raw = concat!(
            r#"{"name":"a","parameters":{}} "#,
            r#"{"name":"b","parameters":{}} "#,
            r#"{"name":1,"parameters":{}}"#
        );
        let parsed = parse(raw, &descriptor);
        let err = parsed.malformed().expect("malformed");
        assert_eq!(err.property.as_deref(), Some("name"));
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn test_array_rejected_without_wrapping() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let parsed = parse(
            r#"<tool_call>[{"name": "a", "arguments": {}}]</tool_call>"#,
            &descriptor,
        );
        assert!(parsed.malformed().is_some());
    }

    #[test]
    fn test_single_object_accepted_when_wrapping() {
        let descriptor = descriptor_for(ChatFormat::Generic);
        let parsed = parse(
            r#"[TOOL_CALLS]{"name": "a", "arguments": "{\"k\": 2}"}"#,
            &descriptor,
        );
        assert!(parsed.is_complete());
        assert_eq!(args(&parsed.tool_calls[0]), json!({"k": 2}));
    }

    #[test]
    fn test_response_region_is_content() {
        let descriptor = descriptor_for(ChatFormat::CommandR7B);
        let parsed = parse(
            "<|START_THINKING|>think<|END_THINKING|><|START_RESPONSE|>Hi there<|END_RESPONSE|>",
            &descriptor,
        );
        assert!(parsed.is_complete());
        assert_eq!(parsed.reasoning.as_deref(), Some("think"));
        assert_eq!(parsed.content.as_deref(), Some("Hi there"));

        let parsed = parse("<|START_RESPONSE|>Hi th", &descriptor);
        assert!(parsed.is_partial());
        assert_eq!(parsed.content.as_deref(), Some("Hi th"));
    }

    #[test]
    fn test_no_tool_calls_without_capability() {
        let descriptor = descriptor_for(ChatFormat::ContentOnly);
        let parsed = parse(
            r#"<tool_call>{"name": "a", "arguments": {}}</tool_call>"#,
            &descriptor,
        );
        assert!(parsed.tool_calls.is_empty());
        assert!(parsed.content.is_some());
    }

    #[test]
    fn test_into_chat_message() {
        let descriptor = descriptor_for(ChatFormat::Hermes2Pro);
        let message = parse(
            "<think>why</think><tool_call>{\"name\": \"a\", \"arguments\": {}}</tool_call>",
            &descriptor,
        )
        .into_chat_message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.reasoning_content.as_deref(), Some("why"));
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.content, None);
    }
}
