// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use serde_json::{Value, json};

use crate::formats::{FormatDescriptor, MessagePreprocessor};
use crate::protocols::{ChatMessage, GenerationRequest, Role, ToolCall, ToolSpec};

/// Llama 3.x tools served by the runtime rather than described by a schema.
const LLAMA3_BUILTIN_TOOLS: &[&str] = &["brave_search", "wolfram_alpha"];

/// Id used in the call example shown to the model.
const EXAMPLE_CALL_ID: &str = "123456789";

/// Messages as the descriptor's template expects them.
pub fn preprocess_messages(
    request: &GenerationRequest,
    descriptor: &FormatDescriptor,
) -> Vec<ChatMessage> {
    let mut messages = request.messages.clone();
    let Some(preprocessor) = descriptor.preprocessor else {
        return messages;
    };
    let tools = request.active_tools();

    match preprocessor {
        MessagePreprocessor::ToolSystemPrompt => {
            if !tools.is_empty() {
                splice_system_prompt(&mut messages, &tool_system_prompt(request, descriptor));
            }
        }
        MessagePreprocessor::ToolResponsesAsUser => {
            messages = messages
                .into_iter()
                .map(|m| replay_as_plain_turn(m, descriptor))
                .collect();
            if !tools.is_empty() {
                splice_system_prompt(&mut messages, &tool_system_prompt(request, descriptor));
            }
        }
        MessagePreprocessor::Llama3BuiltinTools => {
            if !tools.is_empty() {
                let mut header = String::from("Environment: ipython");
                let builtin = builtin_tool_names(tools);
                if !builtin.is_empty() {
                    header.push_str("\nTools: ");
                    header.push_str(&builtin.join(", "));
                }
                header.push_str("\n\n");
                header.push_str(&tool_system_prompt(request, descriptor));
                splice_system_prompt(&mut messages, &header);
            }
        }
    }
    tracing::trace!(
        format = %descriptor.format,
        ?preprocessor,
        messages = messages.len(),
        "preprocessed messages"
    );
    messages
}

fn builtin_tool_names(tools: &[ToolSpec]) -> Vec<&str> {
    LLAMA3_BUILTIN_TOOLS
        .iter()
        .copied()
        .filter(|name| tools.iter().any(|t| t.name == *name))
        .collect()
}

/// Instruction listing the tools and showing this family's call syntax.
fn tool_system_prompt(request: &GenerationRequest, descriptor: &FormatDescriptor) -> String {
    let tools: Vec<Value> = request
        .active_tools()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        })
        .collect();
    let tools = serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string());

    let example = descriptor.render_tool_calls(&[ToolCall::new(
        EXAMPLE_CALL_ID,
        "tool_name",
        r#"{"argument": "value"}"#,
    )]);

    let mut prompt = format!(
        "You have access to the following tools:\n{tools}\n\n\
         To call a tool, respond with exactly:\n{example}"
    );
    if request.parallel_tool_calls && descriptor.allows_parallel_tools() {
        if descriptor.schema.wrap_in_array {
            prompt.push_str("\nSeveral calls may be listed in the same array.");
        } else {
            prompt.push_str("\nRepeat the block once per call to make several calls.");
        }
    }
    prompt
}

fn splice_system_prompt(messages: &mut Vec<ChatMessage>, text: &str) {
    match messages.first_mut() {
        Some(first) if first.role == Role::System => {
            let content = first.content.get_or_insert_with(String::new);
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(text);
        }
        _ => messages.insert(0, ChatMessage::system(text)),
    }
}

/// Rewrite tool traffic into turns a template without tool roles can render.
fn replay_as_plain_turn(message: ChatMessage, descriptor: &FormatDescriptor) -> ChatMessage {
    match message.role {
        Role::Tool => {
            let response = json!({
                "tool_response": {
                    "tool": message.name,
                    "tool_call_id": message.tool_call_id,
                    "content": message.content,
                }
            });
            ChatMessage::user(response.to_string())
        }
        Role::Assistant if !message.tool_calls.is_empty() => {
            let calls = descriptor.render_tool_calls(&message.tool_calls);
            let content = match message.content.as_deref() {
                Some(text) if !text.is_empty() => format!("{text}\n{calls}"),
                _ => calls,
            };
            ChatMessage {
                content: Some(content),
                tool_calls: Vec::new(),
                ..message
            }
        }
        _ => message,
    }
}
