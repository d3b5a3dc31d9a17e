// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use dynamo_chat_format::{
    ChatFormat, ChatFormatError, ChatMessage, GenerationRequest, GrammarTrigger,
    GrammarTriggerKind, JinjaChatTemplate, ToolCall, ToolChoice, ToolSpec, lookup, parse,
    render_request,
};
use serde_json::json;

const QWEN_TEMPLATE: &str = r#"{%- if tools %}<|im_start|>system
{% if messages[0].role == 'system' %}{{ messages[0].content }}

{% endif %}# Tools
<tools>
{%- for tool in tools %}
{{ tool | tojson }}
{%- endfor %}
</tools><|im_end|>
{% elif messages[0].role == 'system' %}<|im_start|>system
{{ messages[0].content }}<|im_end|>
{% endif %}
{%- for message in messages %}
{%- if message.role == 'user' or (message.role == 'system' and not loop.first) %}<|im_start|>{{ message.role }}
{{ message.content }}<|im_end|>
{% elif message.role == 'assistant' %}<|im_start|>assistant
{% if message.content %}{{ message.content }}{% endif %}
{%- for call in message.tool_calls %}<tool_call>
{"name": "{{ call.function.name }}", "arguments": {{ call.function.arguments | tojson }}}
</tool_call>{% endfor %}<|im_end|>
{% elif message.role == 'tool' %}<|im_start|>user
<tool_response>
{{ message.content }}
</tool_response><|im_end|>
{% endif %}
{%- endfor %}
{%- if add_generation_prompt %}<|im_start|>assistant
{% if enable_thinking is defined and not enable_thinking %}<think>

</think>

{% endif %}{% endif %}"#;

fn weather_tool() -> ToolSpec {
    ToolSpec::new(
        "get_weather",
        json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        }),
    )
    .with_description("Current weather for a city")
}

fn request(format: ChatFormat) -> GenerationRequest {
    GenerationRequest::builder()
        .format(format)
        .messages(vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::user("Weather in Paris?"),
        ])
        .tools(vec![weather_tool()])
        .parallel_tool_calls(true)
        .build()
        .unwrap()
}

#[test]
fn test_qwen3_prompt_grammar_and_parse() {
    let template = JinjaChatTemplate::new(QWEN_TEMPLATE).unwrap();
    let params = render_request(&template, &request(ChatFormat::Qwen3)).unwrap();

    assert!(params.prompt.starts_with("<|im_start|>system\nYou are helpful.\n\n# Tools"));
    assert!(params.prompt.contains("\"name\":\"get_weather\""));
    assert!(params.prompt.ends_with("<|im_start|>assistant\n"));

    let grammar = params.grammar.as_deref().unwrap();
    assert!(grammar.contains("root ::="));
    assert!(grammar.contains("<tool_call>"));
    assert!(params.grammar_lazy);
    assert_eq!(params.grammar_triggers.len(), 1);
    assert_eq!(params.grammar_triggers[0].kind, GrammarTriggerKind::PatternFull);
    assert!(params.preserved_tokens.contains(&"<tool_call>".to_string()));

    let output = "<think>Need the weather tool.</think>\n<tool_call>\n{\"name\": \"get_weather\", \"arguments\": {\"location\": \"Paris\"}}\n</tool_call>";
    let parsed = parse(output, lookup(ChatFormat::Qwen3).unwrap());
    assert!(parsed.is_complete());
    assert_eq!(parsed.reasoning.as_deref(), Some("Need the weather tool."));
    assert_eq!(parsed.tool_calls[0].name(), "get_weather");
    assert_eq!(
        parsed.tool_calls[0].arguments_value(),
        json!({"location": "Paris"})
    );
}

#[test]
fn test_history_with_tool_round_renders() {
    let template = JinjaChatTemplate::new(QWEN_TEMPLATE).unwrap();
    let mut request = request(ChatFormat::Qwen3);
    request.messages.push(ChatMessage::assistant_tool_calls(vec![ToolCall::new(
        "call-1",
        "get_weather",
        r#"{"location":"Paris"}"#,
    )]));
    request
        .messages
        .push(ChatMessage::tool("call-1", "{\"temperature\": 21}"));

    let params = render_request(&template, &request).unwrap();
    assert!(params.prompt.contains(
        "<tool_call>\n{\"name\": \"get_weather\", \"arguments\": {\"location\":\"Paris\"}}\n</tool_call>"
    ));
    assert!(params.prompt.contains("<tool_response>\n{\"temperature\": 21}\n</tool_response>"));
}

#[test]
fn test_hermes_uses_word_trigger() {
    let template = JinjaChatTemplate::new(QWEN_TEMPLATE).unwrap();
    let params = render_request(&template, &request(ChatFormat::Hermes2Pro)).unwrap();
    assert!(params.grammar_lazy);
    assert_eq!(params.grammar_triggers, vec![GrammarTrigger::word("<tool_call>")]);
}

#[test]
fn test_required_tool_choice_is_eager() {
    let template = JinjaChatTemplate::new(QWEN_TEMPLATE).unwrap();
    let mut request = request(ChatFormat::Qwen3);
    request.tool_choice = ToolChoice::Required;
    let params = render_request(&template, &request).unwrap();
    assert!(params.grammar.is_some());
    assert!(!params.grammar_lazy);
    assert!(params.grammar_triggers.is_empty());
}

#[test]
fn test_template_variables_reach_the_prompt() {
    let template = JinjaChatTemplate::new(QWEN_TEMPLATE).unwrap();
    let mut request = request(ChatFormat::Qwen3);
    request
        .template_args
        .insert("enable_thinking".to_string(), json!(false));
    let params = render_request(&template, &request).unwrap();
    assert!(params.prompt.ends_with("<|im_start|>assistant\n<think>\n\n</think>\n\n"));
}

#[test]
fn test_template_failure_names_the_format() {
    let template =
        JinjaChatTemplate::new("{{ raise_exception('tools are not supported') }}").unwrap();
    let err = render_request(&template, &request(ChatFormat::Granite)).unwrap_err();
    match err {
        ChatFormatError::TemplateRender { format, message } => {
            assert_eq!(format, ChatFormat::Granite);
            assert!(message.contains("tools are not supported"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
