// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use chrono::{DateTime, Local};
use either::Either;
use minijinja::{Environment, Error, ErrorKind, Value, context, value::Kwargs};
use serde::{Deserialize, Serialize};

use super::{ChatTemplate, TemplateInputs};
use crate::config::ChatFormatSettings;
use crate::protocols::{ChatMessage, ToolSpec};

const DEFAULT_TEMPLATE: &str = "default";
const TOOL_USE_TEMPLATE: &str = "tool_use";

/// A special token, either a literal or a tokenizer "added token" record.
#[derive(Debug, Clone, Deserialize)]
pub struct SpecialToken(
    #[serde(with = "either::serde_untagged")] pub Either<String, AddedToken>,
);

#[derive(Debug, Clone, Deserialize)]
pub struct AddedToken {
    pub content: String,
}

impl SpecialToken {
    fn content(&self) -> String {
        match &self.0 {
            Either::Left(lit) => lit.clone(),
            Either::Right(added) => added.content.clone(),
        }
    }
}

/// Either a single template, or a list of named templates (`default`, `tool_use`).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTemplateValue(
    #[serde(with = "either::serde_untagged")] pub Either<String, Vec<HashMap<String, String>>>,
);

/// The parts of a HuggingFace `tokenizer_config.json` needed to render prompts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenizerConfig {
    pub bos_token: Option<SpecialToken>,
    pub eos_token: Option<SpecialToken>,
    pub chat_template: Option<ChatTemplateValue>,
}

/// [`ChatTemplate`] backed by a Jinja chat template.
#[derive(Debug)]
pub struct JinjaChatTemplate {
    env: Environment<'static>,
    bos_token: Option<String>,
    eos_token: Option<String>,
}

impl JinjaChatTemplate {
    /// One template used with and without tools.
    pub fn new(source: &str) -> anyhow::Result<Self> {
        let mut env = environment();
        let cleaned = remove_known_non_jinja2_tags(source);
        env.add_template_owned(DEFAULT_TEMPLATE, cleaned.clone())?;
        env.add_template_owned(TOOL_USE_TEMPLATE, cleaned)?;
        Ok(Self::from_env(env))
    }

    /// Separate templates for plain chat and for requests with tools.
    pub fn with_tool_use(default: &str, tool_use: &str) -> anyhow::Result<Self> {
        let mut env = environment();
        env.add_template_owned(DEFAULT_TEMPLATE, remove_known_non_jinja2_tags(default))?;
        env.add_template_owned(TOOL_USE_TEMPLATE, remove_known_non_jinja2_tags(tool_use))?;
        Ok(Self::from_env(env))
    }

    /// Load from the contents of a `tokenizer_config.json`.
    pub fn from_tokenizer_config(json: &str) -> anyhow::Result<Self> {
        let config: TokenizerConfig = serde_json::from_str(json)?;
        let chat_template = config.chat_template.as_ref().ok_or(anyhow::anyhow!(
            "chat_template field is required in the tokenizer_config.json file"
        ))?;

        let template = match &chat_template.0 {
            Either::Left(source) => Self::new(source)?,
            Either::Right(named) => {
                let mut env = environment();
                for templates in named {
                    for (name, source) in templates {
                        env.add_template_owned(name.clone(), remove_known_non_jinja2_tags(source))?;
                    }
                }
                if env.get_template(DEFAULT_TEMPLATE).is_err() {
                    anyhow::bail!(
                        "Chat template does not contain a `default` key. Please ensure it contains at least a `default` key, although `tool_use` should be specified for using tools."
                    );
                }
                Self::from_env(env)
            }
        };
        Ok(template.with_special_tokens(
            config.bos_token.as_ref().map(SpecialToken::content),
            config.eos_token.as_ref().map(SpecialToken::content),
        ))
    }

    pub fn with_special_tokens(mut self, bos: Option<String>, eos: Option<String>) -> Self {
        self.bos_token = bos;
        self.eos_token = eos;
        self
    }

    fn from_env(env: Environment<'static>) -> Self {
        JinjaChatTemplate {
            env,
            bos_token: None,
            eos_token: None,
        }
    }

    fn template_name(&self, has_tools: bool) -> &'static str {
        if has_tools && self.env.get_template(TOOL_USE_TEMPLATE).is_ok() {
            TOOL_USE_TEMPLATE
        } else {
            DEFAULT_TEMPLATE
        }
    }
}

impl ChatTemplate for JinjaChatTemplate {
    fn render(&self, inputs: &TemplateInputs<'_>) -> anyhow::Result<String> {
        let name = self.template_name(!inputs.tools.is_empty());
        let template = self.env.get_template(name)?;

        let tools = (!inputs.tools.is_empty()).then(|| tools_value(inputs.tools));
        let ctx = context! {
            messages => messages_value(inputs.messages)?,
            tools => tools,
            add_generation_prompt => inputs.add_generation_prompt,
            bos_token => self.bos_token.as_deref().unwrap_or_default(),
            eos_token => self.eos_token.as_deref().unwrap_or_default(),
            ..Value::from_serialize(inputs.extra_args)
        };
        tracing::trace!(template = name, "rendering chat template");
        Ok(template.render(ctx)?)
    }
}

fn environment() -> Environment<'static> {
    let settings = ChatFormatSettings::global();
    let mut env = Environment::new();
    env.set_lstrip_blocks(settings.lstrip_blocks);
    env.set_trim_blocks(settings.trim_blocks);

    // templates check `tools|length` even when tools is None
    env.add_filter("length", |value: Value| -> usize {
        use minijinja::value::ValueKind;
        match value.kind() {
            ValueKind::Undefined | ValueKind::None => 0,
            _ => value.len().unwrap_or(0),
        }
    });
    env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
    env.add_filter("tojson", tojson);
    env.add_function("raise_exception", raise_exception);
    env.add_function("strftime_now", strftime_now);
    env
}

/// Messages in the OpenAI shape templates expect, tool-call arguments decoded so
/// templates can iterate over them.
fn messages_value(messages: &[ChatMessage]) -> anyhow::Result<Value> {
    let mut messages = serde_json::to_value(messages)?;
    if let Some(messages) = messages.as_array_mut() {
        for message in messages {
            let Some(calls) = message.get_mut("tool_calls").and_then(|v| v.as_array_mut()) else {
                continue;
            };
            for call in calls {
                if let Some(args) = call.pointer_mut("/function/arguments")
                    && let Some(text) = args.as_str()
                    && let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text)
                {
                    *args = parsed;
                }
            }
        }
    }
    Ok(Value::from_serialize(&messages))
}

/// Tools in the OpenAI `{"type": "function", "function": {...}}` shape. Empty parameter
/// objects get `type` and `properties` so templates can rely on them.
fn tools_value(tools: &[ToolSpec]) -> Value {
    let tools: Vec<serde_json::Value> = tools
        .iter()
        .map(|tool| {
            let mut parameters = tool.parameters.clone();
            if let Some(obj) = parameters.as_object_mut() {
                obj.entry("type")
                    .or_insert_with(|| serde_json::Value::String("object".to_string()));
                obj.entry("properties")
                    .or_insert_with(|| serde_json::Value::Object(Default::default()));
            }
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": parameters,
                }
            })
        })
        .collect();
    Value::from_serialize(&tools)
}

/// Drop tags some templates carry for other engines, e.g. `{% generation %}`, which
/// produce no output.
fn remove_known_non_jinja2_tags(template: &str) -> String {
    template
        .replace("{% generation %}", "")
        .replace("{% endgeneration %}", "")
}

fn raise_exception(msg: String) -> Result<String, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, msg))
}

fn strftime_now(format_str: &str) -> Result<Value, Error> {
    let local: DateTime<Local> = Local::now();
    Ok(Value::from_safe_string(local.format(format_str).to_string()))
}

fn tojson(value: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let serialized = if let Ok(indent) = kwargs.get::<usize>("indent") {
        let mut buf = Vec::new();
        let repeat = b" ".repeat(indent);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(&repeat);
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut serializer).map_err(|err| {
            Error::new(ErrorKind::BadSerialization, "cannot serialize to JSON").with_source(err)
        })?;
        String::from_utf8(buf).map_err(|err| {
            Error::new(ErrorKind::BadSerialization, "cannot serialize to JSON").with_source(err)
        })?
    } else {
        serde_json::to_string(&value).map_err(|err| {
            Error::new(ErrorKind::BadSerialization, "cannot serialize to JSON").with_source(err)
        })?
    };

    // safe for both HTML and JSON
    let mut rv = String::with_capacity(serialized.len());
    for c in serialized.chars() {
        match c {
            '<' => rv.push_str("\\u003c"),
            '>' => rv.push_str("\\u003e"),
            '&' => rv.push_str("\\u0026"),
            '\'' => rv.push_str("\\u0027"),
            _ => rv.push(c),
        }
    }
    Ok(Value::from_safe_string(rv))
}
