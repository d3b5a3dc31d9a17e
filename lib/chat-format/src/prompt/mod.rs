// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prompt initialization.
//!
//! [`init`] turns a [`GenerationRequest`] into everything a grammar-constrained decoder
//! needs: the rendered prompt, the grammar, the triggers that activate a lazy grammar,
//! and the tokens the tokenizer must keep whole.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChatFormatError, Result};
use crate::formats::{ChatFormat, FormatDescriptor};
use crate::grammar;
use crate::protocols::{ChatMessage, GenerationRequest, ToolChoice, ToolSpec};
use crate::registry;
use crate::schema;

mod preprocess;
mod template;

pub use preprocess::preprocess_messages;
pub use template::{JinjaChatTemplate, TokenizerConfig};

/// Renders messages into prompt text.
///
/// This is the seam to whatever owns the model's chat template. Implementations must be
/// pure: the same inputs always produce the same prompt.
pub trait ChatTemplate: Send + Sync {
    fn render(&self, inputs: &TemplateInputs<'_>) -> anyhow::Result<String>;
}

/// Values handed to a [`ChatTemplate`].
#[derive(Debug, Clone, Copy)]
pub struct TemplateInputs<'a> {
    pub messages: &'a [ChatMessage],
    pub tools: &'a [ToolSpec],
    pub add_generation_prompt: bool,
    pub extra_args: &'a HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrammarTriggerKind {
    /// A literal word in the output.
    Word,
    /// A regex matching somewhere in the output.
    Pattern,
    /// A regex that must match the whole output; its first capture marks where the
    /// grammar starts applying.
    PatternFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrammarTrigger {
    #[serde(rename = "type")]
    pub kind: GrammarTriggerKind,
    pub value: String,
}

impl GrammarTrigger {
    pub fn word(value: impl Into<String>) -> Self {
        GrammarTrigger {
            kind: GrammarTriggerKind::Word,
            value: value.into(),
        }
    }

    pub fn pattern_full(value: impl Into<String>) -> Self {
        GrammarTrigger {
            kind: GrammarTriggerKind::PatternFull,
            value: value.into(),
        }
    }
}

/// Output of [`init`], consumed by the decoding engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationParams {
    pub format: ChatFormat,
    pub prompt: String,
    pub grammar: Option<String>,
    /// The grammar is inert until one of `grammar_triggers` is observed.
    pub grammar_lazy: bool,
    pub grammar_triggers: Vec<GrammarTrigger>,
    pub preserved_tokens: Vec<String>,
}

/// Render `request` with `template` under `descriptor`.
pub fn init(
    template: &dyn ChatTemplate,
    request: &GenerationRequest,
    descriptor: &FormatDescriptor,
) -> Result<GenerationParams> {
    schema::ensure_unique_names(&request.tools)?;
    let messages = preprocess_messages(request, descriptor);
    let inputs = TemplateInputs {
        messages: &messages,
        tools: request.active_tools(),
        add_generation_prompt: request.add_generation_prompt,
        extra_args: &request.template_args,
    };
    let prompt = template
        .render(&inputs)
        .map_err(|err| ChatFormatError::TemplateRender {
            format: descriptor.format,
            message: format!("{err:#}"),
        })?;
    tracing::trace!(format = %descriptor.format, prompt_len = prompt.len(), "rendered prompt");

    let built = grammar::build(request, descriptor)?;

    let (grammar_lazy, grammar_triggers) = match &built {
        Some(built) if built.for_tools && request.tool_choice != ToolChoice::Required => {
            match (&descriptor.trigger_pattern, &descriptor.tokens.tool_prefix) {
                (Some(pattern), _) => (true, vec![GrammarTrigger::pattern_full(pattern)]),
                (None, Some(prefix)) if built.lazy => (true, vec![GrammarTrigger::word(prefix)]),
                _ => (false, Vec::new()),
            }
        }
        _ => (false, Vec::new()),
    };

    Ok(GenerationParams {
        format: descriptor.format,
        prompt,
        grammar: built.map(|b| b.text),
        grammar_lazy,
        grammar_triggers,
        preserved_tokens: descriptor.preserved_tokens.clone(),
    })
}

/// Resolve the request's format in the process-wide registry and [`init`] it.
pub fn render_request(
    template: &dyn ChatTemplate,
    request: &GenerationRequest,
) -> Result<GenerationParams> {
    let descriptor = registry::lookup(request.format)?;
    tracing::debug!(format = %descriptor.format, name = %descriptor.name, "selected chat format");
    init(template, request, descriptor)
}
