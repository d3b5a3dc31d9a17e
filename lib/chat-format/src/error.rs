// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use crate::formats::ChatFormat;

pub type Result<T, E = ChatFormatError> = std::result::Result<T, E>;

/// Longest span kept verbatim in a [`MalformedToolCall`] diagnostic.
const MAX_SPAN_CHARS: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ChatFormatError {
    #[error("Unknown chat format '{name}'. Available formats: {}", .available.join(", "))]
    UnknownFormat {
        name: String,
        available: Vec<&'static str>,
    },

    #[error(transparent)]
    SchemaConflict(#[from] SchemaConflict),

    #[error("Failed to render {format} prompt: {message}")]
    TemplateRender { format: ChatFormat, message: String },

    #[error(transparent)]
    MalformedToolCall(#[from] MalformedToolCall),
}

/// Request or registration input that cannot be turned into a consistent grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaConflict {
    #[error("Tool '{name}' is declared more than once")]
    DuplicateTool { name: String },

    #[error("Invalid pattern for property '{property}' ({pattern}): {reason}")]
    InvalidPattern {
        property: String,
        pattern: String,
        reason: String,
    },

    #[error("A different descriptor is already registered for format {format}")]
    ConflictingDescriptor { format: ChatFormat },

    #[error("Unsupported response_format: {reason}")]
    InvalidResponseFormat { reason: String },
}

/// A tool-call region that could not be decoded or failed validation.
///
/// Carries the raw span so callers can show exactly what the model emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("Malformed tool call{}: {reason}", .property.as_ref().map(|p| format!(" (property '{p}')")).unwrap_or_default())]
pub struct MalformedToolCall {
    pub span: String,
    pub property: Option<String>,
    pub reason: String,
}

impl MalformedToolCall {
    pub fn new(span: &str, reason: impl Into<String>) -> Self {
        MalformedToolCall {
            span: truncate_span(span),
            property: None,
            reason: reason.into(),
        }
    }

    pub fn with_property(mut self, property: impl Into<String>) -> Self {
        self.property = Some(property.into());
        self
    }
}

fn truncate_span(span: &str) -> String {
    match span.char_indices().nth(MAX_SPAN_CHARS) {
        Some((idx, _)) => format!("{}...", &span[..idx]),
        None => span.to_string(),
    }
}
