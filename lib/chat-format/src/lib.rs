// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! # Dynamo Chat Format
//!
//! A configuration-driven engine translating between structured chat messages and the
//! token-delimited text each model family consumes and produces.
//!
//! Every family is described by one [`FormatDescriptor`] in a process-wide registry. Two
//! generic algorithms are parameterized by it:
//!
//! - [`prompt::init`] renders the prompt and builds the generation grammar, its lazy
//!   triggers, and the tokens that must survive tokenization.
//! - [`parser::parse`] splits raw model output back into reasoning, content and tool calls.
//!
//! ```rust
//! use dynamo_chat_format::{ChatFormat, lookup, parse};
//!
//! let descriptor = lookup(ChatFormat::Hermes2Pro).unwrap();
//! let parsed = parse(
//!     "<think>the user wants the time</think><tool_call>{\"name\": \"now\", \"arguments\": {}}</tool_call>",
//!     descriptor,
//! );
//! assert_eq!(parsed.reasoning.as_deref(), Some("the user wants the time"));
//! assert_eq!(parsed.tool_calls[0].name(), "now");
//! ```

pub mod config;
pub mod error;
pub mod formats;
pub mod grammar;
pub mod logging;
pub mod parser;
pub mod prompt;
pub mod protocols;
pub mod registry;
pub mod schema;

pub use config::ChatFormatSettings;
pub use error::{ChatFormatError, MalformedToolCall, Result, SchemaConflict};
pub use formats::{
    ChatFormat, FormatDescriptor, FormatFlags, MessagePreprocessor, SchemaTemplate, TokenPatterns,
    descriptor_for,
};
pub use grammar::BuiltGrammar;
pub use parser::{ParseStatus, ParsedMessage, parse};
pub use prompt::{
    ChatTemplate, GenerationParams, GrammarTrigger, GrammarTriggerKind, JinjaChatTemplate,
    TemplateInputs, init, render_request,
};
pub use protocols::{
    ChatMessage, GenerationRequest, GenerationRequestBuilder, Role, ToolCall, ToolChoice, ToolSpec,
};
pub use registry::{FormatRegistry, available_formats, get_format_registry, lookup, lookup_by_name};
