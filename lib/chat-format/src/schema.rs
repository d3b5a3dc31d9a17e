// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tool-schema instantiation.
//!
//! Turns a family's [`SchemaTemplate`] plus the tools of one request into the grammar
//! rules describing a valid tool-call value, and into a [`PropertyValidator`] that the
//! parser applies to every decoded call object.

use std::collections::HashSet;

use regex::Regex;
use serde_json::Value;

use crate::error::{MalformedToolCall, Result, SchemaConflict};
use crate::formats::SchemaTemplate;
use crate::grammar::{
    GbnfGrammar, JsonSchemaConverter, json_string_literal, object_rule_body, regex_to_gbnf,
};
use crate::protocols::{ToolCall, ToolSpec};

/// Output of [`instantiate`].
#[derive(Debug)]
pub struct InstantiatedSchema {
    /// Rule matching the whole tool-call value (one object, or the array of objects).
    pub root_rule: String,
    pub validator: PropertyValidator,
}

/// Add the rules for `tools` shaped by `template` to `grammar`.
///
/// With `wrap_in_array` the value is a non-empty array of call objects when `parallel`
/// is set, otherwise an array of exactly one. Without it the value is one object.
pub fn instantiate(
    template: &SchemaTemplate,
    tools: &[ToolSpec],
    parallel: bool,
    grammar: &mut GbnfGrammar,
) -> Result<InstantiatedSchema> {
    let validator = PropertyValidator::new(template)?;
    ensure_unique_names(tools)?;

    let ws = grammar.ws();
    let mut pattern_rules = Vec::with_capacity(template.property_patterns.len());
    for (property, pattern) in &template.property_patterns {
        let expr = regex_to_gbnf(pattern).map_err(|reason| SchemaConflict::InvalidPattern {
            property: property.clone(),
            pattern: pattern.clone(),
            reason,
        })?;
        let rule = grammar.add_rule(
            &format!("{property}-value"),
            format!(r#""\"" ({expr}) "\"" {ws}"#),
        );
        pattern_rules.push((property.as_str(), rule));
    }

    let mut alternatives = Vec::with_capacity(tools.len());
    for tool in tools {
        let mut members = Vec::with_capacity(template.tool_properties.len());
        for property in &template.tool_properties {
            let value = if *property == template.name_key {
                format!("{} {ws}", json_string_literal(&tool.name))
            } else if *property == template.arguments_key {
                arguments_rule(tool, grammar)
            } else if let Some((_, rule)) = pattern_rules.iter().find(|(p, _)| p == property) {
                rule.clone()
            } else {
                grammar.primitive("value")
            };
            let kv = format!(
                r#"{} {ws} ":" {ws} {value}"#,
                json_string_literal(property)
            );
            members.push((kv, template.is_required(property)));
        }
        let call = grammar.add_rule(
            &format!("{}-call", tool.name),
            object_rule_body(&members, &ws),
        );
        alternatives.push(call);
    }
    let tool_call = grammar.add_rule("tool-call", alternatives.join(" | "));

    let root = match (template.wrap_in_array, parallel) {
        (true, true) => {
            format!(r#""[" {ws} {tool_call} ( "," {ws} {tool_call} )* "]" {ws}"#)
        }
        (true, false) => format!(r#""[" {ws} {tool_call} "]" {ws}"#),
        (false, _) => tool_call,
    };
    let root_rule = grammar.add_rule("tool-calls", root);

    tracing::debug!(
        tools = tools.len(),
        parallel,
        wrap_in_array = template.wrap_in_array,
        "instantiated tool-call schema"
    );
    Ok(InstantiatedSchema {
        root_rule,
        validator,
    })
}

/// Reject tool lists in which two tools share a name.
pub fn ensure_unique_names(tools: &[ToolSpec]) -> Result<(), SchemaConflict> {
    let mut seen = HashSet::new();
    for tool in tools {
        if !seen.insert(tool.name.as_str()) {
            return Err(SchemaConflict::DuplicateTool {
                name: tool.name.clone(),
            });
        }
    }
    Ok(())
}

fn arguments_rule(tool: &ToolSpec, grammar: &mut GbnfGrammar) -> String {
    let name = format!("{}-args", tool.name);
    let mut converter = JsonSchemaConverter::new(grammar, &tool.parameters);
    match converter.visit(&tool.parameters, &name) {
        Ok(rule) => rule,
        Err(reason) => {
            tracing::warn!(
                tool = %tool.name,
                %reason,
                "tool parameters cannot be expressed as a grammar, accepting any object"
            );
            grammar.primitive("object")
        }
    }
}

/// Checks decoded call objects against a [`SchemaTemplate`] and turns them into
/// [`ToolCall`]s.
#[derive(Debug, Clone)]
pub struct PropertyValidator {
    template: SchemaTemplate,
    patterns: Vec<(String, String, Regex)>,
}

impl PropertyValidator {
    pub fn new(template: &SchemaTemplate) -> Result<Self, SchemaConflict> {
        let mut patterns = Vec::with_capacity(template.property_patterns.len());
        for (property, pattern) in &template.property_patterns {
            let anchored = format!("^(?:{pattern})$");
            let regex = Regex::new(&anchored).map_err(|e| SchemaConflict::InvalidPattern {
                property: property.clone(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            patterns.push((property.clone(), pattern.clone(), regex));
        }
        Ok(PropertyValidator {
            template: template.clone(),
            patterns,
        })
    }

    /// Validate one decoded call object. `span` is the raw region it came from.
    pub fn validate(&self, value: &Value, span: &str) -> Result<ToolCall, MalformedToolCall> {
        let template = &self.template;
        let object = value
            .as_object()
            .ok_or_else(|| MalformedToolCall::new(span, "tool call is not a JSON object"))?;

        for property in &template.required_properties {
            if !object.contains_key(property) {
                return Err(MalformedToolCall::new(span, "missing required property")
                    .with_property(property));
            }
        }

        let name = match object.get(&template.name_key) {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            _ => {
                return Err(
                    MalformedToolCall::new(span, "tool name must be a non-empty string")
                        .with_property(&template.name_key),
                );
            }
        };

        for (property, pattern, regex) in &self.patterns {
            let Some(value) = object.get(property) else {
                continue;
            };
            let Some(text) = value.as_str() else {
                return Err(MalformedToolCall::new(span, "value must be a string")
                    .with_property(property));
            };
            if !regex.is_match(text) {
                return Err(MalformedToolCall::new(
                    span,
                    format!("value '{text}' does not match {pattern}"),
                )
                .with_property(property));
            }
        }

        let arguments = match object.get(&template.arguments_key) {
            None | Some(Value::Null) => "{}".to_string(),
            Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
                Ok(decoded) if decoded.is_object() => encoded.clone(),
                _ => {
                    return Err(MalformedToolCall::new(
                        span,
                        "string arguments must encode a JSON object",
                    )
                    .with_property(&template.arguments_key));
                }
            },
            Some(arguments @ Value::Object(_)) => arguments.to_string(),
            Some(_) => {
                return Err(MalformedToolCall::new(span, "arguments must be a JSON object")
                    .with_property(&template.arguments_key));
            }
        };

        let id = template
            .id_key
            .as_ref()
            .and_then(|key| object.get(key))
            .and_then(|id| match id {
                Value::String(id) => Some(id.clone()),
                Value::Number(id) => Some(id.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| format!("call-{}", uuid::Uuid::new_v4()));

        Ok(ToolCall::new(id, name, arguments))
    }
}

impl SchemaTemplate {
    /// Encode `call` as this family's JSON call object, keys in template order.
    pub fn encode_call(&self, call: &ToolCall) -> String {
        let members: Vec<String> = self
            .tool_properties
            .iter()
            .filter_map(|property| {
                let value = if *property == self.name_key {
                    Value::String(call.name().to_string())
                } else if *property == self.arguments_key {
                    serde_json::from_str(call.arguments())
                        .unwrap_or_else(|_| Value::String(call.arguments().to_string()))
                } else if Some(property) == self.id_key.as_ref() {
                    Value::String(call.id.clone())
                } else {
                    return None;
                };
                Some(format!("{}:{value}", Value::String(property.clone())))
            })
            .collect();
        format!("{{{}}}", members.join(","))
    }
}
