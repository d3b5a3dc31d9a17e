// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use serde_json::Value;

use super::gbnf::{GbnfGrammar, json_string_literal, literal, object_rule_body};
use super::pattern::regex_to_gbnf;

/// Converts JSON schema documents into GBNF rules.
///
/// Handles objects (`properties`, `required`), arrays (`items`, `minItems`,
/// `maxItems`), strings (`pattern`, `minLength`, `maxLength`), numbers, integers,
/// booleans, null, `enum`, `const`, `anyOf`/`oneOf`, type unions and local `$ref`s into
/// `$defs` or `definitions`. Anything it does not understand yields an error so the
/// caller can decide on a fallback.
pub struct JsonSchemaConverter<'g> {
    grammar: &'g mut GbnfGrammar,
    root: Value,
    refs: HashMap<String, String>,
}

impl<'g> JsonSchemaConverter<'g> {
    pub fn new(grammar: &'g mut GbnfGrammar, root: &Value) -> Self {
        JsonSchemaConverter {
            grammar,
            root: root.clone(),
            refs: HashMap::new(),
        }
    }

    /// Add the rules for `schema` and return the name of its top rule.
    pub fn visit(&mut self, schema: &Value, name: &str) -> Result<String, String> {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return self.visit_ref(reference);
        }
        let body = self.body(schema, name)?;
        if self.grammar.has_rule(&body) {
            return Ok(body);
        }
        Ok(self.grammar.add_rule(name, body))
    }

    fn visit_ref(&mut self, reference: &str) -> Result<String, String> {
        if let Some(rule) = self.refs.get(reference) {
            return Ok(rule.clone());
        }
        let def_name = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"))
            .ok_or_else(|| format!("only local $defs references are supported: {reference}"))?;
        let target = self
            .root
            .pointer(&reference[1..])
            .cloned()
            .ok_or_else(|| format!("unresolved reference: {reference}"))?;

        // reserve the name first so recursive definitions refer back to it
        let rule = self.grammar.add_rule(&format!("ref-{def_name}"), "\"\"");
        self.refs.insert(reference.to_string(), rule.clone());
        let body = self.body(&target, &rule)?;
        self.grammar.set_rule(&rule, body);
        Ok(rule)
    }

    fn body(&mut self, schema: &Value, name: &str) -> Result<String, String> {
        let ws = self.grammar.ws();
        let schema = match schema {
            Value::Bool(true) => return Ok(self.grammar.primitive("value")),
            Value::Bool(false) => return Err("schema `false` accepts nothing".to_string()),
            Value::Object(map) => map,
            other => return Err(format!("schema must be an object, got {other}")),
        };

        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            return self.visit_ref(reference);
        }

        if let Some(value) = schema.get("const") {
            return Ok(format!("{} {ws}", literal(&value.to_string())));
        }

        if let Some(values) = schema.get("enum") {
            let values = values
                .as_array()
                .filter(|v| !v.is_empty())
                .ok_or("enum must be a non-empty array")?;
            let alternatives: Vec<String> = values.iter().map(|v| literal(&v.to_string())).collect();
            return Ok(format!("({}) {ws}", alternatives.join(" | ")));
        }

        for key in ["anyOf", "oneOf"] {
            if let Some(variants) = schema.get(key).and_then(Value::as_array) {
                let mut alternatives = Vec::with_capacity(variants.len());
                for (i, variant) in variants.iter().enumerate() {
                    alternatives.push(self.visit(variant, &format!("{name}-{i}"))?);
                }
                return Ok(alternatives.join(" | "));
            }
        }

        if schema.contains_key("allOf") {
            return Err("allOf is not supported".to_string());
        }

        match schema.get("type") {
            Some(Value::Array(types)) => {
                let mut alternatives = Vec::with_capacity(types.len());
                for ty in types {
                    let mut single = schema.clone();
                    single.insert("type".to_string(), ty.clone());
                    let ty_name = ty.as_str().unwrap_or("value");
                    alternatives
                        .push(self.visit(&Value::Object(single), &format!("{name}-{ty_name}"))?);
                }
                Ok(alternatives.join(" | "))
            }
            Some(Value::String(ty)) => match ty.as_str() {
                "object" => self.object(schema, name),
                "array" => self.array(schema, name),
                "string" => self.string(schema),
                "integer" => Ok(self.grammar.primitive("integer")),
                "number" => Ok(self.grammar.primitive("number")),
                "boolean" => Ok(self.grammar.primitive("boolean")),
                "null" => Ok(self.grammar.primitive("null")),
                other => Err(format!("unknown type '{other}'")),
            },
            Some(other) => Err(format!("type must be a string or array, got {other}")),
            None if schema.contains_key("properties") => self.object(schema, name),
            None if schema.contains_key("items") => self.array(schema, name),
            None => Ok(self.grammar.primitive("value")),
        }
    }

    fn object(
        &mut self,
        schema: &serde_json::Map<String, Value>,
        name: &str,
    ) -> Result<String, String> {
        let properties = match schema.get("properties").and_then(Value::as_object) {
            Some(properties) if !properties.is_empty() => properties,
            _ => return Ok(self.grammar.primitive("object")),
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let ws = self.grammar.ws();
        let mut members = Vec::with_capacity(properties.len());
        for (property, property_schema) in properties {
            let value_rule = self.visit(property_schema, &format!("{name}-{property}"))?;
            let kv = format!(
                r#"{} {ws} ":" {ws} {value_rule}"#,
                json_string_literal(property)
            );
            let kv_rule = self
                .grammar
                .add_rule(&format!("{name}-{property}-kv"), kv);
            members.push((kv_rule, required.contains(&property.as_str())));
        }
        Ok(object_rule_body(&members, &ws))
    }

    fn array(
        &mut self,
        schema: &serde_json::Map<String, Value>,
        name: &str,
    ) -> Result<String, String> {
        let item = match schema.get("items") {
            Some(items) => self.visit(items, &format!("{name}-item"))?,
            None => self.grammar.primitive("value"),
        };
        let min = schema.get("minItems").and_then(Value::as_u64).unwrap_or(0);
        let max = schema.get("maxItems").and_then(Value::as_u64);
        let ws = self.grammar.ws();

        let more = |n: u64| -> String {
            match max {
                Some(max) if max <= n => String::new(),
                Some(max) => format!(r#" ( "," {ws} {item} ){{0,{}}}"#, max - n),
                None => format!(r#" ( "," {ws} {item} )*"#),
            }
        };
        let items = match (min, max) {
            (_, Some(0)) => String::new(),
            (0, _) => format!("( {item}{} )?", more(1)),
            (min, _) => {
                let required = if min > 1 {
                    format!(r#" ( "," {ws} {item} ){{{}}}"#, min - 1)
                } else {
                    String::new()
                };
                format!("{item}{required}{}", more(min))
            }
        };
        if items.is_empty() {
            Ok(format!(r#""[" {ws} "]" {ws}"#))
        } else {
            Ok(format!(r#""[" {ws} {items} "]" {ws}"#))
        }
    }

    fn string(&mut self, schema: &serde_json::Map<String, Value>) -> Result<String, String> {
        let ws = self.grammar.ws();
        if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
            regex::Regex::new(pattern).map_err(|e| e.to_string())?;
            let expr = regex_to_gbnf(pattern)?;
            return Ok(format!(r#""\"" ({expr}) "\"" {ws}"#));
        }
        let min = schema.get("minLength").and_then(Value::as_u64);
        let max = schema.get("maxLength").and_then(Value::as_u64);
        if min.is_none() && max.is_none() {
            return Ok(self.grammar.primitive("string"));
        }
        let char_rule = self.grammar.primitive("char");
        let repeat = match (min.unwrap_or(0), max) {
            (min, Some(max)) => format!("{{{min},{max}}}"),
            (min, None) => format!("{{{min},}}"),
        };
        Ok(format!(r#""\"" {char_rule}{repeat} "\"" {ws}"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn convert(schema: Value) -> (String, String) {
        let mut grammar = GbnfGrammar::new(20);
        let rule = JsonSchemaConverter::new(&mut grammar, &schema)
            .visit(&schema, "root")
            .unwrap();
        (rule, grammar.render())
    }

    #[test]
    fn test_object_with_required_and_optional() {
        let (rule, text) = convert(json!({
            "type": "object",
            "properties": {
                "location": {"type": "string"},
                "unit": {"enum": ["celsius", "fahrenheit"]}
            },
            "required": ["location"]
        }));
        assert_eq!(rule, "root");
        assert!(text.contains(r#"root ::= "{" ws root-location-kv ( "," ws root-unit-kv )? "}" ws"#));
        assert!(text.contains(r#"root-location-kv ::= "\"location\"" ws ":" ws string"#));
        assert!(text.contains(r#"root-unit ::= ("\"celsius\"" | "\"fahrenheit\"") ws"#));
    }

    #[test]
    fn test_empty_object_schema_is_any_object() {
        let (rule, text) = convert(json!({"type": "object", "properties": {}}));
        assert_eq!(rule, "object");
        assert!(text.contains("object ::= "));
    }

    #[test]
    fn test_array_bounds() {
        let (_, text) = convert(json!({"type": "array", "items": {"type": "integer"}, "minItems": 1, "maxItems": 1}));
        assert!(text.contains(r#"root ::= "[" ws integer "]" ws"#));

        let (_, text) = convert(json!({"type": "array", "items": {"type": "integer"}, "minItems": 1}));
        assert!(text.contains(r#"root ::= "[" ws integer ( "," ws integer )* "]" ws"#));

        let (_, text) = convert(json!({"type": "array", "items": {"type": "integer"}, "maxItems": 3}));
        assert!(text.contains(r#"root ::= "[" ws ( integer ( "," ws integer ){0,2} )? "]" ws"#));
    }

    #[test]
    fn test_string_pattern_and_length() {
        let (_, text) = convert(json!({"type": "string", "pattern": "^[0-9]{3}$"}));
        assert!(text.contains(r#"root ::= "\"" ([0-9]{3}) "\"" ws"#));

        let (_, text) = convert(json!({"type": "string", "minLength": 2, "maxLength": 4}));
        assert!(text.contains(r#"root ::= "\"" char{2,4} "\"" ws"#));
    }

    #[test]
    fn test_nullable_union() {
        let (_, text) = convert(json!({"type": ["string", "null"]}));
        assert!(text.contains("root ::= string | null\n"));
    }

    #[test]
    fn test_recursive_ref() {
        let (_, text) = convert(json!({
            "$defs": {
                "node": {
                    "type": "object",
                    "properties": {"children": {"type": "array", "items": {"$ref": "#/$defs/node"}}},
                    "required": ["children"]
                }
            },
            "type": "object",
            "properties": {"tree": {"$ref": "#/$defs/node"}},
            "required": ["tree"]
        }));
        assert!(text.contains(r#"root-tree-kv ::= "\"tree\"" ws ":" ws ref-node"#));
        assert!(text.contains(r#"ref-node ::= "{" ws ref-node-children-kv "}" ws"#));
        assert!(text.contains(r#"ref-node-children ::= "[" ws ( ref-node ( "," ws ref-node )* )? "]" ws"#));
    }

    #[test]
    fn test_unsupported_constructs_error() {
        let schema = json!({"allOf": [{"type": "string"}]});
        let mut grammar = GbnfGrammar::new(20);
        assert!(
            JsonSchemaConverter::new(&mut grammar, &schema)
                .visit(&schema, "root")
                .is_err()
        );

        let schema = json!({"$ref": "https://example.com/schema.json"});
        assert!(
            JsonSchemaConverter::new(&mut grammar, &schema)
                .visit(&schema, "root")
                .is_err()
        );
    }
}
