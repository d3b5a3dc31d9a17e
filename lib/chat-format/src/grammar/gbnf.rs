// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! GBNF rule collection and the JSON primitives every generated grammar shares.

/// Ordered set of named GBNF productions.
///
/// Rule names are sanitized to `[a-zA-Z0-9-]`. Adding a rule whose name is taken by a
/// different body yields a numbered variant, so callers must use the returned name.
#[derive(Debug, Clone)]
pub struct GbnfGrammar {
    rules: Vec<(String, String)>,
    max_whitespace: usize,
}

impl GbnfGrammar {
    pub fn new(max_whitespace: usize) -> Self {
        GbnfGrammar {
            rules: Vec::new(),
            max_whitespace,
        }
    }

    pub fn add_rule(&mut self, name: &str, body: impl Into<String>) -> String {
        let name = rule_name(name);
        let body = body.into();
        let mut candidate = name.clone();
        let mut suffix = 1;
        loop {
            match self.body_of(&candidate) {
                None => {
                    self.rules.push((candidate.clone(), body));
                    return candidate;
                }
                Some(existing) if existing == body => return candidate,
                Some(_) => {
                    candidate = format!("{name}-{suffix}");
                    suffix += 1;
                }
            }
        }
    }

    /// Insert or replace the body of `name`, keeping its position.
    pub fn set_rule(&mut self, name: &str, body: impl Into<String>) -> String {
        let name = rule_name(name);
        let body = body.into();
        match self.rules.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = body,
            None => self.rules.push((name.clone(), body)),
        }
        name
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.body_of(name).is_some()
    }

    fn body_of(&self, name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b.as_str())
    }

    /// Make sure the JSON primitive `name` (and everything it references) is present.
    pub fn primitive(&mut self, name: &str) -> String {
        if self.has_rule(name) {
            return name.to_string();
        }
        let Some((body, deps)) = primitive_rule(name) else {
            return self.primitive("value");
        };
        let body = if name == "ws" {
            format!(r#"| " " | "\n"{{1,2}} [ \t]{{0,{}}}"#, self.max_whitespace)
        } else {
            body.to_string()
        };
        self.rules.push((name.to_string(), body));
        for dep in deps {
            self.primitive(dep);
        }
        name.to_string()
    }

    pub fn ws(&mut self) -> String {
        self.primitive("ws")
    }

    /// Render every rule, `root` first.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let root = self.rules.iter().filter(|(n, _)| n == "root");
        let rest = self.rules.iter().filter(|(n, _)| n != "root");
        for (name, body) in root.chain(rest) {
            out.push_str(name);
            out.push_str(" ::= ");
            out.push_str(body);
            out.push('\n');
        }
        out
    }
}

fn primitive_rule(name: &str) -> Option<(&'static str, &'static [&'static str])> {
    let rule: (&'static str, &'static [&'static str]) = match name {
        "value" => (
            "object | array | string | number | boolean | null",
            &["object", "array", "string", "number", "boolean", "null"],
        ),
        "object" => (
            r#""{" ws ( string ":" ws value ( "," ws string ":" ws value )* )? "}" ws"#,
            &["ws", "string", "value"],
        ),
        "array" => (
            r#""[" ws ( value ( "," ws value )* )? "]" ws"#,
            &["ws", "value"],
        ),
        "string" => (r#""\"" char* "\"" ws"#, &["char", "ws"]),
        "char" => (
            r#"[^"\\\x7F\x00-\x1F] | [\\] (["\\bfnrt] | "u" [0-9a-fA-F]{4})"#,
            &[],
        ),
        "number" => (
            r#"("-"? integral-part) ("." decimal-part)? ([eE] [-+]? integral-part)? ws"#,
            &["integral-part", "decimal-part", "ws"],
        ),
        "integer" => (r#"("-"? integral-part) ws"#, &["integral-part", "ws"]),
        "integral-part" => ("[0] | [1-9] [0-9]{0,15}", &[]),
        "decimal-part" => ("[0-9]{1,16}", &[]),
        "boolean" => (r#"("true" | "false") ws"#, &["ws"]),
        "null" => (r#""null" ws"#, &["ws"]),
        "ws" => ("", &[]),
        _ => return None,
    };
    Some(rule)
}

/// Quote `text` as a GBNF string literal.
pub fn literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Literal matching `text` encoded as a JSON string, quotes included.
pub fn json_string_literal(text: &str) -> String {
    let encoded = serde_json::Value::String(text.to_string()).to_string();
    literal(&encoded)
}

pub fn rule_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if sanitized.is_empty() {
        "rule".to_string()
    } else {
        sanitized
    }
}

/// Body of a JSON object rule over `members` (`(key-value expression, required)`),
/// keeping member order and allowing optional members to be skipped.
pub fn object_rule_body(members: &[(String, bool)], ws: &str) -> String {
    let inner = match members.iter().position(|(_, required)| *required) {
        _ if members.is_empty() => String::new(),
        Some(first_required) => {
            let mut parts = Vec::with_capacity(members.len());
            for (i, (member, required)) in members.iter().enumerate() {
                if i < first_required {
                    parts.push(format!(r#"( {member} "," {ws} )?"#));
                } else if i == first_required {
                    parts.push(member.clone());
                } else if *required {
                    parts.push(format!(r#""," {ws} {member}"#));
                } else {
                    parts.push(format!(r#"( "," {ws} {member} )?"#));
                }
            }
            parts.join(" ")
        }
        None => {
            let alternatives: Vec<String> = (0..members.len())
                .map(|i| {
                    let mut alt = members[i].0.clone();
                    for (member, _) in &members[i + 1..] {
                        alt.push_str(&format!(r#" ( "," {ws} {member} )?"#));
                    }
                    alt
                })
                .collect();
            format!("( {} )?", alternatives.join(" | "))
        }
    };
    if inner.is_empty() {
        format!(r#""{{" {ws} "}}" {ws}"#)
    } else {
        format!(r#""{{" {ws} {inner} "}}" {ws}"#)
    }
}
