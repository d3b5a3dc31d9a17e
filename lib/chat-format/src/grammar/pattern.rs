// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Translation of the regular-expression subset used by property patterns into GBNF.
//!
//! Supported: literals, escapes, `.`, character classes, the `\d \w \s` shorthands and
//! their negations, groups (capturing, non-capturing and named), alternation, and the
//! `* + ? {n} {n,} {n,m}` quantifiers. A leading `^` and trailing `$` are dropped since
//! grammar rules always match the whole value. Lookaround, backreferences, inline flags
//! and word boundaries are rejected.

use super::gbnf::literal;

const DIGIT: &str = "0-9";
const WORD: &str = "a-zA-Z0-9_";
const SPACE: &str = r" \t\n\r";

/// Translate `pattern` into a GBNF expression.
pub fn regex_to_gbnf(pattern: &str) -> Result<String, String> {
    let body = pattern.strip_prefix('^').unwrap_or(pattern);
    let body = match body.strip_suffix('$') {
        Some(stripped) if !stripped.ends_with('\\') => stripped,
        _ => body,
    };
    let mut translator = Translator {
        chars: body.chars().collect(),
        pos: 0,
    };
    let expr = translator.alternation()?;
    if let Some(c) = translator.peek() {
        return Err(format!("unexpected '{c}' at offset {}", translator.pos));
    }
    Ok(expr)
}

enum Atom {
    Char(char),
    Expr(String),
}

struct Translator {
    chars: Vec<char>,
    pos: usize,
}

impl Translator {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: &str) -> bool {
        let expected: Vec<char> = expected.chars().collect();
        if self.chars[self.pos..].starts_with(&expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn alternation(&mut self) -> Result<String, String> {
        let mut alternatives = vec![self.sequence()?];
        while self.peek() == Some('|') {
            self.pos += 1;
            alternatives.push(self.sequence()?);
        }
        Ok(alternatives.join(" | "))
    }

    fn sequence(&mut self) -> Result<String, String> {
        let mut items: Vec<String> = Vec::new();
        let mut pending = String::new();

        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            let atom = self.atom()?;
            let quantifier = self.quantifier()?;
            match (atom, quantifier) {
                (Atom::Char(ch), None) => pending.push(ch),
                (atom, quantifier) => {
                    if !pending.is_empty() {
                        items.push(literal(&pending));
                        pending.clear();
                    }
                    let expr = match atom {
                        Atom::Char(ch) => literal(&ch.to_string()),
                        Atom::Expr(expr) => expr,
                    };
                    items.push(format!("{expr}{}", quantifier.unwrap_or_default()));
                }
            }
        }
        if !pending.is_empty() {
            items.push(literal(&pending));
        }
        if items.is_empty() {
            return Ok(r#""""#.to_string());
        }
        Ok(items.join(" "))
    }

    fn atom(&mut self) -> Result<Atom, String> {
        let offset = self.pos;
        match self.next() {
            Some('(') => {
                if self.eat("?<=") || self.eat("?<!") {
                    return Err(format!("unsupported lookbehind at offset {offset}"));
                }
                if self.eat("?P<") || self.eat("?<") {
                    if !self.skip_name() {
                        return Err(format!("unclosed group name at offset {offset}"));
                    }
                } else if !self.eat("?:") && self.peek() == Some('?') {
                    return Err(format!("unsupported group construct at offset {offset}"));
                }
                let inner = self.alternation()?;
                if self.next() != Some(')') {
                    return Err(format!("unclosed group at offset {offset}"));
                }
                Ok(Atom::Expr(format!("({inner})")))
            }
            Some('[') => self.class().map(Atom::Expr),
            Some('.') => Ok(Atom::Expr(r"[^\n]".to_string())),
            Some('\\') => self.escape(),
            Some(c @ ('^' | '$')) => Err(format!("unsupported anchor '{c}' at offset {offset}")),
            Some(c @ ('*' | '+' | '?' | '{')) => {
                Err(format!("dangling quantifier '{c}' at offset {offset}"))
            }
            Some(c) => Ok(Atom::Char(c)),
            None => Err("unexpected end of pattern".to_string()),
        }
    }

    fn skip_name(&mut self) -> bool {
        while let Some(c) = self.next() {
            if c == '>' {
                return true;
            }
        }
        false
    }

    fn escape(&mut self) -> Result<Atom, String> {
        let offset = self.pos;
        match self.next() {
            Some('d') => Ok(Atom::Expr(format!("[{DIGIT}]"))),
            Some('D') => Ok(Atom::Expr(format!("[^{DIGIT}]"))),
            Some('w') => Ok(Atom::Expr(format!("[{WORD}]"))),
            Some('W') => Ok(Atom::Expr(format!("[^{WORD}]"))),
            Some('s') => Ok(Atom::Expr(format!("[{SPACE}]"))),
            Some('S') => Ok(Atom::Expr(format!("[^{SPACE}]"))),
            Some('n') => Ok(Atom::Char('\n')),
            Some('t') => Ok(Atom::Char('\t')),
            Some('r') => Ok(Atom::Char('\r')),
            Some(c) if c.is_ascii_alphanumeric() => {
                Err(format!("unsupported escape '\\{c}' at offset {offset}"))
            }
            Some(c) => Ok(Atom::Char(c)),
            None => Err("trailing backslash".to_string()),
        }
    }

    /// Character class; the opening `[` is already consumed.
    fn class(&mut self) -> Result<String, String> {
        let offset = self.pos;
        let mut out = String::from("[");
        if self.peek() == Some('^') {
            self.pos += 1;
            out.push('^');
        }
        let mut first = true;
        loop {
            match self.next() {
                None => return Err(format!("unclosed character class at offset {offset}")),
                Some(']') if !first => break,
                Some('[') => {
                    return Err(format!("nested character class at offset {}", self.pos - 1));
                }
                Some('\\') => match self.next() {
                    Some('d') => out.push_str(DIGIT),
                    Some('w') => out.push_str(WORD),
                    Some('s') => out.push_str(SPACE),
                    Some('n') => out.push_str(r"\n"),
                    Some('t') => out.push_str(r"\t"),
                    Some('r') => out.push_str(r"\r"),
                    Some(c @ ('\\' | ']' | '[')) => {
                        out.push('\\');
                        out.push(c);
                    }
                    Some(c) if c.is_ascii_punctuation() => {
                        out.push_str(&format!(r"\x{:02X}", c as u32));
                    }
                    Some(c) => {
                        return Err(format!("unsupported class escape '\\{c}' at offset {offset}"));
                    }
                    None => return Err("trailing backslash".to_string()),
                },
                Some(c) => out.push(c),
            }
            first = false;
        }
        out.push(']');
        Ok(out)
    }

    fn quantifier(&mut self) -> Result<Option<String>, String> {
        let quantifier = match self.peek() {
            Some(c @ ('*' | '+' | '?')) => {
                self.pos += 1;
                c.to_string()
            }
            Some('{') => {
                let offset = self.pos;
                let mut spec = String::new();
                self.pos += 1;
                loop {
                    match self.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_digit() || c == ',' => spec.push(c),
                        _ => return Err(format!("malformed repetition at offset {offset}")),
                    }
                }
                if spec.is_empty() || spec.starts_with(',') {
                    return Err(format!("malformed repetition at offset {offset}"));
                }
                format!("{{{spec}}}")
            }
            _ => return Ok(None),
        };
        // lazy and possessive modifiers do not change the accepted language
        if matches!(self.peek(), Some('?' | '+')) {
            self.pos += 1;
        }
        Ok(Some(quantifier))
    }
}
