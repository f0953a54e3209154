//! Optimistic extraction of values from possibly-truncated JSON.
//!
//! Streamed tool-call arguments arrive token by token, so at any instant the
//! accumulated text is usually not valid JSON. `parse` never fails: complete
//! input takes the fast path through `serde_json`, everything else goes
//! through a tolerant scanner that recovers whatever leaf values it can
//! confidently resolve and drops anything ambiguous (a half-streamed key, a
//! dangling `:` with no value) rather than guessing.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

/// Result of one optimistic parse over the full accumulated text.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    /// Best-effort parsed document, when anything at all could be recovered.
    pub parsed: Option<Value>,
    /// True only when the input was syntactically complete JSON.
    pub is_complete: bool,
    /// Flat map of dot-separated key paths to recovered values. Nested
    /// objects contribute both the object itself and their inner paths;
    /// arrays are stored whole under their key.
    pub extracted_values: HashMap<String, Value>,
}

/// Parse arbitrary (possibly truncated) JSON text. Never panics, never
/// errors: on malformed input it returns whatever could be recovered.
pub fn parse(text: &str) -> ParseResult {
    if text.trim().is_empty() {
        return ParseResult::default();
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        let extracted_values = extract_values(&value);
        return ParseResult {
            parsed: Some(value),
            is_complete: true,
            extracted_values,
        };
    }

    let mut scanner = Scanner::new(text);
    scanner.skip_ws();
    let parsed = scanner.parse_value();
    let extracted_values = parsed.as_ref().map(extract_values).unwrap_or_default();
    ParseResult {
        parsed,
        is_complete: false,
        extracted_values,
    }
}

/// Look up a recovered value by key path. Absence means "not yet known",
/// never an error.
pub fn get_optimistic_value<'a>(values: &'a HashMap<String, Value>, key: &str) -> Option<&'a Value> {
    values.get(key)
}

/// String accessor with a fallback for absent or non-string values.
pub fn get_optimistic_string(values: &HashMap<String, Value>, key: &str, default: &str) -> String {
    values
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

/// Array accessor; absent or non-array keys yield an empty slice's worth.
pub fn get_optimistic_array(values: &HashMap<String, Value>, key: &str) -> Vec<Value> {
    values
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn extract_values(value: &Value) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    if let Value::Object(map) = value {
        collect_object(map, "", &mut out);
    }
    out
}

fn collect_object(map: &Map<String, Value>, prefix: &str, out: &mut HashMap<String, Value>) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        out.insert(path.clone(), value.clone());
        if let Value::Object(inner) = value {
            collect_object(inner, &path, out);
        }
    }
}

/// Tolerant recursive-descent scanner over char positions. Mirrors normal
/// JSON grammar but treats end-of-input as a valid terminator at any point:
/// unterminated strings keep their accumulated text, partial `true`/`false`/
/// `null` prefixes complete, and pairs whose value never started are dropped.
struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> Option<Value> {
        self.skip_ws();
        match self.peek()? {
            '{' => self.parse_object(),
            '[' => self.parse_array(),
            '"' => self.parse_string().map(|(text, _closed)| Value::String(text)),
            't' | 'f' | 'n' => self.parse_literal(),
            c if c == '-' || c.is_ascii_digit() => self.parse_number(),
            _ => None,
        }
    }

    fn parse_object(&mut self) -> Option<Value> {
        debug_assert_eq!(self.peek(), Some('{'));
        self.bump();
        let mut map = Map::new();

        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some('}') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some('"') => {}
                Some(_) => break,
            }

            let Some((key, key_closed)) = self.parse_string() else {
                break;
            };
            if !key_closed {
                // Key still streaming: ambiguous, drop the pair.
                break;
            }

            self.skip_ws();
            if self.peek() != Some(':') {
                // No value yet for this key.
                break;
            }
            self.bump();
            self.skip_ws();
            if self.peek().is_none() {
                break;
            }

            match self.parse_value() {
                Some(value) => {
                    map.insert(key, value);
                }
                None => break,
            }
        }

        Some(Value::Object(map))
    }

    fn parse_array(&mut self) -> Option<Value> {
        debug_assert_eq!(self.peek(), Some('['));
        self.bump();
        let mut items = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(']') => {
                    self.bump();
                    break;
                }
                Some(',') => {
                    self.bump();
                    continue;
                }
                Some(_) => {}
            }
            match self.parse_value() {
                Some(value) => items.push(value),
                None => break,
            }
        }

        Some(Value::Array(items))
    }

    /// Returns the decoded string and whether the closing quote was seen.
    fn parse_string(&mut self) -> Option<(String, bool)> {
        debug_assert_eq!(self.peek(), Some('"'));
        self.bump();
        let mut out = String::new();

        while let Some(ch) = self.bump() {
            match ch {
                '"' => return Some((out, true)),
                '\\' => {
                    let Some(escape) = self.bump() else {
                        // Input ended mid-escape; keep what we have.
                        return Some((out, false));
                    };
                    match escape {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        '/' => out.push('/'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{0008}'),
                        'f' => out.push('\u{000C}'),
                        'u' => {
                            if let Some(decoded) = self.parse_unicode_escape() {
                                out.push(decoded);
                            } else {
                                return Some((out, false));
                            }
                        }
                        other => {
                            // Unknown escape; preserve it literally.
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                other => out.push(other),
            }
        }

        Some((out, false))
    }

    fn parse_unicode_escape(&mut self) -> Option<char> {
        let high = self.parse_hex4()?;
        if (0xD800..0xDC00).contains(&high) {
            // Surrogate pair: expect a trailing \uXXXX low half.
            let checkpoint = self.pos;
            if self.bump() == Some('\\') && self.bump() == Some('u') {
                if let Some(low) = self.parse_hex4() {
                    if (0xDC00..0xE000).contains(&low) {
                        let combined =
                            0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                        return char::from_u32(combined);
                    }
                }
            }
            self.pos = checkpoint;
            return char::from_u32(0xFFFD);
        }
        char::from_u32(high)
    }

    fn parse_hex4(&mut self) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let digit = self.bump()?.to_digit(16)?;
            value = value * 16 + digit;
        }
        Some(value)
    }

    fn parse_literal(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        // Accept prefixes: the tail of a stream may cut a literal anywhere.
        if "true".starts_with(word.as_str()) {
            return Some(Value::Bool(true));
        }
        if "false".starts_with(word.as_str()) {
            return Some(Value::Bool(false));
        }
        if "null".starts_with(word.as_str()) {
            return Some(Value::Null);
        }
        None
    }

    fn parse_number(&mut self) -> Option<Value> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
        ) {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        if let Ok(number) = raw.parse::<i64>() {
            return Some(Value::Number(number.into()));
        }
        if let Ok(number) = raw.parse::<f64>() {
            return Number::from_f64(number).map(Value::Number);
        }
        None
    }
}
