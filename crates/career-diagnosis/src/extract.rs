//! Best-effort recovery of a JSON object from raw model output.
//!
//! Strategies run in order and the first success wins:
//! strict parse, structural repair, then a per-field regex scan over the
//! known diagnosis fields. Only when all of them come up empty does
//! [`extract`] return [`ExtractionError`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Fields recovered as strings by the field scan.
pub const STRING_FIELDS: &[&str] = &["result_type", "urgency", "summary", "advice", "reasoning"];

/// Fields recovered as arrays by the field scan.
pub const ARRAY_FIELDS: &[&str] = &[
    "immediate_actions",
    "short_term_actions",
    "long_term_actions",
    "service_tags",
];

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?i:json)[ \t]*\r?\n?(.*?)```").expect("valid regex"));

static FENCE_OPENER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?i:json)[ \t]*\r?\n?").expect("valid regex"));

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("valid regex"));

static STRING_FIELD_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    STRING_FIELDS
        .iter()
        .map(|name| {
            // The value runs to the next unescaped quote, or to end of text when truncated.
            let re = Regex::new(&format!(r#""{name}"\s*:\s*"((?:[^"\\]|\\.)*)"#))
                .expect("valid regex");
            (*name, re)
        })
        .collect()
});

static ARRAY_FIELD_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    ARRAY_FIELDS
        .iter()
        .map(|name| {
            let re = Regex::new(&format!(
                r#""{name}"\s*:\s*\[((?:[^\]"]|"(?:[^"\\]|\\.)*"?)*)"#
            ))
            .expect("valid regex");
            (*name, re)
        })
        .collect()
});

/// Which strategy produced the value. Anything past `Strict` is lower confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    Strict,
    Repaired,
    FieldScan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: Map<String, Value>,
    pub stage: ExtractionStage,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no usable content in model output")]
pub struct ExtractionError;

pub fn extract(raw: &str) -> Result<Extracted, ExtractionError> {
    let working = sanitize(&select_working_text(raw));

    if let Some(value) = parse_object(&working) {
        return Ok(Extracted {
            value,
            stage: ExtractionStage::Strict,
        });
    }

    if let Some(value) = parse_object(&repair(&working)) {
        return Ok(Extracted {
            value,
            stage: ExtractionStage::Repaired,
        });
    }

    let mut fields = scan_fields(&working);
    if fields.is_empty() {
        if let Some((_, block)) = last_closed_block(raw.trim()) {
            fields = scan_fields(&sanitize(block));
        }
    }
    if fields.is_empty() {
        fields = scan_fields(&sanitize(raw.trim()));
    }
    if fields.is_empty() {
        return Err(ExtractionError);
    }
    Ok(Extracted {
        value: fields,
        stage: ExtractionStage::FieldScan,
    })
}

/// Picks the last ```json block and drops any prose before the first `{`.
/// An unclosed trailing fence only counts when an object follows it.
fn select_working_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let closed = last_closed_block(trimmed);
    let after = closed.map_or(0, |(start, _)| start + 1);

    let unclosed = FENCE_OPENER
        .find_iter(trimmed)
        .filter(|opener| opener.start() >= after)
        .map(|opener| &trimmed[opener.end()..])
        .filter(|rest| rest.trim_start().starts_with('{'))
        .last();

    let mut text = match (unclosed, closed) {
        (Some(rest), _) => rest,
        (None, Some((_, body))) => body,
        (None, None) => trimmed,
    }
    .trim();

    if let Some(start) = text.find('{') {
        text = &text[start..];
    }
    text.strip_suffix("```").unwrap_or(text).trim().to_string()
}

/// Start offset and contents of the last closed ```json block.
fn last_closed_block(text: &str) -> Option<(usize, &str)> {
    let block = FENCED_JSON.captures_iter(text).last()?;
    let start = block.get(0)?.start();
    Some((start, block.get(1).map_or("", |m| m.as_str())))
}

/// Drops control characters, escapes raw line breaks inside strings, doubles
/// stray backslashes, and removes a trailing comma at end of text.
pub(crate) fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.peek().copied() {
                Some(next @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't')) => {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                }
                Some('u') if is_unicode_escape(&chars) => out.push('\\'),
                _ => out.push_str("\\\\"),
            },
            '"' => {
                in_string = !in_string;
                out.push('"');
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => {}
            '\t' if in_string => out.push_str("\\t"),
            '\n' | '\r' | '\t' => out.push(ch),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    let end = out.trim_end().len();
    out.truncate(end);
    if out.ends_with(',') {
        out.pop();
    }
    out
}

/// `chars` is positioned just before the `u` of a `\u` escape.
fn is_unicode_escape(chars: &std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    let mut ahead = chars.clone();
    ahead.next();
    (0..4).all(|_| ahead.next().is_some_and(|c| c.is_ascii_hexdigit()))
}

/// The first JSON value in `text`, if it is an object. Trailing prose is ignored.
fn parse_object(text: &str) -> Option<Map<String, Value>> {
    let mut values = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match values.next() {
        Some(Ok(Value::Object(map))) => Some(map),
        _ => None,
    }
}

/// Closes an unterminated string, appends the missing `}`/`]` closers in
/// nesting order, and strips trailing commas before closers.
pub(crate) fn repair(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut closers: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        out.push(ch);
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' if closers.last() == Some(&ch) => {
                closers.pop();
            }
            _ => {}
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    loop {
        let end = out.trim_end().len();
        out.truncate(end);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.push_str(" null");
        }
        break;
    }

    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    strip_trailing_commas(&out)
}

/// Removes commas that directly precede `}` or `]` outside of strings.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

/// Collects whichever known fields appear anywhere in `text`.
fn scan_fields(text: &str) -> Map<String, Value> {
    let mut fields = Map::new();

    for (name, re) in STRING_FIELD_RES.iter() {
        let Some(raw) = re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str()) else {
            continue;
        };
        let value = decode_string(raw);
        if !value.trim().is_empty() {
            fields.insert((*name).to_string(), Value::String(value));
        }
    }

    for (name, re) in ARRAY_FIELD_RES.iter() {
        let Some(body) = re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str()) else {
            continue;
        };
        let items = decode_array(body);
        if !items.is_empty() {
            fields.insert((*name).to_string(), Value::Array(items));
        }
    }

    fields
}

fn decode_string(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

fn decode_array(body: &str) -> Vec<Value> {
    let candidate = strip_trailing_commas(&format!("[{}]", body.trim().trim_end_matches(',')));
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&candidate) {
        return items;
    }
    QUOTED
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| decode_string(m.as_str()))
        .filter(|s| !s.trim().is_empty())
        .map(Value::String)
        .collect()
}
