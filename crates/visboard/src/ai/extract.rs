//! Tolerant extraction of structured data from model output.
//!
//! Models wrap JSON in code fences, add comments or chatter around it, and
//! return XML-ish fragments. Everything here returns `None` on malformed
//! input instead of failing.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"```(?:json)?([\s\S]*?)```").expect("static regex")
});

/// Body of the first fenced block, or the whole text when there is none.
fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str())
        .trim()
}

/// Remove `//` and `/* */` comments that sit outside string literals.
fn strip_json_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                out.push(c);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Byte index of the bracket closing the one opening at `start`.
fn matching_close(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// First JSON object or array embedded in `content`.
pub fn extract_first_json(content: &str) -> Option<Value> {
    let cleaned = strip_json_comments(strip_code_fence(content)).replace("```", "");

    let mut from = 0;
    while let Some(found) = cleaned[from..].find(['{', '[']) {
        let start = from + found;
        if let Some(end) = matching_close(&cleaned, start)
            && let Ok(value) = serde_json::from_str::<Value>(&cleaned[start..=end])
        {
            return Some(value);
        }
        from = start + 1;
    }
    None
}

/// First JSON array of strings in `content`.
pub fn extract_string_list(content: &str) -> Option<Vec<String>> {
    match extract_first_json(content)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        _ => None,
    }
}

fn tag_regex(tag: &str) -> Option<Regex> {
    let tag = regex::escape(tag);
    Regex::new(&format!(r"<{tag}>([\s\S]*?)</{tag}>")).ok()
}

/// The first `<tag>…</tag>` element of `content`, inner text trimmed.
pub fn extract_xml_content(content: &str, tag: &str) -> Option<String> {
    if tag.is_empty() {
        return None;
    }
    let inner = tag_regex(tag)?.captures(content)?.get(1)?.as_str().trim();
    if inner.is_empty() {
        return None;
    }
    Some(format!("<{tag}>{inner}</{tag}>"))
}

/// Unescaped text of the first `<tag>` child of an XML fragment.
pub fn xml_tag_text(fragment: &str, tag: &str) -> Option<String> {
    let inner = tag_regex(tag)?.captures(fragment)?.get(1)?.as_str().trim();
    let text = inner
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    (!text.is_empty()).then_some(text)
}
