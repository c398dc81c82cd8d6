//! Tag extraction from a frontmatter block.
//!
//! `tags` may be written as an inline array (`tags: [a, b]`), a block
//! sequence (`tags:` followed by `- a` lines) or a single scalar
//! (`tags: a`). The block is parsed with `serde_yaml`; when the block as a
//! whole is not valid YAML, a line scanner reads just the `tags` field using
//! the same quoting rules, so both paths report the same tags.

use serde_yaml::Value;

pub fn extract_tags(raw: &str) -> Vec<String> {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Mapping(map)) => match map.get("tags") {
            Some(value) => tags_from_value(value),
            None => Vec::new(),
        },
        Ok(Value::Null) => Vec::new(),
        Ok(_) => scan_tags(raw),
        Err(e) => {
            log::debug!("[frontmatter] YAML parse failed, scanning tags by line: {}", e);
            scan_tags(raw)
        }
    }
}

fn scalar_to_tag(value: &Value) -> Option<String> {
    let tag = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

fn tags_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(seq) => seq.iter().filter_map(scalar_to_tag).collect(),
        other => scalar_to_tag(other).into_iter().collect(),
    }
}

/// Line-oriented reader for the `tags` field of a malformed block.
fn scan_tags(raw: &str) -> Vec<String> {
    let mut lines = raw.lines();
    while let Some(line) = lines.next() {
        let rest = match line.strip_prefix("tags:") {
            Some(rest) => strip_comment(rest).trim(),
            None => continue,
        };

        if let Some(inner) = rest.strip_prefix('[') {
            let inner = inner.strip_suffix(']').unwrap_or(inner);
            return split_inline(inner)
                .iter()
                .filter_map(|item| unquote(item.trim()))
                .collect();
        }

        if !rest.is_empty() {
            return unquote(rest).into_iter().collect();
        }

        let mut tags = Vec::new();
        for item_line in lines.by_ref() {
            let trimmed = item_line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.strip_prefix('-') {
                Some(item) => {
                    if let Some(tag) = unquote(strip_comment(item).trim()) {
                        tags.push(tag);
                    }
                }
                None => break,
            }
        }
        return tags;
    }
    Vec::new()
}

/// Drops a trailing ` # comment` that sits outside quotes.
fn strip_comment(s: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev = ' ';
    for (idx, ch) in s.char_indices() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '#' && prev.is_whitespace() => return &s[..idx],
            None => {}
        }
        prev = ch;
    }
    s
}

/// Splits an inline array body on commas that are not inside quotes.
fn split_inline(inner: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in inner.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match quote {
            Some('"') if ch == '\\' => {
                current.push(ch);
                escaped = true;
            }
            Some(q) if ch == q => {
                current.push(ch);
                quote = None;
            }
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                current.push(ch);
                quote = Some(ch);
            }
            None if ch == ',' => items.push(std::mem::take(&mut current)),
            None => current.push(ch),
        }
    }
    items.push(current);
    items
}

fn unquote(s: &str) -> Option<String> {
    let tag = if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].replace("\\\"", "\"").replace("\\\\", "\\")
    } else if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        s[1..s.len() - 1].replace("''", "'")
    } else {
        s.to_string()
    };
    let tag = tag.trim().to_string();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}
