//! Text helpers shared by the listing decoder, prompt builder and parser.

use serde_json::Value;

/// Keep at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Strip a surrounding markdown code fence from a model reply.
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let without_open = if let Some(rest) = trimmed.strip_prefix("```") {
        // drop the language tag line, e.g. ```json
        match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        }
    } else {
        trimmed
    };
    without_open.trim_end().trim_end_matches("```").trim()
}

/// Byte offsets of the first `{` and the first `[`, in text order.
pub fn json_starts(text: &str) -> Vec<usize> {
    let mut starts: Vec<usize> = [text.find('{'), text.find('[')].into_iter().flatten().collect();
    starts.sort_unstable();
    starts
}

/// Decode the JSON value at the start of `text`, ignoring whatever follows it.
pub fn leading_json_value(text: &str) -> Option<Value> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()?
        .ok()
}

/// Repairs the punctuation slips models commonly make in JSON: typographic
/// quotes and trailing commas before a closing bracket.
pub fn repair_json(text: &str) -> String {
    let text = text
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
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
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
