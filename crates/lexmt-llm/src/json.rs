//! Local repair pass for almost-valid JSON from model output.
//!
//! Models frequently wrap JSON in markdown fences, chat around it, leave a
//! trailing comma, or truncate the closing brackets. This pass fixes those
//! shapes before the string reaches `serde_json`; it is not a JSON parser
//! and anything it cannot fix goes back to the model as a repair retry.

/// Try to parse, repairing the common failure shapes on a miss.
pub fn parse_with_repair(input: &str) -> Result<serde_json::Value, serde_json::Error> {
    // Fast path: already valid.
    if let Ok(value) = serde_json::from_str(input) {
        return Ok(value);
    }
    serde_json::from_str(&repair(input))
}

/// Apply the repair transformations: fence stripping, extraction of the
/// first JSON object/array from surrounding prose, trailing-comma removal,
/// and bracket balancing for truncated output.
pub fn repair(input: &str) -> String {
    let stripped = strip_fences(input);
    let extracted = extract_json_span(&stripped);
    let no_trailing = drop_trailing_commas(extracted);
    balance_brackets(&no_trailing)
}

fn strip_fences(input: &str) -> &str {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let body = body.strip_prefix('\n').unwrap_or(body);
    body.trim_end()
        .strip_suffix("```")
        .map(str::trim_end)
        .unwrap_or(body)
}

/// From the first `{` or `[` to the matching end of the string. Models
/// often preface JSON with a sentence of commentary.
fn extract_json_span(input: &str) -> &str {
    match input.find(['{', '[']) {
        Some(start) => &input[start..],
        None => input,
    }
}

fn drop_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            ',' if !in_string => {
                let next_meaningful = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next_meaningful, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Append closers for brackets left open by truncation. An unterminated
/// string gets its closing quote first.
fn balance_brackets(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = input.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}
