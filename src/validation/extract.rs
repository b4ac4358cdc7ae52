//! Locate the JSON object inside a model response
//!
//! Models often wrap JSON in prose or a fenced code block. The first fenced
//! block whose body is an object wins; otherwise the first balanced `{...}`
//! span is used. Braces inside string literals are skipped.

/// Extract the first JSON object from `text`
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(body) = fenced_object(text) {
        return Some(body);
    }
    let start = text.find('{')?;
    balanced_span(&text[start..])
}

fn fenced_object(text: &str) -> Option<&str> {
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        // Skip an optional language tag up to the end of the line
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(after_fence.len());
        let body = &after_fence[body_start..];
        let close = body.find("```")?;
        let candidate = body[..close].trim();
        if candidate.starts_with('{')
            && let Some(span) = balanced_span(candidate)
        {
            return Some(span);
        }
        rest = &body[close + 3..];
    }
    None
}

/// Return the balanced `{...}` prefix of `text`, which must start with `{`
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
