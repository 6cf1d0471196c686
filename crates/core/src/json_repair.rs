use serde::de::DeserializeOwned;

/// Parses an LLM's JSON reply, tolerating the truncation artifacts models
/// produce when a response is cut off mid-object: unterminated strings,
/// unbalanced braces/brackets, and trailing commas. Tries a bare parse first
/// and only repairs on failure.
pub fn parse_llm_json<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let block = extract_json_block(raw);

    if let Ok(value) = serde_json::from_str::<T>(block) {
        return Some(value);
    }

    let repaired = repair(block);
    serde_json::from_str::<T>(&repaired).ok()
}

/// Narrows a reply to the outermost `{...}`/`[...]` span, dropping any prose
/// the model wrapped the JSON in.
fn extract_json_block(raw: &str) -> &str {
    let start = raw.find(['{', '[']);
    let end = raw.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &raw[s..=e],
        _ => raw.trim(),
    }
}

fn repair(s: &str) -> String {
    let mut out = s.trim_end().trim_end_matches(',').to_string();

    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for c in out.chars() {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' if in_string => escape = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(c),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    if in_string {
        out.push('"');
    }
    while let Some(open) = stack.pop() {
        out.push(if open == '{' { '}' } else { ']' });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        is_duplicate: bool,
        #[serde(default)]
        reason: Option<String>,
    }

    #[test]
    fn parses_clean_json() {
        let r: Reply = parse_llm_json(r#"{"is_duplicate": true, "reason": "same bug"}"#).unwrap();
        assert!(r.is_duplicate);
    }

    #[test]
    fn strips_prose_wrapper() {
        let raw = "Sure, here you go:\n{\"is_duplicate\": false}\nHope that helps!";
        let r: Reply = parse_llm_json(raw).unwrap();
        assert!(!r.is_duplicate);
    }

    #[test]
    fn repairs_unterminated_string_and_missing_brace() {
        let raw = r#"{"is_duplicate": false, "reason": "truncated mid senten"#;
        let r: Reply = parse_llm_json(raw).unwrap();
        assert!(!r.is_duplicate);
    }

    #[test]
    fn repairs_trailing_comma() {
        let raw = r#"{"is_duplicate": true, "reason": "dup",}"#;
        let r: Reply = parse_llm_json(raw).unwrap();
        assert!(r.is_duplicate);
    }

    #[test]
    fn gives_up_on_garbage() {
        let r: Option<Reply> = parse_llm_json("not json at all");
        assert!(r.is_none());
    }
}
