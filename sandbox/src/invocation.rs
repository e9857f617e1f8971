//! Builds the `JSON.stringify(<fn>(JSON.parse('<escaped-input>')))`
//! invocation string (§4.5). The embedded literal must escape everything
//! that could either break out of the single-quoted JS string or smuggle a
//! line terminator past naive line-oriented tooling.

pub fn build_invocation(function_name: &str, input: &serde_json::Value) -> String {
    let input_json = serde_json::to_string(input).unwrap_or_else(|_| "null".to_string());
    let escaped = escape_for_single_quoted_js_string(&input_json);
    format!("JSON.stringify({function_name}(JSON.parse('{escaped}')))")
}

fn escape_for_single_quoted_js_string(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}
