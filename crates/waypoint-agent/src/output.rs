use serde::de::DeserializeOwned;

/// Text cleanup applied to model output before it is parsed.
pub struct OutputCleaner;

impl OutputCleaner {
    /// Apply heuristic repairs to output.
    /// - Strips markdown code fences
    /// - Balances JSON braces
    /// - Trims whitespace
    pub fn heuristic_repair(output: &str) -> String {
        let result = strip_code_fences(output);
        let result = result.trim();

        if result.starts_with('{') || result.starts_with('[') {
            balance_braces(result)
        } else {
            result.to_string()
        }
    }

    /// Repair then deserialize. The error message is what the model is
    /// shown on a re-prompt.
    pub fn parse_json<O: DeserializeOwned>(output: &str) -> Result<O, String> {
        let repaired = Self::heuristic_repair(output);
        serde_json::from_str(&repaired).map_err(|e| format!("Invalid JSON output: {}", e))
    }
}

/// Strip markdown code fences from text.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        // Skip optional language tag on same line
        let content_start = after.find('\n').map_or(0, |p| p + 1);
        let after = &after[content_start..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    trimmed.to_string()
}

/// Balance JSON braces/brackets by appending missing closers.
fn balance_braces(text: &str) -> String {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if ch == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if ch == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match ch {
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                closers.pop();
            }
            _ => {}
        }
    }

    let mut result = text.to_string();
    if in_string {
        result.push('"');
    }
    result.extend(closers.into_iter().rev());
    result
}
