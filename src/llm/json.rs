//! Lenient JSON extraction from model output.
//!
//! Models wrap JSON in prose or markdown fences; these helpers dig out the
//! object before handing it to serde.

use serde::de::DeserializeOwned;

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Outermost object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Extract and deserialize a JSON object from LLM output.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(&extract_json_object(text))
}

/// Shorten model output for log lines.
pub fn snippet(text: &str) -> String {
    let mut out: String = text.chars().take(100).collect();
    if text.chars().count() > 100 {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, serde::Deserialize)]
    struct Probe {
        summary: String,
    }

    #[test]
    fn extract_json_direct_object() {
        let input = r#"{"summary": "ok"}"#;
        assert_eq!(extract_json_object(input), input);
    }

    #[test]
    fn extract_json_from_markdown_block() {
        let input = "Here is the analysis:\n```json\n{\"summary\": \"fenced\"}\n```\nDone.";
        let probe: Probe = parse_lenient(input).unwrap();
        assert_eq!(probe.summary, "fenced");
    }

    #[test]
    fn extract_json_from_bare_fence() {
        let input = "```\n{\"summary\": \"bare\"}\n```";
        let probe: Probe = parse_lenient(input).unwrap();
        assert_eq!(probe.summary, "bare");
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "Sure! {\"summary\": \"inline\", \"nested\": {\"a\": 1}} hope that helps";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
        let probe: Probe = parse_lenient(input).unwrap();
        assert_eq!(probe.summary, "inline");
    }

    #[test]
    fn garbage_fails_to_parse() {
        assert!(parse_lenient::<Probe>("no json here").is_err());
    }

    #[test]
    fn snippet_truncates_long_text() {
        let long = "x".repeat(150);
        assert_eq!(snippet(&long).len(), 103);
        assert_eq!(snippet("short"), "short");
    }
}
