//! Structured-output helpers: locate the JSON object in free-form provider
//! text and deserialize it.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::AgentError;
use crate::provider::{GenerationRequest, TextGenerator};

pub fn extract_json_object(raw: &str) -> Option<String> {
    if raw.trim_start().starts_with('{') {
        return Some(trim_symmetric(raw));
    }

    let fence = "```";
    if let Some(start) = raw.find(fence) {
        let after_fence = &raw[start + fence.len()..];
        let after_lang = after_fence.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = after_lang.find(fence) {
            let block = &after_lang[..end];
            if block.contains('{') {
                return Some(trim_symmetric(block));
            }
        }
    }

    let start = raw.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(trim_symmetric(&raw[start..=start + idx]));
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_symmetric(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}

/// Short single-line preview of provider output for diagnostics.
pub fn preview(raw: &str) -> String {
    let flat: String = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 160 {
        let cut: String = flat.chars().take(160).collect();
        format!("{cut}...")
    } else {
        flat
    }
}

pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, AgentError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| AgentError::parse(format!("no JSON object in '{}'", preview(raw))))?;
    serde_json::from_str(&json)
        .map_err(|err| AgentError::parse(format!("{err} in '{}'", preview(&json))))
}

/// Issues one generation call and parses the structured response.
pub async fn generate_structured<T: DeserializeOwned>(
    generator: &dyn TextGenerator,
    request: GenerationRequest,
) -> Result<T, AgentError> {
    let purpose = request.purpose;
    let generation = generator.generate(request).await?;
    let parsed = parse_structured(&generation.text);
    if let Err(err) = &parsed {
        debug!(target: "provider", %purpose, error = %err, "structured output rejected");
    }
    parsed
}
