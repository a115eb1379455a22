//! Redaction of credentials from log output.

use regex::Regex;
use std::sync::OnceLock;

/// JSON keys whose values are never logged in clear.
const SENSITIVE_FIELDS: &[&str] = &[
    "api_key",
    "api_token",
    "token",
    "secret",
    "password",
    "authorization",
    "credentials",
];

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)(password=)[^&\s]+", "${1}<Password>"),
            (
                r"(?i)((?:api_key|apikey|api_token|token|client_secret|secret)=)[^&\s]+",
                "${1}<Redacted>",
            ),
            (r"(?i)(authorization:\s*)(bearer\s+)?[^\s,]+", "${1}${2}<Redacted>"),
            (
                r#"(?i)(["'](?:authorization|password|api_key|api_token|token|secret)["']\s*:\s*["'])[^"']*(["'])"#,
                "${1}<Redacted>${2}",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Removes credentials from free text such as error messages and URLs.
pub fn remove_sensitive_info(text: &str) -> String {
    patterns()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Masks a secret, showing only the first 3 and last 3 characters.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 6 {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 3..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "***".to_string()
    }
}

/// Masks sensitive fields in a JSON document.
pub fn mask_sensitive_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut masked = serde_json::Map::new();
            for (key, value) in map {
                let lower_key = key.to_lowercase();
                let is_sensitive = SENSITIVE_FIELDS
                    .iter()
                    .any(|field| lower_key.contains(field));

                let entry = match value {
                    serde_json::Value::String(s) if is_sensitive => {
                        serde_json::Value::String(mask_value(s))
                    }
                    serde_json::Value::Null => serde_json::Value::Null,
                    _ if is_sensitive => serde_json::Value::String("***".to_string()),
                    other => mask_sensitive_json(other),
                };
                masked.insert(key.clone(), entry);
            }
            serde_json::Value::Object(masked)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(mask_sensitive_json).collect())
        }
        other => other.clone(),
    }
}
