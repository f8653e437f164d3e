//! Redacts secrets/tokens from values before they reach a log sink or an
//! audit entry. Grounded on the same key-name heuristics the gateway uses
//! when nudging users about approvals.

use regex::Regex;
use serde_json::Value;

const REDACTED: &str = "***REDACTED***";

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("secret")
        || key.contains("token")
        || key.contains("password")
        || key.contains("api_key")
        || key.contains("apikey")
        || key.contains("authorization")
        || key.contains("access_key")
        || key.contains("bearer")
}

pub fn redact_token_for_logs(token: &str) -> String {
    if token.is_empty() {
        return "<empty>".to_string();
    }
    if token.len() <= 8 {
        return REDACTED.to_string();
    }
    let prefix = &token[..4];
    let suffix = &token[token.len() - 2..];
    format!("{}...{}", prefix, suffix)
}

pub fn redact_json_for_logs(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if is_sensitive_key(k) {
                    out.insert(k.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(k.clone(), redact_json_for_logs(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_json_for_logs).collect()),
        other => other.clone(),
    }
}

/// Best-effort redaction of bearer tokens embedded in free text (e.g. a raw
/// adapter payload kept for audit).
pub fn redact_text_for_logs(text: &str) -> String {
    let re_bearer = Regex::new(r#"(?i)(bearer\s+)[^\s"',]+"#).expect("valid regex");
    re_bearer.replace_all(text, format!("$1{}", REDACTED)).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_nested_sensitive_keys() {
        let v = json!({"sender": "alice", "credentials": {"api_key": "sk-deadbeef"}});
        let redacted = redact_json_for_logs(&v);
        assert_eq!(redacted["credentials"]["api_key"], json!(REDACTED));
        assert_eq!(redacted["sender"], json!("alice"));
    }

    #[test]
    fn redact_token_keeps_prefix_suffix_only() {
        assert_eq!(redact_token_for_logs("sk-abcdefgh12"), "sk-a...12");
        assert_eq!(redact_token_for_logs("short"), REDACTED);
    }

    #[test]
    fn redacts_bearer_in_text() {
        let redacted = redact_text_for_logs("Authorization: Bearer abc123.def456");
        assert!(redacted.contains(REDACTED));
        assert!(!redacted.contains("abc123"));
    }
}
