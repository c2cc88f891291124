//! Best-effort masking of credential-like values before records reach any
//! sink. Enabled per configuration via `mask_sensitive`.

use serde_json::Value;

use crate::record::LogRecord;

const MASK: &str = "***";

/// Keywords that mark a field name or `key=value` token as sensitive.
const SENSITIVE_KEYWORDS: &[&str] = &[
    "password",
    "passwd",
    "token",
    "secret",
    "credential",
    "api_key",
    "apikey",
    "private_key",
    "authorization",
    "bearer",
    "session",
    "cookie",
];

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Masks string values of sensitive fields and the value side of
/// `key=value` / `key: value` tokens inside the message text.
pub fn mask_record(record: &mut LogRecord) {
    for (key, value) in record.fields.iter_mut() {
        if is_sensitive(key) {
            *value = Value::String(MASK.to_string());
        }
    }
    record.message = mask_message(&record.message);
}

fn mask_message(message: &str) -> String {
    let mut out = Vec::new();
    for token in message.split(' ') {
        out.push(mask_token(token));
    }
    out.join(" ")
}

fn mask_token(token: &str) -> String {
    for sep in ['=', ':'] {
        if let Some((key, value)) = token.split_once(sep) {
            if !value.is_empty() && is_sensitive(key) {
                return format!("{key}{sep}{MASK}");
            }
        }
    }
    token.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record(message: &str, fields: BTreeMap<String, Value>) -> LogRecord {
        LogRecord {
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            level: LogLevel::Info,
            logger: "test".to_string(),
            message: message.to_string(),
            fields,
            context: None,
            error: None,
        }
    }

    #[test]
    fn sensitive_field_values_are_masked() {
        let mut rec = record(
            "login ok",
            BTreeMap::from([
                ("api_key".to_string(), json!("sk-123")),
                ("user".to_string(), json!("alice")),
            ]),
        );
        mask_record(&mut rec);
        assert_eq!(rec.fields["api_key"], json!("***"));
        assert_eq!(rec.fields["user"], json!("alice"));
    }

    #[test]
    fn key_value_tokens_in_message_are_masked() {
        let mut rec = record("connecting with password=hunter2 retries=3", BTreeMap::new());
        mask_record(&mut rec);
        assert_eq!(rec.message, "connecting with password=*** retries=3");
    }

    #[test]
    fn plain_mentions_are_left_alone() {
        let mut rec = record("password rotation completed", BTreeMap::new());
        mask_record(&mut rec);
        assert_eq!(rec.message, "password rotation completed");
    }
}
