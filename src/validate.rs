// src/validate.rs

use crate::error::ExtractError;
use crate::receipt::ReceiptRecord;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?s)^```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)\s*```$").expect("invalid regex"))
}

/// Remove a markdown code fence (with optional language tag) wrapped around
/// the whole reply. Anything else comes back trimmed but otherwise untouched.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    match fence_re().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

/// Turn the model's raw reply into a checked `ReceiptRecord`.
pub fn validate_reply(reply: &str) -> Result<ReceiptRecord, ExtractError> {
    let json = strip_code_fence(reply);
    let value: Value =
        serde_json::from_str(json).map_err(|e| ExtractError::InvalidJson(e.to_string()))?;

    if !value.is_object() {
        return Err(ExtractError::SchemaViolation(format!(
            "expected a JSON object, got {}",
            kind(&value)
        )));
    }

    serde_json::from_value(value).map_err(|e| ExtractError::SchemaViolation(e.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use time::macros::date;

    #[test]
    fn test_fenced_reply_end_to_end() {
        let reply = "```json\n{\"vendor\":\"Cafe\",\"date\":\"2024-01-01\",\"amount\":12.5}\n```";
        let record = validate_reply(reply).unwrap();

        assert_eq!(record.vendor, "Cafe");
        assert_eq!(record.date, date!(2024 - 01 - 01));
        assert_eq!(record.amount, 12.5);
        assert_eq!(record.category, "Unknown");
        assert_eq!(record.currency, "INR");
        assert_eq!(record.items, None);
    }

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  ```JSON {\"a\":1}```  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("\n{\"a\":1}\n"), "{\"a\":1}");
        // a lone opening fence is not a wrapper
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "```json\n{\"a\":1}");
    }

    #[test]
    fn test_strip_code_fence_is_idempotent() {
        for reply in [
            "```json\n{\"vendor\":\"x\"}\n```",
            "{\"vendor\":\"x\"}",
            "not json at all",
            "",
        ] {
            let once = strip_code_fence(reply);
            assert_eq!(strip_code_fence(once), once);
        }
    }

    #[test]
    fn test_full_record_with_items() {
        let reply = r#"{
            "vendor": "Big Bazaar", "date": "2024-02-29", "amount": 450,
            "category": "Groceries", "bill_number": "B-77", "payment_method": "UPI",
            "tax": 21.5, "currency": "INR", "customer_phone": "98xxxxxx01",
            "items": [
                {"name": "Rice", "quantity": 2, "unit": "kg", "price": 100, "total": 200},
                {"name": "Oil", "quantity": null, "price": 250.0}
            ],
            "location": "Mumbai", "unexpected": "ignored"
        }"#;
        let record = validate_reply(reply).unwrap();

        assert_eq!(record.amount, 450.0);
        assert_eq!(record.category, "Groceries");
        assert_eq!(record.bill_number.as_deref(), Some("B-77"));
        assert_eq!(record.tax, Some(21.5));
        assert_eq!(record.items().len(), 2);
        assert_eq!(record.items()[0].unit.as_deref(), Some("kg"));
        assert_eq!(record.items()[1].quantity, 1.0);
        assert_eq!(record.location.as_deref(), Some("Mumbai"));
    }

    #[test]
    fn test_invalid_json() {
        for reply in ["", "The receipt shows a total of 12.50", "```json\n{\"vendor\":\n```"] {
            assert!(
                matches!(validate_reply(reply), Err(ExtractError::InvalidJson(_))),
                "accepted {reply:?}"
            );
        }
    }

    #[test]
    fn test_schema_violations() {
        for reply in [
            r#"{"date":"2024-01-01","amount":1}"#,
            r#"{"vendor":"A","amount":1}"#,
            r#"{"vendor":"A","date":"2024-01-01"}"#,
            r#"{"vendor":42,"date":"2024-01-01","amount":1}"#,
            r#"{"vendor":"A","date":"yesterday","amount":1}"#,
            r#"{"vendor":"A","date":"2024-01-01","amount":"12.50"}"#,
            r#"{"vendor":null,"date":"2024-01-01","amount":1}"#,
            r#"{"vendor":"A","date":"2024-01-01","amount":1,"items":[{"price":2}]}"#,
            r#"{"vendor":"A","date":"2024-01-01","amount":1,"items":["Rice"]}"#,
            r#"{"vendor":"A","date":"2024-01-01","amount":1,"items":{"name":"Rice"}}"#,
            r#"{"vendor":"A","date":"2024-01-01","amount":1,"tax":"none"}"#,
            r#"[{"vendor":"A","date":"2024-01-01","amount":1}]"#,
            "null",
        ] {
            assert!(
                matches!(validate_reply(reply), Err(ExtractError::SchemaViolation(_))),
                "accepted {reply}"
            );
        }
    }
}
