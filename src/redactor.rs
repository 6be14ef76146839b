//! Email and phone number redaction for flat log records.
//!
//! Only top-level string values are rewritten. Nested objects and arrays are
//! passed through as they are.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub const EMAIL_TOKEN: &str = "[REDACTED_EMAIL]";
pub const PHONE_TOKEN: &str = "[REDACTED_PHONE]";

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b").expect("email pattern compiles")
});

static PHONE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("phone pattern compiles")
});

/// Replaces email-shaped and then phone-shaped substrings of `text`.
pub fn redact_text(text: &str) -> String {
  let without_emails = EMAIL_REGEX.replace_all(text, EMAIL_TOKEN);
  PHONE_REGEX.replace_all(&without_emails, PHONE_TOKEN).into_owned()
}

/// Redacts every top-level string value of `record`.
pub fn redact(record: &Map<String, Value>) -> Map<String, Value> {
  record
    .iter()
    .map(|(key, value)| {
      let value = match value {
        Value::String(text) => Value::String(redact_text(text)),
        other => other.clone(),
      };
      (key.clone(), value)
    })
    .collect()
}

/// Like [`redact`], for an arbitrary JSON value that must be an object.
pub fn redact_value(record: &Value) -> Result<Value> {
  match record {
    Value::Object(map) => Ok(Value::Object(redact(map))),
    other => Err(Error::InvalidInput(format!(
      "log record must be a JSON object, got {}",
      json_type_name(other)
    ))),
  }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "boolean",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}
