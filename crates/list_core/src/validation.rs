//! Per-field parsing of staged cell text.
//!
//! Raw input is never coerced: a value only becomes eligible for a commit
//! after a rule turned it into a [`ParsedValue`].

use std::{collections::HashMap, sync::Arc};

use serde_json::Number;
use shared::domain::{FieldName, ParsedValue};

#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Valid(ParsedValue),
    Invalid(String),
}

impl ParseResult {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

pub trait FieldValidator: Send + Sync {
    fn validate(&self, field: &FieldName, raw: &str) -> ParseResult;
}

impl<F> FieldValidator for F
where
    F: Fn(&FieldName, &str) -> ParseResult + Send + Sync,
{
    fn validate(&self, field: &FieldName, raw: &str) -> ParseResult {
        self(field, raw)
    }
}

type Rule = Arc<dyn Fn(&str) -> ParseResult + Send + Sync>;

/// Field name → rule. Fields without a rule are rejected.
#[derive(Clone, Default)]
pub struct FieldRules {
    rules: HashMap<FieldName, Rule>,
}

impl FieldRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<F>(mut self, field: impl Into<FieldName>, rule: F) -> Self
    where
        F: Fn(&str) -> ParseResult + Send + Sync + 'static,
    {
        self.rules.insert(field.into(), Arc::new(rule));
        self
    }

    pub fn covers(&self, field: &FieldName) -> bool {
        self.rules.contains_key(field)
    }
}

impl std::fmt::Debug for FieldRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<_> = self.rules.keys().map(FieldName::as_str).collect();
        fields.sort_unstable();
        f.debug_struct("FieldRules").field("fields", &fields).finish()
    }
}

impl FieldValidator for FieldRules {
    fn validate(&self, field: &FieldName, raw: &str) -> ParseResult {
        match self.rules.get(field) {
            Some(rule) => rule(raw),
            None => ParseResult::Invalid(format!("field '{field}' is not editable")),
        }
    }
}

pub fn number(raw: &str) -> ParseResult {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParseResult::invalid("value is required");
    }
    if let Ok(value) = trimmed.parse::<i64>() {
        return ParseResult::Valid(ParsedValue::from(value));
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => number_value(value),
        _ => ParseResult::invalid(format!("'{trimmed}' is not a number")),
    }
}

pub fn non_negative_number(raw: &str) -> ParseResult {
    match number(raw) {
        ParseResult::Valid(value) if value.as_f64().is_some_and(|v| v < 0.0) => {
            ParseResult::invalid("must not be negative")
        }
        other => other,
    }
}

pub fn integer(raw: &str) -> ParseResult {
    let trimmed = raw.trim();
    match trimmed.parse::<i64>() {
        Ok(value) => ParseResult::Valid(ParsedValue::from(value)),
        Err(_) => ParseResult::invalid(format!("'{trimmed}' is not a whole number")),
    }
}

pub fn non_empty_text(raw: &str) -> ParseResult {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        ParseResult::invalid("value is required")
    } else {
        ParseResult::Valid(ParsedValue::String(trimmed.to_string()))
    }
}

pub fn boolean(raw: &str) -> ParseResult {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => ParseResult::Valid(ParsedValue::Bool(true)),
        "false" | "no" | "0" => ParseResult::Valid(ParsedValue::Bool(false)),
        other => ParseResult::invalid(format!("'{other}' is not true/false")),
    }
}

/// Rule accepting exactly one of `allowed` (case sensitive, trimmed).
pub fn one_of(allowed: &[&str]) -> impl Fn(&str) -> ParseResult + Send + Sync + 'static {
    let allowed: Vec<String> = allowed.iter().map(|value| value.to_string()).collect();
    move |raw: &str| {
        let trimmed = raw.trim();
        if allowed.iter().any(|value| value == trimmed) {
            ParseResult::Valid(ParsedValue::String(trimmed.to_string()))
        } else {
            ParseResult::invalid(format!("must be one of: {}", allowed.join(", ")))
        }
    }
}

// Whole-valued decimals ("3.0", "1e3") stay integers on the wire.
fn number_value(value: f64) -> ParseResult {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return ParseResult::Valid(ParsedValue::from(value as i64));
    }
    match Number::from_f64(value) {
        Some(number) => ParseResult::Valid(ParsedValue::Number(number)),
        None => ParseResult::invalid("number is out of range"),
    }
}

#[cfg(test)]
#[path = "tests/validation_tests.rs"]
mod tests;
