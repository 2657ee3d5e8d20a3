//! Field-predicate queries evaluated against scanned records.
//!
//! A [`Query`] maps field names to [`Matcher`]s. A record matches when every
//! field is present and its matcher accepts the value. Matching only reads
//! the record.

use std::borrow::Cow;

use regex::Regex;
use serde_json::Value;

use crate::error::{AdapterError, AdapterResult};
use crate::record::Record;

/// Predicate applied to one field.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Strict equality with a literal
    Equals(Value),
    /// Regular-expression test against the value's string form
    Pattern(Regex),
}

impl Matcher {
    pub fn equals(value: impl Into<Value>) -> Self {
        Matcher::Equals(value.into())
    }

    /// Compile a pattern matcher.
    pub fn pattern(pattern: &str) -> AdapterResult<Self> {
        Regex::new(pattern)
            .map(Matcher::Pattern)
            .map_err(|e| AdapterError::InvalidQuery(format!("bad pattern '{}': {}", pattern, e)))
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Matcher::Equals(literal) => strict_equals(value, literal),
            Matcher::Pattern(regex) => regex.is_match(&display_value(value)),
        }
    }
}

/// Conjunction of field matchers.
#[derive(Debug, Clone, Default)]
pub struct Query {
    fields: Vec<(String, Matcher)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the matcher for `field`.
    pub fn with(mut self, field: impl Into<String>, matcher: Matcher) -> Self {
        let field = field.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(entry) => entry.1 = matcher,
            None => self.fields.push((field, matcher)),
        }
        self
    }

    /// Require `field` to equal `value`.
    pub fn equals(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, Matcher::equals(value))
    }

    /// Require `field` to match `pattern`.
    pub fn matching(self, field: impl Into<String>, pattern: &str) -> AdapterResult<Self> {
        Ok(self.with(field, Matcher::pattern(pattern)?))
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Matcher)> {
        self.fields.iter().map(|(f, m)| (f.as_str(), m))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every field must be present and match.
    ///
    /// An empty query matches every record (vacuous conjunction), where a
    /// JavaScript `findQuery({})` returned nothing. Callers that want the
    /// empty result should check [`Query::is_empty`] first.
    pub fn matches(&self, record: &Record) -> bool {
        self.fields
            .iter()
            .all(|(field, matcher)| record.get(field).is_some_and(|v| matcher.matches(v)))
    }
}

// Integers compare exactly; a float on either side compares by value so
// `1` equals `1.0`. Everything else compares structurally.
fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else {
                as_integer(x) == as_integer(y)
            }
        }
        _ => a == b,
    }
}

fn as_integer(n: &serde_json::Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// String form a pattern is tested against: strings verbatim, integral
/// numbers without a fraction, arrays comma-joined with nulls empty.
pub(crate) fn display_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        Value::Null => Cow::Borrowed("null"),
        Value::Bool(b) => Cow::Owned(b.to_string()),
        Value::Number(n) => Cow::Owned(display_number(n)),
        Value::Array(items) => Cow::Owned(
            items
                .iter()
                .map(|item| match item {
                    Value::Null => Cow::Borrowed(""),
                    other => display_value(other),
                })
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => Cow::Borrowed("[object Object]"),
    }
}

fn display_number(n: &serde_json::Number) -> String {
    if n.is_i64() || n.is_u64() {
        return n.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(name: &str, age: i64) -> Record {
        Record::new()
            .with("id", name.to_lowercase())
            .with("name", name)
            .with("age", age)
    }

    #[test]
    fn literal_requires_strict_equality() {
        let query = Query::new().equals("age", 30);
        assert!(query.matches(&user("Ada", 30)));
        assert!(!query.matches(&user("Ada", 31)));
        assert!(!Query::new().equals("age", "30").matches(&user("Ada", 30)));
    }

    #[test]
    fn integral_float_equals_integer() {
        assert!(Query::new().equals("age", 30.0).matches(&user("Ada", 30)));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let a = Record::new().with("id", "a").with("n", 9_007_199_254_740_992i64);
        let b = Record::new().with("id", "b").with("n", 9_007_199_254_740_993i64);
        let query = Query::new().equals("n", 9_007_199_254_740_993i64);
        assert!(!query.matches(&a));
        assert!(query.matches(&b));

        let unsigned = Record::new().with("n", u64::MAX);
        assert!(Query::new().equals("n", u64::MAX).matches(&unsigned));
        assert!(!Query::new().equals("n", -1).matches(&unsigned));
    }

    #[test]
    fn pattern_tests_string_form() {
        let query = Query::new().matching("name", "^A").unwrap();
        assert!(query.matches(&user("Ada", 30)));
        assert!(!query.matches(&user("Grace", 30)));

        let numeric = Query::new().matching("age", "^3\\d$").unwrap();
        assert!(numeric.matches(&user("Ada", 35)));
    }

    #[test]
    fn all_fields_must_match() {
        let query = Query::new()
            .equals("age", 30)
            .matching("name", "^G")
            .unwrap();
        assert!(query.matches(&user("Grace", 30)));
        assert!(!query.matches(&user("Ada", 30)));
        assert!(!query.matches(&user("Grace", 40)));
    }

    #[test]
    fn missing_field_never_matches() {
        let record = Record::new().with("id", "x");
        assert!(!Query::new().equals("age", Value::Null).matches(&record));
        assert!(!Query::new().matching("age", ".*").unwrap().matches(&record));
    }

    #[test]
    fn repeated_field_replaces_matcher() {
        let query = Query::new().equals("age", 1).equals("age", 30);
        assert_eq!(query.len(), 1);
        assert!(query.matches(&user("Ada", 30)));
    }

    #[test]
    fn empty_query_matches_everything() {
        assert!(Query::new().matches(&user("Ada", 30)));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = Matcher::pattern("(").unwrap_err();
        assert!(matches!(err, AdapterError::InvalidQuery(_)));
    }

    #[test]
    fn display_value_follows_string_coercion() {
        assert_eq!(display_value(&json!(3.0)), "3");
        assert_eq!(display_value(&json!(2.5)), "2.5");
        assert_eq!(display_value(&json!([1, null, "a"])), "1,,a");
        assert_eq!(display_value(&json!({"a": 1})), "[object Object]");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&Value::Null), "null");
    }
}
