// Query specs and the composed predicate used by pull/pullr

use crate::relay::message::{is_truthy, value_text, StoredMessage};
use crate::relay::wildcard::WildcardPattern;
use serde_json::{Map, Value};

/// Query fields understood by the relay, paired with the field they filter
pub const QUERY_FIELDS: [(&str, &str); 4] = [
    ("Query_Author", "Author"),
    ("Query_Age", "Age"),
    ("Query_Subject", "Subject"),
    ("Query_Message", "Message"),
];

/// Wildcard constraints on a single message field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatcher {
    pub field: String,
    pub pattern: WildcardPattern,
}

impl FieldMatcher {
    pub fn new(field: impl Into<String>, pattern: &str) -> Self {
        Self {
            field: field.into(),
            pattern: WildcardPattern::new(pattern),
        }
    }

    /// A message missing the field never matches
    pub fn matches(&self, message: &StoredMessage) -> bool {
        message
            .field_text(&self.field)
            .is_some_and(|text| self.pattern.matches(&text))
    }
}

/// Per-field wildcard constraints attached to a pull or pullr
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    matchers: Vec<FieldMatcher>,
}

impl QuerySpec {
    /// A spec with no constraints
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the recognised `Query_*` fields of a request
    ///
    /// Falsy query values impose no constraint; unrecognised fields are
    /// ignored.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let matchers = QUERY_FIELDS
            .iter()
            .filter_map(|(query, field)| {
                fields
                    .get(*query)
                    .filter(|value| is_truthy(value))
                    .map(|value| FieldMatcher::new(*field, &value_text(value)))
            })
            .collect();

        Self { matchers }
    }

    /// Add a constraint on `field`
    pub fn with(mut self, field: &str, pattern: &str) -> Self {
        self.matchers.push(FieldMatcher::new(field, pattern));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn matchers(&self) -> &[FieldMatcher] {
        &self.matchers
    }

    /// Build the conjunction of all field constraints
    pub fn build_predicate(&self) -> Predicate {
        Predicate {
            matchers: self.matchers.clone(),
        }
    }
}

/// A filter over stored messages: every field matcher must accept
///
/// With no matchers this accepts everything.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    matchers: Vec<FieldMatcher>,
}

impl Predicate {
    /// The always-true predicate
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, message: &StoredMessage) -> bool {
        self.matchers.iter().all(|m| m.matches(message))
    }
}

/// Build a predicate from a spec
pub fn build_predicate(spec: &QuerySpec) -> Predicate {
    spec.build_predicate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stored(value: Value) -> StoredMessage {
        match value {
            Value::Object(map) => StoredMessage::new(map),
            _ => panic!("expected object"),
        }
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_empty_spec_matches_everything() {
        let spec = QuerySpec::from_fields(&fields(json!({})));
        assert!(spec.is_empty());

        let predicate = spec.build_predicate();
        assert!(predicate.matches(&stored(json!({}))));
        assert!(predicate.matches(&stored(json!({"Author": "x"}))));
    }

    #[test]
    fn test_falsy_and_unknown_queries_ignored() {
        let spec = QuerySpec::from_fields(&fields(json!({
            "Query_Author": "",
            "Query_Age": 0,
            "Query_Subject": null,
            "Query_Colour": "red",
            "Author": "bob"
        })));
        assert!(spec.is_empty());
    }

    #[test]
    fn test_conjunction() {
        let message = stored(json!({"Author": "alice", "Subject": "hello"}));

        let author_only = QuerySpec::new().with("Author", "al*").build_predicate();
        assert!(author_only.matches(&message));

        let both = QuerySpec::new()
            .with("Author", "al*")
            .with("Subject", "h*")
            .build_predicate();
        assert!(both.matches(&message));

        let one_fails = QuerySpec::new()
            .with("Author", "al*")
            .with("Subject", "x*")
            .build_predicate();
        assert!(!one_fails.matches(&message));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let message = stored(json!({"Author": "alice"}));
        let predicate = QuerySpec::new().with("Subject", "*").build_predicate();
        assert!(!predicate.matches(&message));
    }

    #[test]
    fn test_numeric_fields_use_text() {
        let message = stored(json!({"Age": 42}));

        let spec = QuerySpec::from_fields(&fields(json!({"Query_Age": "4?"})));
        assert!(spec.build_predicate().matches(&message));

        let spec = QuerySpec::from_fields(&fields(json!({"Query_Age": 42})));
        assert!(spec.build_predicate().matches(&message));

        let spec = QuerySpec::from_fields(&fields(json!({"Query_Age": "5*"})));
        assert!(!spec.build_predicate().matches(&message));
    }

    #[test]
    fn test_spec_from_request_fields() {
        let spec = QuerySpec::from_fields(&fields(json!({
            "Query_Author": "al*",
            "Query_Message": "*x*"
        })));
        let names: Vec<&str> = spec.matchers().iter().map(|m| m.field.as_str()).collect();
        assert_eq!(names, vec!["Author", "Message"]);
    }
}
