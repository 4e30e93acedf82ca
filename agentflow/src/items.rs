//! Fan-out items: identity, normalization and batch formatting.

use crate::errors::ValidationError;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// A fan-out unit with a stable identity used for de-duplication.
pub trait Item {
    /// Returns the raw identity (a name or an id).
    fn identity(&self) -> &str;

    /// Returns the identity as compared for de-duplication.
    fn normalized_identity(&self) -> String {
        normalize_identity(self.identity())
    }
}

/// Normalizes an identity: trims surrounding whitespace and lower-cases it.
#[must_use]
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Drops items whose normalized identity was already seen; first occurrence wins.
pub fn dedupe_items<T: Item>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.normalized_identity()))
        .collect()
}

/// A formatted batch of items.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedBatch<T> {
    /// Surviving items in input order.
    pub items: Vec<T>,
    /// Records rejected as malformed.
    pub rejected: Vec<ValidationError>,
    /// Number of later duplicates that were silently dropped.
    pub duplicates: usize,
}

impl<T> FormattedBatch<T> {
    /// Returns the number of surviving items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing survived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Parses raw records into items, dropping malformed ones and duplicates.
///
/// A record is malformed if `parse` rejects it or its identity is empty after
/// normalization. Formatting a batch twice yields the same items.
pub fn format_batch<T, F>(raw: &[Value], parse: F) -> FormattedBatch<T>
where
    T: Item,
    F: Fn(&Value) -> Result<T, ValidationError>,
{
    let mut seen = HashSet::new();
    let mut batch = FormattedBatch {
        items: Vec::with_capacity(raw.len()),
        rejected: Vec::new(),
        duplicates: 0,
    };

    for (index, record) in raw.iter().enumerate() {
        let item = match parse(record) {
            Ok(item) => item,
            Err(e) => {
                debug!(item_index = index, error = %e, "Dropping malformed record");
                batch.rejected.push(e);
                continue;
            }
        };

        let key = item.normalized_identity();
        if key.is_empty() {
            debug!(item_index = index, "Dropping record with empty identity");
            batch
                .rejected
                .push(ValidationError::new(format!("record {index} has an empty identity")));
        } else if seen.insert(key) {
            batch.items.push(item);
        } else {
            batch.duplicates += 1;
        }
    }

    batch
}

/// Reads a required, non-empty string field of a record.
pub fn required_str<'a>(record: &'a Value, field: &str) -> Result<&'a str, ValidationError> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ValidationError::new(format!("missing or empty '{field}'")))
}

/// Reads an optional string field, trimmed, defaulting to empty.
#[must_use]
pub fn optional_str(record: &Value, field: &str) -> String {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Company {
        name: String,
    }

    impl Item for Company {
        fn identity(&self) -> &str {
            &self.name
        }
    }

    fn parse_company(record: &Value) -> Result<Company, ValidationError> {
        Ok(Company {
            name: required_str(record, "name")?.to_string(),
        })
    }

    #[test]
    fn test_normalize_identity() {
        assert_eq!(normalize_identity("  Acme Corp "), "acme corp");
        assert_eq!(normalize_identity("ACME"), normalize_identity("acme"));
    }

    #[test]
    fn test_format_batch_dedupes_case_insensitively() {
        let raw = vec![json!({"name": "Acme"}), json!({"name": "ACME"}), json!({"name": "Globex"})];

        let batch = format_batch(&raw, parse_company);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.items[0].name, "Acme");
        assert_eq!(batch.duplicates, 1);
    }

    #[test]
    fn test_format_batch_is_idempotent() {
        let raw = vec![json!({"name": "Acme"}), json!({"name": "ACME"})];

        let once = format_batch(&raw, parse_company);
        let reformatted: Vec<Value> = once.items.iter().map(|c| json!({"name": c.name})).collect();
        let twice = format_batch(&reformatted, parse_company);

        assert_eq!(twice.items, once.items);
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_format_batch_drops_malformed() {
        let raw = vec![json!({"name": "  "}), json!({"industry": "retail"}), json!({"name": "Initech"})];

        let batch = format_batch(&raw, parse_company);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch.rejected.len(), 2);
    }

    #[test]
    fn test_empty_identity_rejected_after_parse() {
        let lenient = |_: &Value| Ok(Company { name: "   ".to_string() });
        let batch = format_batch(&[json!({})], lenient);

        assert!(batch.is_empty());
        assert_eq!(batch.rejected.len(), 1);
    }

    #[test]
    fn test_dedupe_items() {
        let items = vec![
            Company { name: "Acme".into() },
            Company { name: " acme".into() },
            Company { name: "Hooli".into() },
        ];
        let names: Vec<String> = dedupe_items(items).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Acme", "Hooli"]);
    }

    #[test]
    fn test_optional_str() {
        let record = json!({"industry": " Fintech "});
        assert_eq!(optional_str(&record, "industry"), "Fintech");
        assert_eq!(optional_str(&record, "location"), "");
    }
}
