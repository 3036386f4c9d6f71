// SPDX-License-Identifier: MIT OR Apache-2.0
//! Filter rules, the rule-store request bodies built from them, and the
//! rule-file parser.

use relay_error::{Classify, ErrorCode};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A single filter rule: a predicate `value` understood by the stream
/// provider plus a human-readable `tag`.
///
/// Tags are labels only; two rules may share one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    tag: String,
    value: String,
}

impl Rule {
    /// Create a rule from its tag and predicate.
    pub fn new(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
        }
    }

    /// The rule's label.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The rule's filter predicate.
    pub fn value(&self) -> &str {
        &self.value
    }
}

// ---------------------------------------------------------------------------
// RuleSet
// ---------------------------------------------------------------------------

/// Ordered collection of rules. Insertion order is kept and drives the
/// order of the generated wire payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Create an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the set holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterate over the rules in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    /// Rule values, order-parallel with [`tags`](Self::tags).
    pub fn values(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::value).collect()
    }

    /// Rule tags, order-parallel with [`values`](Self::values).
    pub fn tags(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::tag).collect()
    }

    /// Reject the set if any rule has an empty or whitespace-only value.
    ///
    /// The first offending rule is reported.
    pub fn validate(&self) -> Result<(), RuleFileError> {
        match self
            .rules
            .iter()
            .position(|r| r.value.trim().is_empty())
        {
            Some(index) => Err(RuleFileError::EmptyValue {
                index,
                tag: self.rules[index].tag.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Build the bulk-add body for this set.
    pub fn add_request(&self) -> AddRulesRequest {
        AddRulesRequest {
            add: self
                .rules
                .iter()
                .map(|r| RuleSpec {
                    value: r.value.clone(),
                    tag: r.tag.clone(),
                })
                .collect(),
        }
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RuleSet {
    type Item = Rule;
    type IntoIter = std::vec::IntoIter<Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.into_iter()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

// ---------------------------------------------------------------------------
// Wire bodies
// ---------------------------------------------------------------------------

/// One element of the bulk-add array. Field order is `value`, then `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// Filter predicate.
    pub value: String,
    /// Rule label.
    pub tag: String,
}

/// Bulk-add body: `{"add": [{"value": .., "tag": ..}, ..]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddRulesRequest {
    /// Rules to create, in input order.
    pub add: Vec<RuleSpec>,
}

/// Bulk-delete body: `{"delete": {"ids": [..]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRulesRequest {
    /// Identifiers to delete.
    pub delete: DeleteIds,
}

/// Identifier list inside [`DeleteRulesRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteIds {
    /// Remote rule identifiers.
    pub ids: Vec<String>,
}

impl DeleteRulesRequest {
    /// Build a delete body for the given ids.
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            delete: DeleteIds {
                ids: ids.into_iter().collect(),
            },
        }
    }

    /// The ids this request deletes.
    pub fn ids(&self) -> &[String] {
        &self.delete.ids
    }
}

// ---------------------------------------------------------------------------
// Rule files
// ---------------------------------------------------------------------------

/// Errors raised while reading or validating a rule file.
#[derive(Debug, thiserror::Error)]
pub enum RuleFileError {
    /// No rule file was given.
    #[error("no rule file configured (pass --rules or set rules_file)")]
    NotConfigured,

    /// The file could not be read.
    #[error("cannot read rule file {path}: {source}")]
    Read {
        /// Path that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The content is not a valid rule document.
    #[error("malformed {format} rule file: {reason}")]
    Parse {
        /// Format the content was parsed as.
        format: RuleFormat,
        /// Parser diagnostic.
        reason: String,
    },

    /// A rule has an empty predicate.
    #[error("rule #{index} (tag '{tag}') has an empty value")]
    EmptyValue {
        /// Zero-based position of the rule.
        index: usize,
        /// Tag of the rule, for diagnostics.
        tag: String,
    },
}

impl Classify for RuleFileError {
    fn code(&self) -> ErrorCode {
        ErrorCode::RuleFileInvalid
    }
}

/// Supported rule-file syntaxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    /// `[[rules]]` tables.
    Toml,
    /// `{"rules": [..]}`.
    Json,
}

impl RuleFormat {
    /// Pick a format from a file extension: `.json` is JSON, anything else
    /// is TOML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl std::fmt::Display for RuleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Toml => f.write_str("toml"),
            Self::Json => f.write_str("json"),
        }
    }
}

#[derive(Deserialize)]
struct RuleDocument {
    rules: Vec<Rule>,
}

/// Parse a rule document. Pure: bytes in, ordered rules out.
///
/// Rules are not validated here; see [`RuleSet::validate`].
pub fn parse_rules(bytes: &[u8], format: RuleFormat) -> Result<RuleSet, RuleFileError> {
    let parse_err = |reason: String| RuleFileError::Parse { format, reason };
    let doc: RuleDocument = match format {
        RuleFormat::Json => serde_json::from_slice(bytes).map_err(|e| parse_err(e.to_string()))?,
        RuleFormat::Toml => {
            let text = std::str::from_utf8(bytes).map_err(|e| parse_err(e.to_string()))?;
            toml::from_str(text).map_err(|e| parse_err(e.to_string()))?
        }
    };
    Ok(doc.rules.into_iter().collect())
}

/// Read, parse, and validate the rule file at `path`.
pub fn load_rules(path: &Path) -> Result<RuleSet, RuleFileError> {
    let bytes = std::fs::read(path).map_err(|source| RuleFileError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let rules = parse_rules(&bytes, RuleFormat::from_path(path))?;
    rules.validate()?;
    Ok(rules)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> RuleSet {
        pairs.iter().map(|(t, v)| Rule::new(*t, *v)).collect()
    }

    #[test]
    fn values_keep_order_and_empties() {
        let rules = set(&[("tag", "value"), ("tag2", "")]);
        assert_eq!(rules.values(), vec!["value", ""]);
        assert_eq!(set(&[("tag", "value")]).values(), vec!["value"]);
        assert!(RuleSet::new().values().is_empty());
    }

    #[test]
    fn tags_keep_order_and_empties() {
        let rules = set(&[("tag", "value"), ("", "")]);
        assert_eq!(rules.tags(), vec!["tag", ""]);
        assert!(RuleSet::new().tags().is_empty());
    }

    fn add_json(rules: &RuleSet) -> String {
        serde_json::to_string(&rules.add_request()).unwrap()
    }

    #[test]
    fn add_body_two_rules() {
        let rules = set(&[("tag1", "value1"), ("tag2", "val2")]);
        assert_eq!(
            add_json(&rules),
            r#"{"add":[{"value":"value1","tag":"tag1"},{"value":"val2","tag":"tag2"}]}"#
        );
    }

    #[test]
    fn add_body_empty() {
        assert_eq!(add_json(&RuleSet::new()), r#"{"add":[]}"#);
    }

    #[test]
    fn add_body_escapes_quotes() {
        let rules = set(&[("q", r#""exact phrase" lang:en"#)]);
        let parsed = serde_json::to_value(rules.add_request()).unwrap();
        assert_eq!(parsed["add"][0]["value"], r#""exact phrase" lang:en"#);
    }

    #[test]
    fn delete_body_shape() {
        let body = DeleteRulesRequest::new(vec!["1".to_string(), "2".to_string()]);
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"delete":{"ids":["1","2"]}}"#
        );
    }

    #[test]
    fn validate_reports_first_empty_value() {
        let rules = set(&[("ok", "cats"), ("blank", "   "), ("empty", "")]);
        match rules.validate() {
            Err(RuleFileError::EmptyValue { index, tag }) => {
                assert_eq!(index, 1);
                assert_eq!(tag, "blank");
            }
            other => panic!("expected EmptyValue, got {other:?}"),
        }
    }

    #[test]
    fn parse_toml_document() {
        let doc = br#"
            [[rules]]
            tag = "cats with images"
            value = "cat has:images"

            [[rules]]
            tag = "dogs"
            value = "dog -is:retweet"
        "#;
        let rules = parse_rules(doc, RuleFormat::Toml).unwrap();
        assert_eq!(rules.tags(), vec!["cats with images", "dogs"]);
        assert_eq!(rules.values(), vec!["cat has:images", "dog -is:retweet"]);
    }

    #[test]
    fn parse_json_document_with_missing_tag() {
        let doc = br#"{"rules": [{"value": "from:rustlang"}]}"#;
        let rules = parse_rules(doc, RuleFormat::Json).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.iter().next().unwrap().tag(), "");
    }

    #[test]
    fn parse_rejects_missing_rules_key() {
        let err = parse_rules(br#"{"filters": []}"#, RuleFormat::Json).unwrap_err();
        assert!(matches!(err, RuleFileError::Parse { format: RuleFormat::Json, .. }));
    }

    #[test]
    fn parse_rejects_garbage_toml() {
        let err = parse_rules(b"rules = [not toml", RuleFormat::Toml).unwrap_err();
        assert!(matches!(err, RuleFileError::Parse { format: RuleFormat::Toml, .. }));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(RuleFormat::from_path(Path::new("rules.json")), RuleFormat::Json);
        assert_eq!(RuleFormat::from_path(Path::new("rules.JSON")), RuleFormat::Json);
        assert_eq!(RuleFormat::from_path(Path::new("rules.toml")), RuleFormat::Toml);
        assert_eq!(RuleFormat::from_path(Path::new("rules")), RuleFormat::Toml);
    }

    #[test]
    fn rule_file_errors_are_fatal() {
        let err = RuleFileError::EmptyValue {
            index: 0,
            tag: String::new(),
        };
        assert_eq!(err.code(), ErrorCode::RuleFileInvalid);
        assert!(err.is_fatal());
    }
}
