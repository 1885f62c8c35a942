use codesearch_common::{CodeSearchError, Result};
use serde::{Deserialize, Serialize};

use crate::types::Metadata;

/// A single metadata condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    /// `metadata[key] == value`
    Equals { key: String, value: String },
    /// `metadata[key]` is one of `values`
    AnyOf { key: String, values: Vec<String> },
    /// `metadata[key]` starts with `prefix` (e.g. a directory)
    Prefix { key: String, prefix: String },
    /// `key` is present
    Exists { key: String },
}

impl Condition {
    fn key(&self) -> &str {
        match self {
            Self::Equals { key, .. }
            | Self::AnyOf { key, .. }
            | Self::Prefix { key, .. }
            | Self::Exists { key } => key,
        }
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        let value = metadata.get(self.key());
        match self {
            Self::Equals { value: expected, .. } => value == Some(expected),
            Self::AnyOf { values, .. } => value.map_or(false, |v| values.contains(v)),
            Self::Prefix { prefix, .. } => value.map_or(false, |v| v.starts_with(prefix.as_str())),
            Self::Exists { .. } => value.is_some(),
        }
    }
}

/// Conjunction of metadata conditions, applied before ranking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default)]
    pub must: Vec<Condition>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.must.push(Condition::Equals {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn any_of<I, S>(mut self, key: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.must.push(Condition::AnyOf {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn prefix(mut self, key: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.must.push(Condition::Prefix {
            key: key.into(),
            prefix: prefix.into(),
        });
        self
    }

    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.must.push(Condition::Exists { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty()
    }

    /// Reject filters that can never be meant as written
    pub fn validate(&self) -> Result<()> {
        for condition in &self.must {
            if condition.key().trim().is_empty() {
                return Err(CodeSearchError::invalid_query(
                    "filter condition has an empty key",
                ));
            }
            if let Condition::AnyOf { key, values } = condition {
                if values.is_empty() {
                    return Err(CodeSearchError::invalid_query(format!(
                        "filter any_of on '{}' has no values",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.must.iter().all(|c| c.matches(metadata))
    }
}
