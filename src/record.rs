//! Normalized paper record shared by every backend.

use serde::{Deserialize, Serialize};

/// A normalized paper reference.
///
/// Backends fill different subsets of the optional fields. Absent fields are
/// left out of the serialized form, so two backends describing the same paper
/// produce different history lines on purpose: dedupe is backend-local.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Record {
    /// Paper title
    pub title: String,
    /// Authors in upstream order. Google Scholar only exposes one aggregated
    /// author string, which ends up as a single element.
    #[serde(default)]
    pub authors: Vec<String>,
    /// Backend-specific identifier (arXiv id, Semantic Scholar paper id, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Landing page or identifying URL
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Abstract or snippet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Publication year
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    /// Journal or conference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
}

impl Record {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Collapse runs of whitespace (arXiv titles and abstracts are hard-wrapped).
pub(crate) fn squash_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turn an empty string into `None`.
pub(crate) fn non_empty(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
