//! Document Filters
//!
//! Declarative predicates over a document's `file_path`, extension and
//! metadata. All configured conditions must hold; an empty filter matches
//! everything.

use std::collections::BTreeMap;

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use doc_retrieval_core::{CoreError, CoreResult};

use crate::models::Document;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilter {
    /// Accepted extensions (any of), compared case-insensitively, no dot.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<String>,
    /// Glob over `file_path`, e.g. `src/**/*.rs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_glob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Metadata entries that must be present with exactly these values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl DocumentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(mut self, extension: impl AsRef<str>) -> Self {
        self.extensions.push(normalize_extension(extension.as_ref()));
        self
    }

    pub fn with_path_glob(mut self, pattern: impl Into<String>) -> Self {
        self.path_glob = Some(pattern.into());
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
            && self.path_glob.is_none()
            && self.path_prefix.is_none()
            && self.metadata.is_empty()
    }

    /// Compile the filter once for repeated matching. Fails with a
    /// validation error on a malformed glob.
    pub fn matcher(&self) -> CoreResult<FilterMatcher<'_>> {
        let glob = self
            .path_glob
            .as_deref()
            .map(Pattern::new)
            .transpose()
            .map_err(|e| CoreError::validation(format!("invalid path glob: {}", e)))?;
        let extensions = self
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect();
        Ok(FilterMatcher {
            filter: self,
            glob,
            extensions,
        })
    }
}

/// A [`DocumentFilter`] with its glob compiled.
#[derive(Debug)]
pub struct FilterMatcher<'a> {
    filter: &'a DocumentFilter,
    glob: Option<Pattern>,
    extensions: Vec<String>,
}

impl FilterMatcher<'_> {
    pub fn matches(&self, document: &Document) -> bool {
        if !self.extensions.is_empty() {
            match document.extension() {
                Some(ext) if self.extensions.contains(&ext) => {}
                _ => return false,
            }
        }

        if self.glob.is_some() || self.filter.path_prefix.is_some() {
            let Some(path) = document.file_path() else {
                return false;
            };
            if let Some(glob) = &self.glob {
                if !glob.matches(path) {
                    return false;
                }
            }
            if let Some(prefix) = &self.filter.path_prefix {
                if !path.starts_with(prefix.as_str()) {
                    return false;
                }
            }
        }

        self.filter
            .metadata
            .iter()
            .all(|(key, expected)| document.metadata.get(key) == Some(expected))
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, path: &str) -> Document {
        Document::new(id, "text").with_file_path(path)
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = DocumentFilter::new();
        assert!(filter.is_empty());
        let m = filter.matcher().unwrap();
        assert!(m.matches(&Document::new("x", "no path")));
        assert!(m.matches(&doc("y", "src/lib.rs")));
    }

    #[test]
    fn extension_is_case_insensitive_and_dot_tolerant() {
        let filter = DocumentFilter::new().with_extension(".RS").with_extension("md");
        let m = filter.matcher().unwrap();
        assert!(m.matches(&doc("a", "src/Main.RS")));
        assert!(m.matches(&doc("b", "README.md")));
        assert!(!m.matches(&doc("c", "Cargo.toml")));
        assert!(!m.matches(&Document::new("d", "no path")));
    }

    #[test]
    fn glob_and_prefix_apply_to_file_path() {
        let filter = DocumentFilter::new()
            .with_path_glob("src/**/*.rs")
            .with_path_prefix("src/services");
        let m = filter.matcher().unwrap();
        assert!(m.matches(&doc("a", "src/services/vector/store.rs")));
        assert!(!m.matches(&doc("b", "src/lib.rs")));
        assert!(!m.matches(&doc("c", "src/services/notes.md")));
    }

    #[test]
    fn metadata_requires_exact_values() {
        let filter = DocumentFilter::new().with_metadata("lang", "rust");
        let m = filter.matcher().unwrap();
        assert!(m.matches(&Document::new("a", "t").with_metadata("lang", "rust")));
        assert!(!m.matches(&Document::new("b", "t").with_metadata("lang", "go")));
        assert!(!m.matches(&Document::new("c", "t")));
    }

    #[test]
    fn invalid_glob_is_a_validation_error() {
        let filter = DocumentFilter::new().with_path_glob("src/[");
        assert!(matches!(filter.matcher(), Err(CoreError::Validation(_))));
    }
}
