//! Document Models
//!
//! The canonical `Document` record and the per-call `EmbeddingResult`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Metadata key carrying the source path of a document. Downstream
/// consumers filter on it.
pub const FILE_PATH_KEY: &str = "file_path";

/// Free-form document metadata.
pub type Metadata = HashMap<String, Value>;

/// Provider description attached to every embedding call.
pub type ProviderInfo = HashMap<String, Value>;

/// A text document and its (optional) embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within a `DocumentStore`.
    pub id: String,

    /// Text that is embedded and returned to callers.
    pub text: String,

    /// Embedding vector, populated by the embedder manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document without a vector.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            vector: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a document with a freshly generated UUID v4 id.
    pub fn with_generated_id(text: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), text)
    }

    pub fn with_vector(mut self, vector: Vec<f64>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_file_path(self, path: impl Into<String>) -> Self {
        self.with_metadata(FILE_PATH_KEY, path.into())
    }

    /// The `file_path` metadata entry, if present and a string.
    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get(FILE_PATH_KEY).and_then(Value::as_str)
    }

    /// Lowercased file extension derived from `file_path`, without the dot.
    pub fn extension(&self) -> Option<String> {
        let path = self.file_path()?;
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }

    /// A zero-length vector counts as absent.
    pub fn has_vector(&self) -> bool {
        self.vector.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Length of the vector, if one is present.
    pub fn vector_dimension(&self) -> Option<usize> {
        self.vector
            .as_ref()
            .map(Vec::len)
            .filter(|len| *len > 0)
    }

    /// See [`vector_defect`]. `None` also when there is no vector.
    pub fn vector_defect(&self) -> Option<VectorDefect> {
        self.vector.as_deref().and_then(vector_defect)
    }
}

/// Why a vector cannot be ranked by cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorDefect {
    /// Every component is zero. Cosine distance treats such a vector as
    /// identical to everything.
    ZeroNorm,
    /// Some component is NaN or infinite.
    NonFinite,
}

impl fmt::Display for VectorDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroNorm => f.write_str("all components are zero"),
            Self::NonFinite => f.write_str("contains a NaN or infinite component"),
        }
    }
}

/// Check a non-empty vector at `f32` precision, the precision the index
/// computes in. Empty vectors count as absent and yield `None`.
pub fn vector_defect<T: Copy + Into<f64>>(vector: &[T]) -> Option<VectorDefect> {
    let mut all_zero = true;
    for &component in vector {
        let component = Into::<f64>::into(component) as f32;
        if !component.is_finite() {
            return Some(VectorDefect::NonFinite);
        }
        if component != 0.0 {
            all_zero = false;
        }
    }
    (all_zero && !vector.is_empty()).then_some(VectorDefect::ZeroNorm)
}

/// Output of a single embed call.
///
/// `error == None` is the success signal. On failure `vectors` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub vectors: Vec<Vec<f64>>,
    pub provider_info: ProviderInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EmbeddingResult {
    pub fn success(vectors: Vec<Vec<f64>>, provider_info: ProviderInfo) -> Self {
        Self {
            vectors,
            provider_info,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>, provider_info: ProviderInfo) -> Self {
        Self {
            vectors: Vec::new(),
            provider_info,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Dimension of the first vector, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }
}
