//! TF-IDF Vectorizer
//!
//! Local, offline text vectorization. The vocabulary is learned once (from an
//! explicit corpus, the full text set of the first batch run, or an exported
//! JSON copy) and then frozen, so every vector the vectorizer produces has the
//! same dimension.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Maximum vocabulary size (number of unique tokens tracked).
const MAX_VOCAB_SIZE: usize = 8192;

#[derive(Debug, Clone)]
struct Vocabulary {
    token_to_idx: HashMap<String, usize>,
    idf: Vec<f32>,
}

/// Exported form: `tokens[i]` owns vector slot `i`.
#[derive(Debug, Serialize, Deserialize)]
struct VocabularyFile {
    tokens: Vec<String>,
    idf: Vec<f32>,
}

impl Vocabulary {
    fn to_file(&self) -> VocabularyFile {
        let mut tokens = vec![String::new(); self.idf.len()];
        for (token, &idx) in &self.token_to_idx {
            tokens[idx] = token.clone();
        }
        VocabularyFile {
            tokens,
            idf: self.idf.clone(),
        }
    }

    fn from_file(file: VocabularyFile) -> Result<Self, String> {
        if file.tokens.is_empty() {
            return Err("vocabulary is empty".to_string());
        }
        if file.tokens.len() != file.idf.len() {
            return Err(format!(
                "vocabulary has {} tokens but {} idf weights",
                file.tokens.len(),
                file.idf.len()
            ));
        }
        if let Some(weight) = file.idf.iter().find(|w| !w.is_finite()) {
            return Err(format!("vocabulary has a non-finite idf weight: {}", weight));
        }
        let mut token_to_idx = HashMap::with_capacity(file.tokens.len());
        for (idx, token) in file.tokens.into_iter().enumerate() {
            if let Some(previous) = token_to_idx.insert(token, idx) {
                return Err(format!("vocabulary repeats a token at slots {} and {}", previous, idx));
            }
        }
        Ok(Self {
            token_to_idx,
            idf: file.idf,
        })
    }
}

/// Thread-safe TF-IDF vectorizer. Clones share the same vocabulary.
#[derive(Debug, Clone, Default)]
pub struct TfIdfVectorizer {
    vocab: Arc<RwLock<Option<Vocabulary>>>,
}

impl TfIdfVectorizer {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning only means another thread panicked mid-write of a plain
    // Option; the data is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Option<Vocabulary>> {
        self.vocab.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Vocabulary>> {
        self.vocab.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Vector length; 0 until a vocabulary exists.
    pub fn dimension(&self) -> usize {
        self.read().as_ref().map_or(0, |v| v.idf.len())
    }

    pub fn is_ready(&self) -> bool {
        self.read().is_some()
    }

    /// Build (or rebuild) the vocabulary from `corpus`.
    pub fn fit(&self, corpus: &[&str]) {
        *self.write() = Some(build_vocab(corpus));
    }

    /// Fit on `corpus` only if no vocabulary exists yet. Returns whether a
    /// vocabulary was built.
    pub fn fit_if_unfitted(&self, corpus: &[&str]) -> bool {
        let mut guard = self.write();
        if guard.is_some() {
            return false;
        }
        *guard = Some(build_vocab(corpus));
        true
    }

    /// The vocabulary as JSON, or `None` before one is built.
    pub fn export_vocabulary(&self) -> Option<String> {
        let file = self.read().as_ref()?.to_file();
        serde_json::to_string(&file).ok()
    }

    /// Replace the vocabulary with one produced by
    /// [`export_vocabulary`](Self::export_vocabulary).
    pub fn import_vocabulary(&self, json: &str) -> Result<(), String> {
        let file: VocabularyFile =
            serde_json::from_str(json).map_err(|e| format!("invalid vocabulary JSON: {}", e))?;
        let vocab = Vocabulary::from_file(file)?;
        *self.write() = Some(vocab);
        Ok(())
    }

    /// Vectorize one text. Empty until a vocabulary exists.
    pub fn transform(&self, text: &str) -> Vec<f32> {
        self.read()
            .as_ref()
            .map(|vocab| tfidf_vector(text, vocab))
            .unwrap_or_default()
    }

    /// Vectorize a batch, fitting the vocabulary on it first if none exists.
    pub fn fit_transform(&self, texts: &[&str]) -> Vec<Vec<f32>> {
        self.fit_if_unfitted(texts);
        let guard = self.read();
        match guard.as_ref() {
            Some(vocab) => texts.iter().map(|t| tfidf_vector(t, vocab)).collect(),
            None => vec![Vec::new(); texts.len()],
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenisation
// ---------------------------------------------------------------------------

/// Lowercase, split on non-alphanumerics, drop one-character tokens.
/// camelCase and snake_case identifiers also contribute their parts.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        let word = word.trim_matches('_');
        if word.chars().count() < 2 {
            continue;
        }
        let parts = split_identifier(word);
        let whole = word.to_lowercase();
        if parts.len() > 1 {
            tokens.extend(parts.into_iter().filter(|p| p.chars().count() >= 2));
        }
        tokens.push(whole);
    }
    tokens
}

fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for ch in word.chars() {
        if ch == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
        } else if ch.is_uppercase() && !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current.extend(ch.to_lowercase());
        } else {
            current.extend(ch.to_lowercase());
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

// ---------------------------------------------------------------------------
// Vocabulary and vectors
// ---------------------------------------------------------------------------

fn build_vocab(corpus: &[&str]) -> Vocabulary {
    let num_docs = corpus.len().max(1);

    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    for doc in corpus {
        let unique: HashSet<String> = tokenize(doc).into_iter().collect();
        for tok in unique {
            *doc_freq.entry(tok).or_insert(0) += 1;
        }
    }

    // Most frequent first, ties by token, so the layout is deterministic.
    let mut entries: Vec<(String, usize)> = doc_freq.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries.truncate(MAX_VOCAB_SIZE);

    let mut token_to_idx = HashMap::with_capacity(entries.len());
    let mut idf = Vec::with_capacity(entries.len());
    for (idx, (token, freq)) in entries.into_iter().enumerate() {
        token_to_idx.insert(token, idx);
        idf.push(((num_docs as f32) / (freq as f32)).ln() + 1.0);
    }

    Vocabulary { token_to_idx, idf }
}

/// L2-normalised TF-IDF vector of `text`.
fn tfidf_vector(text: &str, vocab: &Vocabulary) -> Vec<f32> {
    let dim = vocab.idf.len();
    if dim == 0 {
        return Vec::new();
    }

    let tokens = tokenize(text);
    let total = tokens.len().max(1) as f32;

    let mut v = vec![0.0f32; dim];
    for tok in &tokens {
        if let Some(&idx) = vocab.token_to_idx.get(tok) {
            v[idx] += 1.0 / total;
        }
    }
    for (x, idf) in v.iter_mut().zip(&vocab.idf) {
        *x *= idf;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}
