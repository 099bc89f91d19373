//! Deterministic embedders for tests.
//!
//! Enabled inside this crate's own tests and, for downstream crates, with
//! the `testing` feature.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::{Error, Result};

/// Bag-of-words embedder over a fixed vocabulary.
///
/// Each vocabulary word owns one axis; every other word lands on a final
/// shared axis. Text is lowercased and split on non-alphanumerics, so
/// `"Apples and oranges"` with vocabulary `["apples", "oranges"]` becomes
/// `[1, 1, 1]`. Blank text yields the zero vector.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    pub fn dims(&self) -> usize {
        self.vocabulary.len() + 1
    }

    /// Total `embed` calls so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts passed to `embed`, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Make every call whose text contains `needle` fail with
    /// [`Error::EmbeddingUnavailable`]. `None` clears it.
    pub fn fail_on(&self, needle: Option<&str>) {
        if let Ok(mut f) = self.fail_on.lock() {
            *f = needle.map(str::to_string);
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims()];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let axis = self
                .vocabulary
                .iter()
                .position(|w| *w == word)
                .unwrap_or(self.vocabulary.len());
            v[axis] += 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(text.to_string());
        }
        let failing = self
            .fail_on
            .lock()
            .ok()
            .and_then(|f| f.clone())
            .is_some_and(|needle| text.contains(&needle));
        if failing {
            return Err(Error::EmbeddingUnavailable("injected failure".into()));
        }
        Ok(self.vectorize(text))
    }
}

/// Always returns a vector of the configured length.
pub struct FixedDimEmbedder(pub usize);

#[async_trait]
impl Embedder for FixedDimEmbedder {
    fn model_name(&self) -> &str {
        "fixed-dim-test"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0; self.0])
    }
}
