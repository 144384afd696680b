//! Input tokens as delivered by the upstream tokenizer / dependency parser.
//!
//! The core consumes one `Token` per sequence position. A token carries the surface form,
//! lemma, universal POS tag, a morphological feature string in the usual CoNLL-U shape
//! (`"Key=Value|Key=Value"`), and the dependency relation plus head index.
//!
//! Matching conventions used throughout the engine:
//! - Surface forms and lemmas are compared case-insensitively.
//! - POS tags are compared uppercased.
//! - Features are compared as exact `Key=Value` strings after splitting on `|`.

use serde::{Deserialize, Serialize};

/// A single input token at one sequence position.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// The surface form as it appeared in the input.
    pub form: String,

    /// The lemma assigned by the upstream parser.
    pub lemma: String,

    /// The universal POS tag (e.g. `NOUN`, `VERB`).
    pub upos: String,

    /// Morphological features, pipe-separated `Key=Value` pairs. May be empty.
    pub feats: String,

    /// The dependency relation to the head token.
    pub deprel: String,

    /// The index of the head token in the sentence, if any.
    pub head: Option<usize>,
}

impl Token {
    /// Creates a token from the three fields the engine matches on.
    /// Lemma defaults to the lowercased form; feats/deprel stay empty.
    #[inline]
    pub fn new(form: impl Into<String>, upos: impl Into<String>) -> Self {
        let form = form.into();
        let lemma = form.to_lowercase();
        Self {
            form,
            lemma,
            upos: upos.into(),
            ..Default::default()
        }
    }

    /// Sets the lemma, builder style.
    #[inline]
    pub fn with_lemma(mut self, lemma: impl Into<String>) -> Self {
        self.lemma = lemma.into();
        self
    }

    /// Sets the feature string, builder style.
    #[inline]
    pub fn with_feats(mut self, feats: impl Into<String>) -> Self {
        self.feats = feats.into();
        self
    }

    /// Returns the individual `Key=Value` feature pairs, skipping malformed entries.
    /// The CoNLL-U placeholder `_` yields no features.
    #[inline]
    pub fn feature_pairs(&self) -> Vec<String> {
        self.feats
            .split('|')
            .filter(|f| !f.is_empty() && *f != "_" && f.contains('='))
            .map(str::to_string)
            .collect()
    }

    /// Whether the token carries the exact `Key=Value` feature.
    #[inline]
    pub fn has_feature(&self, constraint: &str) -> bool {
        self.feature_pairs().iter().any(|f| f == constraint)
    }

    /// A token is processable if it has a non-empty surface form.
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.form.trim().is_empty()
    }
}
