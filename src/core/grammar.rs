//! The read-only store of compiled construction patterns, plus the memoized
//! DATA-node lookup the construction layer queries on every token.
//!
//! The grammar is loaded once (from JSON; grammar is data, not code) and is never
//! mutated during a parse, so its caches are plain memoization and safe to share
//! read-only across runs:
//! - by literal word/lemma: which constructions can start with this surface value,
//! - by POS tag: which constructions can start with a slot for this tag,
//! - per construction: the precomputed starting candidates of its pattern graph,
//! - by pattern node id / outgoing-edge list: held inside each compiled `PatternGraph`.
//!
//! Reloading is a code-free operation: feed a new JSON document to `from_json_str` (or
//! `insert` individual graphs) and the caches are rebuilt.

use crate::core::error::{ClnError, Result};
use crate::core::pattern::{PatternGraph, PatternGraphSpec, PatternNodeKind};
use crate::core::traversal::{starting_nodes, Candidate, PositionEvidence};
use fxhash::FxHashMap;
use std::collections::BTreeMap;

/// The compiled grammar: pattern graphs keyed by construction id, with lookup caches.
#[derive(Debug, Default)]
pub struct Grammar {
    patterns: FxHashMap<String, PatternGraph>,

    /// Construction ids in insertion order; all enumeration is deterministic.
    order: Vec<String>,

    /// Starting candidates per construction, precomputed at insert time.
    starting: FxHashMap<String, Vec<Candidate>>,

    /// Lowercased literal value → constructions that can start with it.
    by_literal: FxHashMap<String, Vec<String>>,

    /// Uppercased POS tag → constructions that can start with a slot for it.
    by_pos: FxHashMap<String, Vec<String>>,

    /// Constructions that can start with a wildcard (candidates for any token).
    any_start: Vec<String>,
}

impl Grammar {
    /// Creates an empty grammar.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a whole grammar from its persisted JSON form: a map from construction id
    /// to pattern graph. Existing entries with the same ids are replaced.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let specs: BTreeMap<String, PatternGraphSpec> = serde_json::from_str(json)?;
        let mut grammar = Self::new();
        for (name, spec) in &specs {
            grammar.insert(name, spec)?;
        }
        Ok(grammar)
    }

    /// Compiles and indexes one pattern graph under the given construction id.
    /// Inserting an existing id replaces the old graph and rebuilds its cache entries.
    pub fn insert(&mut self, construction: &str, spec: &PatternGraphSpec) -> Result<()> {
        let graph = PatternGraph::compile(construction, spec)?;

        if self.patterns.contains_key(construction) {
            self.evict(construction);
        }

        let starts = starting_nodes(&graph);
        for candidate in &starts {
            match graph.kind(candidate.node) {
                PatternNodeKind::Literal { value } => {
                    self.by_literal
                        .entry(value.to_lowercase())
                        .or_default()
                        .push(construction.to_string());
                }
                PatternNodeKind::Slot { pos, .. } => {
                    self.by_pos
                        .entry(pos.clone())
                        .or_default()
                        .push(construction.to_string());
                }
                PatternNodeKind::Wildcard => {
                    self.any_start.push(construction.to_string());
                }
                _ => {}
            }
        }

        self.starting.insert(construction.to_string(), starts);
        self.patterns.insert(construction.to_string(), graph);
        self.order.push(construction.to_string());
        Ok(())
    }

    /// Drops one construction's cache entries (used when an id is re-inserted).
    fn evict(&mut self, construction: &str) {
        self.order.retain(|n| n != construction);
        self.starting.remove(construction);
        for list in self.by_literal.values_mut() {
            list.retain(|n| n != construction);
        }
        for list in self.by_pos.values_mut() {
            list.retain(|n| n != construction);
        }
        self.any_start.retain(|n| n != construction);
    }

    /// Looks up a compiled pattern graph.
    #[inline]
    pub fn pattern(&self, construction: &str) -> Option<&PatternGraph> {
        self.patterns.get(construction)
    }

    /// Looks up a compiled pattern graph, failing for unknown ids.
    #[inline]
    pub fn get(&self, construction: &str) -> Result<&PatternGraph> {
        self.patterns
            .get(construction)
            .ok_or_else(|| ClnError::UnknownConstruction(construction.to_string()))
    }

    /// The memoized starting candidates of a construction's pattern.
    #[inline]
    pub fn starting_candidates(&self, construction: &str) -> &[Candidate] {
        self.starting
            .get(construction)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Construction ids whose patterns could start on the given evidence, in
    /// deterministic (insertion) order without duplicates. A miss here is not an
    /// error: evidence with no candidates simply produces no constructions.
    pub fn candidates_for(&self, evidence: &PositionEvidence<'_>) -> Vec<&str> {
        let mut hits: Vec<&str> = Vec::new();

        if let Some(word) = evidence.word {
            if let Some(list) = self.by_literal.get(&word.to_lowercase()) {
                hits.extend(list.iter().map(String::as_str));
            }
        }
        if let Some(lemma) = evidence.lemma {
            if let Some(list) = self.by_literal.get(&lemma.to_lowercase()) {
                hits.extend(list.iter().map(String::as_str));
            }
        }
        for name in evidence.constructions {
            if let Some(list) = self.by_literal.get(&name.to_lowercase()) {
                hits.extend(list.iter().map(String::as_str));
            }
        }
        if let Some(pos) = evidence.pos {
            if let Some(list) = self.by_pos.get(&pos.to_uppercase()) {
                hits.extend(list.iter().map(String::as_str));
            }
        }
        hits.extend(self.any_start.iter().map(String::as_str));

        // Deduplicate, keeping grammar insertion order.
        let mut seen = FxHashMap::default();
        for (rank, name) in self.order.iter().enumerate() {
            seen.insert(name.as_str(), rank);
        }
        hits.sort_by_key(|name| seen.get(name).copied().unwrap_or(usize::MAX));
        hits.dedup();
        hits
    }

    /// All construction ids in insertion order.
    #[inline]
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Number of constructions.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the grammar holds no constructions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn evidence_word(word: &str) -> PositionEvidence<'_> {
        PositionEvidence {
            word: Some(word),
            ..Default::default()
        }
    }

    #[test]
    fn literal_lookup_is_case_insensitive() {
        let mut grammar = Grammar::new();
        grammar
            .insert("pelo_menos", &PatternGraphSpec::literal_chain(&["pelo", "menos"]))
            .unwrap();
        assert_eq!(grammar.candidates_for(&evidence_word("Pelo")), vec!["pelo_menos"]);
        assert!(grammar.candidates_for(&evidence_word("menos")).is_empty());
    }

    #[test]
    fn pos_lookup_hits_slot_starts() {
        let mut grammar = Grammar::new();
        grammar
            .insert("np", &PatternGraphSpec::slot_chain(&["NOUN", "VERB"]))
            .unwrap();
        let evidence = PositionEvidence {
            pos: Some("noun"),
            ..Default::default()
        };
        assert_eq!(grammar.candidates_for(&evidence), vec!["np"]);
    }

    #[test]
    fn construction_feedback_hits_literal_starts() {
        let mut grammar = Grammar::new();
        grammar
            .insert("higher", &PatternGraphSpec::literal_chain(&["pelo_menos", "dez"]))
            .unwrap();
        let constructions = vec!["pelo_menos".to_string()];
        let evidence = PositionEvidence {
            constructions: &constructions,
            ..Default::default()
        };
        assert_eq!(grammar.candidates_for(&evidence), vec!["higher"]);
    }

    #[test]
    fn reinsert_replaces_without_duplicates() {
        let mut grammar = Grammar::new();
        grammar
            .insert("x", &PatternGraphSpec::literal_chain(&["a"]))
            .unwrap();
        grammar
            .insert("x", &PatternGraphSpec::literal_chain(&["a", "b"]))
            .unwrap();
        assert_eq!(grammar.len(), 1);
        assert_eq!(grammar.candidates_for(&evidence_word("a")), vec!["x"]);
        assert_eq!(grammar.get("x").unwrap().element_count(), 2);
    }

    #[test]
    fn unknown_construction_is_an_error() {
        let grammar = Grammar::new();
        assert!(matches!(
            grammar.get("nope"),
            Err(ClnError::UnknownConstruction(_))
        ));
    }

    #[test]
    fn whole_grammar_loads_from_json() {
        let mut grammar = Grammar::new();
        grammar
            .insert("pelo_menos", &PatternGraphSpec::literal_chain(&["pelo", "menos"]))
            .unwrap();

        let json = serde_json::to_string(&std::collections::BTreeMap::from([(
            "pelo_menos",
            PatternGraphSpec::literal_chain(&["pelo", "menos"]),
        )]))
        .unwrap();
        let reloaded = Grammar::from_json_str(&json).unwrap();
        assert_eq!(reloaded.names(), grammar.names());
    }
}
