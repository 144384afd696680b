//! Compiled construction pattern graphs.
//!
//! Grammar is data, not code: a pattern arrives as a persisted JSON structure
//! (`{nodes: {id: {type, value?, pos?, constraint?}}, edges: [{from, to, bypass?,
//! label?, optional?}]}`) and is compiled here into an index-based graph the traversal
//! can walk without string lookups.
//!
//! Node types:
//! - `START` / `END`: sentinel entry and exit.
//! - `LITERAL`: matches an exact word/lemma (case-insensitive); also matches a
//!   confirmed construction of that name, which is what makes recursive composition work.
//! - `SLOT`: matches a POS tag, optionally constrained by a `Feature=Value` pair.
//! - `WILDCARD`: matches any evidence.
//! - `INTERMEDIATE`: structural join point (e.g. the closing node of an alternation
//!   diamond); traversal passes through it transparently.
//! - `REP_CHECK`: repetition decision point with one `repeat`-labeled edge looping back
//!   and one `exit`-labeled edge leaving the loop.
//!
//! Alternation is a diamond `START → {e1..en} → join`; optional elements use a bypass
//! edge around the element; zero-or-more repetition adds a bypass edge around the whole
//! loop. Structural validation happens once at compile time; a graph that fails it is
//! rejected with `ClnError::MalformedPattern` rather than silently never confirming.

use crate::core::error::{ClnError, Result};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The persisted type tag of a pattern node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternNodeType {
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "END")]
    End,
    #[serde(rename = "LITERAL")]
    Literal,
    #[serde(rename = "SLOT")]
    Slot,
    #[serde(rename = "WILDCARD")]
    Wildcard,
    #[serde(rename = "INTERMEDIATE")]
    Intermediate,
    #[serde(rename = "REP_CHECK")]
    RepCheck,
}

/// One node of the persisted pattern-graph form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PatternNodeSpec {
    #[serde(rename = "type")]
    pub node_type: Option<PatternNodeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
}

/// One edge of the persisted pattern-graph form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternEdgeSpec {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bypass: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The persisted pattern-graph form, exactly as stored. Node ids map in a `BTreeMap`
/// so compile order (and therefore element indexing) is deterministic.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatternGraphSpec {
    pub nodes: BTreeMap<String, PatternNodeSpec>,
    pub edges: Vec<PatternEdgeSpec>,
    /// Whether elements must appear in sequence (default) or may arrive in any order.
    #[serde(default = "default_ordered")]
    pub ordered: bool,
}

impl Default for PatternGraphSpec {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            ordered: true,
        }
    }
}

fn default_ordered() -> bool {
    true
}

impl PatternGraphSpec {
    /// Parses a persisted pattern graph from its JSON form.
    #[inline]
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// A plain chain of literals: `START → w0 → w1 → … → END`.
    pub fn literal_chain(words: &[&str]) -> Self {
        let mut builder = PatternBuilder::new();
        let mut previous = "start".to_string();
        for (i, word) in words.iter().enumerate() {
            let id = format!("w{i}");
            builder.literal(&id, word);
            builder.edge(&previous, &id);
            previous = id;
        }
        builder.edge(&previous, "end");
        builder.build()
    }

    /// A plain chain of POS slots: `START → p0 → p1 → … → END`.
    pub fn slot_chain(tags: &[&str]) -> Self {
        let mut builder = PatternBuilder::new();
        let mut previous = "start".to_string();
        for (i, tag) in tags.iter().enumerate() {
            let id = format!("p{i}");
            builder.slot(&id, tag, None);
            builder.edge(&previous, &id);
            previous = id;
        }
        builder.edge(&previous, "end");
        builder.build()
    }
}

/// Incremental construction of a `PatternGraphSpec`. `start` and `end` sentinel nodes
/// exist from the beginning; everything else is added explicitly.
#[derive(Debug, Default)]
pub struct PatternBuilder {
    spec: PatternGraphSpec,
}

impl PatternBuilder {
    pub fn new() -> Self {
        let mut spec = PatternGraphSpec::default();
        spec.nodes.insert(
            "start".into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::Start),
                ..Default::default()
            },
        );
        spec.nodes.insert(
            "end".into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::End),
                ..Default::default()
            },
        );
        Self { spec }
    }

    /// Adds a LITERAL node.
    pub fn literal(&mut self, id: &str, value: &str) -> &mut Self {
        self.spec.nodes.insert(
            id.into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::Literal),
                value: Some(value.into()),
                ..Default::default()
            },
        );
        self
    }

    /// Adds a SLOT node for a POS tag, optionally with a `Feature=Value` constraint.
    pub fn slot(&mut self, id: &str, pos: &str, constraint: Option<&str>) -> &mut Self {
        self.spec.nodes.insert(
            id.into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::Slot),
                pos: Some(pos.into()),
                constraint: constraint.map(Into::into),
                ..Default::default()
            },
        );
        self
    }

    /// Adds a WILDCARD node.
    pub fn wildcard(&mut self, id: &str) -> &mut Self {
        self.spec.nodes.insert(
            id.into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::Wildcard),
                ..Default::default()
            },
        );
        self
    }

    /// Adds an INTERMEDIATE join node.
    pub fn intermediate(&mut self, id: &str) -> &mut Self {
        self.spec.nodes.insert(
            id.into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::Intermediate),
                ..Default::default()
            },
        );
        self
    }

    /// Adds a REP_CHECK decision node. Its outgoing edges must be added with
    /// `repeat_edge` and `exit_edge`.
    pub fn rep_check(&mut self, id: &str) -> &mut Self {
        self.spec.nodes.insert(
            id.into(),
            PatternNodeSpec {
                node_type: Some(PatternNodeType::RepCheck),
                ..Default::default()
            },
        );
        self
    }

    /// Adds a plain required edge.
    pub fn edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.spec.edges.push(PatternEdgeSpec {
            from: from.into(),
            to: to.into(),
            bypass: false,
            optional: false,
            label: None,
        });
        self
    }

    /// Adds a bypass edge skipping an optional element (or a whole repetition block).
    pub fn bypass_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.spec.edges.push(PatternEdgeSpec {
            from: from.into(),
            to: to.into(),
            bypass: true,
            optional: true,
            label: None,
        });
        self
    }

    /// Adds the looping-back edge of a REP_CHECK node.
    pub fn repeat_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.spec.edges.push(PatternEdgeSpec {
            from: from.into(),
            to: to.into(),
            bypass: false,
            optional: false,
            label: Some("repeat".into()),
        });
        self
    }

    /// Adds the exiting edge of a REP_CHECK node.
    pub fn exit_edge(&mut self, from: &str, to: &str) -> &mut Self {
        self.spec.edges.push(PatternEdgeSpec {
            from: from.into(),
            to: to.into(),
            bypass: false,
            optional: false,
            label: Some("exit".into()),
        });
        self
    }

    pub fn build(self) -> PatternGraphSpec {
        self.spec
    }
}

/// A compiled pattern node.
#[derive(Clone, Debug, PartialEq)]
pub enum PatternNodeKind {
    Start,
    End,
    Literal { value: String },
    Slot { pos: String, constraint: Option<String> },
    Wildcard,
    Intermediate,
    RepCheck,
}

impl PatternNodeKind {
    /// Whether this node consumes evidence.
    #[inline]
    pub fn is_element(&self) -> bool {
        matches!(
            self,
            PatternNodeKind::Literal { .. } | PatternNodeKind::Slot { .. } | PatternNodeKind::Wildcard
        )
    }

    /// Match specificity: LITERAL > SLOT > WILDCARD.
    #[inline]
    pub fn specificity(&self) -> u8 {
        match self {
            PatternNodeKind::Literal { .. } => 3,
            PatternNodeKind::Slot { .. } => 2,
            PatternNodeKind::Wildcard => 1,
            _ => 0,
        }
    }
}

/// A compiled outgoing edge.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledEdge {
    pub to: usize,
    pub bypass: bool,
    pub optional: bool,
    /// `repeat` / `exit` on REP_CHECK successors; `None` elsewhere.
    pub label: Option<String>,
}

/// A compiled, index-addressed pattern graph, ready for traversal.
#[derive(Clone, Debug)]
pub struct PatternGraph {
    /// The construction id this pattern belongs to.
    pub construction: String,

    /// Whether elements must appear in sequence.
    pub ordered: bool,

    kinds: Vec<PatternNodeKind>,
    ids: Vec<String>,
    index_of: FxHashMap<String, usize>,
    edges_out: Vec<Vec<CompiledEdge>>,
    start: usize,
    end: usize,
    /// Node indices of matchable elements, in deterministic (id-sorted) order.
    elements: Vec<usize>,
    element_index: FxHashMap<usize, usize>,
}

impl PatternGraph {
    /// Compiles and validates a persisted pattern graph:
    /// - Exactly one START and one END node must exist.
    /// - LITERAL nodes need a `value`; SLOT nodes need a `pos`.
    /// - Edge endpoints must exist.
    /// - Every node must be reachable from START, and END from START (a disconnected
    ///   element could never confirm).
    /// - Each REP_CHECK needs exactly one `repeat` and one `exit` successor.
    pub fn compile(construction: &str, spec: &PatternGraphSpec) -> Result<Self> {
        let malformed = |reason: &str| ClnError::MalformedPattern {
            construction: construction.to_string(),
            reason: reason.to_string(),
        };

        let mut kinds = Vec::with_capacity(spec.nodes.len());
        let mut ids = Vec::with_capacity(spec.nodes.len());
        let mut index_of = FxHashMap::default();

        for (id, node) in &spec.nodes {
            let kind = match node.node_type {
                Some(PatternNodeType::Start) => PatternNodeKind::Start,
                Some(PatternNodeType::End) => PatternNodeKind::End,
                Some(PatternNodeType::Literal) => PatternNodeKind::Literal {
                    value: node
                        .value
                        .clone()
                        .ok_or_else(|| malformed(&format!("LITERAL node `{id}` has no value")))?,
                },
                Some(PatternNodeType::Slot) => PatternNodeKind::Slot {
                    pos: node
                        .pos
                        .clone()
                        .ok_or_else(|| malformed(&format!("SLOT node `{id}` has no pos")))?
                        .to_uppercase(),
                    constraint: node.constraint.clone(),
                },
                Some(PatternNodeType::Wildcard) => PatternNodeKind::Wildcard,
                Some(PatternNodeType::Intermediate) => PatternNodeKind::Intermediate,
                Some(PatternNodeType::RepCheck) => PatternNodeKind::RepCheck,
                None => return Err(malformed(&format!("node `{id}` has no type"))),
            };
            index_of.insert(id.clone(), kinds.len());
            ids.push(id.clone());
            kinds.push(kind);
        }

        let start = kinds
            .iter()
            .position(|k| *k == PatternNodeKind::Start)
            .ok_or_else(|| malformed("missing START node"))?;
        let end = kinds
            .iter()
            .position(|k| *k == PatternNodeKind::End)
            .ok_or_else(|| malformed("missing END node"))?;
        if kinds.iter().filter(|k| **k == PatternNodeKind::Start).count() > 1 {
            return Err(malformed("more than one START node"));
        }
        if kinds.iter().filter(|k| **k == PatternNodeKind::End).count() > 1 {
            return Err(malformed("more than one END node"));
        }

        let mut edges_out: Vec<Vec<CompiledEdge>> = vec![Vec::new(); kinds.len()];
        for edge in &spec.edges {
            let from = *index_of
                .get(&edge.from)
                .ok_or_else(|| malformed(&format!("edge from unknown node `{}`", edge.from)))?;
            let to = *index_of
                .get(&edge.to)
                .ok_or_else(|| malformed(&format!("edge to unknown node `{}`", edge.to)))?;
            edges_out[from].push(CompiledEdge {
                to,
                bypass: edge.bypass,
                optional: edge.optional || edge.bypass,
                label: edge.label.clone(),
            });
        }

        // Reachability from START; a disconnected element could never be matched.
        let mut reachable = vec![false; kinds.len()];
        let mut stack = vec![start];
        reachable[start] = true;
        while let Some(current) = stack.pop() {
            for edge in &edges_out[current] {
                if !reachable[edge.to] {
                    reachable[edge.to] = true;
                    stack.push(edge.to);
                }
            }
        }
        if !reachable[end] {
            return Err(malformed("END not reachable from START"));
        }
        if let Some(idx) = reachable.iter().position(|&r| !r) {
            return Err(malformed(&format!("node `{}` unreachable from START", ids[idx])));
        }

        for (idx, kind) in kinds.iter().enumerate() {
            if *kind == PatternNodeKind::RepCheck {
                let repeats = edges_out[idx]
                    .iter()
                    .filter(|e| e.label.as_deref() == Some("repeat"))
                    .count();
                let exits = edges_out[idx]
                    .iter()
                    .filter(|e| e.label.as_deref() == Some("exit"))
                    .count();
                if repeats != 1 || exits != 1 {
                    return Err(malformed(&format!(
                        "REP_CHECK node `{}` needs exactly one `repeat` and one `exit` edge",
                        ids[idx]
                    )));
                }
            }
        }

        let elements: Vec<usize> = kinds
            .iter()
            .enumerate()
            .filter(|(_, k)| k.is_element())
            .map(|(i, _)| i)
            .collect();
        let element_index = elements
            .iter()
            .enumerate()
            .map(|(element, &node)| (node, element))
            .collect();

        Ok(Self {
            construction: construction.to_string(),
            ordered: spec.ordered,
            kinds,
            ids,
            index_of,
            edges_out,
            start,
            end,
            elements,
            element_index,
        })
    }

    /// Index of the START sentinel.
    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Index of the END sentinel.
    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    /// The compiled kind of a node.
    #[inline]
    pub fn kind(&self, node: usize) -> &PatternNodeKind {
        &self.kinds[node]
    }

    /// The persisted string id of a node.
    #[inline]
    pub fn id_of(&self, node: usize) -> &str {
        &self.ids[node]
    }

    /// Looks up a node index by its persisted id.
    #[inline]
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_of.get(id).copied()
    }

    /// Outgoing edges of a node (the memoized outgoing-edge list of the DATA lookup).
    #[inline]
    pub fn out_edges(&self, node: usize) -> &[CompiledEdge] {
        &self.edges_out[node]
    }

    /// Number of matchable elements; the length of a partial's `matched[]` array.
    #[inline]
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// The `matched[]` slot of an element node, if it is one.
    #[inline]
    pub fn element_slot(&self, node: usize) -> Option<usize> {
        self.element_index.get(&node).copied()
    }

    /// Whether the traversal sitting on `node` can complete: exactly when the node has
    /// a direct edge to END.
    #[inline]
    pub fn completes_from(&self, node: usize) -> bool {
        self.edges_out[node].iter().any(|e| e.to == self.end)
    }

    /// All element node indices, in deterministic order.
    #[inline]
    pub fn elements(&self) -> &[usize] {
        &self.elements
    }

    /// Total number of nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the graph has no nodes (never true for a compiled graph).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
