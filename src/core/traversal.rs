//! Pure graph traversal over compiled pattern graphs.
//!
//! Everything in this module is stateless and side-effect free: functions take a
//! `PatternGraph` plus a cursor position and enumerate admissible next elements. Each
//! partial construction walks its own pattern independently, so there is no shared
//! mutable state between concurrently matching partials.
//!
//! Enumeration rules:
//! - `starting_nodes` lists all direct successors of START, which handles alternation
//!   at the very start (a diamond fans out from START).
//! - `next_possible_nodes` lists admissible successors of the current node, expanding
//!   REP_CHECK decision nodes into their two successors tagged `Repeat` / `ExitRepeat`,
//!   passing transparently through INTERMEDIATE join nodes, and tagging anything reached
//!   over a bypass edge as optional.
//! - `select_best_match` is the deterministic tie-breaker: required before optional
//!   (non-bypass before bypass), then greedy continuation of a repetition over exiting
//!   it, then specificity (LITERAL > SLOT > WILDCARD), then node order.

use crate::core::pattern::{PatternGraph, PatternNodeKind};

/// How a candidate relates to a repetition loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RepTag {
    /// Continues a repetition; preferred, since repetition is greedy.
    Repeat,
    /// Not part of a repetition decision.
    #[default]
    Plain,
    /// Leaves a repetition loop.
    ExitRepeat,
}

/// One admissible next element of a traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Pattern node index of the element.
    pub node: usize,

    /// Slot in the partial's `matched[]` array.
    pub element: usize,

    /// Whether this element was reached over a bypass edge (optional path).
    pub via_bypass: bool,

    /// Repetition tag from REP_CHECK expansion.
    pub rep: RepTag,
}

/// The evidence visible at one sequence position, borrowed from the L23 layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PositionEvidence<'a> {
    pub word: Option<&'a str>,
    pub lemma: Option<&'a str>,
    pub pos: Option<&'a str>,
    pub feats: &'a [String],
    /// Names of confirmed constructions fed back at this position.
    pub constructions: &'a [String],
}

/// Enumerates the admissible first elements of a pattern (all direct START successors,
/// expanded the same way as any other step).
#[inline]
pub fn starting_nodes(graph: &PatternGraph) -> Vec<Candidate> {
    next_possible_nodes(graph, graph.start())
}

/// Enumerates the admissible next elements from `cursor`.
pub fn next_possible_nodes(graph: &PatternGraph, cursor: usize) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut visited = vec![false; graph.len()];
    expand(graph, cursor, false, RepTag::Plain, &mut visited, &mut candidates);
    candidates
}

/// Depth-first expansion of one step's successors. Element nodes terminate the
/// expansion; INTERMEDIATE and REP_CHECK nodes are expanded through.
fn expand(
    graph: &PatternGraph,
    from: usize,
    via_bypass: bool,
    rep: RepTag,
    visited: &mut [bool],
    candidates: &mut Vec<Candidate>,
) {
    if visited[from] {
        return;
    }
    visited[from] = true;

    for edge in graph.out_edges(from) {
        let bypassed = via_bypass || edge.bypass;
        let tag = match edge.label.as_deref() {
            Some("repeat") => RepTag::Repeat,
            Some("exit") => RepTag::ExitRepeat,
            _ => rep,
        };
        match graph.kind(edge.to) {
            kind if kind.is_element() => {
                if let Some(element) = graph.element_slot(edge.to) {
                    candidates.push(Candidate {
                        node: edge.to,
                        element,
                        via_bypass: bypassed,
                        rep: tag,
                    });
                }
            }
            PatternNodeKind::Intermediate | PatternNodeKind::RepCheck => {
                expand(graph, edge.to, bypassed, tag, visited, candidates);
            }
            // END terminates a path (completion is checked via `completes_from`);
            // START never appears as a successor in a validated graph.
            _ => {}
        }
    }
}

/// Whether a pattern element matches the evidence at a position.
///
/// - LITERAL: case-insensitive against the surface form, the lemma, or any confirmed
///   construction name (recursive composition enters here).
/// - SLOT: uppercased POS equality, plus the `Feature=Value` constraint if present.
/// - WILDCARD: matches as long as the position carries any evidence at all.
pub fn element_matches(kind: &PatternNodeKind, evidence: &PositionEvidence<'_>) -> bool {
    match kind {
        PatternNodeKind::Literal { value } => {
            let wanted = value.to_lowercase();
            evidence
                .word
                .is_some_and(|w| w.to_lowercase() == wanted)
                || evidence
                    .lemma
                    .is_some_and(|l| l.to_lowercase() == wanted)
                || evidence
                    .constructions
                    .iter()
                    .any(|c| c.to_lowercase() == wanted)
        }
        PatternNodeKind::Slot { pos, constraint } => {
            let pos_matches = evidence.pos.is_some_and(|p| p.to_uppercase() == *pos);
            let constraint_matches = match constraint {
                Some(c) => evidence.feats.iter().any(|f| f == c),
                None => true,
            };
            pos_matches && constraint_matches
        }
        PatternNodeKind::Wildcard => {
            evidence.word.is_some()
                || evidence.pos.is_some()
                || !evidence.constructions.is_empty()
        }
        _ => false,
    }
}

/// Picks the single best candidate out of those whose element matched, applying the
/// deterministic priority order. Returns `None` for an empty slice.
pub fn select_best_match(graph: &PatternGraph, candidates: &[Candidate]) -> Option<Candidate> {
    candidates
        .iter()
        .min_by_key(|c| {
            (
                c.via_bypass,                         // required before optional
                c.rep,                                // Repeat < Plain < ExitRepeat
                u8::MAX - graph.kind(c.node).specificity(), // LITERAL > SLOT > WILDCARD
                c.node,                               // total order
            )
        })
        .copied()
}

/// Filters `candidates` down to those matching `evidence` and picks the best one.
#[inline]
pub fn best_matching(
    graph: &PatternGraph,
    candidates: &[Candidate],
    evidence: &PositionEvidence<'_>,
) -> Option<Candidate> {
    let matching: Vec<Candidate> = candidates
        .iter()
        .filter(|c| element_matches(graph.kind(c.node), evidence))
        .copied()
        .collect();
    select_best_match(graph, &matching)
}
