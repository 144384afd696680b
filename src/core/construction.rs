//! The construction layer (L5) of a column.
//!
//! L5 matches the evidence at its position against the compiled grammar and tracks
//! pattern matches in progress as *partial constructions*:
//! - `receive_l23_input` starts new partials from unconsumed evidence nodes (evidence
//!   already consumed by another construction is not reused; a feedback node's
//!   back-edge to its own construction does not consume it). A partial's `matched[]`
//!   array has one flag per pattern element, with the flag of the element that just
//!   matched pre-set.
//! - `advance` moves the traversal cursor when a later element matches, extends the
//!   partial's span, and runs the growth guard: a repeating growth stage (or an
//!   overflowing growth history) flags the partial as `malformed` instead of looping.
//! - `confirm` reclassifies the node as a confirmed construction, removes it from the
//!   partial index, and reports what was confirmed; it is idempotent, so confirming a
//!   construction twice has no additional effect.
//!
//! The feedback half of confirmation (creating the L23 construction node and cascading
//! backward confirmations) lives in the orchestrator, which owns the cross-column view.

use crate::core::edge::EdgeKind;
use crate::core::evidence::EvidenceLayer;
use crate::core::grammar::Grammar;
use crate::core::node::{EvidenceType, GraphRole, NodeArena, NodeId, NodeKind, PartialState};
use crate::core::pattern::{PatternGraph, PatternNodeKind};
use crate::core::traversal::{best_matching, Candidate};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// What `confirm` reports back to the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct Confirmation {
    /// The confirmed construction node.
    pub node: NodeId,
    /// Construction id.
    pub construction: String,
    /// Sequence span `[start, end]` covered by the match.
    pub span: (usize, usize),
    /// Element flags at confirmation time.
    pub matched: Vec<bool>,
    /// Composition depth of the construction.
    pub depth: u32,
}

/// The construction layer at one sequence position.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConstructionLayer {
    /// The sequence position this layer sits at.
    pub position: usize,

    /// Index of partial constructions anchored at this position.
    partials: Vec<NodeId>,

    /// Confirmed construction nodes anchored at this position.
    confirmed: Vec<NodeId>,
}

impl ConstructionLayer {
    /// Creates an empty layer for one position.
    #[inline]
    pub fn new(position: usize) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Attempts to start new partial constructions from the layer's unconsumed L23
    /// evidence. For every grammar candidate whose best-matching starting element
    /// matches an unconsumed evidence node, one partial is created (never
    /// two for one pattern at one position). Returns the ids of the partials created.
    pub fn receive_l23_input(
        &mut self,
        arena: &mut NodeArena,
        grammar: &Grammar,
        l23: &EvidenceLayer,
    ) -> Vec<NodeId> {
        let evidence = l23.position_evidence();
        let candidates = grammar.candidates_for(&evidence);
        let mut created = Vec::new();

        for name in candidates {
            if self.tracks_construction(arena, name) {
                continue;
            }
            let Some(graph) = grammar.pattern(name) else { continue };
            let Some(best) = best_matching(graph, grammar.starting_candidates(name), &evidence)
            else {
                continue;
            };
            let Some(evidence_id) = matching_evidence_node(arena, l23, graph.kind(best.node))
            else {
                continue;
            };
            // Evidence already consumed by another construction is not reused. The
            // back-edge of a feedback node to its own construction does not count
            // as consumption, so confirmed constructions seed higher patterns.
            if arena.node(evidence_id).is_none_or(Node::is_consumed) {
                continue;
            }
            let id = self.create_partial_construction(arena, graph, best, evidence_id);
            created.push(id);
        }
        created
    }

    /// Builds the traversal state for a fresh partial: a `matched[]` array the length
    /// of the pattern's element count with the starting element's flag set, the cursor
    /// on that element, and the composition depth derived from the consumed evidence.
    pub fn create_partial_construction(
        &mut self,
        arena: &mut NodeArena,
        graph: &PatternGraph,
        start: Candidate,
        evidence_id: NodeId,
    ) -> NodeId {
        let depth = evidence_depth(arena, evidence_id);
        let mut matched = vec![false; graph.element_count()];
        if let Some(slot) = graph.element_slot(start.node) {
            matched[slot] = true;
        }
        let role = if graph.element_count() == 1 {
            GraphRole::Data
        } else if graph.ordered {
            GraphRole::Sequencer
        } else {
            GraphRole::And
        };
        let state = PartialState {
            construction: graph.construction.clone(),
            matched,
            cursor: start.node,
            anchor: self.position,
            growth_history: Vec::new(),
            malformed: false,
            depth,
        };
        let id = arena.insert(
            NodeKind::Partial(state),
            role,
            (self.position, self.position),
        );
        if let Some(node) = arena.node_mut(id) {
            node.activation = 1.0 / graph.element_count().max(1) as f64;
        }
        arena.connect(evidence_id, id, EdgeKind::FeedForward, false);
        self.partials.push(id);
        id
    }

    /// Advances a partial along a chosen candidate after its expectation was met:
    /// marks the element, moves the cursor, extends the span to `position`, links the
    /// confirming evidence if present, and records one growth stage. Returns whether
    /// the partial can now complete (its cursor has a direct edge to END). A malformed
    /// partial never advances.
    pub fn advance(
        &mut self,
        arena: &mut NodeArena,
        graph: &PatternGraph,
        partial_id: NodeId,
        candidate: Candidate,
        position: usize,
        evidence_id: Option<NodeId>,
    ) -> bool {
        let stage = growth_stage(candidate.node, position);
        let Some(node) = arena.node_mut(partial_id) else {
            return false;
        };
        let Some(state) = node.partial_mut() else {
            return false;
        };
        if state.malformed {
            return false;
        }
        if !state.record_growth(stage) {
            return false;
        }
        if let Some(slot) = graph.element_slot(candidate.node) {
            state.matched[slot] = true;
        }
        state.cursor = candidate.node;
        let ratio = state.completion_ratio();
        node.activation = ratio;
        node.span.1 = node.span.1.max(position);
        if let Some(evidence) = evidence_id {
            arena.connect(evidence, partial_id, EdgeKind::FeedForward, false);
        }
        graph.completes_from(candidate.node)
    }

    /// Confirms a completed partial: the node is reclassified as a confirmed
    /// construction (it persists in the arena), removed from the partial index, and
    /// reported. Confirming an already-confirmed construction returns `None` and
    /// changes nothing.
    pub fn confirm(&mut self, arena: &mut NodeArena, partial_id: NodeId) -> Option<Confirmation> {
        let node = arena.node_mut(partial_id)?;
        let state = match &node.kind {
            NodeKind::Partial(state) if !state.malformed => state.clone(),
            _ => return None,
        };
        node.kind = NodeKind::Confirmed {
            construction: state.construction.clone(),
            depth: state.depth,
        };
        node.activation = 1.0;
        let span = node.span;

        self.partials.retain(|&id| id != partial_id);
        self.confirmed.push(partial_id);

        Some(Confirmation {
            node: partial_id,
            construction: state.construction,
            span,
            matched: state.matched,
            depth: state.depth,
        })
    }

    /// Whether a partial or confirmed instance of this construction is already
    /// anchored here.
    pub fn tracks_construction(&self, arena: &NodeArena, construction: &str) -> bool {
        self.partials
            .iter()
            .chain(self.confirmed.iter())
            .any(|&id| {
                arena
                    .node(id)
                    .and_then(Node::construction_name)
                    .is_some_and(|name| name == construction)
            })
    }

    /// Ids of partial constructions anchored at this position.
    #[inline]
    pub fn partials(&self) -> &[NodeId] {
        &self.partials
    }

    /// Ids of confirmed construction nodes anchored at this position.
    #[inline]
    pub fn confirmed(&self) -> &[NodeId] {
        &self.confirmed
    }
}

use crate::core::node::Node;

/// Fingerprint of one growth stage, fed to the cycle guard.
fn growth_stage(pattern_node: usize, position: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    pattern_node.hash(&mut hasher);
    position.hash(&mut hasher);
    hasher.finish()
}

/// Composition depth carried by a piece of evidence: construction feedback nodes sit
/// one level above the construction that produced them; raw evidence sits at 0.
fn evidence_depth(arena: &NodeArena, evidence_id: NodeId) -> u32 {
    let Some(node) = arena.node(evidence_id) else { return 0 };
    if !matches!(
        node.kind,
        NodeKind::Evidence {
            etype: EvidenceType::Construction,
            ..
        }
    ) {
        return 0;
    }
    node.inputs
        .iter()
        .filter_map(|&input| match arena.node(input).map(|n| &n.kind) {
            Some(NodeKind::Confirmed { depth, .. }) => Some(depth + 1),
            _ => None,
        })
        .max()
        .unwrap_or(1)
}

/// Finds the L23 node carrying the evidence a pattern element matched on.
pub(crate) fn matching_evidence_node(
    arena: &NodeArena,
    l23: &EvidenceLayer,
    kind: &PatternNodeKind,
) -> Option<NodeId> {
    let wanted = |id: &NodeId| arena.node(*id).and_then(Node::evidence_value);
    match kind {
        PatternNodeKind::Literal { value } => {
            let lowered = value.to_lowercase();
            l23.nodes().iter().copied().find(|id| {
                wanted(id).is_some_and(|(etype, v)| {
                    matches!(
                        etype,
                        EvidenceType::Word | EvidenceType::Lemma | EvidenceType::Construction
                    ) && v.to_lowercase() == lowered
                })
            })
        }
        PatternNodeKind::Slot { pos, .. } => l23.nodes().iter().copied().find(|id| {
            wanted(id).is_some_and(|(etype, v)| etype == EvidenceType::Pos && v == pos)
        }),
        PatternNodeKind::Wildcard => l23.nodes().iter().copied().find(|id| {
            wanted(id).is_some_and(|(etype, _)| {
                matches!(
                    etype,
                    EvidenceType::Word | EvidenceType::Pos | EvidenceType::Construction
                )
            })
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pattern::PatternGraphSpec;
    use crate::core::token::Token;
    use crate::core::traversal::{next_possible_nodes, starting_nodes, select_best_match};

    fn setup(words: &[&str]) -> (NodeArena, Grammar, EvidenceLayer) {
        let mut grammar = Grammar::new();
        grammar
            .insert("chain", &PatternGraphSpec::literal_chain(words))
            .unwrap();
        (NodeArena::new(), grammar, EvidenceLayer::new(0))
    }

    #[test]
    fn repeated_input_does_not_duplicate_a_partial() {
        let (mut arena, grammar, mut l23) = setup(&["pelo", "menos"]);
        let mut l5 = ConstructionLayer::new(0);
        l23.activate_from_input(&mut arena, &Token::new("pelo", "ADP"));

        let first = l5.receive_l23_input(&mut arena, &grammar, &l23);
        assert_eq!(first.len(), 1);
        let state = arena.node(first[0]).unwrap().partial().unwrap().clone();
        assert_eq!(state.construction, "chain");
        assert_eq!(state.matched, vec![true, false]);

        // The word node is consumed now; a second pass starts nothing.
        let second = l5.receive_l23_input(&mut arena, &grammar, &l23);
        assert!(second.is_empty());
    }

    #[test]
    fn construction_feedback_seeds_a_higher_pattern() {
        let mut grammar = Grammar::new();
        grammar
            .insert(
                "wrapper",
                &PatternGraphSpec::literal_chain(&["inner", "extra"]),
            )
            .unwrap();
        let mut arena = NodeArena::new();
        let mut l23 = EvidenceLayer::new(0);
        let mut l5 = ConstructionLayer::new(0);

        let confirmed = arena.insert(
            NodeKind::Confirmed {
                construction: "inner".into(),
                depth: 0,
            },
            GraphRole::Sequencer,
            (0, 1),
        );
        l23.receive_construction_feedback(&mut arena, "inner", (0, 1), confirmed)
            .unwrap();

        // The back-edge to the confirming construction is not consumption, so the
        // feedback node starts a partial one composition level up.
        let created = l5.receive_l23_input(&mut arena, &grammar, &l23);
        assert_eq!(created.len(), 1);
        let state = arena.node(created[0]).unwrap().partial().unwrap();
        assert_eq!(state.construction, "wrapper");
        assert_eq!(state.depth, 1);
    }

    #[test]
    fn advance_marks_elements_and_detects_completion() {
        let (mut arena, grammar, mut l23) = setup(&["pelo", "menos"]);
        let mut l5 = ConstructionLayer::new(0);
        l23.activate_from_input(&mut arena, &Token::new("pelo", "ADP"));
        let partial = l5.receive_l23_input(&mut arena, &grammar, &l23)[0];

        let graph = grammar.get("chain").unwrap();
        let cursor = arena.node(partial).unwrap().partial().unwrap().cursor;
        let next = next_possible_nodes(graph, cursor);
        let best = select_best_match(graph, &next).unwrap();

        let complete = l5.advance(&mut arena, graph, partial, best, 1, None);
        assert!(complete);
        let node = arena.node(partial).unwrap();
        assert_eq!(node.partial().unwrap().matched, vec![true, true]);
        assert_eq!(node.span, (0, 1));
    }

    #[test]
    fn confirm_is_idempotent() {
        let (mut arena, grammar, mut l23) = setup(&["pelo"]);
        let mut l5 = ConstructionLayer::new(0);
        l23.activate_from_input(&mut arena, &Token::new("pelo", "ADP"));
        let partial = l5.receive_l23_input(&mut arena, &grammar, &l23)[0];

        let first = l5.confirm(&mut arena, partial);
        assert!(first.is_some());
        assert_eq!(l5.partials().len(), 0);
        assert_eq!(l5.confirmed().len(), 1);
        let matched_after_first = first.unwrap().matched;

        let second = l5.confirm(&mut arena, partial);
        assert!(second.is_none());
        assert_eq!(l5.confirmed().len(), 1);
        // The underlying node is unchanged by the second call.
        assert!(matches!(
            arena.node(partial).unwrap().kind,
            NodeKind::Confirmed { .. }
        ));
        assert_eq!(matched_after_first, vec![true]);
    }

    #[test]
    fn repeated_growth_stage_marks_malformed_and_blocks_advancement() {
        let (mut arena, grammar, mut l23) = setup(&["pelo", "menos"]);
        let mut l5 = ConstructionLayer::new(0);
        l23.activate_from_input(&mut arena, &Token::new("pelo", "ADP"));
        let partial = l5.receive_l23_input(&mut arena, &grammar, &l23)[0];

        let graph = grammar.get("chain").unwrap();
        let cursor = arena.node(partial).unwrap().partial().unwrap().cursor;
        let next = next_possible_nodes(graph, cursor);
        let best = select_best_match(graph, &next).unwrap();

        assert!(l5.advance(&mut arena, graph, partial, best, 1, None));
        // Same stage again: the guard trips instead of looping.
        assert!(!l5.advance(&mut arena, graph, partial, best, 1, None));
        assert!(arena.node(partial).unwrap().partial().unwrap().malformed);
        // A malformed partial is excluded from confirmation.
        assert!(l5.confirm(&mut arena, partial).is_none());
    }

    #[test]
    fn one_partial_for_an_alternation_not_two() {
        let mut grammar = Grammar::new();
        let mut builder = crate::core::pattern::PatternBuilder::new();
        builder.slot("noun", "NOUN", None);
        builder.slot("propn", "PROPN", None);
        builder.intermediate("join");
        builder.slot("verb", "VERB", None);
        builder.edge("start", "noun");
        builder.edge("start", "propn");
        builder.edge("noun", "join");
        builder.edge("propn", "join");
        builder.edge("join", "verb");
        builder.edge("verb", "end");
        grammar.insert("subj_verb", &builder.build()).unwrap();

        let mut arena = NodeArena::new();
        let mut l23 = EvidenceLayer::new(0);
        let mut l5 = ConstructionLayer::new(0);
        l23.activate_from_input(&mut arena, &Token::new("Rex", "PROPN"));

        let created = l5.receive_l23_input(&mut arena, &grammar, &l23);
        assert_eq!(created.len(), 1);
        let graph = grammar.get("subj_verb").unwrap();
        let cursor = arena.node(created[0]).unwrap().partial().unwrap().cursor;
        assert_eq!(graph.id_of(cursor), "propn");
    }

    #[test]
    fn starting_candidates_match_traversal() {
        let (arena, grammar, _) = setup(&["pelo", "menos"]);
        let graph = grammar.get("chain").unwrap();
        assert_eq!(
            grammar.starting_candidates("chain"),
            starting_nodes(graph).as_slice()
        );
        drop(arena);
    }
}
