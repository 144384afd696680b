//! Weighted connections between nodes, and the Hebbian learning pass over them.
//!
//! An edge is directed, optionally marked optional (bypassable), and carries both a
//! weight and the last transmitted signal. Weights are the unit of Hebbian adaptation:
//! after a token's confirmation cascade has settled, every edge whose two endpoints
//! fired is strengthened by a fixed increment, capped at `MAX_WEIGHT`. The update is a
//! separate pass, never applied inline during matching, so traversal stays pure.
//!
//! Invariant: weights are monotonically non-decreasing and never exceed `MAX_WEIGHT`.

use crate::core::node::{NodeArena, NodeId};
use serde::{Deserialize, Serialize};

/// Hard cap on edge weights.
pub const MAX_WEIGHT: f64 = 3.0;

/// Fixed Hebbian learning rate applied to co-active edges.
pub const LEARNING_RATE: f64 = 0.175;

/// What a connection between two nodes means.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Evidence feeding a construction (L23 → L5 within a position).
    FeedForward,
    /// A confirmed construction feeding an evidence node at an earlier anchor
    /// position (L5 → L23 across positions).
    Feedback,
    /// A partial construction registering an expectation on a predicted node.
    Prediction,
}

/// A weighted, directed link between two nodes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEdge {
    /// Source node id.
    pub source: NodeId,

    /// Target node id.
    pub target: NodeId,

    /// The meaning of this connection.
    pub kind: EdgeKind,

    /// Connection strength in `[0, MAX_WEIGHT]`; only ever increased.
    pub weight: f64,

    /// Whether the connection may be bypassed (optional pattern element).
    pub optional: bool,

    /// Whether the edge participates in propagation; cleared when an endpoint
    /// is removed from the arena.
    pub active: bool,

    /// The last signal transmitted over this edge (source activation × weight).
    pub signal: f64,
}

impl ConnectionEdge {
    /// Creates a fresh edge with unit weight.
    #[inline]
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind, optional: bool) -> Self {
        Self {
            source,
            target,
            kind,
            weight: 1.0,
            optional,
            active: true,
            signal: 0.0,
        }
    }
}

/// The Hebbian weight-update pass.
///
/// Runs over the arena's edge pool after a token's cascade has reached fixpoint:
/// - For every active edge whose source and target both fired, `weight += learning_rate`.
/// - Weights are capped at `max_weight`.
/// - The transmitted signal is refreshed from the source activation and new weight.
#[derive(Clone, Copy, Debug)]
pub struct HebbianLearner {
    /// Increment applied per co-active observation.
    pub learning_rate: f64,

    /// Upper bound for any weight.
    pub max_weight: f64,
}

impl Default for HebbianLearner {
    fn default() -> Self {
        Self {
            learning_rate: LEARNING_RATE,
            max_weight: MAX_WEIGHT,
        }
    }
}

impl HebbianLearner {
    /// Applies one update pass and returns how many edges were strengthened.
    pub fn apply(&self, arena: &mut NodeArena) -> usize {
        let mut updated = 0;
        for idx in 0..arena.edges().len() {
            let edge = arena.edges()[idx].clone();
            if !arena.edge_co_active(&edge) {
                continue;
            }
            let source_activation = arena
                .node(edge.source)
                .map(|n| n.activation)
                .unwrap_or(0.0);
            let edge = &mut arena.edges_mut()[idx];
            edge.weight = (edge.weight + self.learning_rate).min(self.max_weight);
            edge.signal = source_activation * edge.weight;
            updated += 1;
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::{EvidenceType, GraphRole, NodeKind};

    fn evidence(arena: &mut NodeArena, value: &str, pos: usize) -> NodeId {
        arena.insert(
            NodeKind::Evidence {
                etype: EvidenceType::Word,
                value: value.into(),
            },
            GraphRole::Data,
            (pos, pos),
        )
    }

    #[test]
    fn co_active_edges_are_strengthened_and_capped() {
        let mut arena = NodeArena::new();
        let a = evidence(&mut arena, "a", 0);
        let b = evidence(&mut arena, "b", 1);
        arena.connect(a, b, EdgeKind::FeedForward, false);

        let learner = HebbianLearner::default();
        // Enough passes to overrun the cap if it were not enforced.
        for _ in 0..30 {
            assert_eq!(learner.apply(&mut arena), 1);
        }
        let weight = arena.edges()[0].weight;
        assert!((weight - MAX_WEIGHT).abs() < 1e-9);
    }

    #[test]
    fn weights_never_decrease() {
        let mut arena = NodeArena::new();
        let a = evidence(&mut arena, "a", 0);
        let b = evidence(&mut arena, "b", 1);
        arena.connect(a, b, EdgeKind::FeedForward, false);

        let learner = HebbianLearner::default();
        let mut previous = arena.edges()[0].weight;
        for _ in 0..10 {
            learner.apply(&mut arena);
            let current = arena.edges()[0].weight;
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn inactive_endpoints_are_skipped() {
        let mut arena = NodeArena::new();
        let a = evidence(&mut arena, "a", 0);
        let b = evidence(&mut arena, "b", 1);
        arena.connect(a, b, EdgeKind::FeedForward, false);
        arena.node_mut(b).unwrap().activation = 0.0;

        let learner = HebbianLearner::default();
        assert_eq!(learner.apply(&mut arena), 0);
        assert!((arena.edges()[0].weight - 1.0).abs() < 1e-9);
    }
}
