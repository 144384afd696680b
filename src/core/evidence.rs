//! The evidence layer (L23) of a column.
//!
//! L23 is where external input enters the graph and where expectations wait for it:
//! - `activate_from_input` turns a token into word/lemma/POS/feature evidence nodes.
//!   These are directly activated: their threshold is forced to 0 so they self-fire.
//! - Predicted nodes are created from upstream predictions and stay inert until
//!   confirmed; `confirm_token_predictions` compares an incoming token against them by
//!   exact type + value (word case-insensitive, POS uppercased, feature `Key=Value`)
//!   and confirms the first match. A predicted node is confirmed at most once.
//! - `receive_construction_feedback` creates a construction evidence node for a
//!   just-confirmed L5 pattern, which is what lets a confirmed multi-word expression
//!   become evidence for a higher-level phrase pattern (recursive composition). A
//!   same-named construction node at this position is reused, never duplicated.
//! - `cleanup_unconfirmed_predictions` garbage-collects predictions that never came
//!   true, bounding memory.
//!
//! The layer owns the ids of every node it creates; the nodes themselves live in the
//! shared arena.

use crate::core::edge::EdgeKind;
use crate::core::node::{EvidenceType, GraphRole, NodeArena, NodeId, NodeKind};
use crate::core::token::Token;
use crate::core::traversal::{Candidate, PositionEvidence};
use serde::{Deserialize, Serialize};

/// An expectation of a future token or construction, generated by a partial
/// construction's next unmatched pattern element. Ephemeral: it exists until a
/// predicted node is created in L23 and either confirmed or garbage-collected.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    /// Position of the partial construction that generated the expectation.
    pub source_position: usize,

    /// Position the predicted node is registered at (the partial's own position;
    /// later tokens are matched backward against it).
    pub target_position: usize,

    /// The evidence type expected.
    pub etype: EvidenceType,

    /// The expected value (surface form, POS tag, `Key=Value`, or construction name).
    /// The sentinel `"*"` (from a WILDCARD element) matches any token.
    pub value: String,

    /// An additional `Feature=Value` expectation for constrained slots.
    pub constraint: Option<String>,

    /// Completion ratio of the generating partial; reporting metadata only.
    pub strength: f64,

    /// The construction the partial is tracking.
    pub construction: String,

    /// The generating partial construction node.
    pub source_partial: NodeId,

    /// The traversal candidate to advance along if this prediction is confirmed.
    pub candidate: Candidate,
}

/// The evidence layer at one sequence position.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EvidenceLayer {
    /// The sequence position this layer sits at.
    pub position: usize,

    /// Every node created in this layer, in creation order.
    nodes: Vec<NodeId>,

    /// Ids of not-yet-resolved predicted nodes.
    predicted: Vec<NodeId>,

    /// Ids of construction feedback nodes at this position.
    constructions: Vec<NodeId>,

    // Cached values for cheap `PositionEvidence` construction.
    word_value: Option<String>,
    lemma_value: Option<String>,
    pos_value: Option<String>,
    feature_values: Vec<String>,
    construction_names: Vec<String>,
}

impl EvidenceLayer {
    /// Creates an empty layer for one position.
    #[inline]
    pub fn new(position: usize) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Creates word/lemma/POS/feature nodes from an external token. The nodes
    /// self-fire (threshold 0, activation 1.0). Returns the created ids.
    pub fn activate_from_input(&mut self, arena: &mut NodeArena, token: &Token) -> Vec<NodeId> {
        let span = (self.position, self.position);
        let mut created = Vec::new();

        let word = arena.insert(
            NodeKind::Evidence {
                etype: EvidenceType::Word,
                value: token.form.clone(),
            },
            GraphRole::Data,
            span,
        );
        created.push(word);
        self.word_value = Some(token.form.clone());

        if !token.lemma.is_empty() && token.lemma.to_lowercase() != token.form.to_lowercase() {
            let lemma = arena.insert(
                NodeKind::Evidence {
                    etype: EvidenceType::Lemma,
                    value: token.lemma.clone(),
                },
                GraphRole::Data,
                span,
            );
            created.push(lemma);
        }
        self.lemma_value = Some(token.lemma.clone());

        if !token.upos.is_empty() {
            let pos = arena.insert(
                NodeKind::Evidence {
                    etype: EvidenceType::Pos,
                    value: token.upos.to_uppercase(),
                },
                GraphRole::Data,
                span,
            );
            created.push(pos);
            self.pos_value = Some(token.upos.to_uppercase());
        }

        for feature in token.feature_pairs() {
            let node = arena.insert(
                NodeKind::Evidence {
                    etype: EvidenceType::Feature,
                    value: feature.clone(),
                },
                GraphRole::Data,
                span,
            );
            created.push(node);
            self.feature_values.push(feature);
        }

        self.nodes.extend(&created);
        created
    }

    /// Creates an inert predicted node from an upstream prediction and links the
    /// generating partial to it. The node must not fire until confirmed.
    pub fn receive_prediction(&mut self, arena: &mut NodeArena, prediction: &Prediction) -> NodeId {
        let id = arena.insert(
            NodeKind::Predicted {
                etype: prediction.etype,
                value: prediction.value.clone(),
                constraint: prediction.constraint.clone(),
                source_partial: prediction.source_partial,
                confirmed: false,
            },
            GraphRole::Data,
            (self.position, self.position),
        );
        arena.connect(prediction.source_partial, id, EdgeKind::Prediction, false);
        self.predicted.push(id);
        self.nodes.push(id);
        id
    }

    /// Ids of predicted nodes that have not been confirmed or collected yet.
    #[inline]
    pub fn predicted_nodes(&self) -> &[NodeId] {
        &self.predicted
    }

    /// Compares an incoming token against this layer's predicted nodes and confirms
    /// every first-time match (word: case-insensitive surface form; pos: uppercased
    /// tag; feature: exact `Key=Value`). Already-confirmed nodes are inert and never
    /// re-confirmed. Returns the ids confirmed by this token.
    pub fn confirm_token_predictions(
        &mut self,
        arena: &mut NodeArena,
        token: &Token,
    ) -> Vec<NodeId> {
        let mut confirmed_ids = Vec::new();
        for &id in &self.predicted {
            let Some(node) = arena.node_mut(id) else { continue };
            let NodeKind::Predicted {
                etype,
                value,
                constraint,
                confirmed,
                ..
            } = &mut node.kind
            else {
                continue;
            };
            if *confirmed {
                continue;
            }
            let value_hit = match etype {
                EvidenceType::Word => {
                    value == "*" || value.to_lowercase() == token.form.to_lowercase()
                }
                EvidenceType::Lemma => value.to_lowercase() == token.lemma.to_lowercase(),
                EvidenceType::Pos => *value == token.upos.to_uppercase(),
                EvidenceType::Feature => token.has_feature(value),
                EvidenceType::Construction => false,
            };
            let constraint_hit = match constraint {
                Some(c) => token.has_feature(c),
                None => true,
            };
            if value_hit && constraint_hit {
                *confirmed = true;
                node.activation = 1.0;
                confirmed_ids.push(id);
            }
        }
        confirmed_ids
    }

    /// Confirms the first unconfirmed predicted node whose word expectation equals the
    /// given name. This is how the backward confirmation walk resolves a just-confirmed
    /// construction against the LITERAL expectation of a higher pattern that names it.
    /// Once confirmed, a predicted node can never be claimed by a second construction.
    pub fn confirm_word_prediction(&mut self, arena: &mut NodeArena, word: &str) -> Option<NodeId> {
        for &id in &self.predicted {
            let Some(node) = arena.node_mut(id) else { continue };
            let NodeKind::Predicted {
                etype: EvidenceType::Word,
                value,
                confirmed,
                ..
            } = &mut node.kind
            else {
                continue;
            };
            if *confirmed || value.to_lowercase() != word.to_lowercase() {
                continue;
            }
            *confirmed = true;
            node.activation = 1.0;
            return Some(id);
        }
        None
    }

    /// Creates a construction evidence node for a just-confirmed L5 pattern and links
    /// it bidirectionally to the confirming construction node. Returns `None` when a
    /// same-named construction node already exists at this position (node reuse).
    pub fn receive_construction_feedback(
        &mut self,
        arena: &mut NodeArena,
        name: &str,
        span: (usize, usize),
        source: NodeId,
    ) -> Option<NodeId> {
        if self
            .construction_names
            .iter()
            .any(|n| n.to_lowercase() == name.to_lowercase())
        {
            return None;
        }
        let id = arena.insert(
            NodeKind::Evidence {
                etype: EvidenceType::Construction,
                value: name.to_string(),
            },
            GraphRole::Data,
            span,
        );
        arena.connect(source, id, EdgeKind::Feedback, false);
        arena.connect(id, source, EdgeKind::FeedForward, false);
        self.constructions.push(id);
        self.construction_names.push(name.to_string());
        self.nodes.push(id);
        Some(id)
    }

    /// Removes predicted nodes that were never confirmed, detaching them from the
    /// arena. Returns how many were collected.
    pub fn cleanup_unconfirmed_predictions(&mut self, arena: &mut NodeArena) -> usize {
        let mut collected = 0;
        self.predicted.retain(|&id| {
            let keep = matches!(
                arena.node(id).map(|n| &n.kind),
                Some(NodeKind::Predicted { confirmed: true, .. })
            );
            if !keep {
                arena.remove(id);
                collected += 1;
            }
            keep
        });
        self.nodes.retain(|&id| arena.node(id).is_some());
        collected
    }

    /// Drops one specific predicted node (used when a partial re-predicts after
    /// advancing and its stale expectations are replaced).
    pub fn drop_prediction(&mut self, arena: &mut NodeArena, id: NodeId) {
        if let Some(index) = self.predicted.iter().position(|&p| p == id) {
            self.predicted.remove(index);
            arena.remove(id);
            self.nodes.retain(|&n| n != id);
        }
    }

    /// The evidence visible at this position, for pattern matching.
    #[inline]
    pub fn position_evidence(&self) -> PositionEvidence<'_> {
        PositionEvidence {
            word: self.word_value.as_deref(),
            lemma: self.lemma_value.as_deref(),
            pos: self.pos_value.as_deref(),
            feats: &self.feature_values,
            constructions: &self.construction_names,
        }
    }

    /// Every node created in this layer.
    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Construction feedback nodes at this position.
    #[inline]
    pub fn construction_nodes(&self) -> &[NodeId] {
        &self.constructions
    }

    /// Evidence nodes not yet consumed by any construction, per `Node::is_consumed`:
    /// a feedback node's back-edge to its own construction does not consume it.
    /// These are the nodes the construction layer may start new partials from.
    pub fn unconsumed_evidence(&self, arena: &NodeArena) -> Vec<NodeId> {
        self.nodes
            .iter()
            .copied()
            .filter(|&id| {
                arena
                    .node(id)
                    .is_some_and(|n| matches!(n.kind, NodeKind::Evidence { .. }) && !n.is_consumed())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::node::PartialState;

    fn partial_node(arena: &mut NodeArena) -> NodeId {
        arena.insert(
            NodeKind::Partial(PartialState {
                construction: "x".into(),
                matched: vec![true, false],
                cursor: 0,
                anchor: 0,
                growth_history: Vec::new(),
                malformed: false,
                depth: 0,
            }),
            GraphRole::Sequencer,
            (0, 0),
        )
    }

    fn word_prediction(source: NodeId, value: &str) -> Prediction {
        Prediction {
            source_position: 0,
            target_position: 0,
            etype: EvidenceType::Word,
            value: value.into(),
            constraint: None,
            strength: 0.5,
            construction: "x".into(),
            source_partial: source,
            candidate: Candidate {
                node: 0,
                element: 1,
                via_bypass: false,
                rep: Default::default(),
            },
        }
    }

    #[test]
    fn input_activation_creates_self_firing_nodes() {
        let mut arena = NodeArena::new();
        let mut layer = EvidenceLayer::new(0);
        let token = Token::new("Casas", "NOUN")
            .with_lemma("casa")
            .with_feats("Gender=Fem|Number=Plur");
        let created = layer.activate_from_input(&mut arena, &token);
        // word + lemma + pos + 2 features
        assert_eq!(created.len(), 5);
        for id in created {
            let node = arena.node(id).unwrap();
            assert_eq!(node.threshold, 0);
            assert!(node.fired());
        }
        let evidence = layer.position_evidence();
        assert_eq!(evidence.word, Some("Casas"));
        assert_eq!(evidence.pos, Some("NOUN"));
        assert_eq!(evidence.feats.len(), 2);
    }

    #[test]
    fn token_confirms_matching_word_prediction_once() {
        let mut arena = NodeArena::new();
        let mut layer = EvidenceLayer::new(0);
        let partial = partial_node(&mut arena);
        let id = layer.receive_prediction(&mut arena, &word_prediction(partial, "menos"));
        assert!(!arena.node(id).unwrap().fired());

        let confirmed = layer.confirm_token_predictions(&mut arena, &Token::new("Menos", "ADV"));
        assert_eq!(confirmed, vec![id]);
        assert!(arena.node(id).unwrap().fired());

        // A second pass never re-confirms.
        let again = layer.confirm_token_predictions(&mut arena, &Token::new("menos", "ADV"));
        assert!(again.is_empty());
    }

    #[test]
    fn mismatched_predictions_are_garbage_collected() {
        let mut arena = NodeArena::new();
        let mut layer = EvidenceLayer::new(0);
        let partial = partial_node(&mut arena);
        let id = layer.receive_prediction(&mut arena, &word_prediction(partial, "menos"));
        layer.confirm_token_predictions(&mut arena, &Token::new("mais", "ADV"));

        assert_eq!(layer.cleanup_unconfirmed_predictions(&mut arena), 1);
        assert!(arena.node(id).is_none());
        assert!(layer.predicted_nodes().is_empty());
    }

    #[test]
    fn construction_feedback_reuses_same_named_node() {
        let mut arena = NodeArena::new();
        let mut layer = EvidenceLayer::new(2);
        let source = partial_node(&mut arena);

        let first = layer.receive_construction_feedback(&mut arena, "pelo_menos", (2, 3), source);
        assert!(first.is_some());
        let second = layer.receive_construction_feedback(&mut arena, "PELO_MENOS", (2, 3), source);
        assert!(second.is_none());
        assert_eq!(layer.construction_nodes().len(), 1);

        let evidence = layer.position_evidence();
        assert_eq!(evidence.constructions, ["pelo_menos".to_string()]);
    }

    #[test]
    fn unconsumed_evidence_excludes_consumed_nodes() {
        let mut arena = NodeArena::new();
        let mut layer = EvidenceLayer::new(0);
        let created = layer.activate_from_input(&mut arena, &Token::new("dog", "NOUN"));
        let partial = partial_node(&mut arena);
        arena.connect(created[0], partial, EdgeKind::FeedForward, false);

        let unconsumed = layer.unconsumed_evidence(&arena);
        assert!(!unconsumed.contains(&created[0]));
        assert!(unconsumed.contains(&created[1]));
    }

    #[test]
    fn feedback_back_edge_does_not_consume_the_node() {
        let mut arena = NodeArena::new();
        let mut layer = EvidenceLayer::new(0);
        let source = partial_node(&mut arena);
        let id = layer
            .receive_construction_feedback(&mut arena, "pelo_menos", (0, 1), source)
            .unwrap();
        // The bidirectional link to the producing construction leaves the node free.
        assert!(layer.unconsumed_evidence(&arena).contains(&id));

        let consumer = partial_node(&mut arena);
        arena.connect(id, consumer, EdgeKind::FeedForward, false);
        assert!(!layer.unconsumed_evidence(&arena).contains(&id));
    }
}
