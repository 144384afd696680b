//! The column orchestrator: the sequence-level processing loop.
//!
//! The network owns the chain of columns (one per token position), the shared node
//! arena, the prediction registry and the confirmed-construction output. Processing is
//! single-threaded and strictly sequential: column *i+1* is only activated after column
//! *i*'s cascade of confirmations has reached fixpoint, because the backward
//! confirmation search must see a stable prior state.
//!
//! Per incoming token:
//! 1. Activate L23 at the new position from the token (word/lemma/POS/feature nodes).
//! 2. Match the token backward against the predicted nodes of every earlier column and
//!    of the new column itself; each hit advances the generating partial construction.
//! 3. Feed the new evidence forward into L5, starting partial constructions for
//!    matching grammar patterns.
//! 4. Drain the confirmation cascade to fixpoint: confirming a construction spawns one
//!    feedback node in L23 at its anchor position, which can start higher-level
//!    partials and confirm earlier predictions, cascading further. There is no fixed
//!    iteration count; the composition-depth ceiling bounds the recursion instead.
//! 5. Finalize: every live partial without outstanding expectations registers one
//!    prediction per admissible next element at the partial's own position, where
//!    later tokens will look for it.
//! 6. If learning is enabled, run the Hebbian pass over co-active edges, then
//!    integrate the column populations one step.
//!
//! The only shared mutable resource is the node/edge graph itself; every layer mutates
//! only the nodes it owns, and all cross-column mutation funnels through this module.

use crate::core::column::{Column, ColumnState, CorticalLevel, PopulationDrive, RntStatus};
use crate::core::construction::{matching_evidence_node, Confirmation};
use crate::core::edge::{ConnectionEdge, EdgeKind, HebbianLearner};
use crate::core::error::{ClnError, Result};
use crate::core::evidence::Prediction;
use crate::core::grammar::Grammar;
use crate::core::node::{EvidenceType, GraphRole, Node, NodeArena, NodeId, NodeKind};
use crate::core::pattern::{PatternGraph, PatternNodeKind};
use crate::core::token::Token;
use crate::core::traversal::{next_possible_nodes, select_best_match, Candidate};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Parameters governing the processing loop.
#[derive(Clone, Copy, Debug)]
pub struct NetworkParams {
    /// Ceiling on recursive composition; feedback creation silently stops here.
    pub max_composition_depth: u32,

    /// Whether the Hebbian pass runs after each token.
    pub learning_enabled: bool,

    /// Integration step for the column populations.
    pub dt: f64,

    /// Cortical level of the columns this network creates.
    pub cortical_level: CorticalLevel,
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            max_composition_depth: 5,
            learning_enabled: true,
            dt: 1.0,
            cortical_level: CorticalLevel::L1,
        }
    }
}

/// One confirmed construction, as reported to the consumer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedConstruction {
    /// Construction id.
    pub name: String,

    /// Sequence span `[start, end]` (inclusive positions).
    pub span: (usize, usize),

    /// Element flags of the pattern at confirmation time.
    pub matched: Vec<bool>,

    /// Composition depth (0 = built from raw evidence).
    pub depth: u32,
}

/// A serializable dump of the final node/edge graph plus the confirmed set,
/// consumable by a rendering or reporting layer.
#[derive(Debug, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<ConnectionEdge>,
    pub confirmed: Vec<ConfirmedConstruction>,
}

/// Work items of the confirmation cascade. Confirmations are processed in FIFO order,
/// which together with the deterministic traversal makes the whole cascade ordering
/// reproducible.
#[derive(Clone, Copy, Debug)]
enum CascadeEvent {
    Confirm {
        position: usize,
        partial: NodeId,
        end_position: usize,
    },
}

/// The sequence-level network: columns, arena, predictions, output.
#[derive(Debug)]
pub struct Network {
    params: NetworkParams,
    grammar: Grammar,
    arena: NodeArena,
    columns: Vec<Column>,
    learner: HebbianLearner,

    /// Predicted node id → the prediction that created it.
    predictions: FxHashMap<NodeId, Prediction>,

    /// Partial id → its outstanding predicted nodes.
    by_partial: FxHashMap<NodeId, Vec<NodeId>>,

    /// Confirmed constructions in confirmation order.
    confirmed: Vec<ConfirmedConstruction>,

    /// Whether any feedback node was created while processing the current token
    /// (drives the VIP population).
    feedback_this_token: bool,
}

impl Network {
    /// Creates a network over a compiled grammar.
    #[inline]
    pub fn new(grammar: Grammar, params: NetworkParams) -> Self {
        Self {
            params,
            grammar,
            arena: NodeArena::new(),
            columns: Vec::new(),
            learner: HebbianLearner::default(),
            predictions: FxHashMap::default(),
            by_partial: FxHashMap::default(),
            confirmed: Vec::new(),
            feedback_this_token: false,
        }
    }

    /// Processes one incoming token and returns its sequence position.
    ///
    /// Fails only for truly invalid input (empty surface form); in that case no column
    /// is created and the state of prior columns is untouched.
    pub fn process_token(&mut self, token: &Token) -> Result<usize> {
        if !token.is_valid() {
            return Err(ClnError::InvalidToken(format!("{token:?}")));
        }

        let position = self.columns.len();
        let mut column = Column::new(position, self.params.cortical_level);
        if !column.accepts_input() {
            return Err(ClnError::ColumnNotAccepting { position });
        }
        self.feedback_this_token = false;

        // 1. Raw input enters L23; the evidence nodes self-fire.
        column.l23.activate_from_input(&mut self.arena, token);
        column.mark_activated();
        self.columns.push(column);

        let mut queue: VecDeque<CascadeEvent> = VecDeque::new();

        // 2. Backward confirmation: walk every earlier column (most recent first),
        //    then the new column itself, matching the token against predicted nodes.
        for col_idx in (0..=position).rev() {
            let hits = self.columns[col_idx]
                .l23
                .confirm_token_predictions(&mut self.arena, token);
            self.resolve_confirmed_predictions(&hits, position, &mut queue);
        }

        // 3. Feed-forward into L5 at the new position.
        self.activate_constructions(position, &mut queue);

        // 4. Confirmation cascade to fixpoint.
        self.drain_cascade(&mut queue);

        // 5. Register fresh predictions for every live partial that has none.
        self.register_missing_predictions();

        // 6. Learning and population dynamics.
        if self.params.learning_enabled {
            self.learner.apply(&mut self.arena);
        }
        self.tick_columns(position);

        Ok(position)
    }

    /// Processes a whole token sequence, then finalizes.
    pub fn process_tokens(&mut self, tokens: &[Token]) -> Result<()> {
        for token in tokens {
            self.process_token(token)?;
        }
        self.finish();
        Ok(())
    }

    /// End-of-sequence bookkeeping: garbage-collects every unconfirmed prediction and
    /// marks root columns (a confirmed construction not consumed by any higher one).
    pub fn finish(&mut self) {
        for column in &mut self.columns {
            column.l23.cleanup_unconfirmed_predictions(&mut self.arena);
        }
        self.predictions.clear();
        self.by_partial.clear();
        self.mark_roots();
    }

    /// Clears all per-sequence state; the grammar and its caches stay warm.
    pub fn reset(&mut self) {
        self.arena = NodeArena::new();
        self.columns.clear();
        self.predictions.clear();
        self.by_partial.clear();
        self.confirmed.clear();
    }

    /// The confirmed constructions, in confirmation order.
    #[inline]
    pub fn confirmed(&self) -> &[ConfirmedConstruction] {
        &self.confirmed
    }

    /// Confirmed constructions anchored at one position.
    pub fn confirmed_at(&self, position: usize) -> Vec<&ConfirmedConstruction> {
        self.confirmed
            .iter()
            .filter(|c| c.span.0 == position)
            .collect()
    }

    /// The column at a position, if it exists yet.
    #[inline]
    pub fn column(&self, position: usize) -> Option<&Column> {
        self.columns.get(position)
    }

    /// Number of processed positions.
    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether no token has been processed yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Shared access to the node arena (for inspection and reporting).
    #[inline]
    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    /// A serializable dump of the current graph and output.
    pub fn snapshot(&self) -> NetworkSnapshot {
        NetworkSnapshot {
            nodes: self.arena.iter().cloned().collect(),
            edges: self.arena.edges().to_vec(),
            confirmed: self.confirmed.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Starts new partial constructions from the unconsumed evidence at `position`
    /// and queues confirmations for patterns that already complete on their first
    /// element.
    fn activate_constructions(&mut self, position: usize, queue: &mut VecDeque<CascadeEvent>) {
        let Some(column) = self.columns.get_mut(position) else { return };
        let Column { l23, l5, rnt_status, .. } = column;
        let created = l5.receive_l23_input(&mut self.arena, &self.grammar, l23);

        for partial in created {
            let Some(node) = self.arena.node(partial) else { continue };
            let role = node.role;
            let Some(state) = node.partial() else { continue };
            let cursor = state.cursor;
            let construction = state.construction.clone();

            match role {
                GraphRole::Sequencer => {
                    rnt_status.advance_to(RntStatus::SequencerPartial);
                }
                GraphRole::And => {
                    rnt_status.advance_to(RntStatus::PartialAnd);
                }
                _ => {}
            }

            let completes = self
                .grammar
                .pattern(&construction)
                .is_some_and(|g| g.completes_from(cursor));
            if completes {
                queue.push_back(CascadeEvent::Confirm {
                    position,
                    partial,
                    end_position: position,
                });
            }
        }
    }

    /// Resolves a batch of just-confirmed predicted nodes: groups them by generating
    /// partial, picks the best candidate per partial (deterministic priority), advances
    /// the partial, drops its stale sibling expectations, and queues a confirmation if
    /// the pattern can now complete.
    fn resolve_confirmed_predictions(
        &mut self,
        hits: &[NodeId],
        end_position: usize,
        queue: &mut VecDeque<CascadeEvent>,
    ) {
        let mut groups: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
        let mut order: Vec<NodeId> = Vec::new();
        for &hit in hits {
            let Some(prediction) = self.predictions.get(&hit) else { continue };
            let partial = prediction.source_partial;
            if !groups.contains_key(&partial) {
                order.push(partial);
            }
            groups.entry(partial).or_default().push(hit);
        }

        for partial in order {
            let confirmed_nodes = &groups[&partial];
            let Some(construction) = self
                .predictions
                .get(&confirmed_nodes[0])
                .map(|p| p.construction.clone())
            else {
                continue;
            };
            let Some(graph) = self.grammar.pattern(&construction) else { continue };

            let candidates: Vec<Candidate> = confirmed_nodes
                .iter()
                .filter_map(|id| self.predictions.get(id).map(|p| p.candidate))
                .collect();
            let Some(best) = select_best_match(graph, &candidates) else { continue };
            let evidence_id = confirmed_nodes
                .iter()
                .find(|id| {
                    self.predictions
                        .get(id)
                        .is_some_and(|p| p.candidate == best)
                })
                .copied();

            self.advance_partial(partial, best, end_position, evidence_id, queue);
        }
    }

    /// Advances one partial along a chosen candidate, dropping all of its outstanding
    /// predicted nodes (they are stale once the cursor moved) and queuing a
    /// confirmation when the pattern completes. The raw evidence at the confirming
    /// position is linked into the partial as well, consuming it, so the feed-forward
    /// step cannot start a second partial of the same construction from it.
    fn advance_partial(
        &mut self,
        partial: NodeId,
        candidate: Candidate,
        end_position: usize,
        evidence_id: Option<NodeId>,
        queue: &mut VecDeque<CascadeEvent>,
    ) {
        let Some(state) = self.arena.node(partial).and_then(|n| n.partial()) else {
            // Already confirmed (or gone): prediction exclusivity means the first
            // resolution won; later ones are no-ops.
            self.drop_partial_predictions(partial, evidence_id);
            return;
        };
        let anchor = state.anchor;
        let construction = state.construction.clone();

        self.drop_partial_predictions(partial, evidence_id);

        let Some(graph) = self.grammar.pattern(&construction) else { return };
        let column = &mut self.columns[anchor];
        let complete = column.l5.advance(
            &mut self.arena,
            graph,
            partial,
            candidate,
            end_position,
            evidence_id,
        );
        let advanced = self
            .arena
            .node(partial)
            .and_then(|n| n.partial())
            .is_some_and(|s| !s.malformed && s.cursor == candidate.node);
        if advanced {
            let consumed = self.columns.get(end_position).and_then(|c| {
                matching_evidence_node(&self.arena, &c.l23, graph.kind(candidate.node))
            });
            if let Some(evidence) = consumed {
                if self.arena.node(evidence).is_some_and(|n| !n.is_consumed()) {
                    self.arena.connect(evidence, partial, EdgeKind::FeedForward, false);
                }
            }
        }
        if complete {
            queue.push_back(CascadeEvent::Confirm {
                position: anchor,
                partial,
                end_position,
            });
        }
    }

    /// Removes every outstanding predicted node of a partial from its column and the
    /// registry. The node that actually confirmed (if any) is kept in the graph as the
    /// confirming evidence but leaves the registry.
    fn drop_partial_predictions(&mut self, partial: NodeId, keep: Option<NodeId>) {
        let Some(ids) = self.by_partial.remove(&partial) else { return };
        for id in ids {
            let prediction = self.predictions.remove(&id);
            if Some(id) == keep {
                continue;
            }
            if let Some(prediction) = prediction {
                if let Some(column) = self.columns.get_mut(prediction.target_position) {
                    column.l23.drop_prediction(&mut self.arena, id);
                }
            }
        }
    }

    /// Drains the confirmation cascade to fixpoint. Each confirmation synchronously
    /// enqueues whatever it triggers; the composition-depth ceiling (checked before
    /// any feedback creation) is what guarantees termination.
    fn drain_cascade(&mut self, queue: &mut VecDeque<CascadeEvent>) {
        while let Some(CascadeEvent::Confirm {
            position,
            partial,
            end_position,
        }) = queue.pop_front()
        {
            self.confirm_construction(position, partial, end_position, queue);
        }
    }

    /// Confirms one construction and runs its feedback:
    /// - reclassifies the partial (idempotent: a second confirmation is a no-op),
    /// - advances the column's composition status,
    /// - creates exactly one L23 feedback node at the anchor position (unless the
    ///   depth ceiling forbids it or a same-named node already exists there),
    /// - feeds the new evidence forward (higher patterns may start),
    /// - and walks backward to confirm a matching earlier prediction, cascading.
    fn confirm_construction(
        &mut self,
        position: usize,
        partial: NodeId,
        end_position: usize,
        queue: &mut VecDeque<CascadeEvent>,
    ) {
        let role = match self.arena.node(partial) {
            Some(node) => node.role,
            None => return,
        };
        let Some(confirmation) = self.columns[position]
            .l5
            .confirm(&mut self.arena, partial)
        else {
            return;
        };

        self.drop_partial_predictions(partial, None);

        let column = &mut self.columns[position];
        column.mark_confirmed();
        column.span.1 = column.span.1.max(confirmation.span.1);
        if column.construction_type.is_none() {
            column.construction_type = Some(confirmation.construction.clone());
        }
        match role {
            GraphRole::Sequencer => {
                column.rnt_status.advance_to(RntStatus::SequencerReady);
            }
            GraphRole::And => {
                column.rnt_status.advance_to(RntStatus::CompleteAnd);
            }
            _ => {
                column.rnt_status.advance_to(RntStatus::Single);
            }
        }

        self.confirmed.push(ConfirmedConstruction {
            name: confirmation.construction.clone(),
            span: confirmation.span,
            matched: confirmation.matched.clone(),
            depth: confirmation.depth,
        });

        self.create_l23_feedback_node(&confirmation, end_position, queue);
    }

    /// The feedback half of a confirmation. Checks the composition-depth ceiling,
    /// creates (or reuses) the construction evidence node at the anchor position, lets
    /// higher patterns start from it, and propagates the new evidence backward through
    /// `check_if_construction_confirms_prediction`.
    fn create_l23_feedback_node(
        &mut self,
        confirmation: &Confirmation,
        end_position: usize,
        queue: &mut VecDeque<CascadeEvent>,
    ) {
        // Recursion policy, not an error: at the ceiling, feedback simply stops.
        if confirmation.depth + 1 > self.params.max_composition_depth {
            return;
        }

        let anchor = confirmation.span.0;
        let Some(column) = self.columns.get_mut(anchor) else { return };
        let Some(evidence_node) = column.l23.receive_construction_feedback(
            &mut self.arena,
            &confirmation.construction,
            confirmation.span,
            confirmation.node,
        ) else {
            // Node reuse: a same-named construction node already exists here, and it
            // has already had its chance to propagate.
            return;
        };
        self.feedback_this_token = true;

        // The new evidence may start higher-level partials at the anchor.
        self.activate_constructions(anchor, queue);

        self.check_if_construction_confirms_prediction(
            &confirmation.construction,
            evidence_node,
            anchor,
            end_position,
            queue,
        );
    }

    /// Walks backward through every column before `anchor` looking for an unconfirmed
    /// predicted node naming this construction. The first one found wins (prediction
    /// exclusivity); its partial advances, potentially cascading further
    /// confirmations. The feedback evidence node is linked into the resolved partial,
    /// marking the construction as consumed.
    fn check_if_construction_confirms_prediction(
        &mut self,
        construction: &str,
        evidence_node: NodeId,
        anchor: usize,
        end_position: usize,
        queue: &mut VecDeque<CascadeEvent>,
    ) {
        for col_idx in (0..anchor).rev() {
            let hit = self.columns[col_idx]
                .l23
                .confirm_word_prediction(&mut self.arena, construction);
            if let Some(id) = hit {
                if let Some(prediction) = self.predictions.get(&id) {
                    self.arena.connect(
                        evidence_node,
                        prediction.source_partial,
                        EdgeKind::FeedForward,
                        false,
                    );
                }
                self.resolve_confirmed_predictions(&[id], end_position, queue);
                return;
            }
        }
    }

    /// Registers one prediction per admissible next element for every live,
    /// well-formed partial that has no outstanding expectations. Predictions are
    /// registered at the partial's own position: later tokens are matched backward
    /// against them.
    fn register_missing_predictions(&mut self) {
        let mut pending: Vec<(usize, NodeId)> = Vec::new();
        for (position, column) in self.columns.iter().enumerate() {
            for &partial in column.l5.partials() {
                if self.by_partial.contains_key(&partial) {
                    continue;
                }
                if self
                    .arena
                    .node(partial)
                    .and_then(|n| n.partial())
                    .is_some_and(|s| !s.malformed)
                {
                    pending.push((position, partial));
                }
            }
        }

        for (position, partial) in pending {
            let Some(state) = self.arena.node(partial).and_then(|n| n.partial()) else {
                continue;
            };
            let construction = state.construction.clone();
            let cursor = state.cursor;
            let strength = state.completion_ratio();
            let Some(graph) = self.grammar.pattern(&construction) else { continue };

            let mut registered = Vec::new();
            for candidate in next_possible_nodes(graph, cursor) {
                let Some((etype, value, constraint)) = expectation(graph, candidate) else {
                    continue;
                };
                let prediction = Prediction {
                    source_position: position,
                    target_position: position,
                    etype,
                    value,
                    constraint,
                    strength,
                    construction: construction.clone(),
                    source_partial: partial,
                    candidate,
                };
                let column = &mut self.columns[position];
                let id = column.l23.receive_prediction(&mut self.arena, &prediction);
                column.mark_predicted();
                self.predictions.insert(id, prediction);
                registered.push(id);
            }
            if !registered.is_empty() {
                self.by_partial.insert(partial, registered);
            }
        }
    }

    /// Integrates every column's populations one step for this token.
    fn tick_columns(&mut self, active_position: usize) {
        let feedback = if self.feedback_this_token { 1.0 } else { 0.0 };
        for (idx, column) in self.columns.iter_mut().enumerate() {
            let is_active = idx == active_position;
            let construction_activity = if column.l5.confirmed().is_empty() {
                (column.l5.partials().len() as f64 * 0.5).min(1.0)
            } else {
                1.0
            };
            let drive = PopulationDrive {
                evidence: if is_active { 1.0 } else { 0.0 },
                construction: construction_activity,
                input: if is_active { 1.0 } else { 0.0 },
                sustained: if column.state == ColumnState::Confirmed {
                    1.0
                } else {
                    0.0
                },
                feedback,
            };
            column.tick(drive, self.params.dt);
        }
    }

    /// Marks columns holding a confirmed construction that no higher construction
    /// consumed. A construction is consumed when its feedback evidence node feeds
    /// anything besides the back-edge to the construction itself.
    fn mark_roots(&mut self) {
        for column in &mut self.columns {
            let mut is_root = false;
            for &id in column.l5.confirmed() {
                let Some(node) = self.arena.node(id) else { continue };
                let consumed = node.outputs.iter().any(|&out| {
                    self.arena.node(out).is_some_and(|o| {
                        matches!(
                            o.kind,
                            NodeKind::Evidence {
                                etype: EvidenceType::Construction,
                                ..
                            }
                        ) && o.outputs.iter().any(|&sink| sink != id)
                    })
                });
                if !consumed {
                    is_root = true;
                }
            }
            column.is_root = is_root;
        }
    }
}

/// Maps a traversal candidate to the expectation it projects:
/// LITERAL → a word, SLOT → a POS tag (with its feature constraint, if any),
/// WILDCARD → the match-anything sentinel `"*"`.
fn expectation(
    graph: &PatternGraph,
    candidate: Candidate,
) -> Option<(EvidenceType, String, Option<String>)> {
    match graph.kind(candidate.node) {
        PatternNodeKind::Literal { value } => Some((EvidenceType::Word, value.clone(), None)),
        PatternNodeKind::Slot { pos, constraint } => {
            Some((EvidenceType::Pos, pos.clone(), constraint.clone()))
        }
        PatternNodeKind::Wildcard => Some((EvidenceType::Word, "*".to_string(), None)),
        _ => None,
    }
}
