//! The node graph at the heart of the CLN model.
//!
//! Raw evidence, predictions, partial constructions and confirmed constructions are
//! all `Node`s living in a single `NodeArena`.
//! Nodes address each other exclusively by integer `NodeId`; the input/output adjacency
//! sets are id sets, never references. This keeps the inevitable cycles of the
//! bidirectional graph (evidence ↔ construction feedback) trivially safe and makes the
//! composition-depth and growth-cycle guards structurally checkable.
//!
//! Node variants (tagged, dispatched by pattern matching):
//! - `Evidence`: a word/lemma/POS/feature/construction observation, directly activated.
//! - `Predicted`: an expectation created by a partial construction; inert until confirmed.
//! - `Partial`: a pattern match in progress, tracking a `matched[]` bit array and the
//!   current traversal cursor inside its compiled pattern graph.
//! - `Confirmed`: a completed construction, persisting after its partial index entry
//!   is removed.
//!
//! Ownership: the arena owns all nodes; layers hold id lists for the nodes they created.
//! Edges live in a flat pool inside the arena (see `edge.rs` for the edge type itself),
//! mirrored into the endpoint nodes' adjacency sets.

use crate::core::edge::{ConnectionEdge, EdgeKind};
use fxhash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Opaque node identifier; an index into the arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The structural role a node plays in the construction graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphRole {
    /// Plain evidence or a leaf element.
    #[default]
    Data,
    /// Any one input suffices (alternation).
    Or,
    /// All inputs required, unordered.
    And,
    /// All inputs required, in sequence (a construction proper).
    Sequencer,
}

/// The kind of evidence a node carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceType {
    Word,
    Lemma,
    Pos,
    Feature,
    /// A confirmed construction fed back into the evidence layer.
    Construction,
}

/// Traversal and bookkeeping state of a pattern match in progress.
///
/// Invariant: `matched.len()` equals the element count of the compiled pattern graph
/// this partial is tracking, and `matched[0]` is set at creation time (a partial only
/// exists because its first element matched).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartialState {
    /// The construction id of the pattern being tracked.
    pub construction: String,

    /// One flag per pattern element; index 0 is pre-set at creation.
    pub matched: Vec<bool>,

    /// Index of the pattern node the traversal currently sits on.
    pub cursor: usize,

    /// The sequence position where the first element matched.
    pub anchor: usize,

    /// Fingerprints of growth stages, bounded at `MAX_GROWTH_STAGES`.
    pub growth_history: Vec<u64>,

    /// Set when the growth-cycle guard trips; malformed partials are excluded
    /// from all further propagation.
    pub malformed: bool,

    /// Composition depth: 0 for partials over raw evidence, +1 per feedback level.
    pub depth: u32,
}

/// Maximum number of recorded growth stages before the cycle guard trips.
pub const MAX_GROWTH_STAGES: usize = 5;

impl PartialState {
    /// Records one growth stage and runs the cycle guard:
    /// - A stage fingerprint that already occurred marks the partial as malformed.
    /// - The history is bounded; exceeding the bound also marks the partial malformed.
    ///
    /// Returns `true` if the partial is still well-formed afterwards.
    #[inline]
    pub fn record_growth(&mut self, stage: u64) -> bool {
        if self.growth_history.contains(&stage) || self.growth_history.len() >= MAX_GROWTH_STAGES {
            self.malformed = true;
            return false;
        }
        self.growth_history.push(stage);
        true
    }

    /// Number of matched elements so far.
    #[inline]
    pub fn matched_count(&self) -> usize {
        self.matched.iter().filter(|&&m| m).count()
    }

    /// Fraction of pattern elements matched; used as prediction strength.
    #[inline]
    pub fn completion_ratio(&self) -> f64 {
        if self.matched.is_empty() {
            0.0
        } else {
            self.matched_count() as f64 / self.matched.len() as f64
        }
    }
}

/// The tagged payload of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Directly observed evidence: self-fires on creation (threshold forced to 0).
    Evidence { etype: EvidenceType, value: String },

    /// A predicted node: must never self-activate until `confirmed` is set.
    Predicted {
        etype: EvidenceType,
        value: String,
        /// An additional `Feature=Value` expectation for constrained slots.
        constraint: Option<String>,
        /// The partial construction that generated this expectation.
        source_partial: NodeId,
        confirmed: bool,
    },

    /// A pattern match in progress.
    Partial(PartialState),

    /// A completed construction.
    Confirmed { construction: String, depth: u32 },
}

/// An atomic unit of the CLN graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    /// The node's arena id.
    pub id: NodeId,

    /// The tagged payload driving all behavior.
    pub kind: NodeKind,

    /// Structural role in the construction graph.
    pub role: GraphRole,

    /// The sequence span `[start, end]` this node covers (inclusive positions).
    pub span: (usize, usize),

    /// Current activation level.
    pub activation: f64,

    /// Activation threshold; evidence nodes are created with 0 so they self-fire.
    pub threshold: i32,

    /// Whether this node's inputs are order-sensitive.
    pub ordered: bool,

    /// Ids of nodes feeding into this node.
    pub inputs: FxHashSet<NodeId>,

    /// Ids of nodes this node feeds into.
    pub outputs: FxHashSet<NodeId>,
}

impl Node {
    /// Whether the node currently counts as fired for Hebbian purposes.
    /// Predicted nodes never fire before confirmation, whatever their activation.
    #[inline]
    pub fn fired(&self) -> bool {
        match &self.kind {
            NodeKind::Predicted { confirmed, .. } => *confirmed && self.activation > 0.0,
            _ => self.activation > 0.0,
        }
    }

    /// The construction id, for partial and confirmed construction nodes.
    #[inline]
    pub fn construction_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Partial(state) => Some(&state.construction),
            NodeKind::Confirmed { construction, .. } => Some(construction),
            _ => None,
        }
    }

    /// Whether this evidence node has been consumed by a construction: it feeds
    /// anything besides the construction that produced it. A feedback node's
    /// back-edge to its own construction pairs with an input from that construction,
    /// so outputs that are also inputs do not count. Raw input evidence has no
    /// inputs, so any output consumes it.
    #[inline]
    pub fn is_consumed(&self) -> bool {
        self.outputs.iter().any(|out| !self.inputs.contains(out))
    }

    /// The evidence value, for evidence and predicted nodes.
    #[inline]
    pub fn evidence_value(&self) -> Option<(EvidenceType, &str)> {
        match &self.kind {
            NodeKind::Evidence { etype, value } => Some((*etype, value)),
            NodeKind::Predicted { etype, value, .. } => Some((*etype, value)),
            _ => None,
        }
    }

    /// Mutable access to the partial state, if this node is a partial construction.
    #[inline]
    pub fn partial_mut(&mut self) -> Option<&mut PartialState> {
        match &mut self.kind {
            NodeKind::Partial(state) => Some(state),
            _ => None,
        }
    }

    /// Shared access to the partial state, if this node is a partial construction.
    #[inline]
    pub fn partial(&self) -> Option<&PartialState> {
        match &self.kind {
            NodeKind::Partial(state) => Some(state),
            _ => None,
        }
    }
}

/// The arena owning every node and edge of a parse.
///
/// Nodes are stored in a flat vector indexed by `NodeId`; removal leaves a tombstone so
/// ids stay stable for the lifetime of the parse. Edges live in one contiguous pool with
/// an endpoint index for O(1) duplicate detection, the same flat-pool layout the synapse
/// store uses: one array, secondary indexes into it.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NodeArena {
    nodes: Vec<Option<Node>>,
    edges: Vec<ConnectionEdge>,
    #[serde(skip)]
    edge_index: FxHashMap<(NodeId, NodeId), usize>,
}

impl NodeArena {
    /// Creates an empty arena.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node with the given payload and returns its id.
    /// Evidence nodes self-fire: their activation is set to 1.0 and threshold to 0.
    /// Predicted nodes stay inert (activation 0.0).
    #[inline]
    pub fn insert(&mut self, kind: NodeKind, role: GraphRole, span: (usize, usize)) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let (activation, threshold) = match &kind {
            NodeKind::Evidence { .. } | NodeKind::Confirmed { .. } => (1.0, 0),
            NodeKind::Predicted { .. } => (0.0, 1),
            NodeKind::Partial(_) => (0.0, 1),
        };
        self.nodes.push(Some(Node {
            id,
            kind,
            role,
            span,
            activation,
            threshold,
            ordered: matches!(role, GraphRole::Sequencer),
            inputs: FxHashSet::default(),
            outputs: FxHashSet::default(),
        }));
        id
    }

    /// Shared access to a live node.
    #[inline]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutable access to a live node.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Removes a node, detaching it from all neighbors and deactivating its edges.
    /// The id becomes a tombstone; edges to/from it stay in the pool but inactive.
    pub fn remove(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id.index()).and_then(Option::take) else {
            return;
        };
        for other in node.inputs.iter().chain(node.outputs.iter()) {
            if let Some(neighbor) = self.nodes.get_mut(other.index()).and_then(Option::as_mut) {
                neighbor.inputs.remove(&id);
                neighbor.outputs.remove(&id);
            }
        }
        for edge in &mut self.edges {
            if edge.source == id || edge.target == id {
                edge.active = false;
            }
        }
    }

    /// Connects `source → target`, creating the edge if it does not exist yet,
    /// and mirrors the link into both endpoints' adjacency sets.
    /// Returns the index of the edge in the pool.
    pub fn connect(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        optional: bool,
    ) -> usize {
        if let Some(&idx) = self.edge_index.get(&(source, target)) {
            return idx;
        }
        let idx = self.edges.len();
        self.edges.push(ConnectionEdge::new(source, target, kind, optional));
        self.edge_index.insert((source, target), idx);
        if let Some(node) = self.node_mut(source) {
            node.outputs.insert(target);
        }
        if let Some(node) = self.node_mut(target) {
            node.inputs.insert(source);
        }
        idx
    }

    /// All edges in the pool.
    #[inline]
    pub fn edges(&self) -> &[ConnectionEdge] {
        &self.edges
    }

    /// Mutable access to the edge pool (used by the Hebbian pass).
    #[inline]
    pub fn edges_mut(&mut self) -> &mut [ConnectionEdge] {
        &mut self.edges
    }

    /// Whether both endpoints of the given edge fired.
    #[inline]
    pub fn edge_co_active(&self, edge: &ConnectionEdge) -> bool {
        edge.active
            && self.node(edge.source).is_some_and(Node::fired)
            && self.node(edge.target).is_some_and(Node::fired)
    }

    /// Iterates over all live nodes.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    /// Number of live nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Whether the arena holds no live nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
