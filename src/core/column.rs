//! A cortical column: the per-position bundle of populations, layers and status.
//!
//! One column exists per sequence position. It bundles:
//! - the five `NeuralPopulation` units (L23, L5, PV, SOM, VIP) giving the column its
//!   continuous activation dynamics,
//! - the evidence layer (L23) and construction layer (L5) holding the nodes created at
//!   this position,
//! - the composition status (`RntStatus`), a small one-way state machine driven
//!   exclusively by L5 confirmation logic,
//! - the processing state (`ColumnState`): `Empty → Predicted → Activated → Confirmed`;
//!   only `Empty` and `Predicted` accept raw input, and there is no regression without
//!   an explicit `reset()`.
//!
//! Population dynamics are telemetry: they trace what the symbolic machinery does but
//! never gate it, so confirmation order stays deterministic.

use crate::core::construction::ConstructionLayer;
use crate::core::evidence::EvidenceLayer;
use crate::core::population::{NeuralPopulation, TAU_PV, TAU_VIP};
use serde::{Deserialize, Serialize};

/// The cortical level a column sits on. L1 columns track raw token spans;
/// L2 columns would track composed spans. Levels differ in their time constants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorticalLevel {
    #[default]
    L1,
    L2,
}

impl CorticalLevel {
    /// Time constants `(l23, l5, som)` for this level. PV and VIP are fixed globally.
    #[inline]
    pub fn taus(self) -> (f64, f64, f64) {
        match self {
            CorticalLevel::L1 => (5.0, 15.0, 30.0),
            CorticalLevel::L2 => (10.0, 30.0, 60.0),
        }
    }
}

/// Composition status of a column. Transitions are one-directional:
/// `Null → Single | PartialAnd`, `PartialAnd → CompleteAnd`,
/// `Null → SequencerPartial → SequencerReady`. No regression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RntStatus {
    #[default]
    Null,
    Single,
    PartialAnd,
    CompleteAnd,
    SequencerPartial,
    SequencerReady,
}

impl RntStatus {
    /// Attempts a transition to `target`; returns whether it was applied.
    /// Invalid jumps and regressions are silently refused.
    #[inline]
    pub fn advance_to(&mut self, target: RntStatus) -> bool {
        use RntStatus::*;
        let allowed = matches!(
            (*self, target),
            (Null, Single)
                | (Null, PartialAnd)
                | (Null, SequencerPartial)
                | (PartialAnd, CompleteAnd)
                | (SequencerPartial, SequencerReady)
        );
        if allowed {
            *self = target;
        }
        allowed
    }
}

/// Processing state of a column over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnState {
    #[default]
    Empty,
    Predicted,
    Activated,
    Confirmed,
}

/// Per-token drive levels fed into the five populations by the orchestrator.
#[derive(Clone, Copy, Debug, Default)]
pub struct PopulationDrive {
    /// Raw evidence activity at this position.
    pub evidence: f64,
    /// Construction (partial + confirmed) activity.
    pub construction: f64,
    /// Feed-forward input magnitude (drives PV inhibition).
    pub input: f64,
    /// Sustained activity over the column's span (drives SOM).
    pub sustained: f64,
    /// Cross-position feedback activity (drives VIP disinhibition).
    pub feedback: f64,
}

/// Activation levels of the five populations, for observers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnActivity {
    pub l23: f64,
    pub l5: f64,
    pub pv: f64,
    pub som: f64,
    pub vip: f64,
}

/// A cortical column at one sequence span.
#[derive(Debug, Serialize, Deserialize)]
pub struct Column {
    /// Which cortical level this column sits on.
    pub cortical_level: CorticalLevel,

    /// Name of the first construction confirmed in this column, if any.
    pub construction_type: Option<String>,

    /// The sequence span `[start, end]` this column covers.
    pub span: (usize, usize),

    /// Evidence population.
    pub l23_population: NeuralPopulation,

    /// Construction population.
    pub l5_population: NeuralPopulation,

    /// PV interneurons (fast feed-forward inhibition).
    pub pv: NeuralPopulation,

    /// SOM interneurons (slow lateral inhibition).
    pub som: NeuralPopulation,

    /// VIP interneurons (feedback disinhibition).
    pub vip: NeuralPopulation,

    /// Composition status, driven only by L5 confirmation logic.
    pub rnt_status: RntStatus,

    /// Processing state.
    pub state: ColumnState,

    /// Set at end of processing on columns whose confirmed construction is not
    /// consumed by any higher-level construction.
    pub is_root: bool,

    /// The evidence layer at this position.
    pub l23: EvidenceLayer,

    /// The construction layer at this position.
    pub l5: ConstructionLayer,
}

impl Column {
    /// Creates a fresh column for one sequence position.
    #[inline]
    pub fn new(position: usize, cortical_level: CorticalLevel) -> Self {
        let (tau_l23, tau_l5, tau_som) = cortical_level.taus();
        Self {
            cortical_level,
            construction_type: None,
            span: (position, position),
            l23_population: NeuralPopulation::new(tau_l23),
            l5_population: NeuralPopulation::new(tau_l5),
            pv: NeuralPopulation::new(TAU_PV),
            som: NeuralPopulation::new(tau_som),
            vip: NeuralPopulation::new(TAU_VIP),
            rnt_status: RntStatus::Null,
            state: ColumnState::Empty,
            is_root: false,
            l23: EvidenceLayer::new(position),
            l5: ConstructionLayer::new(position),
        }
    }

    /// Whether the column accepts raw token input in its current state.
    #[inline]
    pub fn accepts_input(&self) -> bool {
        matches!(self.state, ColumnState::Empty | ColumnState::Predicted)
    }

    /// Marks the column as having received a prediction; only meaningful from `Empty`.
    #[inline]
    pub fn mark_predicted(&mut self) {
        if self.state == ColumnState::Empty {
            self.state = ColumnState::Predicted;
        }
    }

    /// Marks the column as activated by raw input.
    #[inline]
    pub fn mark_activated(&mut self) {
        self.state = ColumnState::Activated;
    }

    /// Marks the column as holding a confirmed construction.
    #[inline]
    pub fn mark_confirmed(&mut self) {
        self.state = ColumnState::Confirmed;
    }

    /// Explicitly resets the processing state so the column can accept input again.
    #[inline]
    pub fn reset(&mut self) {
        self.state = ColumnState::Empty;
        self.l23_population.reset();
        self.l5_population.reset();
        self.pv.reset();
        self.som.reset();
        self.vip.reset();
    }

    /// Integrates the five populations one step against the given drives.
    #[inline]
    pub fn tick(&mut self, drive: PopulationDrive, dt: f64) {
        self.l23_population.step(drive.evidence, dt);
        self.l5_population.step(drive.construction, dt);
        self.pv.step(drive.input, dt);
        self.som.step(drive.sustained, dt);
        self.vip.step(drive.feedback, dt);
    }

    /// Current activation of all five populations.
    #[inline]
    pub fn activity(&self) -> ColumnActivity {
        ColumnActivity {
            l23: self.l23_population.activation,
            l5: self.l5_population.activation,
            pv: self.pv.activation,
            som: self.som.activation,
            vip: self.vip.activation,
        }
    }
}
