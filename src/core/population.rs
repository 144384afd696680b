//! Leaky-integrator activation units.
//!
//! A `NeuralPopulation` models the continuous activation of one cell population inside a
//! column. Activation approaches the current input exponentially with time constant tau:
//!
//! `a += dt * (input - a) / tau`, clamped to `[0, 1]`.
//!
//! Large tau means slow, smoothing dynamics; small tau means fast tracking. Five
//! populations compose one column (see `column.rs`): the evidence population L23, the
//! construction population L5, and three interneuron populations PV, SOM and VIP. PV and
//! VIP use fixed time constants regardless of cortical level.

use serde::{Deserialize, Serialize};

/// Fixed time constant of the PV interneuron population.
pub const TAU_PV: f64 = 10.0;

/// Fixed time constant of the VIP interneuron population.
pub const TAU_VIP: f64 = 20.0;

/// A single leaky-integrator unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeuralPopulation {
    /// Integration time constant.
    pub tau: f64,

    /// Current activation, kept in `[0, 1]`.
    pub activation: f64,
}

impl NeuralPopulation {
    /// Creates a population at rest with the given time constant.
    #[inline]
    pub fn new(tau: f64) -> Self {
        Self {
            tau,
            activation: 0.0,
        }
    }

    /// Integrates one time step of length `dt` toward `input`, clamping to `[0, 1]`.
    #[inline]
    pub fn step(&mut self, input: f64, dt: f64) {
        self.activation += dt * (input - self.activation) / self.tau;
        self.activation = self.activation.clamp(0.0, 1.0);
    }

    /// Resets the population to rest.
    #[inline]
    pub fn reset(&mut self) {
        self.activation = 0.0;
    }
}
