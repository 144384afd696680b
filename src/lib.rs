//! An incremental parser for construction grammars, organized as a chain of
//! cortical columns.
//!
//! Biological inspiration:
//! The neocortex processes language through columns whose superficial layers (L2/3)
//! receive sensory evidence and whose deep layers (L5) hold higher-order state.
//! Predictions flow forward in time and feedback flows down the hierarchy, so that a
//! confirmed structure becomes evidence for a still larger one.
//!
//! Meaning in this model:
//! Each token position gets one column. The evidence layer (L23) turns tokens into
//! graph nodes (surface form, lemma, POS tag, morphological features) and hosts the
//! predicted nodes earlier patterns project at it. The construction layer (L5) tracks
//! partial constructions, pattern graphs being traversed element by element. When a
//! pattern completes, the construction is confirmed and fed back into L23 at its
//! anchor position as new evidence, where it can participate in higher constructions
//! up to a fixed composition depth. All state is a single node/edge graph; processing
//! is strictly incremental and deterministic.

pub mod core;
