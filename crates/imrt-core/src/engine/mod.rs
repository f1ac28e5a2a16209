//! # Engine Module
//!
//! The stateful optimization layer: a [`plan::Plan`] owns its stations and
//! one evaluation function, and moves through the apply / evaluate / undo
//! protocol that local-search drivers build on.
//!
//! ## Architecture
//!
//! - **Evaluation contract** ([`evaluation`]) - The `EvaluationFunction` trait, objective
//!   weights and ranked move candidates
//! - **Dose objective** ([`dose`]) - Linear dose with a quadratic dose-window penalty,
//!   evaluated in full or incrementally
//! - **Undo** ([`history`]) - Bounded stack of evaluated moves
//! - **Move selection** ([`selection`]) - How one candidate is drawn from a ranked set
//! - **Plan** ([`plan`]) - Construction, evaluation caching, moves and rollback
//! - **Configuration** ([`config`]) - Plan parameters and their builder
//! - **Error Handling** ([`error`]) - Engine-level error types
//!
//! ## Key Capabilities
//!
//! - **Incremental evaluation** touching only the voxels a move reaches
//! - **Explicit dirty state** so a stale objective is reported, never returned
//! - **Deterministic randomized selection** through a caller-supplied RNG
//! - **Parallel full evaluation** across volumes with the `parallel` feature

pub mod config;
pub mod dose;
pub mod error;
pub mod evaluation;
pub mod history;
pub mod plan;
pub mod selection;
