//! # IMRT Plan Core
//!
//! Local-search core for intensity-modulated radiation therapy planning: a
//! plan of beam stations whose beamlet intensities are tuned against a
//! dose objective, with fast incremental evaluation and undo.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer layout.
//!
//! - **[`core`]: The Foundation.** Stateless models (`Collimator`, `Volume`, `Station`,
//!   `Beamlet`) and loaders for collimator and volume definitions.
//!
//! - **[`engine`]: The Logic Core.** The `Plan`, the `EvaluationFunction` contract with its
//!   dose-based implementation, bounded undo history and move selection.
//!
//! - **[`workflows`]: The Public API.** Assembles a ready-to-optimize plan from a
//!   configuration file.

pub mod core;
pub mod engine;
pub mod workflows;
