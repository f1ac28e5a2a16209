//! # Workflows Module
//!
//! High-level entry points that tie [`crate::core`] loading and
//! [`crate::engine`] construction together.
//!
//! - **Build Workflow** ([`build`]) - Reads a plan file, loads the collimator and
//!   volumes it names, and returns an evaluated [`crate::engine::plan::Plan`].

pub mod build;
