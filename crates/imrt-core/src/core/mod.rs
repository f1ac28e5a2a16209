//! # Core Module
//!
//! The stateless foundation of the crate: geometry and anatomy models plus the
//! loaders that read them from disk.
//!
//! ## Architecture
//!
//! - **Plan Representation** ([`models`]) - Collimator, volumes, beamlets and stations
//! - **Input Loading** ([`io`]) - TOML and CSV readers for collimator and volume definitions
//!
//! Nothing in this module knows about objective values or moves; the stateful
//! optimization protocol lives in [`crate::engine`].

pub mod io;
pub mod models;
