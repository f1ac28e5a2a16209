//! # Core Models Module
//!
//! Plain data structures describing a treatment plan's geometry and anatomy.
//!
//! ## Key Components
//!
//! - [`collimator`] - Beamlet grid and per-angle leaf ranges shared by all stations
//! - [`volume`] - Anatomical structures with dose targets and dose-deposition matrices
//! - [`beamlet`] - Single ray positions and the change records used to undo moves
//! - [`station`] - The beamlet configuration of one gantry angle and its apertures
//!
//! ## Usage
//!
//! ```ignore
//! use imrt::core::models::{collimator::Collimator, station::{IntensityLimits, Station}};
//!
//! let collimator = Collimator::new(vec![0, 72, 144, 216, 288], 10, 10)?;
//! let limits = IntensityLimits { max_apertures: 5, max_intensity: 20, step_intensity: 2 };
//! let station = Station::new(0, &collimator, limits, 0)?;
//! ```

pub mod beamlet;
pub mod collimator;
pub mod station;
pub mod volume;
