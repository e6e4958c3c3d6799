//! # Physio-Validation
//!
//! Movement validation engine for physiotherapy exercises.
//!
//! Turns a stream of noisy skeletal keypoints into prioritized, clinically
//! meaningful feedback and range-of-motion measurements.
//!
//! ## Pipeline Stages
//!
//! 1. **Filtering**: one-euro smoothing of every keypoint
//! 2. **Detection**: compensation detectors compare the frame with a
//!    synchronized reference frame against the threshold registry
//! 3. **Debouncing**: an error must persist before it is shown
//! 4. **Ranking**: confirmed errors ordered by injury risk and limited per
//!    patient level
//! 5. **ROM tracking**: peak and average joint angle of the active session
//!
//! [`ValidationEngine`] drives the stages for one subject. Every stage is
//! also usable on its own.

pub mod config;
pub mod debounce;
pub mod detectors;
pub mod filtering;
pub mod pipeline;
pub mod ranking;
pub mod rom;
pub mod thresholds;

pub use self::config::{EngineConfig, ScoringConfig};
pub use debounce::*;
pub use detectors::{DetectionContext, ErrorObservation, ExerciseKind, Severity};
pub use filtering::*;
pub use pipeline::*;
pub use ranking::*;
pub use rom::*;
pub use thresholds::*;
