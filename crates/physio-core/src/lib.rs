//! # Physio-Core
//!
//! Core types and utilities for the physiotherapy movement validation
//! engine: pose frames produced by an external pose estimator, the shared
//! error taxonomy, and the pure geometry kernel every analysis stage builds on.

pub mod error;
pub mod geometry;
pub mod types;

pub use error::{Error, Result};
pub use geometry::*;
pub use types::*;
