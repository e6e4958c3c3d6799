//! Temporal smoothing of keypoint positions.
//!
//! One-euro filter: a single-pole low-pass filter whose cutoff rises with the
//! tracked point's speed. Slow motion gets heavy smoothing (jitter removal),
//! fast voluntary motion passes with almost no lag.

use physio_core::{Error, Keypoint, PoseFrame, Position2D, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// One-euro filter parameters.
///
/// There is deliberately no `Default`: production and test code must state
/// the smoothing they run with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OneEuroParams {
    /// Minimum cutoff frequency (Hz); lower = smoother at rest
    pub min_cutoff: f64,
    /// Speed coefficient; higher = less lag during fast motion
    pub beta: f64,
    /// Cutoff frequency (Hz) used to smooth the velocity estimate
    pub d_cutoff: f64,
}

impl OneEuroParams {
    pub fn new(min_cutoff: f64, beta: f64, d_cutoff: f64) -> Result<Self> {
        let params = Self {
            min_cutoff,
            beta,
            d_cutoff,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_cutoff.is_finite() && self.min_cutoff > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "filter min_cutoff must be positive, got {}",
                self.min_cutoff
            )));
        }
        if !(self.beta.is_finite() && self.beta >= 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "filter beta must be non-negative, got {}",
                self.beta
            )));
        }
        if !(self.d_cutoff.is_finite() && self.d_cutoff > 0.0) {
            return Err(Error::ConfigInvalid(format!(
                "filter d_cutoff must be positive, got {}",
                self.d_cutoff
            )));
        }
        Ok(())
    }
}

/// Smoothing factor for a first-order low-pass at `cutoff` Hz over `dt` seconds
fn smoothing_factor(dt: f64, cutoff: f64) -> f64 {
    let r = 2.0 * PI * cutoff * dt;
    r / (r + 1.0)
}

#[derive(Debug, Clone, Copy)]
struct FilterState {
    x_prev: f64,
    dx_prev: f64,
    t_prev: f64,
}

/// Adaptive low-pass filter for a single scalar signal
#[derive(Debug, Clone)]
pub struct OneEuroFilter {
    params: OneEuroParams,
    state: Option<FilterState>,
}

impl OneEuroFilter {
    pub fn new(params: OneEuroParams) -> Self {
        Self {
            params,
            state: None,
        }
    }

    /// Filter a single value
    ///
    /// # Arguments
    /// * `t` - sample time in seconds
    /// * `x` - raw value
    ///
    /// A non-increasing `t` or a non-finite `x` skips the update and returns
    /// the previous estimate. A non-finite first sample is returned as-is
    /// without seeding the filter.
    pub fn filter(&mut self, t: f64, x: f64) -> f64 {
        let Some(state) = self.state else {
            if !x.is_finite() || !t.is_finite() {
                return x;
            }
            self.state = Some(FilterState {
                x_prev: x,
                dx_prev: 0.0,
                t_prev: t,
            });
            return x;
        };

        let dt = t - state.t_prev;
        if !(dt > 0.0) || !x.is_finite() {
            return state.x_prev;
        }

        let a_d = smoothing_factor(dt, self.params.d_cutoff);
        let dx = (x - state.x_prev) / dt;
        let dx_hat = a_d * dx + (1.0 - a_d) * state.dx_prev;

        let cutoff = self.params.min_cutoff + self.params.beta * dx_hat.abs();
        let a = smoothing_factor(dt, cutoff);
        let x_hat = a * x + (1.0 - a) * state.x_prev;

        self.state = Some(FilterState {
            x_prev: x_hat,
            dx_prev: dx_hat,
            t_prev: t,
        });
        x_hat
    }

    /// Last smoothed value, if any sample has been seen
    pub fn last(&self) -> Option<f64> {
        self.state.map(|s| s.x_prev)
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn params(&self) -> &OneEuroParams {
        &self.params
    }
}

/// Pair of one-euro filters for a 2D position
#[derive(Debug, Clone)]
pub struct OneEuroFilter2D {
    pub x: OneEuroFilter,
    pub y: OneEuroFilter,
}

impl OneEuroFilter2D {
    pub fn new(params: OneEuroParams) -> Self {
        Self {
            x: OneEuroFilter::new(params),
            y: OneEuroFilter::new(params),
        }
    }

    pub fn filter(&mut self, t: f64, pos: Position2D) -> Position2D {
        Position2D::new(self.x.filter(t, pos.x), self.y.filter(t, pos.y))
    }

    pub fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
    }
}

/// Per-keypoint smoothing of whole pose frames for one subject
#[derive(Debug, Clone)]
pub struct PoseFilter {
    filters: Vec<OneEuroFilter2D>,
    min_confidence: f32,
    last_timestamp: Option<Timestamp>,
}

impl PoseFilter {
    /// # Arguments
    /// * `params` - smoothing parameters shared by every keypoint
    /// * `min_confidence` - keypoints below this confidence bypass the filter
    ///   and leave its state untouched
    pub fn new(params: OneEuroParams, min_confidence: f32) -> Self {
        Self {
            filters: (0..Keypoint::COUNT)
                .map(|_| OneEuroFilter2D::new(params))
                .collect(),
            min_confidence,
            last_timestamp: None,
        }
    }

    /// Smooth every sufficiently confident keypoint of `frame`. Keypoints with
    /// a non-finite position pass through untouched.
    ///
    /// Fails with `NonMonotonicTimestamp` when the frame is not strictly newer
    /// than the previous one; filter state is left unchanged in that case.
    pub fn apply(&mut self, frame: &PoseFrame) -> Result<PoseFrame> {
        if let Some(previous) = self.last_timestamp {
            if frame.timestamp <= previous {
                return Err(Error::NonMonotonicTimestamp {
                    previous_ms: previous.as_millis(),
                    current_ms: frame.timestamp.as_millis(),
                });
            }
        }
        self.last_timestamp = Some(frame.timestamp);

        let t = frame.timestamp.as_secs_f64();
        let mut filtered = frame.clone();
        for (slot, filter) in filtered.keypoints.iter_mut().zip(self.filters.iter_mut()) {
            if let Some(detection) = slot {
                let usable =
                    detection.confidence >= self.min_confidence && detection.position.is_finite();
                if usable {
                    detection.position = filter.filter(t, detection.position);
                }
            }
        }
        Ok(filtered)
    }

    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(OneEuroFilter2D::reset);
        self.last_timestamp = None;
    }
}
