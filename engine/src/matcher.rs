use tracing::debug;

use crate::error::{ComposeError, ComposeResult};
use crate::pixel::{KeyColor, PixelSample};

/// Largest possible Euclidean distance between two RGB8 colors.
pub const MAX_DISTANCE: f64 = 441.672_955_930_063_7;

/// Largest possible squared distance, `3 * 255²`.
const MAX_SQUARED_DISTANCE: u32 = 3 * 255 * 255;

/// Euclidean RGB distance between a pixel and a key color.
pub fn distance(p: &PixelSample, k: &KeyColor) -> f64 {
    (squared_distance(p, k) as f64).sqrt()
}

fn squared_distance(p: &PixelSample, k: &KeyColor) -> u32 {
    let dr = i32::from(p.r) - i32::from(k.r);
    let dg = i32::from(p.g) - i32::from(k.g);
    let db = i32::from(p.b) - i32::from(k.b);
    (dr * dr + dg * dg + db * db) as u32
}

/// Largest squared distance `d` with `sqrt(d) <= threshold`.
///
/// Squaring the threshold in floating point can land on either side of an
/// integer, so the estimate is nudged until it agrees with `distance`.
fn squared_limit(threshold: f64) -> u32 {
    let estimate = (threshold * threshold).min(f64::from(MAX_SQUARED_DISTANCE));
    let mut limit = estimate.floor() as u32;
    while limit < MAX_SQUARED_DISTANCE && f64::from(limit + 1).sqrt() <= threshold {
        limit += 1;
    }
    while limit > 0 && f64::from(limit).sqrt() > threshold {
        limit -= 1;
    }
    limit
}

/// Classifies pixels against a set of key colors sharing one threshold.
///
/// A pixel matches when its distance to the nearest key is `<= threshold`.
/// The threshold is turned into an integer squared-distance cutoff once, so
/// the per-pixel test needs no square root.
#[derive(Debug, Clone)]
pub struct ChromaKeyMatcher {
    keys: Vec<KeyColor>,
    threshold: f64,
    limit_sq: u32,
}

impl ChromaKeyMatcher {
    pub fn new(keys: Vec<KeyColor>, threshold: f64) -> ComposeResult<Self> {
        if threshold.is_nan() || threshold < 0.0 {
            return Err(ComposeError::InvalidThreshold(threshold));
        }
        debug!(keys = keys.len(), threshold, "chroma key matcher ready");
        Ok(Self {
            keys,
            threshold,
            limit_sq: squared_limit(threshold),
        })
    }

    pub fn keys(&self) -> &[KeyColor] {
        &self.keys
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Returns `true` if the pixel is within threshold of any key.
    pub fn matches(&self, p: &PixelSample) -> bool {
        self.keys
            .iter()
            .any(|k| squared_distance(p, k) <= self.limit_sq)
    }

    /// Distance to the nearest key, or `None` for an empty key set.
    pub fn nearest_distance(&self, p: &PixelSample) -> Option<f64> {
        self.keys
            .iter()
            .map(|k| squared_distance(p, k))
            .min()
            .map(|d| f64::from(d).sqrt())
    }
}
