//! Channel-width scaling.
//!
//! Stage widths are the reference MNASNet depths scaled by the width
//! multiplier and snapped to multiples of 8, preferring to round up.

use log::debug;

use crate::error::{ModelError, ModelResult};

/// Stage widths at width multiplier 1.0: stem, separable stem, six stages.
pub const REFERENCE_DEPTHS: [usize; 8] = [32, 16, 24, 40, 80, 96, 192, 320];

/// Rounded depths below `bias * target` are bumped up one more multiple.
pub const DEFAULT_ROUND_UP_BIAS: f64 = 0.9;

const DEPTH_DIVISOR: usize = 8;

// Anything wider is certainly a mistake and would overflow the bump below.
const MAX_DEPTH: f64 = u32::MAX as f64;

/// Asymmetric rounding of `val` to a multiple of `divisor`.
///
/// Rounds to the nearest multiple (never below `divisor` itself), then steps up
/// one multiple if the result fell under `round_up_bias * val`. With the
/// default bias `(83, 8) -> 80` but `(84, 8) -> 88`.
pub fn round_to_multiple_of(val: f64, divisor: usize, round_up_bias: f64) -> ModelResult<usize> {
    if !(round_up_bias > 0.0 && round_up_bias < 1.0) {
        return Err(ModelError::InvalidRoundingBias(round_up_bias));
    }
    if divisor == 0 {
        return Err(ModelError::InvalidDivisor);
    }
    if !(val.is_finite() && (0.0..=MAX_DEPTH).contains(&val)) {
        return Err(ModelError::InvalidDepth(val));
    }

    // `as usize` truncates, which is floor for non-negative values
    let nearest = (val + divisor as f64 / 2.0) as usize / divisor * divisor;
    let new_val = nearest.max(divisor);
    if new_val as f64 >= round_up_bias * val {
        Ok(new_val)
    } else {
        Ok(new_val + divisor)
    }
}

/// Scale [`REFERENCE_DEPTHS`] by `alpha`.
pub fn get_depths(alpha: f64) -> ModelResult<[usize; 8]> {
    if !(alpha > 0.0 && alpha.is_finite()) {
        return Err(ModelError::InvalidWidthMultiplier(alpha));
    }
    let mut depths = [0usize; 8];
    for (out, &reference) in depths.iter_mut().zip(REFERENCE_DEPTHS.iter()) {
        *out = round_to_multiple_of(reference as f64 * alpha, DEPTH_DIVISOR, DEFAULT_ROUND_UP_BIAS)?;
    }
    debug!("alpha {} -> depths {:?}", alpha, depths);
    Ok(depths)
}
