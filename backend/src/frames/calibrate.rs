//! Per-frame calibration arithmetic.

use serde::{Deserialize, Serialize};

use super::{Frame, FrameError, FrameResult};

/// Factor applied to the dark master before subtraction.
///
/// The dark is scaled to the light's exposure time. Both times must be
/// finite; the dark's must be positive.
pub fn dark_scale(light_exptime: f64, dark_exptime: f64) -> FrameResult<f32> {
    if !light_exptime.is_finite() || light_exptime < 0.0 {
        return Err(FrameError::InvalidExposureTime(light_exptime));
    }
    if !dark_exptime.is_finite() || dark_exptime <= 0.0 {
        return Err(FrameError::InvalidExposureTime(dark_exptime));
    }
    Ok((light_exptime / dark_exptime) as f32)
}

/// `light -= dark * scale`, pixel by pixel.
pub fn subtract_dark(light: &mut Frame, dark: &Frame, scale: f32) -> FrameResult<()> {
    dark.ensure_same_shape(light)?;
    for (l, &d) in light.pixels.iter_mut().zip(&dark.pixels) {
        *l -= d * scale;
    }
    Ok(())
}

/// What flat correction does where the normalized flat is at or below the
/// minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LowFlatPolicy {
    /// Leave the pixel unchanged.
    #[default]
    PassThrough,
    /// Divide by the minimum instead.
    ClampToMinimum,
}

/// Divide `frame` by `flat` normalized to unit mean.
///
/// Pixels where the normalized flat does not exceed `min_value` are handled
/// per `policy`. Fails if the flat's mean is not positive.
pub fn flat_correct(
    frame: &mut Frame,
    flat: &Frame,
    min_value: f32,
    policy: LowFlatPolicy,
) -> FrameResult<()> {
    flat.ensure_same_shape(frame)?;

    let mean = flat.mean();
    if !(mean.is_finite() && mean > 0.0) {
        return Err(FrameError::NonPositiveFlat(mean));
    }

    for (p, &f) in frame.pixels.iter_mut().zip(&flat.pixels) {
        let normalized = (f as f64 / mean) as f32;
        if normalized > min_value {
            *p /= normalized;
        } else if policy == LowFlatPolicy::ClampToMinimum {
            *p /= min_value;
        }
    }
    Ok(())
}

/// Optional cosmic-ray cleaning step, applied to each raw light frame before
/// dark subtraction.
pub trait CosmicRayFilter: Send + Sync {
    fn clean(&self, frame: Frame) -> FrameResult<Frame>;
}

/// Filter that returns frames untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl CosmicRayFilter for PassThroughFilter {
    fn clean(&self, frame: Frame) -> FrameResult<Frame> {
        Ok(frame)
    }
}
