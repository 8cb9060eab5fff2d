//! Pixel-wise stacking of same-shaped frames.

use serde::{Deserialize, Serialize};

use super::{Frame, FrameError, FrameHeader, FrameResult};

/// Per-pixel combination rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineMethod {
    /// Median of the stack; mean of the two middle values for even counts.
    Median,
    /// Arithmetic mean of the stack.
    Average,
}

/// Stack `frames` pixel by pixel.
///
/// All frames must share the first frame's dimensions. The result carries a
/// fresh 2D header with no `IMAGETYP` or `EXPTIME`; callers set those.
pub fn combine(frames: &[Frame], method: CombineMethod) -> FrameResult<Frame> {
    let first = frames.first().ok_or(FrameError::EmptyStack)?;
    for frame in &frames[1..] {
        first.ensure_same_shape(frame)?;
    }

    let pixel_count = first.pixels.len();
    let mut stack = vec![0.0f32; frames.len()];
    let mut pixels = Vec::with_capacity(pixel_count);

    for i in 0..pixel_count {
        for (slot, frame) in stack.iter_mut().zip(frames) {
            *slot = frame.pixels[i];
        }
        let value = match method {
            CombineMethod::Median => median(&mut stack),
            CombineMethod::Average => mean(&stack),
        };
        pixels.push(value);
    }

    Ok(Frame {
        width: first.width,
        height: first.height,
        pixels,
        header: FrameHeader {
            image_type: None,
            naxis: 2,
            naxis1: first.width as u32,
            naxis2: first.height as u32,
            exptime: None,
        },
    })
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_unstable_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        ((values[mid - 1] as f64 + values[mid] as f64) / 2.0) as f32
    }
}

fn mean(values: &[f32]) -> f32 {
    let sum: f64 = values.iter().map(|&v| v as f64).sum();
    (sum / values.len() as f64) as f32
}
