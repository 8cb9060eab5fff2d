//! Two-dimensional frames and the operations the pipeline needs on them.
//!
//! - [`fits`]: FITS primary-HDU reader and writer
//! - [`store`]: [`FrameStore`], the file I/O seam used by the pipeline
//! - [`combine`]: pixel-wise stacking (median / average)
//! - [`calibrate`]: dark subtraction, flat correction and the cosmic-ray hook

pub mod calibrate;
pub mod combine;
pub mod fits;
pub mod store;

use std::path::PathBuf;

pub use calibrate::{
    dark_scale, flat_correct, subtract_dark, CosmicRayFilter, LowFlatPolicy, PassThroughFilter,
};
pub use combine::{combine, CombineMethod};
pub use store::{FitsFrameStore, FrameStore};

/// Result type for frame operations
pub type FrameResult<T> = Result<T, FrameError>;

/// Errors raised while reading, writing or combining frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid FITS data: {0}")]
    InvalidFormat(String),

    #[error("unsupported BITPIX {0}")]
    UnsupportedBitpix(i64),

    #[error("missing header keyword {0}")]
    MissingKeyword(String),

    #[error("frame is {}x{}, expected {}x{}", .found.0, .found.1, .expected.0, .expected.1)]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("cannot combine an empty set of frames")]
    EmptyStack,

    #[error("invalid exposure time {0}")]
    InvalidExposureTime(f64),

    #[error("flat frame has non-positive mean {0}")]
    NonPositiveFlat(f64),
}

impl FrameError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FrameError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Header metadata the pipeline reads from and writes to frame files.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameHeader {
    /// Raw `IMAGETYP` value, untouched.
    pub image_type: Option<String>,
    pub naxis: u32,
    pub naxis1: u32,
    pub naxis2: u32,
    /// `EXPTIME` in seconds.
    pub exptime: Option<f64>,
}

/// A single-plane image with its header.
///
/// Pixels are stored row-major, `naxis1` (width) varying fastest, which is
/// the FITS on-disk order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<f32>,
    pub header: FrameHeader,
}

impl Frame {
    /// Build a frame from row-major pixels.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<f32>) -> FrameResult<Self> {
        if pixels.len() != width * height {
            return Err(FrameError::InvalidFormat(format!(
                "{} pixels do not fill a {}x{} frame",
                pixels.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
            header: FrameHeader {
                image_type: None,
                naxis: 2,
                naxis1: width as u32,
                naxis2: height as u32,
                exptime: None,
            },
        })
    }

    /// Frame with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width * height],
            header: FrameHeader {
                image_type: None,
                naxis: 2,
                naxis1: width as u32,
                naxis2: height as u32,
                exptime: None,
            },
        }
    }

    pub fn with_image_type(mut self, image_type: impl Into<String>) -> Self {
        self.header.image_type = Some(image_type.into());
        self
    }

    pub fn with_exptime(mut self, exptime: f64) -> Self {
        self.header.exptime = Some(exptime);
        self
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn pixel(&self, x: usize, y: usize) -> f32 {
        self.pixels[y * self.width + x]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, value: f32) {
        self.pixels[y * self.width + x] = value;
    }

    /// Mean pixel value, accumulated in f64.
    pub fn mean(&self) -> f64 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.pixels.iter().map(|&p| p as f64).sum();
        sum / self.pixels.len() as f64
    }

    pub(crate) fn ensure_same_shape(&self, other: &Frame) -> FrameResult<()> {
        if self.dimensions() != other.dimensions() {
            return Err(FrameError::ShapeMismatch {
                expected: self.dimensions(),
                found: other.dimensions(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_pixels_checks_length() {
        assert!(Frame::from_pixels(2, 2, vec![0.0; 4]).is_ok());
        assert!(matches!(
            Frame::from_pixels(2, 2, vec![0.0; 3]),
            Err(FrameError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_pixel_addressing_is_row_major() {
        let frame = Frame::from_pixels(3, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(frame.pixel(2, 0), 2.0);
        assert_eq!(frame.pixel(0, 1), 3.0);
        assert_eq!(frame.header.naxis1, 3);
        assert_eq!(frame.header.naxis2, 2);
    }

    #[test]
    fn test_mean() {
        let frame = Frame::from_pixels(2, 2, vec![1.0, 2.0, 3.0, 6.0]).unwrap();
        assert!((frame.mean() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_reports_both_shapes() {
        let a = Frame::filled(4, 4, 0.0);
        let b = Frame::filled(4, 3, 0.0);
        let err = a.ensure_same_shape(&b).unwrap_err();
        assert_eq!(err.to_string(), "frame is 4x3, expected 4x4");
    }
}
