//! Frame file access used by the pipeline stages.

use std::path::Path;

use super::{fits, Frame, FrameHeader, FrameResult};

/// Reads and writes frame files.
///
/// Implementations are blocking; async callers run them on the blocking
/// thread pool.
pub trait FrameStore: Send + Sync {
    /// Read only the header of a frame file.
    fn read_header(&self, path: &Path) -> FrameResult<FrameHeader>;

    /// Read a full frame (header and pixels).
    fn read_frame(&self, path: &Path) -> FrameResult<Frame>;

    /// Write a frame, replacing nothing on failure.
    fn write_frame(&self, path: &Path, frame: &Frame) -> FrameResult<()>;
}

/// [`FrameStore`] backed by FITS files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FitsFrameStore;

impl FitsFrameStore {
    pub fn new() -> Self {
        Self
    }
}

impl FrameStore for FitsFrameStore {
    fn read_header(&self, path: &Path) -> FrameResult<FrameHeader> {
        fits::read_header(path)?.to_frame_header()
    }

    fn read_frame(&self, path: &Path) -> FrameResult<Frame> {
        fits::read_frame(path)
    }

    fn write_frame(&self, path: &Path, frame: &Frame) -> FrameResult<()> {
        fits::write_frame(path, frame)
    }
}
