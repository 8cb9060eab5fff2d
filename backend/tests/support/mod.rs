//! Shared helpers for integration tests: scoped environment variables,
//! synthetic night directories, and frame stores that fail on demand.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use toros_pipeline::db::{FullRepository, LocalRepository};
use toros_pipeline::frames::{
    fits, CosmicRayFilter, FitsFrameStore, Frame, FrameError, FrameHeader, FrameResult,
    FrameStore,
};
use toros_pipeline::pipeline::{Pipeline, PipelineConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// Restores the previous values on unwind and serializes access to the
/// process environment across parallel tests.
///
/// `Some(v)` sets a variable, `None` removes it.
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// Frame side length used by [`NightDir`] helpers.
pub const SIZE: usize = 4;

/// A temporary night directory filled with synthetic FITS frames.
pub struct NightDir {
    dir: TempDir,
}

impl NightDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn products(&self) -> PathBuf {
        self.path().join("products")
    }

    /// Write a constant frame tagged with `image_type` and `exptime`.
    pub fn add(&self, name: &str, image_type: &str, exptime: f64, value: f32) -> PathBuf {
        let frame = Frame::filled(SIZE, SIZE, value)
            .with_image_type(image_type)
            .with_exptime(exptime);
        self.add_frame(name, &frame)
    }

    pub fn add_frame(&self, name: &str, frame: &Frame) -> PathBuf {
        let path = self.path().join(name);
        fits::write_frame(&path, frame).expect("write synthetic frame");
        path
    }

    /// Write a frame with no `IMAGETYP` card.
    pub fn add_untagged(&self, name: &str) -> PathBuf {
        self.add_frame(name, &Frame::filled(SIZE, SIZE, 1.0).with_exptime(1.0))
    }

    pub fn add_darks(&self, count: usize, exptime: f64, value: f32) {
        for i in 0..count {
            self.add(&format!("dark_{:03}.fits", i + 1), "DARK", exptime, value);
        }
    }

    pub fn add_flats(&self, count: usize, value: f32) {
        for i in 0..count {
            self.add(&format!("flat_{:03}.fits", i + 1), "FLAT", 2.0, value);
        }
    }

    pub fn add_lights(&self, count: usize, exptime: f64, value: f32) {
        for i in 0..count {
            self.add(&format!("light_{:03}.fits", i + 1), "LIGHT", exptime, value);
        }
    }

    /// Replace `name` with a lone header block declaring a
    /// `naxis1` x `naxis2` BITPIX -64 image and no data.
    pub fn replace_with_oversized_header(&self, name: &str, naxis1: u64, naxis2: u64) {
        let cards = [
            ("SIMPLE", "T".to_string()),
            ("BITPIX", "-64".to_string()),
            ("NAXIS", "2".to_string()),
            ("NAXIS1", naxis1.to_string()),
            ("NAXIS2", naxis2.to_string()),
            ("IMAGETYP", "'LIGHT   '".to_string()),
            ("EXPTIME", "30.0".to_string()),
        ];
        let mut bytes = Vec::with_capacity(2880);
        for (keyword, value) in &cards {
            bytes.extend_from_slice(format!("{:<8}= {:>20}", keyword, value).as_bytes());
            bytes.resize(bytes.len().next_multiple_of(80), b' ');
        }
        bytes.extend_from_slice(b"END");
        bytes.resize(2880, b' ');
        std::fs::write(self.path().join(name), bytes).expect("write oversized header");
    }

    /// Cut `name` down to its first `len` bytes.
    pub fn truncate(&self, name: &str, len: u64) {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(self.path().join(name))
            .expect("open frame");
        file.set_len(len).expect("truncate frame");
    }

    /// Read back a derived frame from the products directory.
    pub fn product(&self, name: &str) -> Frame {
        fits::read_frame(&self.products().join(name)).expect("read product")
    }
}

/// Three darks, three flats, two lights and a bias.
pub fn standard_night() -> NightDir {
    let night = NightDir::new();
    night.add_darks(3, 60.0, 10.0);
    night.add_flats(3, 5.0);
    night.add_lights(2, 30.0, 105.0);
    night.add("bias_001.fits", "Bias", 0.0, 1.0);
    night
}

pub fn local_repository() -> Arc<dyn FullRepository> {
    Arc::new(LocalRepository::new())
}

/// Pipeline over FITS files and a fresh in-memory store.
pub fn fits_pipeline() -> Pipeline {
    Pipeline::with_fits(local_repository(), PipelineConfig::default())
}

/// FITS store that refuses to write files whose name is in `fail_writes`.
#[derive(Default)]
pub struct FailingWrites {
    inner: FitsFrameStore,
    fail_writes: HashSet<String>,
}

impl FailingWrites {
    pub fn on(names: &[&str]) -> Self {
        Self {
            inner: FitsFrameStore::new(),
            fail_writes: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

impl FrameStore for FailingWrites {
    fn read_header(&self, path: &Path) -> FrameResult<FrameHeader> {
        self.inner.read_header(path)
    }

    fn read_frame(&self, path: &Path) -> FrameResult<Frame> {
        self.inner.read_frame(path)
    }

    fn write_frame(&self, path: &Path, frame: &Frame) -> FrameResult<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if self.fail_writes.contains(name) {
            return Err(FrameError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.write_frame(path, frame)
    }
}

/// Cosmic-ray filter counting the frames it sees.
#[derive(Default)]
pub struct CountingFilter {
    pub seen: AtomicUsize,
}

impl CosmicRayFilter for CountingFilter {
    fn clean(&self, frame: Frame) -> FrameResult<Frame> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(frame)
    }
}
