//! `[pipeline]` section of `toros.toml`.

use serde::{Deserialize, Serialize};

use crate::frames::LowFlatPolicy;

/// Numeric and layout settings shared by every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Subdirectory of the bundle root receiving every derived frame.
    #[serde(default = "default_products_dir")]
    pub products_dir: String,
    /// `EXPTIME` written into master frames, in seconds.
    #[serde(default = "default_master_exposure_time")]
    pub master_exposure_time: f64,
    /// Normalized flat value at or below which pixels are not divided.
    #[serde(default = "default_flat_min_value")]
    pub flat_min_value: f32,
    #[serde(default)]
    pub low_flat_policy: LowFlatPolicy,
    /// Case-insensitive substring identifying raw frame files.
    #[serde(default = "default_raw_frame_marker")]
    pub raw_frame_marker: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            products_dir: default_products_dir(),
            master_exposure_time: default_master_exposure_time(),
            flat_min_value: default_flat_min_value(),
            low_flat_policy: LowFlatPolicy::default(),
            raw_frame_marker: default_raw_frame_marker(),
        }
    }
}

fn default_products_dir() -> String {
    "products".to_string()
}

fn default_master_exposure_time() -> f64 {
    60.0
}

fn default_flat_min_value() -> f32 {
    0.9
}

fn default_raw_frame_marker() -> String {
    ".fit".to_string()
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        let products = self.products_dir.trim();
        if products.is_empty() || products == "." || products == ".." {
            return Err(format!("products_dir '{}' is not a subdirectory", self.products_dir));
        }
        if products.contains('/') || products.contains('\\') {
            return Err(format!(
                "products_dir '{}' must be a single path component",
                self.products_dir
            ));
        }
        if !(self.master_exposure_time.is_finite() && self.master_exposure_time > 0.0) {
            return Err(format!(
                "master_exposure_time must be positive, got {}",
                self.master_exposure_time
            ));
        }
        if !(self.flat_min_value.is_finite() && self.flat_min_value > 0.0) {
            return Err(format!(
                "flat_min_value must be positive, got {}",
                self.flat_min_value
            ));
        }
        if self.raw_frame_marker.is_empty() {
            return Err("raw_frame_marker must not be empty".to_string());
        }
        Ok(())
    }

    /// Whether `filename` names a raw frame.
    pub fn is_raw_frame(&self, filename: &str) -> bool {
        filename
            .to_lowercase()
            .contains(&self.raw_frame_marker.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.master_exposure_time, 60.0);
        assert_eq!(config.flat_min_value, 0.9);
    }

    #[test]
    fn test_raw_frame_marker_is_case_insensitive() {
        let config = PipelineConfig::default();
        assert!(config.is_raw_frame("dark_001.fits"));
        assert!(config.is_raw_frame("LIGHT_002.FIT"));
        assert!(config.is_raw_frame("flat.fit.gz"));
        assert!(!config.is_raw_frame("notes.txt"));
        assert!(!config.is_raw_frame("frame.fts"));
    }

    #[test]
    fn test_nested_products_dir_is_rejected() {
        let config = PipelineConfig {
            products_dir: "a/b".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            products_dir: "..".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_values_are_rejected() {
        let config = PipelineConfig {
            flat_min_value: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            master_exposure_time: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
