//! Night bundle, exposure and combination entities.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use qtty::Seconds;
use serde::{Deserialize, Serialize};

use super::kinds::{CombinationType, ExposureType};
use crate::define_id_type;

define_id_type!(
    /// Identifier of a night bundle, unique per observing night and telescope.
    i64,
    BundleId
);
define_id_type!(
    /// Exposure identifier (database primary key).
    i64,
    ExposureId
);
define_id_type!(
    /// Exposure combination identifier (database primary key).
    i64,
    CombinationId
);

/// One observing night rooted at a directory of raw frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightBundle {
    pub id: BundleId,
    pub created_at: DateTime<Utc>,
    /// Absolute path of the directory holding the raw frames.
    pub directory_path: PathBuf,
}

impl NightBundle {
    /// Absolute path of a raw frame belonging to this bundle.
    pub fn raw_path(&self, filename: &str) -> PathBuf {
        self.directory_path.join(filename)
    }

    /// Directory holding every derived frame of this bundle.
    pub fn products_path(&self, products_dir: &str) -> PathBuf {
        self.directory_path.join(products_dir)
    }
}

/// Bundle to be created by ingestion.
#[derive(Debug, Clone)]
pub struct NewNightBundle {
    pub id: BundleId,
    pub directory_path: PathBuf,
}

impl NewNightBundle {
    pub fn new(id: BundleId, directory_path: impl AsRef<Path>) -> Self {
        Self {
            id,
            directory_path: directory_path.as_ref().to_path_buf(),
        }
    }
}

/// Pixel dimensionality of a frame as declared by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameShape {
    pub naxis: u32,
    pub naxis1: u32,
    pub naxis2: u32,
}

impl FrameShape {
    pub fn new(naxis: u32, naxis1: u32, naxis2: u32) -> Self {
        Self {
            naxis,
            naxis1,
            naxis2,
        }
    }
}

/// One raw frame file of a bundle. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exposure {
    pub id: ExposureId,
    pub bundle_id: BundleId,
    /// File name relative to the bundle directory.
    pub filename: String,
    pub exposure_type: ExposureType,
    pub shape: FrameShape,
    pub exptime: Seconds,
}

/// Exposure parsed from a raw frame header, not yet recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExposure {
    pub filename: String,
    pub exposure_type: ExposureType,
    pub shape: FrameShape,
    pub exptime: Seconds,
}

/// A derived frame together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureCombination {
    pub id: CombinationId,
    pub bundle_id: BundleId,
    /// File name inside the bundle's products directory.
    pub filename: String,
    pub combination_type: CombinationType,
    /// Exposures whose pixels went into this frame.
    pub exposures: Vec<ExposureId>,
    /// Combinations this frame was derived with but not stacked from.
    pub uses_combinations: Vec<CombinationId>,
}

/// Combination to be recorded after its frame has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCombination {
    pub bundle_id: BundleId,
    pub filename: String,
    pub combination_type: CombinationType,
    pub exposures: Vec<ExposureId>,
    pub uses_combinations: Vec<CombinationId>,
}

impl NewCombination {
    /// Check the provenance invariants against the resolved input rows.
    ///
    /// `inputs` must be the rows for `self.exposures` and `uses` the rows for
    /// `self.uses_combinations`, in any order. Returns a description of the
    /// first violated rule.
    pub fn check_provenance(
        &self,
        inputs: &[Exposure],
        uses: &[ExposureCombination],
    ) -> Result<(), String> {
        if self.exposures.is_empty() {
            return Err(format!(
                "{} combination '{}' has no input exposures",
                self.combination_type, self.filename
            ));
        }

        let unique: HashSet<ExposureId> = self.exposures.iter().copied().collect();
        if unique.len() != self.exposures.len() {
            return Err(format!(
                "combination '{}' lists an input exposure more than once",
                self.filename
            ));
        }
        if inputs.len() != unique.len() {
            return Err(format!(
                "combination '{}' references {} unknown exposure(s)",
                self.filename,
                unique.len().saturating_sub(inputs.len())
            ));
        }
        if let Some(foreign) = inputs.iter().find(|e| e.bundle_id != self.bundle_id) {
            return Err(format!(
                "exposure {} belongs to bundle {}, not {}",
                foreign.id, foreign.bundle_id, self.bundle_id
            ));
        }

        if uses.len() != self.uses_combinations.len() {
            return Err(format!(
                "combination '{}' references unknown combinations",
                self.filename
            ));
        }
        if let Some(foreign) = uses.iter().find(|c| c.bundle_id != self.bundle_id) {
            return Err(format!(
                "combination {} belongs to bundle {}, not {}",
                foreign.id, foreign.bundle_id, self.bundle_id
            ));
        }

        match self.combination_type {
            CombinationType::DarkMaster | CombinationType::FlatMaster => {
                if !uses.is_empty() {
                    return Err(format!(
                        "{} '{}' must not depend on other combinations",
                        self.combination_type, self.filename
                    ));
                }
            }
            CombinationType::CalibratedLight => {
                let darks = uses
                    .iter()
                    .filter(|c| c.combination_type == CombinationType::DarkMaster)
                    .count();
                let flats = uses
                    .iter()
                    .filter(|c| c.combination_type == CombinationType::FlatMaster)
                    .count();
                if uses.len() != 2 || darks != 1 || flats != 1 {
                    return Err(format!(
                        "calibrated light '{}' must use exactly one dark master and one flat master \
                         (got {} dark, {} flat, {} total)",
                        self.filename,
                        darks,
                        flats,
                        uses.len()
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure(id: i64, bundle: i64, exposure_type: ExposureType) -> Exposure {
        Exposure {
            id: ExposureId(id),
            bundle_id: BundleId(bundle),
            filename: format!("frame_{id}.fits"),
            exposure_type,
            shape: FrameShape::new(2, 4, 4),
            exptime: Seconds::new(30.0),
        }
    }

    fn combination(id: i64, bundle: i64, combination_type: CombinationType) -> ExposureCombination {
        ExposureCombination {
            id: CombinationId(id),
            bundle_id: BundleId(bundle),
            filename: format!("comb_{id}.fits"),
            combination_type,
            exposures: vec![ExposureId(1)],
            uses_combinations: vec![],
        }
    }

    fn calibrated(uses: Vec<i64>) -> NewCombination {
        NewCombination {
            bundle_id: BundleId(1),
            filename: "calib_light.fits".to_string(),
            combination_type: CombinationType::CalibratedLight,
            exposures: vec![ExposureId(7)],
            uses_combinations: uses.into_iter().map(CombinationId).collect(),
        }
    }

    #[test]
    fn test_master_with_inputs_is_valid() {
        let new = NewCombination {
            bundle_id: BundleId(1),
            filename: "dark_master.fits".to_string(),
            combination_type: CombinationType::DarkMaster,
            exposures: vec![ExposureId(1), ExposureId(2)],
            uses_combinations: vec![],
        };
        let inputs = vec![
            exposure(1, 1, ExposureType::Dark),
            exposure(2, 1, ExposureType::Dark),
        ];
        assert!(new.check_provenance(&inputs, &[]).is_ok());
    }

    #[test]
    fn test_empty_inputs_rejected() {
        let new = NewCombination {
            bundle_id: BundleId(1),
            filename: "flat_master.fits".to_string(),
            combination_type: CombinationType::FlatMaster,
            exposures: vec![],
            uses_combinations: vec![],
        };
        assert!(new.check_provenance(&[], &[]).is_err());
    }

    #[test]
    fn test_foreign_bundle_input_rejected() {
        let new = NewCombination {
            bundle_id: BundleId(1),
            filename: "dark_master.fits".to_string(),
            combination_type: CombinationType::DarkMaster,
            exposures: vec![ExposureId(1)],
            uses_combinations: vec![],
        };
        let err = new
            .check_provenance(&[exposure(1, 2, ExposureType::Dark)], &[])
            .unwrap_err();
        assert!(err.contains("bundle 2"));
    }

    #[test]
    fn test_calibrated_light_needs_one_dark_and_one_flat() {
        let light = vec![exposure(7, 1, ExposureType::Light)];
        let dark = combination(1, 1, CombinationType::DarkMaster);
        let flat = combination(2, 1, CombinationType::FlatMaster);
        let other_dark = combination(3, 1, CombinationType::DarkMaster);

        assert!(calibrated(vec![1, 2])
            .check_provenance(&light, &[dark.clone(), flat.clone()])
            .is_ok());
        assert!(calibrated(vec![1])
            .check_provenance(&light, &[dark.clone()])
            .is_err());
        assert!(calibrated(vec![1, 3])
            .check_provenance(&light, &[dark, other_dark])
            .is_err());
    }

    #[test]
    fn test_calibrated_light_rejects_master_of_other_bundle() {
        let light = vec![exposure(7, 1, ExposureType::Light)];
        let dark = combination(1, 1, CombinationType::DarkMaster);
        let flat = combination(2, 9, CombinationType::FlatMaster);
        assert!(calibrated(vec![1, 2])
            .check_provenance(&light, &[dark, flat])
            .is_err());
    }

    #[test]
    fn test_products_path_is_under_bundle_root() {
        let bundle = NightBundle {
            id: BundleId(1),
            created_at: Utc::now(),
            directory_path: PathBuf::from("/data/night"),
        };
        assert_eq!(
            bundle.products_path("products"),
            PathBuf::from("/data/night/products")
        );
        assert_eq!(bundle.raw_path("a.fits"), PathBuf::from("/data/night/a.fits"));
    }
}
