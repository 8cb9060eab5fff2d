use chrono::{DateTime, Utc};
use diesel::prelude::*;
use qtty::Seconds;
use std::path::PathBuf;

use super::schema::{
    combination_exposure, combination_uses, exposure, exposure_combination, night_bundle,
};
use crate::db::repository::{RepositoryError, RepositoryResult};
use crate::models::{
    BundleId, CombinationId, Exposure, ExposureCombination, ExposureId, FrameShape, NewExposure,
    NightBundle,
};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = night_bundle)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NightBundleRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub directory_path: String,
}

impl From<NightBundleRow> for NightBundle {
    fn from(row: NightBundleRow) -> Self {
        NightBundle {
            id: BundleId(row.id),
            created_at: row.created_at,
            directory_path: PathBuf::from(row.directory_path),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = night_bundle)]
pub struct NewNightBundleRow {
    pub id: i64,
    pub directory_path: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = exposure)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ExposureRow {
    pub id: i64,
    pub bundle_id: i64,
    pub filename: String,
    pub exposure_type: String,
    pub naxis: i32,
    pub naxis1: i32,
    pub naxis2: i32,
    pub exptime: Seconds,
}

impl ExposureRow {
    pub fn into_exposure(self) -> RepositoryResult<Exposure> {
        let exposure_type = self.exposure_type.parse().map_err(|e| {
            RepositoryError::internal(format!("exposure {} has {}", self.id, e))
        })?;
        let axis = |v: i32| {
            u32::try_from(v).map_err(|_| {
                RepositoryError::internal(format!("exposure {} has negative axis {}", self.id, v))
            })
        };

        Ok(Exposure {
            id: ExposureId(self.id),
            bundle_id: BundleId(self.bundle_id),
            shape: FrameShape::new(axis(self.naxis)?, axis(self.naxis1)?, axis(self.naxis2)?),
            filename: self.filename,
            exposure_type,
            exptime: self.exptime,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = exposure)]
pub struct NewExposureRow {
    pub bundle_id: i64,
    pub filename: String,
    pub exposure_type: String,
    pub naxis: i32,
    pub naxis1: i32,
    pub naxis2: i32,
    pub exptime: Seconds,
}

impl NewExposureRow {
    pub fn new(bundle_id: BundleId, exposure: &NewExposure) -> Self {
        Self {
            bundle_id: bundle_id.value(),
            filename: exposure.filename.clone(),
            exposure_type: exposure.exposure_type.as_str().to_string(),
            naxis: exposure.shape.naxis as i32,
            naxis1: exposure.shape.naxis1 as i32,
            naxis2: exposure.shape.naxis2 as i32,
            exptime: exposure.exptime,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = exposure_combination)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[allow(dead_code)] // created_at is only read by SQL consumers
pub struct CombinationRow {
    pub id: i64,
    pub bundle_id: i64,
    pub filename: String,
    pub combination_type: String,
    pub created_at: DateTime<Utc>,
}

impl CombinationRow {
    pub fn into_combination(
        self,
        exposures: Vec<ExposureId>,
        uses_combinations: Vec<CombinationId>,
    ) -> RepositoryResult<ExposureCombination> {
        let combination_type = self.combination_type.parse().map_err(|e| {
            RepositoryError::internal(format!("combination {} has {}", self.id, e))
        })?;
        Ok(ExposureCombination {
            id: CombinationId(self.id),
            bundle_id: BundleId(self.bundle_id),
            filename: self.filename,
            combination_type,
            exposures,
            uses_combinations,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = exposure_combination)]
pub struct NewCombinationRow {
    pub bundle_id: i64,
    pub filename: String,
    pub combination_type: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = combination_exposure)]
pub struct CombinationExposureRow {
    pub combination_id: i64,
    pub exposure_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = combination_uses)]
pub struct CombinationUseRow {
    pub combination_id: i64,
    pub used_combination_id: i64,
}
