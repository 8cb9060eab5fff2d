//! Closed enumerations for exposure and combination kinds.
//!
//! Raw frames carry a free-form `IMAGETYP` tag in their header. It is mapped
//! onto [`ExposureType`] once, at ingestion; everything downstream works with
//! the typed variants.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::frames::CombineMethod;

/// Error returned when a textual tag does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized {kind} tag '{value}'")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

/// Type of a raw exposure, as classified from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExposureType {
    Bias,
    Dark,
    Flat,
    Light,
}

impl ExposureType {
    pub const ALL: [ExposureType; 4] = [
        ExposureType::Bias,
        ExposureType::Dark,
        ExposureType::Flat,
        ExposureType::Light,
    ];

    /// Persisted text form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureType::Bias => "BIAS",
            ExposureType::Dark => "DARK",
            ExposureType::Flat => "FLAT",
            ExposureType::Light => "LIGHT",
        }
    }
}

impl fmt::Display for ExposureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExposureType {
    type Err = ParseKindError;

    /// Parse an `IMAGETYP` header tag. Matching is case-insensitive and
    /// ignores surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BIAS" => Ok(ExposureType::Bias),
            "DARK" => Ok(ExposureType::Dark),
            "FLAT" => Ok(ExposureType::Flat),
            "LIGHT" => Ok(ExposureType::Light),
            _ => Err(ParseKindError {
                kind: "exposure type",
                value: s.to_string(),
            }),
        }
    }
}

/// Type of a derived frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombinationType {
    DarkMaster,
    FlatMaster,
    CalibratedLight,
}

impl CombinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CombinationType::DarkMaster => "DARK_MASTER",
            CombinationType::FlatMaster => "FLAT_MASTER",
            CombinationType::CalibratedLight => "CALIBRATED_LIGHT",
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, CombinationType::DarkMaster | CombinationType::FlatMaster)
    }
}

impl fmt::Display for CombinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombinationType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DARK_MASTER" => Ok(CombinationType::DarkMaster),
            "FLAT_MASTER" => Ok(CombinationType::FlatMaster),
            "CALIBRATED_LIGHT" => Ok(CombinationType::CalibratedLight),
            _ => Err(ParseKindError {
                kind: "combination type",
                value: s.to_string(),
            }),
        }
    }
}

/// The two master calibration frames a night produces.
///
/// Both are built the same way (select, stack, write, record); they differ
/// only in the inputs they select and the stacking rule: darks are median
/// combined, flats are averaged. The rules are not interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasterKind {
    Dark,
    Flat,
}

impl MasterKind {
    /// Raw exposures stacked into this master.
    pub fn exposure_type(&self) -> ExposureType {
        match self {
            MasterKind::Dark => ExposureType::Dark,
            MasterKind::Flat => ExposureType::Flat,
        }
    }

    pub fn combination_type(&self) -> CombinationType {
        match self {
            MasterKind::Dark => CombinationType::DarkMaster,
            MasterKind::Flat => CombinationType::FlatMaster,
        }
    }

    pub fn combine_method(&self) -> CombineMethod {
        match self {
            MasterKind::Dark => CombineMethod::Median,
            MasterKind::Flat => CombineMethod::Average,
        }
    }

    /// File name of the master inside the products directory.
    pub fn filename(&self) -> &'static str {
        match self {
            MasterKind::Dark => "dark_master.fits",
            MasterKind::Flat => "flat_master.fits",
        }
    }

    /// `IMAGETYP` written into the master's header. Never a raw type tag.
    pub fn image_type_tag(&self) -> &'static str {
        match self {
            MasterKind::Dark => "DARKM",
            MasterKind::Flat => "FLATM",
        }
    }
}

impl fmt::Display for MasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterKind::Dark => f.write_str("dark"),
            MasterKind::Flat => f.write_str("flat"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposure_type_from_str_is_case_insensitive() {
        assert_eq!("dark".parse::<ExposureType>().unwrap(), ExposureType::Dark);
        assert_eq!(" Light ".parse::<ExposureType>().unwrap(), ExposureType::Light);
        assert_eq!("FLAT".parse::<ExposureType>().unwrap(), ExposureType::Flat);
        assert_eq!("Bias".parse::<ExposureType>().unwrap(), ExposureType::Bias);
    }

    #[test]
    fn test_exposure_type_rejects_unknown_tag() {
        let err = "DARKM".parse::<ExposureType>().unwrap_err();
        assert_eq!(err.value, "DARKM");
        assert!("".parse::<ExposureType>().is_err());
        assert!("object".parse::<ExposureType>().is_err());
    }

    #[test]
    fn test_combination_type_text_roundtrip() {
        for kind in [
            CombinationType::DarkMaster,
            CombinationType::FlatMaster,
            CombinationType::CalibratedLight,
        ] {
            assert_eq!(kind.as_str().parse::<CombinationType>().unwrap(), kind);
        }
        assert!("DARK".parse::<CombinationType>().is_err());
    }

    #[test]
    fn test_master_kind_rules() {
        assert_eq!(MasterKind::Dark.combine_method(), CombineMethod::Median);
        assert_eq!(MasterKind::Flat.combine_method(), CombineMethod::Average);
        assert_eq!(MasterKind::Dark.filename(), "dark_master.fits");
        assert_eq!(MasterKind::Flat.filename(), "flat_master.fits");
        assert_eq!(MasterKind::Dark.exposure_type(), ExposureType::Dark);
        assert_eq!(MasterKind::Flat.combination_type(), CombinationType::FlatMaster);
    }

    #[test]
    fn test_master_tags_are_not_raw_types() {
        for kind in [MasterKind::Dark, MasterKind::Flat] {
            assert!(kind.image_type_tag().parse::<ExposureType>().is_err());
        }
    }
}
