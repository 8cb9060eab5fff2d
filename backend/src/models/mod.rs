//! Calibration data model: night bundles, exposures and their combinations.

pub mod calibration;
pub mod kinds;
pub mod macros;

pub use calibration::*;
pub use kinds::*;
