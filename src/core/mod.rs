//! Core calibration modules

pub mod antenna_pattern;
pub mod calibrate;
pub mod calibrator;
pub mod factors;
pub mod geometry;
pub mod tie_point_grid;
pub mod units;

pub mod alos;
pub mod asar;
pub mod cosmo_skymed;
pub mod radarsat2;

// Re-export main types
pub use alos::AlosCalibrator;
pub use antenna_pattern::{compute_ant_pat_gain, AntennaPatternTable, SubSwathPatterns};
pub use asar::{AsarCalibrator, AsarMode};
pub use calibrate::{build_target_bands, complex_to_iq, CalibratedProduct, CalibrationPass, CalibrationProcessor};
pub use calibrator::{create_calibrator, Calibrator, InitOptions, SourceTile, TargetBand, TileGeometry};
pub use cosmo_skymed::CosmoSkymedCalibrator;
pub use factors::CalibrationFactor;
pub use geometry::GeometryResolver;
pub use radarsat2::Radarsat2Calibrator;
pub use tie_point_grid::TiePointGrid;
