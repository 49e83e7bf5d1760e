//! sarcal: multi-mission SAR radiometric calibration
//!
//! Converts detected or complex SAR samples from ALOS PALSAR, ENVISAT ASAR,
//! Radarsat-2 and Cosmo-Skymed products into calibrated backscatter
//! (sigma0, gamma0 or beta0), linear or in dB, tile by tile.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{AuxFileSelection, CalibrationConfig, OutputQuantity};
pub use crate::core::{create_calibrator, CalibratedProduct, CalibrationPass, CalibrationProcessor, Calibrator};
pub use io::{AuxiliaryData, BandInfo, ProductMetadata};
pub use types::{Mission, PixelUnit, Polarization, SampleType, SarError, SarImage, SarRealImage, SarResult, TileRect};
