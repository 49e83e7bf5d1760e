//! Calibration constants, fixed once a calibrator is initialized.

use crate::core::units::db_to_linear;
use crate::types::{Polarization, SarError, SarResult};
use std::collections::BTreeMap;

/// Number of ENVISAT image-mode sub-swaths (IS1..IS7)
pub const IMAGE_SWATH_COUNT: usize = 7;

/// Offset applied to dB calibration constants of complex products
pub const COMPLEX_CALIBRATION_OFFSET_DB: f64 = -32.0;

/// Convert a dB calibration constant to linear scale, applying the
/// complex-product offset when `is_complex`.
pub fn calibration_db_to_linear(factor_db: f64, is_complex: bool) -> f64 {
    let adjusted = if is_complex {
        factor_db + COMPLEX_CALIBRATION_OFFSET_DB
    } else {
        factor_db
    };
    db_to_linear(adjusted)
}

/// Linear calibration constant(s) for a product
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationFactor {
    Scalar(f64),
    PerPolarization(BTreeMap<Polarization, f64>),
    PerSwath([f64; IMAGE_SWATH_COUNT]),
}

impl CalibrationFactor {
    pub fn scalar_from_db(factor_db: f64, is_complex: bool) -> Self {
        CalibrationFactor::Scalar(calibration_db_to_linear(factor_db, is_complex))
    }

    /// Build a per-swath factor from seven dB values (IS1..IS7)
    pub fn per_swath_from_db(values_db: &[f32], is_complex: bool) -> SarResult<Self> {
        if values_db.len() != IMAGE_SWATH_COUNT {
            return Err(SarError::InvalidFormat(format!(
                "Per-swath calibration constants need {} values, got {}",
                IMAGE_SWATH_COUNT,
                values_db.len()
            )));
        }
        let mut out = [0.0; IMAGE_SWATH_COUNT];
        for (slot, &db) in out.iter_mut().zip(values_db) {
            *slot = calibration_db_to_linear(db as f64, is_complex);
        }
        Ok(CalibrationFactor::PerSwath(out))
    }

    pub fn scalar(&self) -> SarResult<f64> {
        match self {
            CalibrationFactor::Scalar(v) => Ok(*v),
            other => Err(SarError::Processing(format!(
                "Calibration factor is not a scalar: {:?}",
                other
            ))),
        }
    }

    pub fn for_polarization(&self, polarization: Polarization) -> SarResult<f64> {
        match self {
            CalibrationFactor::Scalar(v) => Ok(*v),
            CalibrationFactor::PerPolarization(map) => map.get(&polarization).copied().ok_or_else(|| {
                SarError::MissingAttribute(format!("calibration factor for {}", polarization))
            }),
            CalibrationFactor::PerSwath(_) => Err(SarError::Processing(
                "Per-swath calibration factor needs a swath index".to_string(),
            )),
        }
    }

    /// `swath_index` is zero based (IS1 -> 0)
    pub fn for_swath(&self, swath_index: usize) -> SarResult<f64> {
        match self {
            CalibrationFactor::Scalar(v) => Ok(*v),
            CalibrationFactor::PerSwath(values) => values.get(swath_index).copied().ok_or_else(|| {
                SarError::Processing(format!("Swath index {} out of range", swath_index))
            }),
            CalibrationFactor::PerPolarization(_) => Err(SarError::Processing(
                "Per-polarization calibration factor needs a polarization".to_string(),
            )),
        }
    }
}
