//! Antenna elevation pattern tables and gain interpolation
//!
//! Each table covers ±5° around a reference elevation angle with 201 gain
//! samples in dB, one every 0.05°.

use crate::core::units::db_to_linear;
use crate::types::{SarError, SarResult};

/// Number of samples in an elevation pattern table
pub const ANTENNA_PATTERN_LENGTH: usize = 201;

/// Angular spacing of table samples (degrees)
pub const ANTENNA_PATTERN_STEP_DEG: f64 = 0.05;

/// Offset of the first sample from the reference angle (degrees)
pub const ANTENNA_PATTERN_HALF_SPAN_DEG: f64 = 5.0;

/// Gain-vs-elevation table for one sub-swath and polarization
#[derive(Debug, Clone, PartialEq)]
pub struct AntennaPatternTable {
    reference_angle: f64,
    gains_db: Vec<f32>,
}

impl AntennaPatternTable {
    /// Build a table, rejecting anything that is not exactly 201 samples long.
    pub fn new(reference_angle: f64, gains_db: Vec<f32>) -> SarResult<Self> {
        if gains_db.len() != ANTENNA_PATTERN_LENGTH {
            return Err(SarError::InvalidFormat(format!(
                "Antenna pattern must have {} samples, got {}",
                ANTENNA_PATTERN_LENGTH,
                gains_db.len()
            )));
        }
        if !reference_angle.is_finite() {
            return Err(SarError::InvalidFormat(format!(
                "Invalid antenna pattern reference angle: {}",
                reference_angle
            )));
        }
        Ok(Self {
            reference_angle,
            gains_db,
        })
    }

    pub fn reference_angle(&self) -> f64 {
        self.reference_angle
    }

    pub fn gains_db(&self) -> &[f32] {
        &self.gains_db
    }

    /// Elevation angle of table sample `k`
    pub fn sample_angle(&self, k: usize) -> f64 {
        self.reference_angle - ANTENNA_PATTERN_HALF_SPAN_DEG + k as f64 * ANTENNA_PATTERN_STEP_DEG
    }

    /// Linear one-way gain at `elevation_angle` (degrees)
    pub fn gain(&self, elevation_angle: f64) -> f64 {
        compute_ant_pat_gain(elevation_angle, self.reference_angle, &self.gains_db)
    }
}

/// Linear antenna gain at `elevation_angle` from a dB table sampled every
/// 0.05° starting at `reference_angle - 5°`.
///
/// Both bracketing samples are converted to linear gain before interpolating.
/// The bucket index is clamped so angles outside the table extrapolate from
/// the edge bucket instead of indexing out of bounds.
pub fn compute_ant_pat_gain(elevation_angle: f64, reference_angle: f64, gains_db: &[f32]) -> f64 {
    let n = gains_db.len();
    if n == 0 {
        return 1.0;
    }
    if n == 1 {
        return db_to_linear(gains_db[0] as f64);
    }

    let position =
        (elevation_angle - reference_angle + ANTENNA_PATTERN_HALF_SPAN_DEG) / ANTENNA_PATTERN_STEP_DEG;
    let k0 = if position.is_nan() {
        0
    } else {
        (position.floor().max(0.0) as usize).min(n - 2)
    };

    let theta0 =
        reference_angle - ANTENNA_PATTERN_HALF_SPAN_DEG + k0 as f64 * ANTENNA_PATTERN_STEP_DEG;
    let gain0 = db_to_linear(gains_db[k0] as f64);
    let gain1 = db_to_linear(gains_db[k0 + 1] as f64);
    let mu = (elevation_angle - theta0) / ANTENNA_PATTERN_STEP_DEG;

    gain0 + mu * (gain1 - gain0)
}

/// Index of the reference angle closest to `elevation_angle`.
///
/// Scans from index 0 and keeps the first minimum, so an exact tie between
/// two neighbours resolves to the lower sub-swath.
pub fn nearest_sub_swath(elevation_angle: f64, reference_angles: &[f64]) -> usize {
    let mut best = 0;
    let mut best_diff = f64::INFINITY;
    for (i, &reference) in reference_angles.iter().enumerate() {
        let diff = (elevation_angle - reference).abs();
        if diff < best_diff {
            best_diff = diff;
            best = i;
        }
    }
    best
}

/// Antenna patterns for every sub-swath of an acquisition, one set per band.
///
/// Single-swath modes carry one sub-swath; ENVISAT wide swath carries five.
#[derive(Debug, Clone)]
pub struct SubSwathPatterns {
    reference_angles: Vec<f64>,
    /// tables[sub_swath][band]
    tables: Vec<Vec<AntennaPatternTable>>,
}

impl SubSwathPatterns {
    pub fn new(tables: Vec<Vec<AntennaPatternTable>>) -> SarResult<Self> {
        if tables.is_empty() || tables.iter().any(|t| t.is_empty()) {
            return Err(SarError::Processing(
                "Antenna pattern set needs at least one table per sub-swath".to_string(),
            ));
        }
        let band_count = tables[0].len();
        if tables.iter().any(|t| t.len() != band_count) {
            return Err(SarError::Processing(
                "Antenna pattern sub-swaths disagree on band count".to_string(),
            ));
        }
        let reference_angles = tables.iter().map(|t| t[0].reference_angle()).collect();
        Ok(Self {
            reference_angles,
            tables,
        })
    }

    pub fn sub_swath_count(&self) -> usize {
        self.tables.len()
    }

    pub fn reference_angles(&self) -> &[f64] {
        &self.reference_angles
    }

    /// Linear gain for `band` at `elevation_angle`, choosing the sub-swath
    /// by nearest reference angle when there is more than one.
    pub fn gain(&self, elevation_angle: f64, band: usize) -> SarResult<f64> {
        let swath = if self.tables.len() == 1 {
            0
        } else {
            nearest_sub_swath(elevation_angle, &self.reference_angles)
        };
        let table = self.tables[swath].get(band).ok_or_else(|| {
            SarError::Processing(format!(
                "No antenna pattern for band {} ({} loaded)",
                band,
                self.tables[swath].len()
            ))
        })?;
        Ok(table.gain(elevation_angle))
    }
}
