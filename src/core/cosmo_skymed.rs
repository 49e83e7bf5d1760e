//! Cosmo-Skymed calibration from the reference slant range, reference
//! incidence angle, rescaling factor and per-polarization constant Ks.

use crate::config::{CalibrationConfig, OutputQuantity};
use crate::core::calibrator::{
    calibrate_pixels, check_mission, check_not_calibrated, mark_calibrated, require_sigma0,
    Calibrator, InitOptions, PixelSource, SourceTile, TargetBand, TileGeometry,
};
use crate::core::factors::CalibrationFactor;
use crate::io::metadata::{keys, ProductMetadata};
use crate::types::{Mission, Polarization, SarError, SarResult, TileRect};
use ndarray::ArrayViewMut2;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct CosmoSkymedCalibrator {
    output_image_in_db: bool,
    output_quantity: OutputQuantity,
    /// Ks per polarization
    calibration_factor: Option<CalibrationFactor>,
    /// Rref^(2*exp) * sin(theta_ref) / rescaling^2, terms dropped when
    /// already compensated upstream
    common_term: f64,
}

impl CosmoSkymedCalibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            output_image_in_db: config.output_image_in_db,
            output_quantity: config.output_quantity,
            calibration_factor: None,
            common_term: 1.0,
        }
    }

    /// Total linear multiplier applied to sigma_raw for `polarization`
    pub fn multiplier(&self, polarization: Polarization) -> SarResult<f64> {
        let ks = self
            .calibration_factor
            .as_ref()
            .ok_or_else(|| SarError::Processing("Cosmo-Skymed calibrator used before initialization".to_string()))?
            .for_polarization(polarization)?;
        Ok(self.common_term / ks)
    }
}

impl Calibrator for CosmoSkymedCalibrator {
    fn mission(&self) -> Mission {
        Mission::CosmoSkymed
    }

    fn initialize(
        &mut self,
        source: &ProductMetadata,
        target: &mut ProductMetadata,
        options: InitOptions,
    ) -> SarResult<()> {
        check_mission(Mission::CosmoSkymed, source)?;
        check_not_calibrated(source)?;
        require_sigma0(Mission::CosmoSkymed, self.output_quantity)?;

        let ks: BTreeMap<Polarization, f64> = source.keyed_f64(keys::CALIBRATION_FACTOR)?;
        if ks.is_empty() {
            return Err(SarError::MissingAttribute(format!(
                "{}.<POL>",
                keys::CALIBRATION_FACTOR
            )));
        }
        if let Some((pol, _)) = ks.iter().find(|(_, v)| !(**v > 0.0)) {
            return Err(SarError::Metadata(format!(
                "Cosmo-Skymed calibration constant for {} must be positive",
                pol
            )));
        }

        let rescaling_factor = source.get_f64(keys::RESCALING_FACTOR)?;
        let mut common = 1.0 / (rescaling_factor * rescaling_factor);

        if !source.flag(keys::RANGE_SPREAD_COMP_FLAG)? {
            let ref_slant_range = source.get_f64(keys::REF_SLANT_RANGE)?;
            let exponent = source.get_f64(keys::REF_SLANT_RANGE_EXP)?;
            common *= ref_slant_range.powf(2.0 * exponent);
            log::debug!("Range spreading term: Rref={} m, exponent={}", ref_slant_range, exponent);
        }
        if !source.flag(keys::INC_ANGLE_COMP_FLAG)? {
            let ref_inc_angle = source.get_f64(keys::REF_INC_ANGLE)?;
            common *= ref_inc_angle.to_radians().sin();
            log::debug!("Incidence term: reference angle {} deg", ref_inc_angle);
        }

        log::info!(
            "Cosmo-Skymed calibration: rescaling={}, {} polarization constant(s)",
            rescaling_factor,
            ks.len()
        );
        self.common_term = common;
        self.calibration_factor = Some(CalibrationFactor::PerPolarization(ks));

        if options.update_metadata {
            mark_calibrated(source, target);
        }
        Ok(())
    }

    fn compute_tile(
        &self,
        target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        _geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        let source = PixelSource::from_tiles("Cosmo-Skymed", sources, tile)?;
        if source.is_phase() {
            return calibrate_pixels(&source, tile, target, self.output_image_in_db, |_, _, s| s);
        }
        let multiplier = self.multiplier(target_band.require_polarization()?)?;
        calibrate_pixels(&source, tile, target, self.output_image_in_db, |_, _, sigma| sigma * multiplier)
    }
}
