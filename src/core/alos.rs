//! ALOS PALSAR calibration: a single scalar factor, no geometric terms.

use crate::config::{CalibrationConfig, OutputQuantity};
use crate::core::calibrator::{
    calibrate_pixels, check_mission, check_not_calibrated, mark_calibrated, require_sigma0,
    Calibrator, InitOptions, PixelSource, SourceTile, TargetBand, TileGeometry,
};
use crate::core::factors::CalibrationFactor;
use crate::io::metadata::{keys, ProductMetadata};
use crate::types::{Mission, SarError, SarResult, TileRect};
use ndarray::ArrayViewMut2;

#[derive(Debug, Clone)]
pub struct AlosCalibrator {
    output_image_in_db: bool,
    output_quantity: OutputQuantity,
    calibration_factor: Option<CalibrationFactor>,
}

impl AlosCalibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            output_image_in_db: config.output_image_in_db,
            output_quantity: config.output_quantity,
            calibration_factor: None,
        }
    }

    /// Linear factor, available after initialization
    pub fn calibration_factor(&self) -> SarResult<f64> {
        self.calibration_factor
            .as_ref()
            .ok_or_else(|| SarError::Processing("ALOS calibrator used before initialization".to_string()))?
            .scalar()
    }
}

impl Calibrator for AlosCalibrator {
    fn mission(&self) -> Mission {
        Mission::Alos
    }

    fn initialize(
        &mut self,
        source: &ProductMetadata,
        target: &mut ProductMetadata,
        options: InitOptions,
    ) -> SarResult<()> {
        check_mission(Mission::Alos, source)?;
        check_not_calibrated(source)?;
        require_sigma0(Mission::Alos, self.output_quantity)?;

        let factor_db = source.get_f64(keys::CALIBRATION_FACTOR)?;
        let is_complex = source.sample_type.is_complex();
        let factor = CalibrationFactor::scalar_from_db(factor_db, is_complex);
        log::info!(
            "ALOS calibration factor {:.3} dB ({}) -> {:.6e} linear",
            factor_db,
            source.sample_type,
            factor.scalar()?
        );
        self.calibration_factor = Some(factor);

        if options.update_metadata {
            mark_calibrated(source, target);
        }
        Ok(())
    }

    fn compute_tile(
        &self,
        _target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        _geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        let factor = self.calibration_factor()?;
        let source = PixelSource::from_tiles("ALOS", sources, tile)?;
        calibrate_pixels(&source, tile, target, self.output_image_in_db, |_, _, sigma| sigma * factor)
    }
}
