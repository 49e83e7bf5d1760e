//! Radarsat-2 calibration with the product's range-dependent lookup table.

use crate::config::{CalibrationConfig, OutputQuantity};
use crate::core::calibrator::{
    calibrate_pixels, check_mission, check_not_calibrated, mark_calibrated, Calibrator, InitOptions,
    PixelSource, SourceTile, TargetBand, TileGeometry,
};
use crate::io::metadata::ProductMetadata;
use crate::io::radarsat2_lut::{gains_key, offset_key};
use crate::types::{Mission, SarError, SarResult, TileRect};
use ndarray::ArrayViewMut2;

#[derive(Debug, Clone)]
pub struct Radarsat2Calibrator {
    output_image_in_db: bool,
    output_quantity: OutputQuantity,
    is_complex: bool,
    offset: f64,
    gains: Vec<f64>,
}

impl Radarsat2Calibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            output_image_in_db: config.output_image_in_db,
            output_quantity: config.output_quantity,
            is_complex: false,
            offset: 0.0,
            gains: Vec::new(),
        }
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }
}

impl Calibrator for Radarsat2Calibrator {
    fn mission(&self) -> Mission {
        Mission::Radarsat2
    }

    fn initialize(
        &mut self,
        source: &ProductMetadata,
        target: &mut ProductMetadata,
        options: InitOptions,
    ) -> SarResult<()> {
        check_mission(Mission::Radarsat2, source)?;
        check_not_calibrated(source)?;

        let quantity = self.output_quantity;
        let gains = source.get_f64_array(&gains_key(quantity))?;
        if gains.len() < source.width {
            return Err(SarError::Metadata(format!(
                "Radarsat-2 {} LUT has {} gains but the image is {} samples wide",
                quantity,
                gains.len(),
                source.width
            )));
        }
        if let Some((x, g)) = gains.iter().enumerate().find(|(_, g)| !(**g > 0.0)) {
            return Err(SarError::Metadata(format!(
                "Radarsat-2 {} LUT gain at column {} must be positive, found {}",
                quantity, x, g
            )));
        }
        self.is_complex = source.sample_type.is_complex();
        // The offset only enters the detected formula
        self.offset = if self.is_complex {
            0.0
        } else {
            source.get_f64(&offset_key(quantity))?
        };
        self.gains = gains.to_vec();

        log::info!(
            "Radarsat-2 {} LUT: {} gains, offset {}, {} product",
            quantity,
            self.gains.len(),
            self.offset,
            source.sample_type
        );

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
        if self.gains.len() < tile.x_end() {
            return Err(SarError::Processing(format!(
                "Tile {} extends past the Radarsat-2 LUT ({} gains)",
                tile,
                self.gains.len()
            )));
        }
        let source = PixelSource::from_tiles("Radarsat-2", sources, tile)?;
        let gains = &self.gains[tile.x..tile.x_end()];
        let offset = self.offset;

        if self.is_complex {
            calibrate_pixels(&source, tile, target, self.output_image_in_db, |_, col, sigma| {
                let g = gains[col];
                sigma / (g * g)
            })
        } else {
            calibrate_pixels(&source, tile, target, self.output_image_in_db, |_, col, sigma| {
                (sigma + offset) / gains[col]
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SampleType;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn band() -> TargetBand {
        TargetBand {
            name: "Sigma0_HV".to_string(),
            unit: "intensity".to_string(),
            polarization: None,
            quantity: OutputQuantity::Sigma0,
            source_indices: vec![0],
        }
    }

    fn product(sample_type: SampleType) -> ProductMetadata {
        ProductMetadata::new("RS2", "SGF", sample_type, 4, 1)
            .with_attribute("lut_gains.Sigma0", vec![1.0, 2.0, 4.0, 8.0])
            .with_attribute("lut_offset.Sigma0", 2.0)
    }

    fn init(md: &ProductMetadata) -> Radarsat2Calibrator {
        let mut target = md.clone();
        let mut cal = Radarsat2Calibrator::new(&CalibrationConfig::default());
        cal.initialize(md, &mut target, InitOptions::calibrate()).unwrap();
        cal
    }

    #[test]
    fn test_detected_uses_offset_and_absolute_column() {
        let cal = init(&product(SampleType::Detected));
        let data = array![[2.0f32, 2.0]];
        let sources = [SourceTile::new("Amplitude_HV", Some("amplitude"), data.view())];
        let mut out = Array2::zeros((1, 2));
        // columns 2 and 3 of the image
        let tile = TileRect::new(2, 0, 2, 1);
        cal.compute_tile(&band(), &sources, &TileGeometry::default(), tile, out.view_mut())
            .unwrap();
        assert_relative_eq!(out[[0, 0]], (4.0 + 2.0) / 4.0);
        assert_relative_eq!(out[[0, 1]], (4.0 + 2.0) / 8.0);
    }

    #[test]
    fn test_complex_divides_by_squared_gain() {
        let cal = init(&product(SampleType::Complex));
        let i = array![[2.0f32, 4.0, 4.0, 8.0]];
        let q = array![[0.0f32, 0.0, 0.0, 0.0]];
        let sources = [
            SourceTile::new("i_HV", Some("real"), i.view()),
            SourceTile::new("q_HV", Some("imaginary"), q.view()),
        ];
        let mut out = Array2::zeros((1, 4));
        let tile = TileRect::new(0, 0, 4, 1);
        cal.compute_tile(&band(), &sources, &TileGeometry::default(), tile, out.view_mut())
            .unwrap();
        assert_eq!(out, array![[4.0f32, 4.0, 1.0, 1.0]]);
    }

    #[test]
    fn test_short_lut_rejected() {
        let md = ProductMetadata::new("RS2", "SGF", SampleType::Detected, 8, 1)
            .with_attribute("lut_gains.Sigma0", vec![1.0, 2.0]);
        let mut target = md.clone();
        let mut cal = Radarsat2Calibrator::new(&CalibrationConfig::default());
        assert!(cal.initialize(&md, &mut target, InitOptions::calibrate()).is_err());
    }

    #[test]
    fn test_detected_requires_offset() {
        let md = ProductMetadata::new("RS2", "SGF", SampleType::Detected, 2, 1)
            .with_attribute("lut_gains.Sigma0", vec![2.0, 2.0]);
        let mut target = md.clone();
        let mut cal = Radarsat2Calibrator::new(&CalibrationConfig::default());
        assert!(matches!(
            cal.initialize(&md, &mut target, InitOptions::calibrate()),
            Err(SarError::MissingAttribute(_))
        ));

        // complex products never use the offset
        let mut slc = md.clone();
        slc.sample_type = SampleType::Complex;
        let mut target = slc.clone();
        cal.initialize(&slc, &mut target, InitOptions::calibrate()).unwrap();
    }

    #[test]
    fn test_non_positive_gains_rejected() {
        for bad in [0.0, -1.0, f64::NAN] {
            let md = product(SampleType::Detected).with_attribute("lut_gains.Sigma0", vec![1.0, bad, 4.0, 8.0]);
            let mut target = md.clone();
            let mut cal = Radarsat2Calibrator::new(&CalibrationConfig::default());
            assert!(matches!(
                cal.initialize(&md, &mut target, InitOptions::calibrate()),
                Err(SarError::Metadata(_))
            ));
        }
    }

    #[test]
    fn test_lut_selected_by_quantity() {
        let md = product(SampleType::Detected)
            .with_attribute("lut_gains.Gamma0", vec![10.0; 4])
            .with_attribute("lut_offset.Gamma0", 0.0);
        let config = CalibrationConfig {
            output_quantity: OutputQuantity::Gamma0,
            ..Default::default()
        };
        let mut target = md.clone();
        let mut cal = Radarsat2Calibrator::new(&config);
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();
        assert_eq!(cal.gains(), &[10.0; 4]);

        let beta = CalibrationConfig {
            output_quantity: OutputQuantity::Beta0,
            ..Default::default()
        };
        let mut cal = Radarsat2Calibrator::new(&beta);
        assert!(matches!(
            cal.initialize(&md, &mut target, InitOptions::calibrate()),
            Err(SarError::MissingAttribute(_))
        ));
    }
}
