use crate::config::{CalibrationConfig, OutputQuantity};
use crate::core::calibrator::{create_calibrator, Calibrator, InitOptions, SourceTile, TargetBand, TileGeometry};
use crate::core::units::classify_unit;
use crate::io::metadata::{keys, BandInfo, ProductMetadata};
use crate::types::{Mission, PixelUnit, SarError, SarImage, SarRealImage, SarResult, TileRect};
use ndarray::{s, Array2, ArrayViewMut2, Axis};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Which calibrator operation a run applies to every tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPass {
    /// Absolute calibration to the configured output quantity
    Calibrate,
    /// Swap the upstream antenna pattern for the one in the selected aux file
    RetroCalibrate,
    /// Strip factors applied upstream so the product can be recalibrated
    RemoveFactors,
}

/// Output of a calibration run: target metadata plus one raster per band
#[derive(Debug, Clone)]
pub struct CalibratedProduct {
    pub metadata: ProductMetadata,
    pub bands: Vec<SarRealImage>,
}

impl CalibratedProduct {
    pub fn band(&self, name: &str) -> Option<&SarRealImage> {
        self.metadata
            .bands
            .iter()
            .position(|b| b.name == name)
            .and_then(|i| self.bands.get(i))
    }
}

/// Calibration processor: picks the mission calibrator, maps target bands
/// to source bands and drives the tile kernel over the whole raster
pub struct CalibrationProcessor {
    config: CalibrationConfig,
    cancelled: Arc<AtomicBool>,
}

impl CalibrationProcessor {
    /// Create a new calibration processor
    pub fn new(config: CalibrationConfig) -> SarResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Flag checked between tiles; setting it aborts the run with
    /// [`SarError::Cancelled`]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Apply absolute radiometric calibration
    pub fn calibrate(&self, metadata: &ProductMetadata, rasters: &[SarRealImage]) -> SarResult<CalibratedProduct> {
        self.run(CalibrationPass::Calibrate, metadata, rasters)
    }

    /// Run `pass` over every band. `rasters` follows `metadata.bands`.
    pub fn run(
        &self,
        pass: CalibrationPass,
        metadata: &ProductMetadata,
        rasters: &[SarRealImage],
    ) -> SarResult<CalibratedProduct> {
        let start = Instant::now();
        log::info!(
            "Calibration pass {:?} on {} product '{}' ({}x{}, {} bands)",
            pass,
            metadata.mission,
            metadata.product_name,
            metadata.width,
            metadata.height,
            metadata.bands.len()
        );

        if rasters.len() != metadata.bands.len() {
            return Err(SarError::Processing(format!(
                "Product has {} bands but {} rasters were supplied",
                metadata.bands.len(),
                rasters.len()
            )));
        }
        for (info, raster) in metadata.bands.iter().zip(rasters) {
            if raster.dim() != (metadata.height, metadata.width) {
                return Err(SarError::Processing(format!(
                    "Band '{}' is {:?}, product is {}x{}",
                    info.name,
                    raster.dim(),
                    metadata.height,
                    metadata.width
                )));
            }
        }

        let mut calibrator = create_calibrator(&metadata.mission, &self.config)?;
        let mut target_metadata = metadata.clone();
        let options = match pass {
            CalibrationPass::Calibrate => InitOptions::calibrate(),
            CalibrationPass::RetroCalibrate | CalibrationPass::RemoveFactors => InitOptions {
                retro_calibration: true,
                update_metadata: false,
            },
        };
        calibrator.initialize(metadata, &mut target_metadata, options)?;

        let target_bands = build_target_bands(
            metadata,
            self.config.output_quantity,
            self.config.output_image_in_db,
            pass,
        )?;

        let mut outputs = Vec::with_capacity(target_bands.len());
        for band in &target_bands {
            let output = self.process_band(calibrator.as_ref(), pass, band, metadata, rasters)?;
            log::info!(
                "Band {} completed. Output range: {:.2e} to {:.2e}",
                band.name,
                output.iter().cloned().fold(f32::INFINITY, f32::min),
                output.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
            );
            outputs.push(output);
        }

        target_metadata.bands = target_bands
            .iter()
            .map(|b| BandInfo {
                name: b.name.clone(),
                unit: Some(b.unit.clone()),
                polarization: b.polarization,
            })
            .collect();
        if pass == CalibrationPass::RemoveFactors && calibrator.mission() == Mission::Asar {
            target_metadata.set(keys::ANT_ELEV_CORR_FLAG, false);
        }

        let elapsed = start.elapsed().as_secs_f64();
        let pixels = (metadata.width * metadata.height * outputs.len()) as f64;
        log::info!(
            "Calibration completed: {} bands in {:.2} s ({:.0} pixels/sec)",
            outputs.len(),
            elapsed,
            if elapsed > 0.0 { pixels / elapsed } else { pixels }
        );

        Ok(CalibratedProduct {
            metadata: target_metadata,
            bands: outputs,
        })
    }

    fn tile_size(&self, metadata: &ProductMetadata) -> (usize, usize) {
        let width = if self.config.tile_width == 0 {
            metadata.width.max(1)
        } else {
            self.config.tile_width
        };
        (width, self.config.tile_height)
    }

    fn process_band(
        &self,
        calibrator: &dyn Calibrator,
        pass: CalibrationPass,
        band: &TargetBand,
        metadata: &ProductMetadata,
        rasters: &[SarRealImage],
    ) -> SarResult<SarRealImage> {
        let (tile_width, tile_height) = self.tile_size(metadata);
        let mut output = Array2::zeros((metadata.height, metadata.width));
        if output.is_empty() {
            return Ok(output);
        }
        log::debug!(
            "Processing band {} from {:?} in {}x{} tiles",
            band.name,
            band.source_indices,
            tile_width,
            tile_height
        );

        let strips: Vec<(usize, ArrayViewMut2<f32>)> = output
            .axis_chunks_iter_mut(Axis(0), tile_height)
            .enumerate()
            .map(|(i, strip)| (i * tile_height, strip))
            .collect();

        let run_strip = |(y, strip): (usize, ArrayViewMut2<f32>)| {
            self.process_strip(calibrator, pass, band, metadata, rasters, y, tile_width, strip)
        };

        if self.config.parallel && cfg!(feature = "parallel") {
            strips.into_par_iter().try_for_each(run_strip)?;
        } else {
            strips.into_iter().try_for_each(run_strip)?;
        }
        Ok(output)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_strip(
        &self,
        calibrator: &dyn Calibrator,
        pass: CalibrationPass,
        band: &TargetBand,
        metadata: &ProductMetadata,
        rasters: &[SarRealImage],
        y: usize,
        tile_width: usize,
        mut strip: ArrayViewMut2<f32>,
    ) -> SarResult<()> {
        let strip_height = strip.nrows();
        for (j, tile_out) in strip.axis_chunks_iter_mut(Axis(1), tile_width).enumerate() {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(SarError::Cancelled);
            }
            let tile = TileRect::new(j * tile_width, y, tile_out.ncols(), strip_height);

            let sources: Vec<SourceTile<'_>> = band
                .source_indices
                .iter()
                .map(|&i| {
                    let info = &metadata.bands[i];
                    SourceTile::new(
                        &info.name,
                        info.unit.as_deref(),
                        rasters[i].slice(s![tile.y..tile.y_end(), tile.x..tile.x_end()]),
                    )
                })
                .collect();
            let geometry = if calibrator.needs_geometry() {
                TileGeometry::from_metadata(metadata, tile)?
            } else {
                TileGeometry::default()
            };

            match pass {
                CalibrationPass::Calibrate => calibrator.compute_tile(band, &sources, &geometry, tile, tile_out)?,
                CalibrationPass::RetroCalibrate => {
                    calibrator.apply_retro_calibration(band, &sources, &geometry, tile, tile_out)?
                }
                CalibrationPass::RemoveFactors => {
                    calibrator.remove_factors_for_current_tile(band, &sources, &geometry, tile, tile_out)?
                }
            }
        }
        Ok(())
    }
}

fn calibrated_band_name(quantity: OutputQuantity, band: &BandInfo) -> String {
    match band.resolved_polarization() {
        Some(pol) => format!("{}_{}", quantity.band_prefix(), pol),
        None => quantity.band_prefix().to_string(),
    }
}

/// Map source bands to target bands.
///
/// Calibration produces one `<Quantity>_<POL>` band per detected band or
/// per real/imaginary pair and carries phase bands through. The other
/// passes keep the source bands one to one.
pub fn build_target_bands(
    metadata: &ProductMetadata,
    quantity: OutputQuantity,
    output_image_in_db: bool,
    pass: CalibrationPass,
) -> SarResult<Vec<TargetBand>> {
    let calibrated_unit = if output_image_in_db {
        PixelUnit::IntensityDb
    } else {
        PixelUnit::Intensity
    };

    let mut targets = Vec::new();
    let mut i = 0;
    while i < metadata.bands.len() {
        let info = &metadata.bands[i];
        let unit = classify_unit(info.unit.as_deref())?;
        let polarization = info.resolved_polarization();

        if pass != CalibrationPass::Calibrate || unit == PixelUnit::Phase {
            targets.push(TargetBand {
                name: info.name.clone(),
                unit: unit.tag().to_string(),
                polarization,
                quantity,
                source_indices: vec![i],
            });
            i += 1;
            continue;
        }

        match unit {
            PixelUnit::Real => {
                let partner = metadata.bands.get(i + 1).ok_or_else(|| {
                    SarError::Processing(format!("Real band '{}' has no imaginary partner", info.name))
                })?;
                if classify_unit(partner.unit.as_deref())? != PixelUnit::Imaginary {
                    return Err(SarError::Processing(format!(
                        "Real band '{}' must be followed by an imaginary band, found '{}'",
                        info.name, partner.name
                    )));
                }
                targets.push(TargetBand {
                    name: calibrated_band_name(quantity, info),
                    unit: calibrated_unit.tag().to_string(),
                    polarization: polarization.or_else(|| partner.resolved_polarization()),
                    quantity,
                    source_indices: vec![i, i + 1],
                });
                i += 2;
            }
            PixelUnit::Imaginary => {
                return Err(SarError::Processing(format!(
                    "Imaginary band '{}' without a preceding real band",
                    info.name
                )))
            }
            _ => {
                targets.push(TargetBand {
                    name: calibrated_band_name(quantity, info),
                    unit: calibrated_unit.tag().to_string(),
                    polarization,
                    quantity,
                    source_indices: vec![i],
                });
                i += 1;
            }
        }
    }

    log::debug!(
        "Target bands: {:?}",
        targets.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
    );
    Ok(targets)
}

/// Split complex SLC samples into real and imaginary band rasters
pub fn complex_to_iq(image: &SarImage) -> (SarRealImage, SarRealImage) {
    (image.mapv(|c| c.re), image.mapv(|c| c.im))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Polarization, SampleType, SarComplex};
    use approx::assert_relative_eq;

    fn alos_product(width: usize, height: usize) -> ProductMetadata {
        ProductMetadata::new("ALOS", "PALSAR_L1.5", SampleType::Detected, width, height)
            .with_attribute(keys::CALIBRATION_FACTOR, 20.0)
            .with_band(BandInfo::new("Amplitude_HH", "amplitude", None))
            .with_band(BandInfo::new("Phase_HH", "phase", None))
    }

    fn ramp(width: usize, height: usize) -> SarRealImage {
        Array2::from_shape_fn((height, width), |(r, c)| (r * width + c) as f32 * 0.1)
    }

    #[test]
    fn test_target_band_mapping() {
        let md = ProductMetadata::new("RS2", "SLC", SampleType::Complex, 4, 4)
            .with_band(BandInfo::new("i_HH", "real", None))
            .with_band(BandInfo::new("q_HH", "imaginary", None))
            .with_band(BandInfo::new("Phase_HH", "phase", None))
            .with_band(BandInfo::new("i_HV", "real", None))
            .with_band(BandInfo::new("q_HV", "imaginary", None));

        let bands = build_target_bands(&md, OutputQuantity::Sigma0, true, CalibrationPass::Calibrate).unwrap();
        let names: Vec<&str> = bands.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["Sigma0_HH", "Phase_HH", "Sigma0_HV"]);
        assert_eq!(bands[0].source_indices, vec![0, 1]);
        assert_eq!(bands[0].unit, "intensity_db");
        assert_eq!(bands[0].polarization, Some(Polarization::HH));
        assert_eq!(bands[1].unit, "phase");
        assert_eq!(bands[2].source_indices, vec![3, 4]);

        let retro = build_target_bands(&md, OutputQuantity::Sigma0, false, CalibrationPass::RetroCalibrate).unwrap();
        assert_eq!(retro.len(), 5);
        assert_eq!(retro[1].name, "q_HH");
    }

    #[test]
    fn test_unpaired_bands_rejected() {
        let md = ProductMetadata::new("RS2", "SLC", SampleType::Complex, 4, 4)
            .with_band(BandInfo::new("q_HH", "imaginary", None));
        assert!(build_target_bands(&md, OutputQuantity::Sigma0, false, CalibrationPass::Calibrate).is_err());

        let md = ProductMetadata::new("RS2", "SLC", SampleType::Complex, 4, 4)
            .with_band(BandInfo::new("i_HH", "real", None))
            .with_band(BandInfo::new("Amplitude_HH", "amplitude", None));
        assert!(build_target_bands(&md, OutputQuantity::Sigma0, false, CalibrationPass::Calibrate).is_err());
    }

    #[test]
    fn test_tiled_run_matches_whole_image() {
        let (w, h) = (7, 5);
        let md = alos_product(w, h);
        let rasters = vec![ramp(w, h), ramp(w, h)];

        let tiled = CalibrationProcessor::new(CalibrationConfig {
            tile_width: 3,
            tile_height: 2,
            ..Default::default()
        })
        .unwrap();
        let sequential = CalibrationProcessor::new(CalibrationConfig {
            tile_height: 64,
            parallel: false,
            ..Default::default()
        })
        .unwrap();

        let a = tiled.calibrate(&md, &rasters).unwrap();
        let b = sequential.calibrate(&md, &rasters).unwrap();
        assert_eq!(a.bands, b.bands);

        let sigma0 = a.band("Sigma0_HH").unwrap();
        for ((r, c), &v) in sigma0.indexed_iter() {
            let dn = rasters[0][[r, c]] as f64;
            assert_relative_eq!(v as f64, dn * dn * 100.0, max_relative = 1e-5);
        }
        assert_eq!(a.band("Phase_HH").unwrap(), &rasters[1]);
        assert!(a.metadata.is_calibrated().unwrap());
        assert_eq!(a.metadata.bands[0].unit.as_deref(), Some("intensity"));
    }

    #[test]
    fn test_cancellation() {
        let md = alos_product(4, 4);
        let rasters = vec![ramp(4, 4), ramp(4, 4)];
        let processor = CalibrationProcessor::new(CalibrationConfig::default()).unwrap();
        processor.cancel_handle().store(true, Ordering::SeqCst);
        assert!(matches!(processor.calibrate(&md, &rasters), Err(SarError::Cancelled)));
    }

    #[test]
    fn test_raster_count_checked() {
        let md = alos_product(4, 4);
        let processor = CalibrationProcessor::new(CalibrationConfig::default()).unwrap();
        assert!(processor.calibrate(&md, &[ramp(4, 4)]).is_err());
        assert!(processor.calibrate(&md, &[ramp(4, 4), ramp(3, 4)]).is_err());
    }

    #[test]
    fn test_complex_to_iq() {
        let slc = Array2::from_elem((2, 3), SarComplex::new(3.0, -4.0));
        let (i, q) = complex_to_iq(&slc);
        assert_eq!(i[[1, 2]], 3.0);
        assert_eq!(q[[0, 0]], -4.0);
    }
}
