//! ENVISAT ASAR calibration.
//!
//! sigma0 = sigma_raw * sin(incidence) / K
//!          * (R / R_ref)^p      unless range spreading was compensated
//!          / G(elevation)^2     unless the antenna pattern was compensated
//!
//! The antenna gain G comes from the elevation pattern of the external
//! calibration (XCA) auxiliary file. Wide swath products carry five
//! sub-swath patterns; each pixel uses the one whose reference elevation
//! angle is closest to its own.

use crate::config::{AuxFileSelection, CalibrationConfig, OutputQuantity};
use crate::core::antenna_pattern::{AntennaPatternTable, SubSwathPatterns};
use crate::core::calibrator::{
    calibrate_pixels, check_mission, check_not_calibrated, mark_calibrated, scale_by_power_ratio,
    Calibrator, InitOptions, PixelSource, SourceTile, TargetBand, TileGeometry,
};
use crate::core::factors::{calibration_db_to_linear, CalibrationFactor, IMAGE_SWATH_COUNT};
use crate::core::geometry::{GeometryResolver, HALF_LIGHT_SPEED};
use crate::io::aux_file::{find_latest_xca_file, resolve_named_aux_file, AuxiliaryData};
use crate::io::metadata::{keys, ProductMetadata};
use crate::io::orbit::parse_time_to_mjd;
use crate::types::{Mission, Polarization, SarError, SarResult, TileRect};
use ndarray::{Array2, ArrayViewMut2, Zip};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Reference slant range of the range spreading loss term (m)
pub const REFERENCE_SLANT_RANGE: f64 = 800_000.0;

/// Sub-swath identifiers of a wide swath acquisition
pub const WIDE_SWATH_SUB_SWATHS: [&str; 5] = ["ss1", "ss2", "ss3", "ss4", "ss5"];

/// ASAR acquisition mode, as far as calibration is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsarMode {
    Image,
    AlternatingPolarization,
    WideSwath,
}

impl AsarMode {
    /// Mode prefix used in XCA record names
    pub fn aux_prefix(&self) -> &'static str {
        match self {
            AsarMode::Image => "im",
            AsarMode::AlternatingPolarization => "ap",
            AsarMode::WideSwath => "ws",
        }
    }
}

/// Mode and range spreading exponent for a product type such as `ASA_IMS_1P`
pub fn classify_product_type(product_type: &str) -> SarResult<(AsarMode, f64)> {
    let upper = product_type.trim().to_uppercase();
    let family = upper.get(..7).unwrap_or(upper.as_str());
    match family {
        "ASA_IMS" => Ok((AsarMode::Image, 3.0)),
        "ASA_APS" => Ok((AsarMode::AlternatingPolarization, 4.0)),
        "ASA_IMP" | "ASA_IMG" | "ASA_IMM" => Ok((AsarMode::Image, 0.0)),
        "ASA_APP" | "ASA_APG" | "ASA_APM" => Ok((AsarMode::AlternatingPolarization, 0.0)),
        "ASA_WSM" | "ASA_WSS" => Ok((AsarMode::WideSwath, 0.0)),
        _ => Err(SarError::UnsupportedProduct(format!(
            "ASAR calibration does not handle product type '{}'",
            product_type
        ))),
    }
}

/// Zero-based image swath index from a swath name such as `IS2`
pub fn swath_index(swath: &str) -> SarResult<usize> {
    let upper = swath.trim().to_uppercase();
    upper
        .strip_prefix("IS")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| (1..=IMAGE_SWATH_COUNT).contains(&n))
        .map(|n| n - 1)
        .ok_or_else(|| SarError::Metadata(format!("Unknown ASAR swath '{}'", swath)))
}

fn pol_tag(polarization: Polarization) -> String {
    polarization.to_string().to_lowercase()
}

pub fn pattern_key(sub_swath: &str, polarization: Polarization) -> String {
    format!("{}_pattern_{}", sub_swath, pol_tag(polarization))
}

pub fn reference_angle_key(sub_swath: &str) -> String {
    format!("{}_ref_elev_angle", sub_swath)
}

pub fn calibration_constant_key(mode: AsarMode, polarization: Polarization) -> String {
    format!("ext_cal_{}_{}", mode.aux_prefix(), pol_tag(polarization))
}

/// Elevation patterns for every sub-swath and polarization in `aux`
fn load_patterns(
    aux: &AuxiliaryData,
    sub_swaths: &[String],
    polarizations: &[Polarization],
) -> SarResult<SubSwathPatterns> {
    let mut tables = Vec::with_capacity(sub_swaths.len());
    for sub_swath in sub_swaths {
        let reference_angle = aux.scalar(&reference_angle_key(sub_swath))? as f64;
        let mut per_band = Vec::with_capacity(polarizations.len());
        for &pol in polarizations {
            let gains = aux.array(&pattern_key(sub_swath, pol))?.to_vec();
            per_band.push(AntennaPatternTable::new(reference_angle, gains)?);
        }
        tables.push(per_band);
    }
    SubSwathPatterns::new(tables)
}

fn first_line_time_mjd(source: &ProductMetadata) -> SarResult<f64> {
    match source.get_text(keys::FIRST_LINE_TIME) {
        Ok(text) => parse_time_to_mjd(text),
        Err(SarError::Metadata(_)) => source.get_f64(keys::FIRST_LINE_TIME),
        Err(e) => Err(e),
    }
}

/// Polarizations in MDS order, falling back to the band names
fn product_polarizations(source: &ProductMetadata) -> SarResult<Vec<Polarization>> {
    let mut pols = Vec::new();
    for key in [keys::MDS1_TX_RX_POLAR, keys::MDS2_TX_RX_POLAR] {
        if source.contains(key) {
            let text = source.get_text(key)?;
            if !text.trim().is_empty() {
                let pol: Polarization = text.parse()?;
                if !pols.contains(&pol) {
                    pols.push(pol);
                }
            }
        }
    }
    if pols.is_empty() {
        for band in &source.bands {
            if let Some(pol) = band.resolved_polarization() {
                if !pols.contains(&pol) {
                    pols.push(pol);
                }
            }
        }
    }
    if pols.is_empty() {
        return Err(SarError::MissingAttribute(keys::MDS1_TX_RX_POLAR.to_string()));
    }
    Ok(pols)
}

#[derive(Debug, Clone)]
pub struct AsarCalibrator {
    output_image_in_db: bool,
    aux_selection: AuxFileSelection,
    aux_dir: PathBuf,
    external_aux_file: Option<PathBuf>,

    mode: Option<AsarMode>,
    range_spreading_exponent: f64,
    apply_range_spreading: bool,
    apply_antenna_pattern: bool,
    retro_calibration: bool,
    polarizations: Vec<Polarization>,
    calibration_factor: Option<CalibrationFactor>,
    new_patterns: Option<SubSwathPatterns>,
    old_patterns: Option<SubSwathPatterns>,
    geometry: Option<GeometryResolver>,
    aux_file_name: Option<String>,
}

impl AsarCalibrator {
    pub fn new(config: &CalibrationConfig) -> Self {
        Self {
            output_image_in_db: config.output_image_in_db,
            aux_selection: config.aux_file,
            aux_dir: config.aux_dir.clone(),
            external_aux_file: config.external_aux_file.clone(),
            mode: None,
            range_spreading_exponent: 0.0,
            apply_range_spreading: false,
            apply_antenna_pattern: false,
            retro_calibration: false,
            polarizations: Vec::new(),
            calibration_factor: None,
            new_patterns: None,
            old_patterns: None,
            geometry: None,
            aux_file_name: None,
        }
    }

    pub fn mode(&self) -> Option<AsarMode> {
        self.mode
    }

    pub fn range_spreading_exponent(&self) -> f64 {
        self.range_spreading_exponent
    }

    /// Name of the auxiliary file the new antenna patterns came from
    pub fn aux_file_name(&self) -> Option<&str> {
        self.aux_file_name.as_deref()
    }

    /// Linear calibration constant for `polarization`
    pub fn calibration_factor(&self, polarization: Polarization) -> SarResult<f64> {
        self.calibration_factor
            .as_ref()
            .ok_or_else(|| SarError::Processing("ASAR calibrator used before initialization".to_string()))?
            .for_polarization(polarization)
    }

    fn band_index(&self, polarization: Polarization) -> SarResult<usize> {
        self.polarizations
            .iter()
            .position(|&p| p == polarization)
            .ok_or_else(|| SarError::MissingAttribute(format!("ASAR antenna pattern for {}", polarization)))
    }

    fn selected_aux_path(&self, source: &ProductMetadata) -> SarResult<PathBuf> {
        match self.aux_selection {
            AuxFileSelection::LatestAuxFile => {
                let product_time = match first_line_time_mjd(source) {
                    Ok(mjd) => Some(mjd),
                    Err(SarError::MissingAttribute(_)) => {
                        log::warn!("No first line time; aux file validity is not checked");
                        None
                    }
                    Err(e) => return Err(e),
                };
                find_latest_xca_file(&self.aux_dir, product_time)
            }
            AuxFileSelection::ProductAuxFile => {
                let name = source.get_text(keys::EXTERNAL_CALIBRATION_FILE)?;
                resolve_named_aux_file(&self.aux_dir, name)
            }
            AuxFileSelection::ExternalAuxFile => self.external_aux_file.clone().ok_or_else(|| {
                SarError::Processing("External auxiliary file selected but no path given".to_string())
            }),
        }
    }

    fn factors_from_metadata(source: &ProductMetadata, polarizations: &[Polarization]) -> SarResult<CalibrationFactor> {
        let is_complex = source.sample_type.is_complex();
        let mut map = BTreeMap::new();
        for &pol in polarizations {
            let key = ProductMetadata::polarized_key(keys::CALIBRATION_FACTOR, pol);
            let factor_db = source.get_f64(&key)?;
            map.insert(pol, calibration_db_to_linear(factor_db, is_complex));
        }
        Ok(CalibrationFactor::PerPolarization(map))
    }

    fn factors_from_aux(
        aux: &AuxiliaryData,
        mode: AsarMode,
        swath: usize,
        polarizations: &[Polarization],
        is_complex: bool,
    ) -> SarResult<CalibrationFactor> {
        let mut map = BTreeMap::new();
        for &pol in polarizations {
            let values = aux.array(&calibration_constant_key(mode, pol))?;
            let per_swath = CalibrationFactor::per_swath_from_db(values, is_complex)?;
            map.insert(pol, per_swath.for_swath(swath)?);
        }
        Ok(CalibrationFactor::PerPolarization(map))
    }

    /// Linear antenna gain of every tile pixel. Tile-local scratch: the
    /// satellite distance is evaluated once per row, the elevation angle
    /// per pixel.
    fn tile_gains(
        &self,
        patterns: &SubSwathPatterns,
        band_index: usize,
        geometry: &TileGeometry,
        tile: TileRect,
    ) -> SarResult<Array2<f64>> {
        let resolver = self
            .geometry
            .as_ref()
            .ok_or_else(|| SarError::Processing("ASAR geometry not initialized".to_string()))?;
        let slant_range_time = geometry.slant_range_time(tile)?;
        let latitude = geometry.latitude(tile)?;
        let longitude = geometry.longitude(tile)?;

        let mut gains = Array2::zeros(tile.shape());
        for (r, mut row) in gains.rows_mut().into_iter().enumerate() {
            let satellite_distance = resolver.satellite_distance_for_line(tile.y + r)?;
            for (c, gain) in row.iter_mut().enumerate() {
                let sample = resolver.sample(
                    satellite_distance,
                    slant_range_time[[r, c]],
                    latitude[[r, c]],
                    longitude[[r, c]],
                );
                *gain = patterns.gain(sample.elevation_angle, band_index)?;
            }
        }
        Ok(gains)
    }

    fn require_old_patterns(&self, operation: &str) -> SarResult<(&SubSwathPatterns, &SubSwathPatterns)> {
        match (&self.old_patterns, &self.new_patterns) {
            (Some(old), Some(new)) if self.retro_calibration => Ok((old, new)),
            _ => Err(SarError::Processing(format!(
                "ASAR {} needs initialization with the retro-calibration flag",
                operation
            ))),
        }
    }
}

impl Calibrator for AsarCalibrator {
    fn mission(&self) -> Mission {
        Mission::Asar
    }

    fn initialize(
        &mut self,
        source: &ProductMetadata,
        target: &mut ProductMetadata,
        options: InitOptions,
    ) -> SarResult<()> {
        check_mission(Mission::Asar, source)?;
        check_not_calibrated(source)?;

        let (mode, exponent) = classify_product_type(&source.product_type)?;
        let polarizations = product_polarizations(source)?;
        let is_complex = source.sample_type.is_complex();

        let (swath, sub_swaths) = if mode == AsarMode::WideSwath {
            (0, WIDE_SWATH_SUB_SWATHS.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        } else {
            let name = source.get_text(keys::SWATH)?;
            (swath_index(name)?, vec![name.trim().to_lowercase()])
        };

        let antenna_compensated = source.flag(keys::ANT_ELEV_CORR_FLAG)?;
        let range_compensated = source.flag(keys::RANGE_SPREAD_COMP_FLAG)?;
        self.apply_antenna_pattern = !antenna_compensated;
        self.apply_range_spreading = !range_compensated && exponent != 0.0;
        self.range_spreading_exponent = exponent;
        self.retro_calibration = options.retro_calibration;

        log::info!(
            "ASAR {} product, mode {:?}, swath {}, polarizations {:?}",
            source.product_type,
            mode,
            sub_swaths.join("/"),
            polarizations
        );
        log::debug!(
            "Antenna pattern compensated upstream: {}, range spreading compensated upstream: {}, exponent {}",
            antenna_compensated,
            range_compensated,
            exponent
        );

        let need_aux = self.aux_selection != AuxFileSelection::ProductAuxFile
            || self.apply_antenna_pattern
            || self.retro_calibration;
        let new_aux = if need_aux {
            let path = self.selected_aux_path(source)?;
            Some(AuxiliaryData::read(&path)?)
        } else {
            None
        };

        let factor = match (&new_aux, self.aux_selection) {
            (Some(aux), AuxFileSelection::LatestAuxFile | AuxFileSelection::ExternalAuxFile) => {
                Self::factors_from_aux(aux, mode, swath, &polarizations, is_complex)?
            }
            _ => Self::factors_from_metadata(source, &polarizations)?,
        };
        if let CalibrationFactor::PerPolarization(map) = &factor {
            for (pol, k) in map {
                log::debug!("ASAR calibration constant {}: {:.6e}", pol, k);
            }
        }

        self.new_patterns = None;
        self.old_patterns = None;
        self.geometry = None;
        self.aux_file_name = new_aux.as_ref().map(|a| a.name().to_string());

        if self.apply_antenna_pattern || self.retro_calibration {
            if let Some(aux) = &new_aux {
                self.new_patterns = Some(load_patterns(aux, &sub_swaths, &polarizations)?);
            }
        }
        if self.retro_calibration {
            if !antenna_compensated {
                log::warn!("Retro-calibration requested but no antenna pattern was applied upstream");
            }
            let old_name = source.get_text(keys::EXTERNAL_CALIBRATION_FILE)?;
            let old_aux = AuxiliaryData::read(resolve_named_aux_file(&self.aux_dir, old_name)?)?;
            self.old_patterns = Some(load_patterns(&old_aux, &sub_swaths, &polarizations)?);
            log::info!(
                "ASAR retro-calibration: {} -> {}",
                old_aux.name(),
                self.aux_file_name.as_deref().unwrap_or("")
            );
        }
        if self.new_patterns.is_some() {
            let first_line = first_line_time_mjd(source)?;
            let line_interval = source.get_f64(keys::LINE_TIME_INTERVAL)?;
            self.geometry = Some(GeometryResolver::new(
                source.orbit_state_vectors.clone(),
                first_line,
                line_interval,
            )?);
        }

        self.mode = Some(mode);
        self.polarizations = polarizations;
        self.calibration_factor = Some(factor);

        if options.update_metadata {
            mark_calibrated(source, target);
            target.set(keys::ANT_ELEV_CORR_FLAG, true);
            target.set(keys::RANGE_SPREAD_COMP_FLAG, true);
            if let Some(name) = &self.aux_file_name {
                target.set(keys::EXTERNAL_CALIBRATION_FILE, name.as_str());
            }
        }
        Ok(())
    }

    fn needs_geometry(&self) -> bool {
        true
    }

    fn compute_tile(
        &self,
        target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        let source = PixelSource::from_tiles("ASAR", sources, tile)?;
        if source.is_phase() {
            return calibrate_pixels(&source, tile, target, self.output_image_in_db, |_, _, s| s);
        }

        let polarization = target_band.require_polarization()?;
        let factor = self.calibration_factor(polarization)?;
        let incidence = geometry.incidence_angle(tile)?;
        let slant_range_time = if self.apply_range_spreading {
            Some(geometry.slant_range_time(tile)?)
        } else {
            None
        };
        let gains = if self.apply_antenna_pattern {
            let patterns = self
                .new_patterns
                .as_ref()
                .ok_or_else(|| SarError::Processing("ASAR antenna patterns not loaded".to_string()))?;
            Some(self.tile_gains(patterns, self.band_index(polarization)?, geometry, tile)?)
        } else {
            None
        };

        let exponent = self.range_spreading_exponent;
        let quantity = target_band.quantity;
        calibrate_pixels(&source, tile, target, self.output_image_in_db, |r, c, sigma_raw| {
            let theta = incidence[[r, c]].to_radians();
            let mut sigma = sigma_raw * theta.sin() / factor;
            if let Some(srt) = slant_range_time {
                let slant_range = srt[[r, c]] / 1.0e9 * HALF_LIGHT_SPEED;
                sigma *= (slant_range / REFERENCE_SLANT_RANGE).powf(exponent);
            }
            if let Some(g) = &gains {
                let gain = g[[r, c]];
                sigma /= gain * gain;
            }
            match quantity {
                OutputQuantity::Sigma0 => sigma,
                OutputQuantity::Gamma0 => sigma / theta.cos(),
                OutputQuantity::Beta0 => sigma / theta.sin(),
            }
        })
    }

    /// Multiplies the upstream antenna gain back in: G^2 on power, G on
    /// amplitude.
    fn remove_factors_for_current_tile(
        &self,
        target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        let (old, _) = self.require_old_patterns("factor removal")?;
        let first = sources
            .first()
            .ok_or_else(|| SarError::Processing(format!("No source band for tile {}", tile)))?;
        let band_index = self.band_index(target_band.require_polarization()?)?;
        let old_gains = self.tile_gains(old, band_index, geometry, tile)?;
        let ratio = old_gains.mapv(|g| g * g);
        scale_by_power_ratio("ASAR", first, &ratio, tile, target)
    }

    /// Replaces the upstream antenna pattern: old^2 / new^2 on power.
    fn apply_retro_calibration(
        &self,
        target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        let (old, new) = self.require_old_patterns("retro-calibration")?;
        let first = sources
            .first()
            .ok_or_else(|| SarError::Processing(format!("No source band for tile {}", tile)))?;
        let band_index = self.band_index(target_band.require_polarization()?)?;
        let old_gains = self.tile_gains(old, band_index, geometry, tile)?;
        let new_gains = self.tile_gains(new, band_index, geometry, tile)?;
        let ratio = Zip::from(&old_gains)
            .and(&new_gains)
            .map_collect(|&o, &n| (o * o) / (n * n));
        scale_by_power_ratio("ASAR", first, &ratio, tile, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::antenna_pattern::{nearest_sub_swath, ANTENNA_PATTERN_LENGTH};
    use crate::core::geometry::{earth_radius, elevation_angle};
    use crate::core::tie_point_grid::{self, TiePointGrid};
    use crate::types::{OrbitStateVector, SampleType};
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::fs;
    use tempfile::TempDir;

    const OLD_AUX: &str = "ASA_XCA_AXVIEC20030101_000000_20020101_000000_20121231_000000";
    const NEW_AUX: &str = "ASA_XCA_AXVIEC20070517_153558_20020101_000000_20121231_000000";
    const SATELLITE_DISTANCE: f64 = 7_160_000.0;
    const SLANT_RANGE_TIME_NS: f64 = 5_670_000.0;

    fn write_aux(dir: &TempDir, name: &str, records: &[(String, Vec<f32>)]) {
        let mut xml = format!("<auxiliaryData name=\"{}\">\n", name);
        for (key, values) in records {
            let text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            xml.push_str(&format!("  <array name=\"{}\">{}</array>\n", key, text.join(" ")));
        }
        xml.push_str("</auxiliaryData>\n");
        fs::write(dir.path().join(format!("{}.xml", name)), xml).unwrap();
    }

    /// Flat pattern of `gain_db` around `reference` for every listed sub-swath
    fn pattern_records(sub_swaths: &[(&str, f32, f32)], pol: Polarization) -> Vec<(String, Vec<f32>)> {
        let mut records = Vec::new();
        for &(name, reference, gain_db) in sub_swaths {
            records.push((reference_angle_key(name), vec![reference]));
            records.push((pattern_key(name, pol), vec![gain_db; ANTENNA_PATTERN_LENGTH]));
        }
        records
    }

    fn constant_grid(name: &str, value: f32) -> TiePointGrid {
        TiePointGrid::new(name, (0.0, 0.0), (16.0, 16.0), 2, 2, vec![value; 4]).unwrap()
    }

    fn geometry_grids() -> Vec<TiePointGrid> {
        vec![
            constant_grid(tie_point_grid::INCIDENCE_ANGLE, 30.0),
            constant_grid(tie_point_grid::SLANT_RANGE_TIME, SLANT_RANGE_TIME_NS as f32),
            constant_grid(tie_point_grid::LATITUDE, 0.0),
            constant_grid(tie_point_grid::LONGITUDE, 0.0),
        ]
    }

    fn detected_product(product_type: &str) -> ProductMetadata {
        let mut md = ProductMetadata::new("ENVISAT", product_type, SampleType::Detected, 2, 2)
            .with_attribute(keys::SWATH, "IS2")
            .with_attribute(keys::MDS1_TX_RX_POLAR, "V/V")
            .with_attribute(keys::FIRST_LINE_TIME, 54252.0)
            .with_attribute(keys::LINE_TIME_INTERVAL, 1.0e-3)
            .with_attribute(keys::EXTERNAL_CALIBRATION_FILE, OLD_AUX);
        md.orbit_state_vectors = vec![OrbitStateVector {
            time_mjd: 54251.99,
            position: [SATELLITE_DISTANCE, 0.0, 0.0],
            velocity: [0.0, 7_500.0, 0.0],
        }];
        md.tie_point_grids = geometry_grids();
        md
    }

    fn band(quantity: OutputQuantity) -> TargetBand {
        TargetBand {
            name: format!("{}_VV", quantity),
            unit: "intensity".to_string(),
            polarization: Some(Polarization::VV),
            quantity,
            source_indices: vec![0],
        }
    }

    fn config_for(dir: &TempDir, selection: AuxFileSelection) -> CalibrationConfig {
        CalibrationConfig {
            aux_dir: dir.path().to_path_buf(),
            aux_file: selection,
            ..Default::default()
        }
    }

    fn run_tile(
        cal: &AsarCalibrator,
        md: &ProductMetadata,
        quantity: OutputQuantity,
        unit: &str,
        value: f32,
    ) -> Array2<f32> {
        let tile = TileRect::new(0, 0, 2, 2);
        let geometry = TileGeometry::from_metadata(md, tile).unwrap();
        let data = Array2::from_elem((2, 2), value);
        let sources = [SourceTile::new("Intensity_VV", Some(unit), data.view())];
        let mut out = Array2::zeros((2, 2));
        cal.compute_tile(&band(quantity), &sources, &geometry, tile, out.view_mut())
            .unwrap();
        out
    }

    #[test]
    fn test_product_type_classification() {
        assert_eq!(classify_product_type("ASA_IMS_1P").unwrap(), (AsarMode::Image, 3.0));
        assert_eq!(
            classify_product_type("ASA_APS_1P").unwrap(),
            (AsarMode::AlternatingPolarization, 4.0)
        );
        assert_eq!(classify_product_type("ASA_IMP_1P").unwrap(), (AsarMode::Image, 0.0));
        assert_eq!(classify_product_type("ASA_WSM_1P").unwrap(), (AsarMode::WideSwath, 0.0));
        assert!(matches!(
            classify_product_type("ASA_GM1_1P"),
            Err(SarError::UnsupportedProduct(_))
        ));
        assert_eq!(swath_index("IS1").unwrap(), 0);
        assert_eq!(swath_index("is7").unwrap(), 6);
        assert!(swath_index("IS8").is_err());
        assert!(swath_index("SS1").is_err());
    }

    #[test]
    fn test_complex_metadata_factor_offset() {
        let dir = TempDir::new().unwrap();
        let mut md = detected_product("ASA_IMS_1P")
            .with_attribute(keys::ANT_ELEV_CORR_FLAG, true)
            .with_attribute(keys::RANGE_SPREAD_COMP_FLAG, true)
            .with_attribute("calibration_factor.VV", 30.0);
        md.sample_type = SampleType::Complex;
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::ProductAuxFile));
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();

        let k = cal.calibration_factor(Polarization::VV).unwrap();
        assert_relative_eq!(k, 10f64.powf(-0.2), max_relative = 1e-12);
        assert_relative_eq!(k, 0.631, epsilon = 1e-3);
        assert!(cal.aux_file_name().is_none());
        assert_eq!(target.sample_type, SampleType::Detected);

        // sin(30 deg) / K, no range or antenna terms
        let out = run_tile(&cal, &md, OutputQuantity::Sigma0, "intensity", 2.0);
        assert_relative_eq!(out[[1, 1]] as f64, 2.0 * 0.5 / k, max_relative = 1e-5);
    }

    #[test]
    fn test_range_spreading_term_for_ims() {
        let dir = TempDir::new().unwrap();
        let md = detected_product("ASA_IMS_1P")
            .with_attribute(keys::ANT_ELEV_CORR_FLAG, true)
            .with_attribute("calibration_factor.VV", 0.0);
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::ProductAuxFile));
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();
        assert_eq!(cal.range_spreading_exponent(), 3.0);

        let out = run_tile(&cal, &md, OutputQuantity::Sigma0, "intensity", 1.0);
        let ratio = SLANT_RANGE_TIME_NS / 1.0e9 * HALF_LIGHT_SPEED / REFERENCE_SLANT_RANGE;
        assert_relative_eq!(out[[0, 0]] as f64, 0.5 * ratio.powi(3), max_relative = 1e-5);
    }

    #[test]
    fn test_antenna_pattern_and_aux_factors() {
        let dir = TempDir::new().unwrap();
        let mut records = pattern_records(&[("is2", 21.0, 3.0)], Polarization::VV);
        records.push(("ext_cal_im_vv".to_string(), vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0]));
        write_aux(&dir, NEW_AUX, &records);

        let md = detected_product("ASA_IMP_1P");
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::LatestAuxFile));
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();

        // IS2 picks the second constant; detected products have no -32 dB offset
        assert_relative_eq!(cal.calibration_factor(Polarization::VV).unwrap(), 100.0, max_relative = 1e-12);
        assert_eq!(cal.aux_file_name(), Some(NEW_AUX));
        assert_eq!(target.get_text(keys::EXTERNAL_CALIBRATION_FILE).unwrap(), NEW_AUX);
        assert!(target.get_bool(keys::ANT_ELEV_CORR_FLAG).unwrap());

        let out = run_tile(&cal, &md, OutputQuantity::Sigma0, "amplitude", 10.0);
        let gain = 10f64.powf(0.3);
        assert_relative_eq!(out[[0, 1]] as f64, 100.0 * 0.5 / 100.0 / (gain * gain), max_relative = 1e-5);
    }

    #[test]
    fn test_wide_swath_picks_nearest_sub_swath() {
        let dir = TempDir::new().unwrap();
        let re = earth_radius(0.0, 0.0);
        let slant = SLANT_RANGE_TIME_NS / 1.0e9 * HALF_LIGHT_SPEED;
        let elevation = elevation_angle(slant, SATELLITE_DISTANCE, re);
        let references = [elevation - 9.0, elevation - 4.0, elevation + 1.0, elevation + 6.0, elevation + 11.0];
        let expected = nearest_sub_swath(elevation, &references);
        assert_eq!(expected, 2);

        let sub_swaths: Vec<(&str, f32, f32)> = WIDE_SWATH_SUB_SWATHS
            .iter()
            .zip(references.iter())
            .enumerate()
            .map(|(i, (name, &r))| (*name, r as f32, i as f32))
            .collect();
        let mut records = pattern_records(&sub_swaths, Polarization::VV);
        records.push(("ext_cal_ws_vv".to_string(), vec![0.0; 7]));
        write_aux(&dir, NEW_AUX, &records);

        let mut md = detected_product("ASA_WSM_1P");
        md.attributes.remove(keys::SWATH);
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::LatestAuxFile));
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();
        assert_eq!(cal.mode(), Some(AsarMode::WideSwath));

        // sub-swath 2 has a flat 2 dB pattern
        let out = run_tile(&cal, &md, OutputQuantity::Sigma0, "intensity", 1.0);
        let gain = 10f64.powf(0.2);
        assert_relative_eq!(out[[0, 0]] as f64, 0.5 / (gain * gain), max_relative = 1e-4);
    }

    #[test]
    fn test_gamma0_and_beta0() {
        let dir = TempDir::new().unwrap();
        let md = detected_product("ASA_IMP_1P")
            .with_attribute(keys::ANT_ELEV_CORR_FLAG, true)
            .with_attribute("calibration_factor.VV", 0.0);
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::ProductAuxFile));
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();

        let sigma0 = 0.5;
        let gamma = run_tile(&cal, &md, OutputQuantity::Gamma0, "intensity", 1.0);
        assert_relative_eq!(gamma[[0, 0]] as f64, sigma0 / 30f64.to_radians().cos(), max_relative = 1e-5);
        let beta = run_tile(&cal, &md, OutputQuantity::Beta0, "intensity", 1.0);
        assert_relative_eq!(beta[[0, 0]] as f64, 1.0, max_relative = 1e-5);
    }

    #[test]
    fn test_retro_calibration_and_factor_removal() {
        let dir = TempDir::new().unwrap();
        write_aux(&dir, OLD_AUX, &pattern_records(&[("is2", 21.0, 1.0)], Polarization::VV));
        let mut records = pattern_records(&[("is2", 21.0, 2.0)], Polarization::VV);
        records.push(("ext_cal_im_vv".to_string(), vec![0.0; 7]));
        write_aux(&dir, NEW_AUX, &records);

        let md = detected_product("ASA_IMP_1P").with_attribute(keys::ANT_ELEV_CORR_FLAG, true);
        let tile = TileRect::new(0, 0, 2, 2);
        let geometry = TileGeometry::from_metadata(&md, tile).unwrap();
        let data = array![[4.0f32, 4.0], [4.0, 4.0]];
        let sources = [SourceTile::new("Intensity_VV", Some("intensity"), data.view())];
        let mut out = Array2::zeros((2, 2));

        let mut plain = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::LatestAuxFile));
        let mut target = md.clone();
        plain.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();
        assert!(plain
            .apply_retro_calibration(&band(OutputQuantity::Sigma0), &sources, &geometry, tile, out.view_mut())
            .is_err());

        let mut retro = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::LatestAuxFile));
        let options = InitOptions {
            retro_calibration: true,
            update_metadata: false,
        };
        let mut target = md.clone();
        retro.initialize(&md, &mut target, options).unwrap();
        assert!(!target.is_calibrated().unwrap());

        retro
            .apply_retro_calibration(&band(OutputQuantity::Sigma0), &sources, &geometry, tile, out.view_mut())
            .unwrap();
        // old^2 / new^2 with flat 1 dB and 2 dB patterns
        assert_relative_eq!(out[[1, 0]] as f64, 4.0 * 10f64.powf(-0.2), max_relative = 1e-5);

        retro
            .remove_factors_for_current_tile(&band(OutputQuantity::Sigma0), &sources, &geometry, tile, out.view_mut())
            .unwrap();
        assert_relative_eq!(out[[0, 0]] as f64, 4.0 * 10f64.powf(0.2), max_relative = 1e-5);
    }

    #[test]
    fn test_missing_inputs_fail_initialization() {
        let dir = TempDir::new().unwrap();
        // no XCA file in the directory
        let md = detected_product("ASA_IMP_1P");
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::LatestAuxFile));
        assert!(cal.initialize(&md, &mut target, InitOptions::calibrate()).is_err());

        // metadata factors requested but absent
        let md = detected_product("ASA_IMP_1P").with_attribute(keys::ANT_ELEV_CORR_FLAG, true);
        let mut cal = AsarCalibrator::new(&config_for(&dir, AuxFileSelection::ProductAuxFile));
        assert!(matches!(
            cal.initialize(&md, &mut target, InitOptions::calibrate()),
            Err(SarError::MissingAttribute(_))
        ));

        let alos = ProductMetadata::new("ALOS", "PALSAR_L1.5", SampleType::Detected, 2, 2);
        assert!(matches!(
            cal.initialize(&alos, &mut target, InitOptions::calibrate()),
            Err(SarError::MissionMismatch { .. })
        ));
    }

    #[test]
    fn test_latest_aux_file_checks_product_time() {
        let dir = TempDir::new().unwrap();
        let expired = "ASA_XCA_AXVIEC20030101_000000_20020101_000000_20031231_000000";
        write_aux(&dir, expired, &[("ext_cal_im_vv".to_string(), vec![0.0; 7])]);
        let config = config_for(&dir, AuxFileSelection::LatestAuxFile);

        // antenna already compensated, so only the aux selection reads the time
        let md = detected_product("ASA_IMP_1P")
            .with_attribute(keys::ANT_ELEV_CORR_FLAG, true)
            .with_attribute(keys::FIRST_LINE_TIME, "not-a-time");
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config);
        assert!(matches!(
            cal.initialize(&md, &mut target, InitOptions::calibrate()),
            Err(SarError::Metadata(_))
        ));

        // 2007 product, file only valid until 2003
        let md = detected_product("ASA_IMP_1P").with_attribute(keys::ANT_ELEV_CORR_FLAG, true);
        let mut cal = AsarCalibrator::new(&config);
        assert!(cal.initialize(&md, &mut target, InitOptions::calibrate()).is_err());

        // without a time the validity window is not applied
        let mut md = detected_product("ASA_IMP_1P").with_attribute(keys::ANT_ELEV_CORR_FLAG, true);
        md.attributes.remove(keys::FIRST_LINE_TIME);
        let mut cal = AsarCalibrator::new(&config);
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();
        assert_eq!(cal.aux_file_name(), Some(expired));
    }

    #[test]
    fn test_phase_band_copied() {
        let dir = TempDir::new().unwrap();
        let md = detected_product("ASA_IMP_1P")
            .with_attribute(keys::ANT_ELEV_CORR_FLAG, true)
            .with_attribute("calibration_factor.VV", 12.0);
        let config = CalibrationConfig {
            output_image_in_db: true,
            ..config_for(&dir, AuxFileSelection::ProductAuxFile)
        };
        let mut target = md.clone();
        let mut cal = AsarCalibrator::new(&config);
        cal.initialize(&md, &mut target, InitOptions::calibrate()).unwrap();
        let out = run_tile(&cal, &md, OutputQuantity::Sigma0, "phase", 1.25);
        assert!(out.iter().all(|&v| v == 1.25));
    }
}
