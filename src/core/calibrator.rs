//! Calibrator strategy interface and the per-tile kernel shared by all
//! missions.
//!
//! A calibrator is configured once through [`Calibrator::initialize`] and is
//! immutable afterwards; [`Calibrator::compute_tile`] only reads that state,
//! so tiles can be computed from any thread in any order.

use crate::config::{CalibrationConfig, OutputQuantity};
use crate::core::alos::AlosCalibrator;
use crate::core::asar::AsarCalibrator;
use crate::core::cosmo_skymed::CosmoSkymedCalibrator;
use crate::core::radarsat2::Radarsat2Calibrator;
use crate::core::tie_point_grid::{self, TiePointGrid};
use crate::core::units::{classify_unit, db_to_linear, linear_to_db, linear_to_db_clamped};
use crate::io::metadata::{keys, ProductMetadata};
use crate::types::{Mission, PixelUnit, Polarization, SampleType, SarError, SarResult, TileRect};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Zip};

/// Options for [`Calibrator::initialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitOptions {
    /// Load the data needed to replace an old antenna pattern
    pub retro_calibration: bool,
    /// Mark the target product as calibrated and detected
    pub update_metadata: bool,
}

impl InitOptions {
    pub fn calibrate() -> Self {
        Self {
            retro_calibration: false,
            update_metadata: true,
        }
    }
}

/// One source band restricted to the current tile
#[derive(Debug, Clone)]
pub struct SourceTile<'a> {
    pub band_name: &'a str,
    pub unit: Option<&'a str>,
    pub data: ArrayView2<'a, f32>,
}

impl<'a> SourceTile<'a> {
    pub fn new(band_name: &'a str, unit: Option<&'a str>, data: ArrayView2<'a, f32>) -> Self {
        Self {
            band_name,
            unit,
            data,
        }
    }
}

/// Target band description handed to the kernel
#[derive(Debug, Clone, PartialEq)]
pub struct TargetBand {
    pub name: String,
    pub unit: String,
    pub polarization: Option<Polarization>,
    pub quantity: OutputQuantity,
    /// Indices into the source band list, Real before Imaginary
    pub source_indices: Vec<usize>,
}

impl TargetBand {
    pub fn require_polarization(&self) -> SarResult<Polarization> {
        self.polarization
            .ok_or_else(|| SarError::MissingAttribute(format!("polarization of band '{}'", self.name)))
    }
}

/// Per-pixel geolocation for one tile, interpolated from tie-point grids
#[derive(Debug, Clone, Default)]
pub struct TileGeometry {
    /// Incidence angle (degrees)
    pub incidence_angle: Option<Array2<f64>>,
    /// Two-way slant range time (ns)
    pub slant_range_time: Option<Array2<f64>>,
    pub latitude: Option<Array2<f64>>,
    pub longitude: Option<Array2<f64>>,
}

impl TileGeometry {
    /// Interpolate every geolocation grid the product carries over `tile`
    pub fn from_metadata(metadata: &ProductMetadata, tile: TileRect) -> SarResult<Self> {
        let extract = |name: &str| -> SarResult<Option<Array2<f64>>> {
            match metadata.tie_point_grid(name) {
                Some(grid) => {
                    grid.validate()?;
                    Ok(Some(grid.tile_values(tile)))
                }
                None => Ok(None),
            }
        };
        Ok(Self {
            incidence_angle: extract(tie_point_grid::INCIDENCE_ANGLE)?,
            slant_range_time: extract(tie_point_grid::SLANT_RANGE_TIME)?,
            latitude: extract(tie_point_grid::LATITUDE)?,
            longitude: extract(tie_point_grid::LONGITUDE)?,
        })
    }

    fn require<'g>(grid: &'g Option<Array2<f64>>, name: &str, tile: TileRect) -> SarResult<&'g Array2<f64>> {
        let values = grid
            .as_ref()
            .ok_or_else(|| SarError::MissingAttribute(format!("tie-point grid '{}'", name)))?;
        if values.dim() != tile.shape() {
            return Err(SarError::Processing(format!(
                "Grid '{}' has shape {:?}, tile {} needs {:?}",
                name,
                values.dim(),
                tile,
                tile.shape()
            )));
        }
        Ok(values)
    }

    pub fn incidence_angle(&self, tile: TileRect) -> SarResult<&Array2<f64>> {
        Self::require(&self.incidence_angle, tie_point_grid::INCIDENCE_ANGLE, tile)
    }

    pub fn slant_range_time(&self, tile: TileRect) -> SarResult<&Array2<f64>> {
        Self::require(&self.slant_range_time, tie_point_grid::SLANT_RANGE_TIME, tile)
    }

    pub fn latitude(&self, tile: TileRect) -> SarResult<&Array2<f64>> {
        Self::require(&self.latitude, tie_point_grid::LATITUDE, tile)
    }

    pub fn longitude(&self, tile: TileRect) -> SarResult<&Array2<f64>> {
        Self::require(&self.longitude, tie_point_grid::LONGITUDE, tile)
    }
}

/// Mission-specific radiometric calibration
pub trait Calibrator: Send + Sync {
    fn mission(&self) -> Mission;

    /// Validate the source product and load factors, tables and geometry.
    /// With `update_metadata` the target is marked calibrated and detected.
    fn initialize(
        &mut self,
        source: &ProductMetadata,
        target: &mut ProductMetadata,
        options: InitOptions,
    ) -> SarResult<()>;

    /// Calibrate one tile of `target_band` into `target`
    fn compute_tile(
        &self,
        target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()>;

    /// Whether [`Self::compute_tile`] reads the tile geometry
    fn needs_geometry(&self) -> bool {
        false
    }

    /// Undo factors applied upstream before recalibrating. Copies by default.
    fn remove_factors_for_current_tile(
        &self,
        _target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        _geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        copy_first_source(sources, tile, target)
    }

    /// Replace an old antenna pattern by a new one. Copies by default.
    fn apply_retro_calibration(
        &self,
        _target_band: &TargetBand,
        sources: &[SourceTile<'_>],
        _geometry: &TileGeometry,
        tile: TileRect,
        target: ArrayViewMut2<'_, f32>,
    ) -> SarResult<()> {
        copy_first_source(sources, tile, target)
    }
}

/// Instantiate the calibrator for a product's mission tag
pub fn create_calibrator(mission_tag: &str, config: &CalibrationConfig) -> SarResult<Box<dyn Calibrator>> {
    let mission = Mission::from_tag(mission_tag).ok_or_else(|| {
        SarError::UnsupportedProduct(format!("No calibrator for mission '{}'", mission_tag))
    })?;
    log::debug!("Creating {} calibrator for mission tag '{}'", mission, mission_tag);

    let calibrator: Box<dyn Calibrator> = match mission {
        Mission::Alos => Box::new(AlosCalibrator::new(config)),
        Mission::Asar => Box::new(AsarCalibrator::new(config)),
        Mission::Radarsat2 => Box::new(Radarsat2Calibrator::new(config)),
        Mission::CosmoSkymed => Box::new(CosmoSkymedCalibrator::new(config)),
    };
    Ok(calibrator)
}

/// Fail unless the product's mission tag belongs to `expected`
pub fn check_mission(expected: Mission, source: &ProductMetadata) -> SarResult<()> {
    match Mission::from_tag(&source.mission) {
        Some(m) if m == expected => Ok(()),
        _ => Err(SarError::MissionMismatch {
            expected,
            found: source.mission.clone(),
        }),
    }
}

pub fn check_not_calibrated(source: &ProductMetadata) -> SarResult<()> {
    if source.is_calibrated()? {
        return Err(SarError::AlreadyCalibrated);
    }
    Ok(())
}

/// Calibrated products are detected and carry the absolute calibration flag
pub fn mark_calibrated(source: &ProductMetadata, target: &mut ProductMetadata) {
    if source.sample_type.is_complex() {
        target.sample_type = SampleType::Detected;
    }
    target.set(keys::ABS_CALIBRATION_FLAG, true);
}

/// Calibrators that only produce Sigma0 reject other quantities up front
pub fn require_sigma0(mission: Mission, quantity: OutputQuantity) -> SarResult<()> {
    if quantity != OutputQuantity::Sigma0 {
        return Err(SarError::UnsupportedProduct(format!(
            "{} calibration only produces Sigma0, {} requested",
            mission, quantity
        )));
    }
    Ok(())
}

fn check_shape(name: &str, shape: (usize, usize), tile: TileRect) -> SarResult<()> {
    if shape != tile.shape() {
        return Err(SarError::Processing(format!(
            "Buffer '{}' has shape {:?}, tile {} needs {:?}",
            name,
            shape,
            tile,
            tile.shape()
        )));
    }
    Ok(())
}

/// Source samples for one tile, resolved from the band unit(s)
#[derive(Debug, Clone)]
pub enum PixelSource<'a> {
    /// Copied verbatim
    Phase(ArrayView2<'a, f32>),
    /// Amplitude, intensity or intensity in dB
    Detected {
        unit: PixelUnit,
        data: ArrayView2<'a, f32>,
    },
    /// Co-located real and imaginary bands
    Complex {
        i: ArrayView2<'a, f32>,
        q: ArrayView2<'a, f32>,
    },
}

impl<'a> PixelSource<'a> {
    /// Classify the tile's source bands. `calibrator` names the caller in
    /// error messages.
    pub fn from_tiles(calibrator: &str, sources: &[SourceTile<'a>], tile: TileRect) -> SarResult<Self> {
        let first = sources.first().ok_or_else(|| {
            SarError::Processing(format!("{} calibration: no source band for tile {}", calibrator, tile))
        })?;
        check_shape(first.band_name, first.data.dim(), tile)?;

        let unhandled = |unit: PixelUnit| SarError::UnhandledUnit {
            calibrator: calibrator.to_string(),
            unit: unit.tag().to_string(),
        };

        let unit = classify_unit(first.unit).map_err(|e| match e {
            SarError::UnhandledUnit { unit, .. } => SarError::UnhandledUnit {
                calibrator: calibrator.to_string(),
                unit,
            },
            other => other,
        })?;

        match unit {
            PixelUnit::Phase => Ok(PixelSource::Phase(first.data.clone())),
            PixelUnit::Amplitude | PixelUnit::Intensity | PixelUnit::IntensityDb => Ok(PixelSource::Detected {
                unit,
                data: first.data.clone(),
            }),
            PixelUnit::Real => {
                let second = sources.get(1).ok_or_else(|| {
                    SarError::Processing(format!(
                        "{} calibration: real band '{}' has no imaginary partner",
                        calibrator, first.band_name
                    ))
                })?;
                if classify_unit(second.unit)? != PixelUnit::Imaginary {
                    return Err(SarError::Processing(format!(
                        "{} calibration: band '{}' must be followed by an imaginary band, found '{}'",
                        calibrator, first.band_name, second.band_name
                    )));
                }
                check_shape(second.band_name, second.data.dim(), tile)?;
                Ok(PixelSource::Complex {
                    i: first.data.clone(),
                    q: second.data.clone(),
                })
            }
            PixelUnit::Imaginary => Err(SarError::Processing(format!(
                "{} calibration: imaginary band '{}' without a preceding real band",
                calibrator, first.band_name
            ))),
            PixelUnit::AmplitudeDb => Err(unhandled(unit)),
        }
    }

    pub fn is_phase(&self) -> bool {
        matches!(self, PixelSource::Phase(_))
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, PixelSource::Complex { .. })
    }

    /// Uncalibrated power at tile position (row, col)
    #[inline]
    pub fn sigma_raw(&self, row: usize, col: usize) -> f64 {
        match self {
            PixelSource::Phase(data) => data[[row, col]] as f64,
            PixelSource::Detected { unit, data } => {
                let dn = data[[row, col]] as f64;
                match unit {
                    PixelUnit::Amplitude => dn * dn,
                    PixelUnit::IntensityDb => db_to_linear(dn),
                    _ => dn,
                }
            }
            PixelSource::Complex { i, q } => {
                let re = i[[row, col]] as f64;
                let im = q[[row, col]] as f64;
                re * re + im * im
            }
        }
    }
}

/// Run the shared per-pixel kernel over a tile.
///
/// Phase sources are copied verbatim. Otherwise `correct(row, col, sigma_raw)`
/// applies the mission chain and the result is written in linear scale or
/// in dB with the underflow clamp.
pub fn calibrate_pixels<F>(
    source: &PixelSource<'_>,
    tile: TileRect,
    mut target: ArrayViewMut2<'_, f32>,
    output_in_db: bool,
    correct: F,
) -> SarResult<()>
where
    F: Fn(usize, usize, f64) -> f64,
{
    check_shape("target", target.dim(), tile)?;

    if let PixelSource::Phase(data) = source {
        target.assign(data);
        return Ok(());
    }

    for ((row, col), out) in target.indexed_iter_mut() {
        let sigma = correct(row, col, source.sigma_raw(row, col));
        *out = if output_in_db {
            linear_to_db_clamped(sigma) as f32
        } else {
            sigma as f32
        };
    }
    Ok(())
}

/// Copy the first source band into the target unchanged
pub fn copy_first_source(sources: &[SourceTile<'_>], tile: TileRect, mut target: ArrayViewMut2<'_, f32>) -> SarResult<()> {
    let first = sources
        .first()
        .ok_or_else(|| SarError::Processing(format!("No source band for tile {}", tile)))?;
    check_shape(first.band_name, first.data.dim(), tile)?;
    check_shape("target", target.dim(), tile)?;
    target.assign(&first.data);
    Ok(())
}

/// Multiply a single band by a per-pixel power ratio, respecting its unit.
///
/// Power-like units take the ratio itself, amplitude-like units (including
/// the real and imaginary parts of complex data) its square root, dB units
/// an additive offset. Phase is copied.
pub fn scale_by_power_ratio(
    calibrator: &str,
    source: &SourceTile<'_>,
    power_ratio: &Array2<f64>,
    tile: TileRect,
    mut target: ArrayViewMut2<'_, f32>,
) -> SarResult<()> {
    check_shape(source.band_name, source.data.dim(), tile)?;
    check_shape("target", target.dim(), tile)?;
    check_shape("gain ratio", power_ratio.dim(), tile)?;

    let unit = classify_unit(source.unit)?;
    match unit {
        PixelUnit::Phase => {
            target.assign(&source.data);
        }
        PixelUnit::Intensity => {
            Zip::from(&mut target)
                .and(&source.data)
                .and(power_ratio)
                .for_each(|out, &v, &ratio| *out = (v as f64 * ratio) as f32);
        }
        PixelUnit::Amplitude | PixelUnit::Real | PixelUnit::Imaginary => {
            Zip::from(&mut target)
                .and(&source.data)
                .and(power_ratio)
                .for_each(|out, &v, &ratio| *out = (v as f64 * ratio.sqrt()) as f32);
        }
        PixelUnit::IntensityDb => {
            Zip::from(&mut target)
                .and(&source.data)
                .and(power_ratio)
                .for_each(|out, &v, &ratio| *out = (v as f64 + linear_to_db(ratio)) as f32);
        }
        PixelUnit::AmplitudeDb => {
            return Err(SarError::UnhandledUnit {
                calibrator: calibrator.to_string(),
                unit: unit.tag().to_string(),
            })
        }
    }
    Ok(())
}

/// Find a tie-point grid the calibrator cannot work without
pub fn require_grid<'m>(metadata: &'m ProductMetadata, name: &str) -> SarResult<&'m TiePointGrid> {
    let grid = metadata
        .tie_point_grid(name)
        .ok_or_else(|| SarError::MissingAttribute(format!("tie-point grid '{}'", name)))?;
    grid.validate()?;
    Ok(grid)
}
