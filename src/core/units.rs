//! Pixel unit classification and linear/dB conversions

use crate::types::{PixelUnit, SarError, SarResult};

/// Linear values below this are not converted with log10
pub const UNDERFLOW_THRESHOLD: f64 = 1.0e-30;

/// Classify a band's physical unit from its metadata tag.
///
/// Missing or unknown tags are an error.
pub fn classify_unit(unit: Option<&str>) -> SarResult<PixelUnit> {
    let raw = unit.map(str::trim).filter(|u| !u.is_empty()).ok_or_else(|| {
        SarError::UnhandledUnit {
            calibrator: "unit classification".to_string(),
            unit: "<missing>".to_string(),
        }
    })?;

    match raw.to_lowercase().as_str() {
        "amplitude" => Ok(PixelUnit::Amplitude),
        "intensity" => Ok(PixelUnit::Intensity),
        "intensity_db" | "db" => Ok(PixelUnit::IntensityDb),
        "amplitude_db" => Ok(PixelUnit::AmplitudeDb),
        "real" => Ok(PixelUnit::Real),
        "imaginary" => Ok(PixelUnit::Imaginary),
        "phase" => Ok(PixelUnit::Phase),
        _ => Err(SarError::UnhandledUnit {
            calibrator: "unit classification".to_string(),
            unit: raw.to_string(),
        }),
    }
}

impl std::str::FromStr for PixelUnit {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        classify_unit(Some(s))
    }
}

/// dB to linear power: 10^(x/10)
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Linear power to dB. Not guarded; see [`linear_to_db_clamped`].
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Output conversion used by every calibrator.
///
/// Values under [`UNDERFLOW_THRESHOLD`] map to `-UNDERFLOW_THRESHOLD`, which is
/// a placeholder rather than a dB quantity. Downstream products depend on this
/// exact value.
#[inline]
pub fn linear_to_db_clamped(linear: f64) -> f64 {
    if linear < UNDERFLOW_THRESHOLD {
        -UNDERFLOW_THRESHOLD
    } else {
        linear_to_db(linear)
    }
}
