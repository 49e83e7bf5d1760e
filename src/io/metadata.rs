//! Product metadata handed to the calibration engine by the product reader.
//!
//! Mission-specific values live in a flat attribute map keyed by the names
//! in [`keys`]; per-polarization values use `<key>.<POL>` (e.g.
//! `calibration_factor.VV`).

use crate::core::tie_point_grid::TiePointGrid;
use crate::types::{OrbitStateVector, Polarization, SampleType, SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute names understood by the calibrators
pub mod keys {
    pub const ABS_CALIBRATION_FLAG: &str = "abs_calibration_flag";
    pub const ANT_ELEV_CORR_FLAG: &str = "ant_elev_corr_flag";
    pub const RANGE_SPREAD_COMP_FLAG: &str = "range_spread_comp_flag";
    pub const INC_ANGLE_COMP_FLAG: &str = "inc_angle_comp_flag";
    pub const CALIBRATION_FACTOR: &str = "calibration_factor";
    pub const SWATH: &str = "swath";
    pub const MDS1_TX_RX_POLAR: &str = "mds1_tx_rx_polar";
    pub const MDS2_TX_RX_POLAR: &str = "mds2_tx_rx_polar";
    pub const FIRST_LINE_TIME: &str = "first_line_time";
    pub const LINE_TIME_INTERVAL: &str = "line_time_interval";
    pub const EXTERNAL_CALIBRATION_FILE: &str = "external_calibration_file";
    pub const REF_SLANT_RANGE: &str = "ref_slant_range";
    pub const REF_SLANT_RANGE_EXP: &str = "ref_slant_range_exp";
    pub const REF_INC_ANGLE: &str = "ref_inc_angle";
    pub const RESCALING_FACTOR: &str = "rescaling_factor";
    pub const LUT_GAINS: &str = "lut_gains";
    pub const LUT_OFFSET: &str = "lut_offset";
}

/// A single metadata attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    DoubleArray(Vec<f64>),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Double(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Text(v)
    }
}

impl From<Vec<f64>> for AttributeValue {
    fn from(v: Vec<f64>) -> Self {
        AttributeValue::DoubleArray(v)
    }
}

/// Band description as seen by the calibrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandInfo {
    pub name: String,
    /// Unit tag, e.g. "amplitude", "real", "intensity_db"
    pub unit: Option<String>,
    pub polarization: Option<Polarization>,
}

impl BandInfo {
    pub fn new(name: &str, unit: &str, polarization: Option<Polarization>) -> Self {
        Self {
            name: name.to_string(),
            unit: Some(unit.to_string()),
            polarization,
        }
    }

    /// Explicit polarization, else the `_HH`-style suffix of the band name
    pub fn resolved_polarization(&self) -> Option<Polarization> {
        self.polarization.or_else(|| {
            let upper = self.name.to_uppercase();
            upper
                .rsplit('_')
                .next()
                .and_then(|suffix| suffix.parse().ok())
        })
    }
}

/// Complete metadata for one source or target product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    pub product_name: String,
    pub mission: String,
    pub product_type: String,
    pub sample_type: SampleType,
    pub width: usize,
    pub height: usize,
    pub bands: Vec<BandInfo>,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub orbit_state_vectors: Vec<OrbitStateVector>,
    pub tie_point_grids: Vec<TiePointGrid>,
}

impl ProductMetadata {
    pub fn new(
        mission: &str,
        product_type: &str,
        sample_type: SampleType,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            product_name: String::new(),
            mission: mission.to_string(),
            product_type: product_type.to_string(),
            sample_type,
            width,
            height,
            bands: Vec::new(),
            attributes: BTreeMap::new(),
            orbit_state_vectors: Vec::new(),
            tie_point_grids: Vec::new(),
        }
    }

    pub fn with_band(mut self, band: BandInfo) -> Self {
        self.bands.push(band);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    fn attribute(&self, key: &str) -> SarResult<&AttributeValue> {
        self.attributes
            .get(key)
            .ok_or_else(|| SarError::MissingAttribute(key.to_string()))
    }

    /// Numeric attribute; integers are widened
    pub fn get_f64(&self, key: &str) -> SarResult<f64> {
        match self.attribute(key)? {
            AttributeValue::Double(v) => Ok(*v),
            AttributeValue::Int(v) => Ok(*v as f64),
            AttributeValue::Text(t) => t.trim().parse().map_err(|_| {
                SarError::Metadata(format!("Attribute '{}' is not numeric: '{}'", key, t))
            }),
            other => Err(SarError::Metadata(format!(
                "Attribute '{}' is not numeric: {:?}",
                key, other
            ))),
        }
    }

    /// Flag attribute; integer flags follow the 0/1 convention
    pub fn get_bool(&self, key: &str) -> SarResult<bool> {
        match self.attribute(key)? {
            AttributeValue::Bool(v) => Ok(*v),
            AttributeValue::Int(v) => Ok(*v != 0),
            AttributeValue::Double(v) => Ok(*v != 0.0),
            AttributeValue::Text(t) => match t.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(SarError::Metadata(format!(
                    "Attribute '{}' is not a flag: '{}'",
                    key, t
                ))),
            },
            other => Err(SarError::Metadata(format!(
                "Attribute '{}' is not a flag: {:?}",
                key, other
            ))),
        }
    }

    /// Missing flags read as false
    pub fn flag(&self, key: &str) -> SarResult<bool> {
        if self.contains(key) {
            self.get_bool(key)
        } else {
            Ok(false)
        }
    }

    pub fn get_text(&self, key: &str) -> SarResult<&str> {
        match self.attribute(key)? {
            AttributeValue::Text(t) => Ok(t.as_str()),
            other => Err(SarError::Metadata(format!(
                "Attribute '{}' is not text: {:?}",
                key, other
            ))),
        }
    }

    pub fn get_f64_array(&self, key: &str) -> SarResult<&[f64]> {
        match self.attribute(key)? {
            AttributeValue::DoubleArray(v) => Ok(v.as_slice()),
            other => Err(SarError::Metadata(format!(
                "Attribute '{}' is not an array: {:?}",
                key, other
            ))),
        }
    }

    /// Attribute key for a per-polarization value
    pub fn polarized_key(key: &str, polarization: Polarization) -> String {
        format!("{}.{}", key, polarization)
    }

    /// Collect all `<prefix>.<POL>` numeric attributes
    pub fn keyed_f64(&self, prefix: &str) -> SarResult<BTreeMap<Polarization, f64>> {
        let mut out = BTreeMap::new();
        let lead = format!("{}.", prefix);
        for key in self.attributes.keys() {
            if let Some(suffix) = key.strip_prefix(&lead) {
                let pol: Polarization = suffix.parse()?;
                out.insert(pol, self.get_f64(key)?);
            }
        }
        Ok(out)
    }

    pub fn band(&self, name: &str) -> Option<&BandInfo> {
        self.bands.iter().find(|b| b.name == name)
    }

    pub fn tie_point_grid(&self, name: &str) -> Option<&TiePointGrid> {
        self.tie_point_grids.iter().find(|g| g.name == name)
    }

    pub fn is_calibrated(&self) -> SarResult<bool> {
        self.flag(keys::ABS_CALIBRATION_FLAG)
    }
}
