use ndarray::Array2;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Complex-valued SAR data type (I + jQ)
pub type SarComplex = Complex<f32>;

/// Real-valued intensity or amplitude data
pub type SarReal = f32;

/// 2D complex SAR data array (azimuth x range)
pub type SarImage = Array2<SarComplex>;

/// 2D real SAR data array (azimuth x range)
pub type SarRealImage = Array2<SarReal>;

/// Polarization of a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = SarError;

    /// Accepts "VV", "vv" and the ENVISAT "V/V" notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '/')
            .collect::<String>()
            .to_uppercase();
        match compact.as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::Metadata(format!("Invalid polarization: {}", s))),
        }
    }
}

/// Sample type of a product: complex (I/Q) or detected (amplitude/intensity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    #[serde(rename = "COMPLEX")]
    Complex,
    #[serde(rename = "DETECTED")]
    Detected,
}

impl SampleType {
    pub fn is_complex(&self) -> bool {
        matches!(self, SampleType::Complex)
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleType::Complex => write!(f, "COMPLEX"),
            SampleType::Detected => write!(f, "DETECTED"),
        }
    }
}

impl FromStr for SampleType {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "COMPLEX" => Ok(SampleType::Complex),
            "DETECTED" => Ok(SampleType::Detected),
            _ => Err(SarError::Metadata(format!("Invalid sample type: {}", s))),
        }
    }
}

/// Mission families with a dedicated calibration model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mission {
    /// ALOS PALSAR
    Alos,
    /// ENVISAT ASAR
    Asar,
    /// Radarsat-2
    Radarsat2,
    /// Cosmo-Skymed constellation (CSKS1..CSKS4)
    CosmoSkymed,
}

impl Mission {
    /// Map a product mission tag onto a mission family.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_uppercase();
        match tag.as_str() {
            "ALOS" | "ALOS-1" | "PALSAR" => Some(Mission::Alos),
            "ENVISAT" | "ASAR" => Some(Mission::Asar),
            "RS2" | "RADARSAT-2" | "RADARSAT2" => Some(Mission::Radarsat2),
            t if t.starts_with("CSK") || t == "COSMO-SKYMED" || t == "COSMOSKYMED" => {
                Some(Mission::CosmoSkymed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Mission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mission::Alos => write!(f, "ALOS"),
            Mission::Asar => write!(f, "ENVISAT"),
            Mission::Radarsat2 => write!(f, "RS2"),
            Mission::CosmoSkymed => write!(f, "CSK"),
        }
    }
}

/// Physical unit of the samples stored in a band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelUnit {
    Amplitude,
    Intensity,
    IntensityDb,
    AmplitudeDb,
    Real,
    Imaginary,
    Phase,
}

impl PixelUnit {
    /// Canonical unit tag written into band metadata
    pub fn tag(&self) -> &'static str {
        match self {
            PixelUnit::Amplitude => "amplitude",
            PixelUnit::Intensity => "intensity",
            PixelUnit::IntensityDb => "intensity_db",
            PixelUnit::AmplitudeDb => "amplitude_db",
            PixelUnit::Real => "real",
            PixelUnit::Imaginary => "imaginary",
            PixelUnit::Phase => "phase",
        }
    }
}

impl fmt::Display for PixelUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Orbit state vector, time in Modified Julian Days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitStateVector {
    pub time_mjd: f64,
    pub position: [f64; 3], // [x, y, z] in meters (ECEF)
    pub velocity: [f64; 3], // [vx, vy, vz] in m/s
}

/// Rectangular region of a raster in absolute pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileRect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Shape as (rows, cols), matching ndarray's (azimuth, range) order
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn x_end(&self) -> usize {
        self.x + self.width
    }

    pub fn y_end(&self) -> usize {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for TileRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{} {}x{}]", self.x, self.y, self.width, self.height)
    }
}

/// Error types for SAR calibration
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Missing required metadata attribute: {0}")]
    MissingAttribute(String),

    #[error("Mission mismatch: calibrator expects {expected}, product is from '{found}'")]
    MissionMismatch { expected: Mission, found: String },

    #[error("Absolute radiometric calibration has already been applied to the product")]
    AlreadyCalibrated,

    #[error("{calibrator} calibration: unhandled unit '{unit}'")]
    UnhandledUnit { calibrator: String, unit: String },

    #[error("Unsupported product: {0}")]
    UnsupportedProduct(String),

    #[error("Processing cancelled")]
    Cancelled,
}

impl From<quick_xml::Error> for SarError {
    fn from(e: quick_xml::Error) -> Self {
        SarError::XmlParsing(e.to_string())
    }
}

impl From<quick_xml::de::DeError> for SarError {
    fn from(e: quick_xml::de::DeError) -> Self {
        SarError::XmlParsing(e.to_string())
    }
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
