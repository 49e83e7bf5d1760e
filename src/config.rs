use crate::types::{SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Backscatter coefficient written to the target bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputQuantity {
    /// Normalised to ground range area
    Sigma0,
    /// Normalised to the area perpendicular to the look direction
    Gamma0,
    /// Radar brightness (slant range area)
    Beta0,
}

impl OutputQuantity {
    /// Target band name prefix, e.g. "Sigma0"
    pub fn band_prefix(&self) -> &'static str {
        match self {
            OutputQuantity::Sigma0 => "Sigma0",
            OutputQuantity::Gamma0 => "Gamma0",
            OutputQuantity::Beta0 => "Beta0",
        }
    }
}

impl Default for OutputQuantity {
    fn default() -> Self {
        OutputQuantity::Sigma0
    }
}

impl fmt::Display for OutputQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.band_prefix())
    }
}

/// Which ENVISAT external calibration file to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuxFileSelection {
    /// Most recent XCA file in the auxiliary directory covering the product
    LatestAuxFile,
    /// The XCA file named in the product metadata
    ProductAuxFile,
    /// The file given by `external_aux_file`
    ExternalAuxFile,
}

impl Default for AuxFileSelection {
    fn default() -> Self {
        AuxFileSelection::LatestAuxFile
    }
}

/// Default ENVISAT auxiliary directory under the platform data directory
pub fn default_aux_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sarcal")
        .join("auxdata")
        .join("envisat")
}

/// Calibration run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalibrationConfig {
    /// Write 10*log10 of the calibrated value
    pub output_image_in_db: bool,
    pub output_quantity: OutputQuantity,
    pub aux_file: AuxFileSelection,
    /// Directory searched for auxiliary calibration files
    pub aux_dir: PathBuf,
    pub external_aux_file: Option<PathBuf>,
    /// Tile width in pixels, 0 for the full raster width
    pub tile_width: usize,
    /// Tile height in lines
    pub tile_height: usize,
    /// Process tiles on the rayon thread pool
    pub parallel: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            output_image_in_db: false,
            output_quantity: OutputQuantity::Sigma0,
            aux_file: AuxFileSelection::LatestAuxFile,
            aux_dir: default_aux_dir(),
            external_aux_file: None,
            tile_width: 0,  // full rows
            tile_height: 64,
            parallel: true,
        }
    }
}

impl CalibrationConfig {
    /// Parse an XML configuration document, e.g.
    /// `<calibration><outputImageInDb>true</outputImageInDb></calibration>`.
    /// Missing elements keep their defaults.
    pub fn from_xml_str(xml_content: &str) -> SarResult<Self> {
        let config: CalibrationConfig = quick_xml::de::from_str(xml_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        log::info!("Loading calibration configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        Self::from_xml_str(&content)
    }

    pub fn validate(&self) -> SarResult<()> {
        if self.tile_height == 0 {
            return Err(SarError::Processing("Tile height must be positive".to_string()));
        }
        if self.aux_file == AuxFileSelection::ExternalAuxFile && self.external_aux_file.is_none() {
            return Err(SarError::Processing(
                "External auxiliary file selected but no path given".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = CalibrationConfig::default();
        assert!(!config.output_image_in_db);
        assert_eq!(config.output_quantity, OutputQuantity::Sigma0);
        assert_eq!(config.aux_file, AuxFileSelection::LatestAuxFile);
        assert!(config.aux_dir.ends_with("sarcal/auxdata/envisat"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_xml() {
        let xml = r#"
            <calibration>
                <outputImageInDb>true</outputImageInDb>
                <outputQuantity>Gamma0</outputQuantity>
                <auxFile>ExternalAuxFile</auxFile>
                <externalAuxFile>/data/aux/ASA_XCA_TEST.xml</externalAuxFile>
                <tileHeight>16</tileHeight>
            </calibration>"#;
        let config = CalibrationConfig::from_xml_str(xml).unwrap();
        assert!(config.output_image_in_db);
        assert_eq!(config.output_quantity, OutputQuantity::Gamma0);
        assert_eq!(config.aux_file, AuxFileSelection::ExternalAuxFile);
        assert_eq!(
            config.external_aux_file.as_deref(),
            Some(Path::new("/data/aux/ASA_XCA_TEST.xml"))
        );
        assert_eq!(config.tile_height, 16);
        assert_eq!(config.tile_width, 0);
        assert!(config.parallel);
    }

    #[test]
    fn test_external_selection_requires_path() {
        let xml = "<calibration><auxFile>ExternalAuxFile</auxFile></calibration>";
        assert!(CalibrationConfig::from_xml_str(xml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "<calibration><tileWidth>512</tileWidth></calibration>").unwrap();
        let config = CalibrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tile_width, 512);
    }
}
