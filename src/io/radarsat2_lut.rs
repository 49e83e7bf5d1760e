//! Radarsat-2 calibration lookup tables (`lutSigma.xml`, `lutGamma.xml`,
//! `lutBeta.xml`).
//!
//! ```xml
//! <lut>
//!   <offset>0.000000e+00</offset>
//!   <gains>1.2e+04 1.2e+04 ...</gains>
//! </lut>
//! ```

use crate::config::OutputQuantity;
use crate::io::metadata::{keys, ProductMetadata};
use crate::types::{SarError, SarResult};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::path::Path;

/// Gain vector and offset for one output quantity
#[derive(Debug, Clone, PartialEq)]
pub struct Radarsat2Lut {
    pub offset: f64,
    /// One gain per range sample
    pub gains: Vec<f64>,
}

/// Product file holding the table for `quantity`
pub fn lut_file_name(quantity: OutputQuantity) -> &'static str {
    match quantity {
        OutputQuantity::Sigma0 => "lutSigma.xml",
        OutputQuantity::Gamma0 => "lutGamma.xml",
        OutputQuantity::Beta0 => "lutBeta.xml",
    }
}

/// Metadata key of the gain vector for `quantity`
pub fn gains_key(quantity: OutputQuantity) -> String {
    format!("{}.{}", keys::LUT_GAINS, quantity)
}

/// Metadata key of the offset for `quantity`
pub fn offset_key(quantity: OutputQuantity) -> String {
    format!("{}.{}", keys::LUT_OFFSET, quantity)
}

impl Radarsat2Lut {
    pub fn read<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        log::info!("Reading Radarsat-2 LUT: {}", path.as_ref().display());
        let content = fs::read_to_string(path)?;
        Self::from_xml_str(&content)
    }

    pub fn from_xml_str(xml_content: &str) -> SarResult<Self> {
        let mut reader = Reader::from_str(xml_content);
        reader.trim_text(true);

        let mut offset = None;
        let mut gains = None;
        let mut buf = Vec::new();
        let mut text_content = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(_)) => {
                    text_content.clear();
                }
                Ok(Event::Text(ref e)) => {
                    text_content.push_str(&e.unescape()?);
                }
                Ok(Event::End(ref e)) => {
                    match e.name().as_ref() {
                        b"offset" => offset = Some(parse_value("offset", text_content.trim())?),
                        b"gains" => {
                            gains = Some(
                                text_content
                                    .split_whitespace()
                                    .map(|s| parse_value("gains", s))
                                    .collect::<SarResult<Vec<f64>>>()?,
                            )
                        }
                        _ => {}
                    }
                    text_content.clear();
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SarError::XmlParsing(format!(
                        "LUT XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                _ => {}
            }
            buf.clear();
        }

        let offset = offset.ok_or_else(|| SarError::InvalidFormat("LUT has no <offset> element".to_string()))?;
        let gains = gains.ok_or_else(|| SarError::InvalidFormat("LUT has no <gains> element".to_string()))?;
        if gains.is_empty() {
            return Err(SarError::InvalidFormat("LUT gain vector is empty".to_string()));
        }
        if gains.iter().any(|&g| !(g > 0.0)) {
            return Err(SarError::InvalidFormat("LUT gains must be positive".to_string()));
        }

        let lut = Self { offset, gains };
        log::debug!("Parsed LUT: offset={}, {} gains", lut.offset, lut.gains.len());
        Ok(lut)
    }

    /// Store the table in product metadata under the keys for `quantity`
    pub fn install(&self, metadata: &mut ProductMetadata, quantity: OutputQuantity) {
        metadata.set(&gains_key(quantity), self.gains.clone());
        metadata.set(&offset_key(quantity), self.offset);
    }
}

/// Install every LUT found in a product directory. Returns how many were found.
pub fn install_luts_from_dir(dir: &Path, metadata: &mut ProductMetadata) -> SarResult<usize> {
    let mut installed = 0;
    for quantity in [OutputQuantity::Sigma0, OutputQuantity::Gamma0, OutputQuantity::Beta0] {
        let path = dir.join(lut_file_name(quantity));
        if path.is_file() {
            Radarsat2Lut::read(&path)?.install(metadata, quantity);
            installed += 1;
        }
    }
    if installed == 0 {
        log::warn!("No Radarsat-2 LUT files found in {}", dir.display());
    }
    Ok(installed)
}

fn parse_value(element: &str, text: &str) -> SarResult<f64> {
    text.parse::<f64>()
        .map_err(|e| SarError::InvalidFormat(format!("Bad <{}> value '{}': {}", element, text, e)))
}
