//! External calibration auxiliary data.
//!
//! The calibration engine sees an auxiliary file as a set of named float
//! arrays. On disk each file is an XML document:
//!
//! ```xml
//! <auxiliaryData name="ASA_XCA_AXVIEC20070517_153558_20070204_165113_20071231_000000">
//!   <array name="is2_ref_elev_angle">19.2</array>
//!   <array name="is2_pattern_vv">-3.1 -3.0 ...</array>
//! </auxiliaryData>
//! ```

use crate::io::orbit::utc_to_mjd;
use crate::types::{SarError, SarResult};
use chrono::{NaiveDateTime, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Named float arrays from one auxiliary file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryData {
    name: String,
    arrays: HashMap<String, Vec<f32>>,
}

impl AuxiliaryData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            arrays: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, key: &str, values: Vec<f32>) {
        self.arrays.insert(key.to_string(), values);
    }

    pub fn with_array(mut self, key: &str, values: Vec<f32>) -> Self {
        self.insert(key, values);
        self
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Array by record name; a missing record is a malformed file
    pub fn array(&self, key: &str) -> SarResult<&[f32]> {
        self.arrays.get(key).map(Vec::as_slice).ok_or_else(|| {
            SarError::InvalidFormat(format!(
                "Auxiliary file '{}' has no record '{}'",
                self.name, key
            ))
        })
    }

    /// First element of a record
    pub fn scalar(&self, key: &str) -> SarResult<f32> {
        self.array(key)?.first().copied().ok_or_else(|| {
            SarError::InvalidFormat(format!(
                "Auxiliary file '{}' record '{}' is empty",
                self.name, key
            ))
        })
    }

    /// Read an auxiliary XML file from disk
    pub fn read<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref();
        log::info!("Reading calibration auxiliary file: {}", path.display());
        let content = fs::read_to_string(path)?;
        let fallback = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut data = Self::from_xml_str(&content)?;
        if data.name.is_empty() {
            data.name = fallback;
        }
        Ok(data)
    }

    /// Parse auxiliary XML content
    pub fn from_xml_str(xml_content: &str) -> SarResult<Self> {
        log::debug!("Parsing auxiliary XML content ({} bytes)", xml_content.len());

        let mut reader = Reader::from_str(xml_content);
        reader.trim_text(true);

        let mut data = AuxiliaryData::default();
        let mut buf = Vec::new();
        let mut current: Option<String> = None;
        let mut text_content = String::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => match e.name().as_ref() {
                    b"auxiliaryData" => {
                        if let Some(attr) = e.try_get_attribute("name")? {
                            data.name = attr.unescape_value()?.to_string();
                        }
                    }
                    b"array" => {
                        current = Some(array_name(e)?);
                        text_content.clear();
                    }
                    _ => {}
                },
                Ok(Event::Empty(ref e)) => {
                    if e.name().as_ref() == b"array" {
                        let key = array_name(e)?;
                        data.insert_unique(key, Vec::new())?;
                    }
                }
                Ok(Event::Text(ref e)) => {
                    if current.is_some() {
                        text_content.push_str(&e.unescape()?);
                    }
                }
                Ok(Event::End(ref e)) => {
                    if e.name().as_ref() == b"array" {
                        if let Some(key) = current.take() {
                            let values = parse_float_list(&key, &text_content)?;
                            data.insert_unique(key, values)?;
                        }
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(SarError::XmlParsing(format!(
                        "Auxiliary XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )));
                }
                _ => {}
            }
            buf.clear();
        }

        if current.is_some() {
            return Err(SarError::XmlParsing(
                "Unterminated <array> record in auxiliary file".to_string(),
            ));
        }

        log::debug!("Parsed {} auxiliary records from '{}'", data.arrays.len(), data.name);
        Ok(data)
    }

    fn insert_unique(&mut self, key: String, values: Vec<f32>) -> SarResult<()> {
        if self.arrays.contains_key(&key) {
            return Err(SarError::InvalidFormat(format!(
                "Duplicate auxiliary record '{}'",
                key
            )));
        }
        self.arrays.insert(key, values);
        Ok(())
    }
}

fn array_name(e: &quick_xml::events::BytesStart<'_>) -> SarResult<String> {
    let attr = e.try_get_attribute("name")?.ok_or_else(|| {
        SarError::InvalidFormat("Auxiliary <array> record without a name".to_string())
    })?;
    let name = attr.unescape_value()?.trim().to_string();
    if name.is_empty() {
        return Err(SarError::InvalidFormat(
            "Auxiliary <array> record with an empty name".to_string(),
        ));
    }
    Ok(name)
}

fn parse_float_list(key: &str, text: &str) -> SarResult<Vec<f32>> {
    text.split_whitespace()
        .map(|s| {
            s.parse::<f32>().map_err(|e| {
                SarError::InvalidFormat(format!("Record '{}': bad value '{}': {}", key, s, e))
            })
        })
        .collect()
}

/// Validity information decoded from an ENVISAT XCA file name
#[derive(Debug, Clone, PartialEq)]
pub struct AuxFileEntry {
    pub path: PathBuf,
    pub generated_mjd: f64,
    pub validity_start_mjd: f64,
    pub validity_stop_mjd: f64,
}

fn xca_name_pattern() -> SarResult<Regex> {
    Regex::new(r"^ASA_XCA_AX[A-Z]{4}(\d{8}_\d{6})_(\d{8}_\d{6})_(\d{8}_\d{6})")
        .map_err(|e| SarError::Processing(format!("Regex error: {}", e)))
}

fn parse_compact_time(text: &str) -> Option<f64> {
    NaiveDateTime::parse_from_str(text, "%Y%m%d_%H%M%S")
        .ok()
        .map(|naive| utc_to_mjd(Utc.from_utc_datetime(&naive)))
}

/// List the XCA auxiliary files in `dir` with their validity windows
pub fn list_xca_files(dir: &Path) -> SarResult<Vec<AuxFileEntry>> {
    let pattern = xca_name_pattern()?;
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let file_name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => continue,
        };
        if let Some(caps) = pattern.captures(&file_name) {
            let times = (
                parse_compact_time(&caps[1]),
                parse_compact_time(&caps[2]),
                parse_compact_time(&caps[3]),
            );
            if let (Some(generated_mjd), Some(validity_start_mjd), Some(validity_stop_mjd)) = times {
                entries.push(AuxFileEntry {
                    path,
                    generated_mjd,
                    validity_start_mjd,
                    validity_stop_mjd,
                });
            } else {
                log::warn!("Skipping auxiliary file with bad timestamps: {}", file_name);
            }
        }
    }

    log::debug!("Found {} XCA auxiliary files in {}", entries.len(), dir.display());
    Ok(entries)
}

/// Pick the most recently generated XCA file in `dir`.
///
/// With `product_time_mjd`, only files whose validity window covers the
/// product time are considered.
pub fn find_latest_xca_file(dir: &Path, product_time_mjd: Option<f64>) -> SarResult<PathBuf> {
    let entries = list_xca_files(dir)?;
    entries
        .into_iter()
        .filter(|e| match product_time_mjd {
            Some(t) => e.validity_start_mjd <= t && t <= e.validity_stop_mjd,
            None => true,
        })
        .max_by(|a, b| a.generated_mjd.total_cmp(&b.generated_mjd))
        .map(|e| e.path)
        .ok_or_else(|| {
            SarError::Metadata(format!(
                "No valid ASAR XCA auxiliary file found in {}",
                dir.display()
            ))
        })
}

/// Locate a named auxiliary file in `dir`, with or without `.xml`
pub fn resolve_named_aux_file(dir: &Path, name: &str) -> SarResult<PathBuf> {
    let name = name.trim();
    let direct = dir.join(name);
    if direct.is_file() {
        return Ok(direct);
    }
    let with_ext = dir.join(format!("{}.xml", name));
    if with_ext.is_file() {
        return Ok(with_ext);
    }
    Err(SarError::Metadata(format!(
        "Auxiliary file '{}' not found in {}",
        name,
        dir.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
        <auxiliaryData name="ASA_XCA_TEST">
            <array name="is2_ref_elev_angle">19.2</array>
            <array name="ext_cal_im_vv">50.1 51.2 52.3 53.4 54.5 55.6 56.7</array>
            <array name="empty"/>
        </auxiliaryData>"#;

    #[test]
    fn test_parse_named_arrays() {
        let data = AuxiliaryData::from_xml_str(SAMPLE).unwrap();
        assert_eq!(data.name(), "ASA_XCA_TEST");
        assert_eq!(data.len(), 3);
        assert_eq!(data.scalar("is2_ref_elev_angle").unwrap(), 19.2);
        assert_eq!(data.array("ext_cal_im_vv").unwrap().len(), 7);
        assert!(data.array("empty").unwrap().is_empty());
        assert!(data.scalar("empty").is_err());
        assert!(data.array("nope").is_err());
    }

    #[test]
    fn test_malformed_records_rejected() {
        let bad_number = r#"<auxiliaryData><array name="a">1.0 x 3.0</array></auxiliaryData>"#;
        assert!(matches!(
            AuxiliaryData::from_xml_str(bad_number),
            Err(SarError::InvalidFormat(_))
        ));
        let no_name = r#"<auxiliaryData><array>1.0</array></auxiliaryData>"#;
        assert!(AuxiliaryData::from_xml_str(no_name).is_err());
        let duplicate =
            r#"<auxiliaryData><array name="a">1</array><array name="a">2</array></auxiliaryData>"#;
        assert!(AuxiliaryData::from_xml_str(duplicate).is_err());
    }

    #[test]
    fn test_latest_xca_selection() {
        let dir = TempDir::new().unwrap();
        let older = "ASA_XCA_AXVIEC20050101_000000_20040101_000000_20071231_000000.xml";
        let newer = "ASA_XCA_AXVIEC20070517_153558_20070204_165113_20071231_000000.xml";
        for name in [older, newer, "README.txt"] {
            fs::write(dir.path().join(name), SAMPLE).unwrap();
        }

        let latest = find_latest_xca_file(dir.path(), None).unwrap();
        assert!(latest.ends_with(newer));

        // product acquired in 2005 is only covered by the older file
        let t2005 = crate::io::orbit::parse_time_to_mjd("2005-06-01T00:00:00Z").unwrap();
        let chosen = find_latest_xca_file(dir.path(), Some(t2005)).unwrap();
        assert!(chosen.ends_with(older));

        let t2010 = crate::io::orbit::parse_time_to_mjd("2010-01-01T00:00:00Z").unwrap();
        assert!(find_latest_xca_file(dir.path(), Some(t2010)).is_err());
    }

    #[test]
    fn test_resolve_and_read_named_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("ASA_XCA_TEST.xml"), SAMPLE).unwrap();
        let path = resolve_named_aux_file(dir.path(), "ASA_XCA_TEST").unwrap();
        let data = AuxiliaryData::read(&path).unwrap();
        assert_eq!(data.name(), "ASA_XCA_TEST");
        assert!(resolve_named_aux_file(dir.path(), "missing").is_err());
    }
}
