use crate::types::{OrbitStateVector, SarError, SarResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Seconds per day
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Modified Julian Day epoch, 1858-11-17T00:00:00Z
fn mjd_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1858, 11, 17, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Convert a UTC timestamp to Modified Julian Days
pub fn utc_to_mjd(time: DateTime<Utc>) -> f64 {
    let delta = time - mjd_epoch();
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1.0e6 / SECONDS_PER_DAY,
        None => delta.num_milliseconds() as f64 / 1.0e3 / SECONDS_PER_DAY,
    }
}

/// Convert Modified Julian Days to a UTC timestamp (microsecond precision)
pub fn mjd_to_utc(mjd: f64) -> DateTime<Utc> {
    let us = (mjd * SECONDS_PER_DAY * 1.0e6).round() as i64;
    mjd_epoch() + chrono::Duration::microseconds(us)
}

/// Parse a product time string into Modified Julian Days.
///
/// Accepts RFC 3339 and the ENVISAT style `17-MAY-2007 15:35:58.123456`.
pub fn parse_time_to_mjd(text: &str) -> SarResult<f64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(utc_to_mjd(dt.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%d-%b-%Y %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(utc_to_mjd(Utc.from_utc_datetime(&naive)));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y%m%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(utc_to_mjd(Utc.from_utc_datetime(&naive)));
        }
    }
    Err(SarError::Metadata(format!("Unparsable time: '{}'", text)))
}

/// Check that state vectors are non-empty and ascending in time
pub fn validate_state_vectors(state_vectors: &[OrbitStateVector]) -> SarResult<()> {
    if state_vectors.is_empty() {
        return Err(SarError::MissingAttribute("orbit_state_vectors".to_string()));
    }
    for (i, pair) in state_vectors.windows(2).enumerate() {
        if pair[1].time_mjd < pair[0].time_mjd {
            return Err(SarError::Metadata(format!(
                "Orbit state vectors not in ascending time order at index {}",
                i + 1
            )));
        }
    }
    log::debug!(
        "Validated {} orbit state vectors ({:.6} .. {:.6} MJD)",
        state_vectors.len(),
        state_vectors[0].time_mjd,
        state_vectors[state_vectors.len() - 1].time_mjd
    );
    Ok(())
}

/// Index of the last state vector at or before `time_mjd`.
///
/// Times before the first vector select index 0. No interpolation is done
/// between vectors: callers use the selected vector as-is.
pub fn nearest_preceding_index(state_vectors: &[OrbitStateVector], time_mjd: f64) -> usize {
    // first index whose time is > time_mjd
    let upper = state_vectors.partition_point(|sv| sv.time_mjd <= time_mjd);
    upper.saturating_sub(1)
}

/// The state vector selected by [`nearest_preceding_index`]
pub fn nearest_preceding_vector(
    state_vectors: &[OrbitStateVector],
    time_mjd: f64,
) -> SarResult<&OrbitStateVector> {
    if state_vectors.is_empty() {
        return Err(SarError::Processing("No state vectors in orbit data".to_string()));
    }
    Ok(&state_vectors[nearest_preceding_index(state_vectors, time_mjd)])
}
