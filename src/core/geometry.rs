//! Per-pixel acquisition geometry: slant range, satellite distance to the
//! earth centre, local earth radius and the elevation angle seen from the
//! antenna.

use crate::io::orbit::{nearest_preceding_vector, validate_state_vectors, SECONDS_PER_DAY};
use crate::types::{OrbitStateVector, SarResult};

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Half the speed of light, converts two-way time to one-way range (m/s)
pub const HALF_LIGHT_SPEED: f64 = SPEED_OF_LIGHT / 2.0;

/// WGS84 semi-major axis (m)
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 first eccentricity squared
pub const WGS84_ECCENTRICITY_SQUARED: f64 = 0.006_694_379_990_14;

/// One-way slant range (m) from a two-way slant range time in nanoseconds
#[inline]
pub fn slant_range_from_time_ns(slant_range_time_ns: f64) -> f64 {
    slant_range_time_ns / 1.0e9 * HALF_LIGHT_SPEED
}

/// Geodetic lat/lon/height to ECEF coordinates on the WGS84 ellipsoid
pub fn latlon_to_ecef(lat: f64, lon: f64, height: f64) -> [f64; 3] {
    let lat_rad = lat.to_radians();
    let lon_rad = lon.to_radians();

    let n = WGS84_SEMI_MAJOR_AXIS / (1.0 - WGS84_ECCENTRICITY_SQUARED * lat_rad.sin().powi(2)).sqrt();

    let x = (n + height) * lat_rad.cos() * lon_rad.cos();
    let y = (n + height) * lat_rad.cos() * lon_rad.sin();
    let z = (n * (1.0 - WGS84_ECCENTRICITY_SQUARED) + height) * lat_rad.sin();

    [x, y, z]
}

/// Distance from the earth centre to the ellipsoid surface at lat/lon (m)
pub fn earth_radius(lat: f64, lon: f64) -> f64 {
    norm(&latlon_to_ecef(lat, lon, 0.0))
}

/// Satellite distance to the earth centre (m) at `time_mjd`.
///
/// Uses the last state vector at or before the time, not an interpolated
/// position.
pub fn satellite_distance(state_vectors: &[OrbitStateVector], time_mjd: f64) -> SarResult<f64> {
    let sv = nearest_preceding_vector(state_vectors, time_mjd)?;
    Ok(norm(&sv.position))
}

/// Look angle at the satellite (degrees) in the triangle
/// satellite / earth centre / target, by the law of cosines.
pub fn elevation_angle(slant_range: f64, satellite_distance: f64, earth_radius: f64) -> f64 {
    let cos_angle = (slant_range * slant_range + satellite_distance * satellite_distance
        - earth_radius * earth_radius)
        / (2.0 * slant_range * satellite_distance);
    cos_angle.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Incidence angle at the target (degrees) for a given elevation angle, by
/// the law of sines in the same triangle.
pub fn incidence_angle(elevation_angle_deg: f64, satellite_distance: f64, earth_radius: f64) -> f64 {
    let sin_inc = satellite_distance * elevation_angle_deg.to_radians().sin() / earth_radius;
    sin_inc.clamp(-1.0, 1.0).asin().to_degrees()
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Geometry of a single pixel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometrySample {
    pub slant_range: f64,
    pub satellite_distance: f64,
    pub earth_radius: f64,
    pub elevation_angle: f64,
}

impl GeometrySample {
    pub fn incidence_angle(&self) -> f64 {
        incidence_angle(self.elevation_angle, self.satellite_distance, self.earth_radius)
    }
}

/// Resolves per-pixel geometry from orbit state vectors and the product's
/// azimuth timing.
#[derive(Debug, Clone)]
pub struct GeometryResolver {
    state_vectors: Vec<OrbitStateVector>,
    first_line_time_mjd: f64,
    line_time_interval_days: f64,
}

impl GeometryResolver {
    /// `line_time_interval` is in seconds.
    pub fn new(
        state_vectors: Vec<OrbitStateVector>,
        first_line_time_mjd: f64,
        line_time_interval: f64,
    ) -> SarResult<Self> {
        validate_state_vectors(&state_vectors)?;
        Ok(Self {
            state_vectors,
            first_line_time_mjd,
            line_time_interval_days: line_time_interval / SECONDS_PER_DAY,
        })
    }

    /// Zero-Doppler time of image line `y` (MJD)
    pub fn zero_doppler_time(&self, y: usize) -> f64 {
        self.first_line_time_mjd + y as f64 * self.line_time_interval_days
    }

    /// Satellite distance to the earth centre for image line `y`
    pub fn satellite_distance_for_line(&self, y: usize) -> SarResult<f64> {
        satellite_distance(&self.state_vectors, self.zero_doppler_time(y))
    }

    /// Full geometry for one pixel. `satellite_distance` comes from
    /// [`Self::satellite_distance_for_line`] so it is computed once per row.
    pub fn sample(
        &self,
        satellite_distance: f64,
        slant_range_time_ns: f64,
        lat: f64,
        lon: f64,
    ) -> GeometrySample {
        let slant_range = slant_range_from_time_ns(slant_range_time_ns);
        let earth_radius = earth_radius(lat, lon);
        GeometrySample {
            slant_range,
            satellite_distance,
            earth_radius,
            elevation_angle: elevation_angle(slant_range, satellite_distance, earth_radius),
        }
    }
}
