use crate::types::{SarError, SarResult, TileRect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Well-known tie-point grid names
pub const INCIDENCE_ANGLE: &str = "incident_angle";
pub const SLANT_RANGE_TIME: &str = "slant_range_time";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";

/// Sub-sampled geolocation grid over the image raster.
///
/// Node `(i, j)` sits at image position
/// `(offset_x + i * sub_sampling_x, offset_y + j * sub_sampling_y)`.
/// Values are interpolated at pixel centres: linearly in azimuth and with a
/// three-point Lagrange polynomial in range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiePointGrid {
    pub name: String,
    pub offset_x: f64,
    pub offset_y: f64,
    pub sub_sampling_x: f64,
    pub sub_sampling_y: f64,
    pub grid_width: usize,
    pub grid_height: usize,
    /// Row-major node values, `grid_height` rows of `grid_width`
    pub data: Vec<f32>,
}

impl TiePointGrid {
    pub fn new(
        name: &str,
        offset: (f64, f64),
        sub_sampling: (f64, f64),
        grid_width: usize,
        grid_height: usize,
        data: Vec<f32>,
    ) -> SarResult<Self> {
        let grid = Self {
            name: name.to_string(),
            offset_x: offset.0,
            offset_y: offset.1,
            sub_sampling_x: sub_sampling.0,
            sub_sampling_y: sub_sampling.1,
            grid_width,
            grid_height,
            data,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Checks shape and sampling; deserialized grids should be validated
    /// before use.
    pub fn validate(&self) -> SarResult<()> {
        if self.grid_width == 0 || self.grid_height == 0 {
            return Err(SarError::InvalidFormat(format!(
                "Tie-point grid '{}' is empty",
                self.name
            )));
        }
        if self.data.len() != self.grid_width * self.grid_height {
            return Err(SarError::InvalidFormat(format!(
                "Tie-point grid '{}' has {} values, expected {}x{}",
                self.name,
                self.data.len(),
                self.grid_width,
                self.grid_height
            )));
        }
        if !(self.sub_sampling_x > 0.0 && self.sub_sampling_y > 0.0) {
            return Err(SarError::InvalidFormat(format!(
                "Tie-point grid '{}' has non-positive sub-sampling",
                self.name
            )));
        }
        Ok(())
    }

    fn node(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.grid_width + i] as f64
    }

    /// Grid row `j` interpolated linearly to fractional row position `fy`
    fn azimuth_row(&self, fy: f64) -> Vec<f64> {
        if self.grid_height == 1 {
            return (0..self.grid_width).map(|i| self.node(i, 0)).collect();
        }
        let j0 = (fy.floor().max(0.0) as usize).min(self.grid_height - 2);
        let wy = fy - j0 as f64;
        (0..self.grid_width)
            .map(|i| {
                let a = self.node(i, j0);
                let b = self.node(i, j0 + 1);
                a + wy * (b - a)
            })
            .collect()
    }

    fn range_interpolate(&self, row: &[f64], fx: f64) -> f64 {
        match row.len() {
            1 => row[0],
            2 => row[0] + fx * (row[1] - row[0]),
            n => {
                let i0 = ((fx.round() - 1.0).max(0.0) as usize).min(n - 3);
                let t = fx - i0 as f64;
                let w0 = (t - 1.0) * (t - 2.0) / 2.0;
                let w1 = -t * (t - 2.0);
                let w2 = t * (t - 1.0) / 2.0;
                w0 * row[i0] + w1 * row[i0 + 1] + w2 * row[i0 + 2]
            }
        }
    }

    fn fractional_x(&self, x: usize) -> f64 {
        (x as f64 + 0.5 - self.offset_x) / self.sub_sampling_x
    }

    fn fractional_y(&self, y: usize) -> f64 {
        (y as f64 + 0.5 - self.offset_y) / self.sub_sampling_y
    }

    /// Interpolated value at the centre of image pixel (x, y)
    pub fn pixel_value(&self, x: usize, y: usize) -> f64 {
        let row = self.azimuth_row(self.fractional_y(y));
        self.range_interpolate(&row, self.fractional_x(x))
    }

    /// Interpolated values for every pixel of `tile`, shape (height, width)
    pub fn tile_values(&self, tile: TileRect) -> Array2<f64> {
        let mut out = Array2::zeros(tile.shape());
        for (r, mut out_row) in out.rows_mut().into_iter().enumerate() {
            let row = self.azimuth_row(self.fractional_y(tile.y + r));
            for (c, value) in out_row.iter_mut().enumerate() {
                *value = self.range_interpolate(&row, self.fractional_x(tile.x + c));
            }
        }
        out
    }
}
