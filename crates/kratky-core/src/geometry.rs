use serde::{Deserialize, Serialize};

/// Detector geometry snapshot used for abscissa conversion.
///
/// Lengths (`distance`, `pixel_size`) share one unit, typically mm; with the
/// wavelength in nm the momentum transfer comes out in nm⁻¹. Uncertainties
/// are absolute standard deviations; fields without a paired sigma are
/// treated as exact. The struct is an immutable calibration snapshot — the
/// reduction never writes to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Beam center row coordinate, in pixels.
    pub beam_row: f64,
    pub beam_row_sigma: f64,
    /// Beam center column coordinate, in pixels.
    pub beam_col: f64,
    pub beam_col_sigma: f64,
    /// Sample-to-detector distance.
    pub distance: f64,
    pub distance_sigma: f64,
    /// Edge length of a (square) detector pixel, same unit as `distance`.
    pub pixel_size: f64,
    /// Radiation wavelength.
    pub wavelength: f64,
    pub wavelength_sigma: f64,
}

impl Geometry {
    /// Distance of a pixel center from the beam center, in pixel units, with
    /// the uncertainty induced by the beam-center uncertainties.
    ///
    /// The pixel at the beam center reports `(0.0, 0.0)`.
    pub fn pixel_radius(&self, row: usize, col: usize) -> (f64, f64) {
        let dr = row as f64 - self.beam_row;
        let dc = col as f64 - self.beam_col;
        let rho = (dr * dr + dc * dc).sqrt();
        if rho == 0.0 {
            return (0.0, 0.0);
        }
        let sigma = (dr * dr * self.beam_row_sigma * self.beam_row_sigma
            + dc * dc * self.beam_col_sigma * self.beam_col_sigma)
            .sqrt()
            / rho;
        (rho, sigma)
    }

    /// Azimuth of a pixel center around the beam center, in `[0, 2π)`, with
    /// the uncertainty induced by the beam-center uncertainties.
    ///
    /// The pixel at the beam center reports `(0.0, 0.0)`.
    pub fn pixel_azimuth(&self, row: usize, col: usize) -> (f64, f64) {
        let dr = row as f64 - self.beam_row;
        let dc = col as f64 - self.beam_col;
        let rho_sq = dr * dr + dc * dc;
        if rho_sq == 0.0 {
            return (0.0, 0.0);
        }
        let phi = dr.atan2(dc).rem_euclid(std::f64::consts::TAU);
        let sigma = (dc * dc * self.beam_row_sigma * self.beam_row_sigma
            + dr * dr * self.beam_col_sigma * self.beam_col_sigma)
            .sqrt()
            / rho_sq;
        (phi, sigma)
    }
}
