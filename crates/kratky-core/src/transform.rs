//! Abscissa conversions with first-order uncertainty propagation.
//!
//! The abscissa of a reduced curve escalates through four representations,
//! each applying one further physical transform: pixel radius, radius on the
//! detector surface, scattering angle 2θ, momentum transfer q. Every stage
//! compounds the uncertainty of the one before it; independent-variable
//! Gaussian propagation throughout.

use serde::{Deserialize, Serialize};

use std::f64::consts::PI;

use crate::geometry::Geometry;

/// Physical quantity on the X axis of a reduced curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbscissaKind {
    /// Distance from the beam center, in pixels.
    Pixel,
    /// Distance from the beam center on the detector surface.
    DetectorRadius,
    /// Full scattering angle 2θ = atan(radius / distance).
    TwoTheta,
    /// Momentum transfer q = (4π/λ)·sin(θ/2).
    MomentumTransfer,
}

/// Convert a pixel radius and its uncertainty to `kind`'s representation.
pub fn abscissa(rho: f64, rho_sigma: f64, geometry: &Geometry, kind: AbscissaKind) -> (f64, f64) {
    match kind {
        AbscissaKind::Pixel => (rho, rho_sigma),
        AbscissaKind::DetectorRadius => detector_radius(rho, rho_sigma, geometry),
        AbscissaKind::TwoTheta => two_theta(rho, rho_sigma, geometry),
        AbscissaKind::MomentumTransfer => momentum_transfer(rho, rho_sigma, geometry),
    }
}

fn detector_radius(rho: f64, rho_sigma: f64, geometry: &Geometry) -> (f64, f64) {
    (rho * geometry.pixel_size, rho_sigma * geometry.pixel_size)
}

fn two_theta(rho: f64, rho_sigma: f64, geometry: &Geometry) -> (f64, f64) {
    let (r, r_sigma) = detector_radius(rho, rho_sigma, geometry);
    let d = geometry.distance;
    let ratio = r / d;
    let value = ratio.atan();
    let sigma = ((r_sigma / d).powi(2) + (r * geometry.distance_sigma / (d * d)).powi(2)).sqrt()
        / (1.0 + ratio * ratio);
    (value, sigma)
}

fn momentum_transfer(rho: f64, rho_sigma: f64, geometry: &Geometry) -> (f64, f64) {
    let (tth, tth_sigma) = two_theta(rho, rho_sigma, geometry);
    let theta = 0.5 * tth;
    let sin = theta.sin();
    let sin_sigma = 0.5 * tth_sigma * theta.cos();
    let lambda = geometry.wavelength;
    let value = 4.0 * PI * sin / lambda;
    let sigma = 4.0
        * PI
        * ((sin_sigma / lambda).powi(2)
            + (sin * geometry.wavelength_sigma / (lambda * lambda)).powi(2))
        .sqrt();
    (value, sigma)
}

/// Invert the momentum-transfer conversion back to a pixel radius:
/// ρ = (D / pixel_size) · tan(2·asin(qλ / 4π)).
pub fn q_to_pixel(q: f64, geometry: &Geometry) -> f64 {
    (2.0 * (q * geometry.wavelength / (4.0 * PI)).asin()).tan() * geometry.distance
        / geometry.pixel_size
}
