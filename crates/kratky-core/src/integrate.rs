//! Radial and azimuthal averaging of masked detector images.
//!
//! Every pixel of the image passes through a fixed classification sequence —
//! masked, invalid intensity, invalid error, abscissa underflow, abscissa
//! overflow, binned — and the first state that applies terminates processing
//! for that pixel. Nothing per-pixel is ever fatal: anomalies are tallied and
//! reported alongside the curve. Fatal conditions (shape mismatches,
//! malformed bin sequences) are rejected before any accumulation starts.
//!
//! Above [`PARALLEL_PIXEL_THRESHOLD`] pixels the scan is split into
//! fixed-size row chunks processed by Rayon; partial bin accumulators are
//! merged in ascending chunk order, so repeated calls on the same input are
//! bit-identical.

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::f64::consts::TAU;
use std::ops::Range;

use crate::average::{Accumulator, ErrorPropagation};
use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{KratkyError, Result};
use crate::geometry::Geometry;
use crate::stats::chunk_ranges;
use crate::transform::{abscissa, AbscissaKind};

/// Classification counts for one averaging pass. The six counters partition
/// the image: their sum is always rows × cols.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelTally {
    pub masked: usize,
    pub invalid_intensity: usize,
    pub invalid_error: usize,
    pub underflow: usize,
    pub overflow: usize,
    pub binned: usize,
}

impl PixelTally {
    pub fn total(&self) -> usize {
        self.masked
            + self.invalid_intensity
            + self.invalid_error
            + self.underflow
            + self.overflow
            + self.binned
    }

    fn merge(&mut self, other: &PixelTally) {
        self.masked += other.masked;
        self.invalid_intensity += other.invalid_intensity;
        self.invalid_error += other.invalid_error;
        self.underflow += other.underflow;
        self.overflow += other.overflow;
        self.binned += other.binned;
    }
}

/// Reduced scattering curve: index-aligned per-bin vectors, one entry per
/// requested bin center.
///
/// An empty bin carries `area == 0`, the nominal bin center as abscissa and
/// NaN for the remaining fields; callers check `area` before trusting a bin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Curve {
    pub abscissa: Vec<f64>,
    pub abscissa_sigma: Vec<f64>,
    pub intensity: Vec<f64>,
    pub intensity_sigma: Vec<f64>,
    /// Number of pixels contributing to each bin.
    pub area: Vec<usize>,
    pub tally: PixelTally,
}

impl Curve {
    pub fn len(&self) -> usize {
        self.abscissa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.abscissa.is_empty()
    }
}

/// Azimuthal scattering curve over equal sectors of `[0, 2π)`.
///
/// `q_mean`/`q_sigma` carry the plain mean and spread of the contributing
/// pixels' momentum transfer, for anisotropy displays. Empty bins follow the
/// same convention as [`Curve`], with the sector center as the nominal
/// azimuth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AzimuthalCurve {
    pub phi: Vec<f64>,
    pub phi_sigma: Vec<f64>,
    pub intensity: Vec<f64>,
    pub intensity_sigma: Vec<f64>,
    pub area: Vec<usize>,
    pub q_mean: Vec<f64>,
    pub q_sigma: Vec<f64>,
    pub tally: PixelTally,
}

fn check_shapes(
    image: &Array2<f64>,
    error_image: Option<&Array2<f64>>,
    mask: &Array2<u8>,
) -> Result<(usize, usize)> {
    let (h, w) = image.dim();
    if mask.dim() != (h, w) {
        return Err(KratkyError::ShapeMismatch {
            expected: (h, w),
            actual: mask.dim(),
        });
    }
    if let Some(err) = error_image {
        if err.dim() != (h, w) {
            return Err(KratkyError::ShapeMismatch {
                expected: (h, w),
                actual: err.dim(),
            });
        }
    }
    Ok((h, w))
}

fn check_bin_centers(bin_centers: &[f64]) -> Result<()> {
    if bin_centers.is_empty() {
        return Err(KratkyError::EmptyBins);
    }
    for i in 1..bin_centers.len() {
        if bin_centers[i] < bin_centers[i - 1] {
            return Err(KratkyError::NonAscendingBins { index: i });
        }
    }
    Ok(())
}

/// Upper edge of each bin: midpoints between consecutive centers, and the
/// last center itself for the final bin.
fn upper_edges(bin_centers: &[f64]) -> Vec<f64> {
    let n = bin_centers.len();
    (0..n)
        .map(|i| {
            if i + 1 < n {
                0.5 * (bin_centers[i] + bin_centers[i + 1])
            } else {
                bin_centers[n - 1]
            }
        })
        .collect()
}

struct BinPartial {
    value: Vec<Accumulator>,
    position: Vec<Accumulator>,
    tally: PixelTally,
}

impl BinPartial {
    fn new(bins: usize, value_prop: ErrorPropagation, position_prop: ErrorPropagation) -> Self {
        Self {
            value: vec![Accumulator::new(value_prop); bins],
            position: vec![Accumulator::new(position_prop); bins],
            tally: PixelTally::default(),
        }
    }

    fn merge(&mut self, other: &BinPartial) {
        for (acc, o) in self.value.iter_mut().zip(&other.value) {
            acc.merge(o);
        }
        for (acc, o) in self.position.iter_mut().zip(&other.position) {
            acc.merge(o);
        }
        self.tally.merge(&other.tally);
    }
}

#[allow(clippy::too_many_arguments)]
fn scan_radial(
    image: &Array2<f64>,
    error_image: Option<&Array2<f64>>,
    mask: &Array2<u8>,
    geometry: &Geometry,
    bin_centers: &[f64],
    edges: &[f64],
    kind: AbscissaKind,
    intensity_prop: ErrorPropagation,
    abscissa_prop: ErrorPropagation,
    rows: Range<usize>,
) -> BinPartial {
    let (_, w) = image.dim();
    let n = bin_centers.len();
    let mut partial = BinPartial::new(n, intensity_prop, abscissa_prop);

    for row in rows {
        for col in 0..w {
            if mask[[row, col]] == 0 {
                partial.tally.masked += 1;
                continue;
            }
            let value = image[[row, col]];
            if !value.is_finite() {
                partial.tally.invalid_intensity += 1;
                continue;
            }
            let sigma = match error_image {
                Some(err) => err[[row, col]],
                None => 1.0,
            };
            if !sigma.is_finite() {
                partial.tally.invalid_error += 1;
                continue;
            }
            let (rho, rho_sigma) = geometry.pixel_radius(row, col);
            let (x, x_sigma) = abscissa(rho, rho_sigma, geometry, kind);
            if x < bin_centers[0] {
                partial.tally.underflow += 1;
                continue;
            }
            if x > bin_centers[n - 1] {
                partial.tally.overflow += 1;
                continue;
            }
            // edges are non-decreasing, so the first bin whose upper edge
            // dominates x is a partition point
            let bin = edges.partition_point(|&e| e < x).min(n - 1);
            partial.value[bin].add(value, sigma);
            partial.position[bin].add(x, x_sigma);
            partial.tally.binned += 1;
        }
    }
    partial
}

/// Bin every valid pixel into the given abscissa bins, accumulating intensity
/// and abscissa statistics under the selected error-propagation policies.
///
/// `bin_centers` must be non-decreasing; the effective bin boundaries are the
/// midpoints between consecutive centers, with the first and last centers
/// closing the range. Pixels falling outside `[bin_centers[0],
/// bin_centers[N-1]]` are tallied as under-/overflow and dropped. When no
/// `error_image` is given, a uniform standard deviation of 1.0 is assumed.
#[allow(clippy::too_many_arguments)]
pub fn radial_average(
    image: &Array2<f64>,
    error_image: Option<&Array2<f64>>,
    mask: &Array2<u8>,
    geometry: &Geometry,
    bin_centers: &[f64],
    intensity_prop: ErrorPropagation,
    abscissa_prop: ErrorPropagation,
    kind: AbscissaKind,
) -> Result<Curve> {
    let (h, w) = check_shapes(image, error_image, mask)?;
    check_bin_centers(bin_centers)?;
    let edges = upper_edges(bin_centers);
    let n = bin_centers.len();

    let scan = |rows: Range<usize>| {
        scan_radial(
            image,
            error_image,
            mask,
            geometry,
            bin_centers,
            &edges,
            kind,
            intensity_prop,
            abscissa_prop,
            rows,
        )
    };

    let total = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let partials: Vec<BinPartial> = chunk_ranges(&(0..h)).into_par_iter().map(scan).collect();
        let mut total = BinPartial::new(n, intensity_prop, abscissa_prop);
        for p in &partials {
            total.merge(p);
        }
        total
    } else {
        scan(0..h)
    };

    let mut curve = Curve {
        abscissa: Vec::with_capacity(n),
        abscissa_sigma: Vec::with_capacity(n),
        intensity: Vec::with_capacity(n),
        intensity_sigma: Vec::with_capacity(n),
        area: Vec::with_capacity(n),
        tally: total.tally,
    };
    for bin in 0..n {
        let area = total.value[bin].count();
        if area == 0 {
            curve.abscissa.push(bin_centers[bin]);
            curve.abscissa_sigma.push(f64::NAN);
            curve.intensity.push(f64::NAN);
            curve.intensity_sigma.push(f64::NAN);
        } else {
            let (x, x_sigma) = total.position[bin].finish();
            let (value, sigma) = total.value[bin].finish();
            curve.abscissa.push(x);
            curve.abscissa_sigma.push(x_sigma);
            curve.intensity.push(value);
            curve.intensity_sigma.push(sigma);
        }
        curve.area.push(area);
    }
    Ok(curve)
}

/// Quick unweighted radial average over `bin_count` equal pixel-radius bins
/// spanning `[radius_min, radius_max]`.
///
/// The lightweight kernel the beam-center search drives in its inner loop: no
/// error propagation, no geometry beyond the trial center. Returns the mean
/// pixel radius, mean intensity and pixel count per bin; empty bins carry NaN
/// for both means.
pub fn fast_radial_average(
    image: &Array2<f64>,
    mask: &Array2<u8>,
    beam_row: f64,
    beam_col: f64,
    radius_min: f64,
    radius_max: f64,
    bin_count: usize,
) -> Result<(Vec<f64>, Vec<f64>, Vec<usize>)> {
    let (h, w) = check_shapes(image, None, mask)?;
    if bin_count == 0 || radius_max <= radius_min {
        return Err(KratkyError::EmptyBins);
    }
    let width = (radius_max - radius_min) / bin_count as f64;

    let mut radius_sum = vec![0.0f64; bin_count];
    let mut value_sum = vec![0.0f64; bin_count];
    let mut area = vec![0usize; bin_count];

    for row in 0..h {
        let dr = row as f64 - beam_row;
        for col in 0..w {
            if mask[[row, col]] == 0 {
                continue;
            }
            let value = image[[row, col]];
            if !value.is_finite() {
                continue;
            }
            let dc = col as f64 - beam_col;
            let rho = (dr * dr + dc * dc).sqrt();
            if rho < radius_min || rho > radius_max {
                continue;
            }
            let bin = (((rho - radius_min) / width) as usize).min(bin_count - 1);
            radius_sum[bin] += rho;
            value_sum[bin] += value;
            area[bin] += 1;
        }
    }

    let radius = radius_sum
        .iter()
        .zip(&area)
        .map(|(&s, &a)| if a > 0 { s / a as f64 } else { f64::NAN })
        .collect();
    let intensity = value_sum
        .iter()
        .zip(&area)
        .map(|(&s, &a)| if a > 0 { s / a as f64 } else { f64::NAN })
        .collect();
    Ok((radius, intensity, area))
}

struct AzimPartial {
    bins: BinPartial,
    q_sum: Vec<f64>,
    q_sum_sq: Vec<f64>,
}

impl AzimPartial {
    fn new(bins: usize, intensity_prop: ErrorPropagation, phi_prop: ErrorPropagation) -> Self {
        Self {
            bins: BinPartial::new(bins, intensity_prop, phi_prop),
            q_sum: vec![0.0; bins],
            q_sum_sq: vec![0.0; bins],
        }
    }

    fn merge(&mut self, other: &AzimPartial) {
        self.bins.merge(&other.bins);
        for (acc, o) in self.q_sum.iter_mut().zip(&other.q_sum) {
            *acc += o;
        }
        for (acc, o) in self.q_sum_sq.iter_mut().zip(&other.q_sum_sq) {
            *acc += o;
        }
    }
}

fn scan_azimuthal(
    image: &Array2<f64>,
    error_image: Option<&Array2<f64>>,
    mask: &Array2<u8>,
    geometry: &Geometry,
    bin_count: usize,
    intensity_prop: ErrorPropagation,
    phi_prop: ErrorPropagation,
    rows: Range<usize>,
) -> AzimPartial {
    let (_, w) = image.dim();
    let sector = TAU / bin_count as f64;
    let mut partial = AzimPartial::new(bin_count, intensity_prop, phi_prop);

    for row in rows {
        for col in 0..w {
            if mask[[row, col]] == 0 {
                partial.bins.tally.masked += 1;
                continue;
            }
            let value = image[[row, col]];
            if !value.is_finite() {
                partial.bins.tally.invalid_intensity += 1;
                continue;
            }
            let sigma = match error_image {
                Some(err) => err[[row, col]],
                None => 1.0,
            };
            if !sigma.is_finite() {
                partial.bins.tally.invalid_error += 1;
                continue;
            }
            let (phi, phi_sigma) = geometry.pixel_azimuth(row, col);
            let bin = ((phi / sector) as usize).min(bin_count - 1);
            let (rho, rho_sigma) = geometry.pixel_radius(row, col);
            let (q, _) = abscissa(rho, rho_sigma, geometry, AbscissaKind::MomentumTransfer);
            partial.bins.value[bin].add(value, sigma);
            partial.bins.position[bin].add(phi, phi_sigma);
            partial.q_sum[bin] += q;
            partial.q_sum_sq[bin] += q * q;
            partial.bins.tally.binned += 1;
        }
    }
    partial
}

/// Bin every valid pixel by azimuth around the beam center into `bin_count`
/// equal sectors of `[0, 2π)`.
///
/// Intensity and azimuth statistics follow the same error-propagation
/// policies as [`radial_average`]; the azimuth always lands in a sector, so
/// the under-/overflow tallies stay zero. Each sector also reports the plain
/// mean and spread of its pixels' momentum transfer.
#[allow(clippy::too_many_arguments)]
pub fn azimuthal_average(
    image: &Array2<f64>,
    error_image: Option<&Array2<f64>>,
    mask: &Array2<u8>,
    geometry: &Geometry,
    bin_count: usize,
    intensity_prop: ErrorPropagation,
    phi_prop: ErrorPropagation,
) -> Result<AzimuthalCurve> {
    let (h, w) = check_shapes(image, error_image, mask)?;
    if bin_count == 0 {
        return Err(KratkyError::EmptyBins);
    }

    let scan = |rows: Range<usize>| {
        scan_azimuthal(
            image,
            error_image,
            mask,
            geometry,
            bin_count,
            intensity_prop,
            phi_prop,
            rows,
        )
    };

    let total = if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let partials: Vec<AzimPartial> = chunk_ranges(&(0..h)).into_par_iter().map(scan).collect();
        let mut total = AzimPartial::new(bin_count, intensity_prop, phi_prop);
        for p in &partials {
            total.merge(p);
        }
        total
    } else {
        scan(0..h)
    };

    let sector = TAU / bin_count as f64;
    let mut curve = AzimuthalCurve {
        phi: Vec::with_capacity(bin_count),
        phi_sigma: Vec::with_capacity(bin_count),
        intensity: Vec::with_capacity(bin_count),
        intensity_sigma: Vec::with_capacity(bin_count),
        area: Vec::with_capacity(bin_count),
        q_mean: Vec::with_capacity(bin_count),
        q_sigma: Vec::with_capacity(bin_count),
        tally: total.bins.tally,
    };
    for bin in 0..bin_count {
        let area = total.bins.value[bin].count();
        if area == 0 {
            curve.phi.push((bin as f64 + 0.5) * sector);
            curve.phi_sigma.push(f64::NAN);
            curve.intensity.push(f64::NAN);
            curve.intensity_sigma.push(f64::NAN);
            curve.q_mean.push(f64::NAN);
            curve.q_sigma.push(f64::NAN);
        } else {
            let (phi, phi_sigma) = total.bins.position[bin].finish();
            let (value, sigma) = total.bins.value[bin].finish();
            let n = area as f64;
            let q_mean = total.q_sum[bin] / n;
            let q_var = (total.q_sum_sq[bin] / n - q_mean * q_mean).max(0.0);
            curve.phi.push(phi);
            curve.phi_sigma.push(phi_sigma);
            curve.intensity.push(value);
            curve.intensity_sigma.push(sigma);
            curve.q_mean.push(q_mean);
            curve.q_sigma.push(q_var.sqrt());
        }
        curve.area.push(area);
    }
    Ok(curve)
}
