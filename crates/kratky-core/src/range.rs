use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{KratkyError, Result};
use crate::geometry::Geometry;
use crate::transform::{abscissa, AbscissaKind};

/// Spacing of an automatically derived abscissa sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeSpacing {
    Linear,
    Log10,
}

/// Default number of abscissa points for an image of the given shape: half
/// the pixel diagonal, rounded up.
pub fn default_bin_count(rows: usize, cols: usize) -> usize {
    (((rows * rows + cols * cols) as f64).sqrt() / 2.0).ceil() as usize
}

/// Derive an abscissa bin-center sequence from the mask and geometry alone.
///
/// Scans every unmasked pixel, transforms its radius under `kind` (ignoring
/// uncertainty) and spans `[min, max]` of the result with `count` points
/// (default: [`default_bin_count`]). Log10 spacing with a non-positive
/// minimum falls back to linear spacing with a warning. A fully masked image
/// has no range to offer and errors.
pub fn auto_range(
    mask: &Array2<u8>,
    geometry: &Geometry,
    kind: AbscissaKind,
    spacing: RangeSpacing,
    count: Option<usize>,
) -> Result<Vec<f64>> {
    let (h, w) = mask.dim();
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for row in 0..h {
        for col in 0..w {
            if mask[[row, col]] == 0 {
                continue;
            }
            let (rho, _) = geometry.pixel_radius(row, col);
            let (value, _) = abscissa(rho, 0.0, geometry, kind);
            min = min.min(value);
            max = max.max(value);
        }
    }
    if !min.is_finite() || !max.is_finite() {
        return Err(KratkyError::EmptyRange);
    }

    let n = count.unwrap_or_else(|| default_bin_count(h, w));
    let spacing = match spacing {
        RangeSpacing::Log10 if min <= 0.0 => {
            warn!(min, "log-spaced range needs a positive minimum, using linear spacing");
            RangeSpacing::Linear
        }
        other => other,
    };
    Ok(spaced(min, max, n, spacing))
}

fn spaced(min: f64, max: f64, n: usize, spacing: RangeSpacing) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![min];
    }
    let step = 1.0 / (n - 1) as f64;
    match spacing {
        RangeSpacing::Linear => (0..n)
            .map(|i| min + (max - min) * (i as f64 * step))
            .collect(),
        RangeSpacing::Log10 => {
            let log_min = min.log10();
            let log_max = max.log10();
            (0..n)
                .map(|i| 10f64.powf(log_min + (log_max - log_min) * (i as f64 * step)))
                .collect()
        }
    }
}
