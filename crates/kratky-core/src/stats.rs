//! Pixel statistics over a masked image region, in support of beam-center
//! estimation.

use ndarray::Array2;
use rayon::prelude::*;

use std::ops::Range;

use crate::consts::{PARALLEL_PIXEL_THRESHOLD, ROW_CHUNK};
use crate::error::{KratkyError, Result};

/// Intensity-weighted first and second moments of a masked image region.
///
/// `count` is the number of contributing pixels; when it is zero the centroid
/// and spread fields are NaN and `sum` is zero. Callers must check `count`
/// before trusting the rest — a zero-count result is a defined outcome, not
/// an error.
#[derive(Clone, Copy, Debug)]
pub struct BeamWeights {
    pub sum: f64,
    pub max: f64,
    pub centroid_row: f64,
    pub centroid_col: f64,
    pub sigma_row: f64,
    pub sigma_col: f64,
    pub count: usize,
}

#[derive(Clone, Copy)]
struct Moments {
    sum: f64,
    max: f64,
    row: f64,
    row_sq: f64,
    col: f64,
    col_sq: f64,
    count: usize,
}

impl Moments {
    fn new() -> Self {
        Self {
            sum: 0.0,
            max: f64::NEG_INFINITY,
            row: 0.0,
            row_sq: 0.0,
            col: 0.0,
            col_sq: 0.0,
            count: 0,
        }
    }

    fn add(&mut self, row: usize, col: usize, value: f64) {
        let r = row as f64;
        let c = col as f64;
        self.sum += value;
        self.max = self.max.max(value);
        self.row += r * value;
        self.row_sq += r * r * value;
        self.col += c * value;
        self.col_sq += c * c * value;
        self.count += 1;
    }

    fn merge(&mut self, other: &Moments) {
        self.sum += other.sum;
        self.max = self.max.max(other.max);
        self.row += other.row;
        self.row_sq += other.row_sq;
        self.col += other.col;
        self.col_sq += other.col_sq;
        self.count += other.count;
    }
}

fn scan_moments(
    image: &Array2<f64>,
    mask: &Array2<u8>,
    rows: Range<usize>,
    cols: &Range<usize>,
) -> Moments {
    let mut m = Moments::new();
    for row in rows {
        for col in cols.clone() {
            if mask[[row, col]] == 0 {
                continue;
            }
            let value = image[[row, col]];
            if value.is_finite() && value > 0.0 {
                m.add(row, col, value);
            }
        }
    }
    m
}

/// Compute the intensity-weighted centroid and spread of the valid region.
///
/// A pixel contributes iff its mask value is nonzero, its intensity is finite
/// and its intensity is strictly positive. `row_range`/`col_range` restrict
/// the scan (half-open, clipped to the image); `None` scans everything.
pub fn beam_weights(
    image: &Array2<f64>,
    mask: &Array2<u8>,
    row_range: Option<Range<usize>>,
    col_range: Option<Range<usize>>,
) -> Result<BeamWeights> {
    let (h, w) = image.dim();
    if mask.dim() != (h, w) {
        return Err(KratkyError::ShapeMismatch {
            expected: (h, w),
            actual: mask.dim(),
        });
    }

    let rows = clip(row_range, h);
    let cols = clip(col_range, w);

    let pixels = rows.len() * cols.len();
    let m = if pixels >= PARALLEL_PIXEL_THRESHOLD {
        let partials: Vec<Moments> = chunk_ranges(&rows)
            .into_par_iter()
            .map(|chunk| scan_moments(image, mask, chunk, &cols))
            .collect();
        let mut total = Moments::new();
        for p in &partials {
            total.merge(p);
        }
        total
    } else {
        scan_moments(image, mask, rows, &cols)
    };

    if m.count == 0 {
        return Ok(BeamWeights {
            sum: 0.0,
            max: f64::NAN,
            centroid_row: f64::NAN,
            centroid_col: f64::NAN,
            sigma_row: f64::NAN,
            sigma_col: f64::NAN,
            count: 0,
        });
    }

    let mean_row = m.row / m.sum;
    let mean_col = m.col / m.sum;
    Ok(BeamWeights {
        sum: m.sum,
        max: m.max,
        centroid_row: mean_row,
        centroid_col: mean_col,
        sigma_row: (m.row_sq / m.sum - mean_row * mean_row).max(0.0).sqrt(),
        sigma_col: (m.col_sq / m.sum - mean_col * mean_col).max(0.0).sqrt(),
        count: m.count,
    })
}

/// Sum of `radius² * intensity` over valid pixels whose squared distance from
/// the given center lies in `[radius_min², radius_max²]`.
///
/// Used as a focus metric by the beam-center search. An empty annulus sums to
/// zero.
pub fn moment_of_inertia(
    image: &Array2<f64>,
    mask: &Array2<u8>,
    beam_row: f64,
    beam_col: f64,
    radius_min: f64,
    radius_max: f64,
) -> Result<f64> {
    let (h, w) = image.dim();
    if mask.dim() != (h, w) {
        return Err(KratkyError::ShapeMismatch {
            expected: (h, w),
            actual: mask.dim(),
        });
    }

    let min_sq = radius_min * radius_min;
    let max_sq = radius_max * radius_max;
    let scan = |rows: Range<usize>| -> f64 {
        let mut acc = 0.0f64;
        for row in rows {
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
                let d_sq = dr * dr + dc * dc;
                if d_sq >= min_sq && d_sq <= max_sq {
                    acc += d_sq * value;
                }
            }
        }
        acc
    };

    if h * w >= PARALLEL_PIXEL_THRESHOLD {
        let partials: Vec<f64> = chunk_ranges(&(0..h))
            .into_par_iter()
            .map(scan)
            .collect();
        Ok(partials.iter().sum())
    } else {
        Ok(scan(0..h))
    }
}

fn clip(range: Option<Range<usize>>, len: usize) -> Range<usize> {
    match range {
        Some(r) => r.start.min(len)..r.end.min(len),
        None => 0..len,
    }
}

/// Split a row range into fixed-size chunks; partials computed from these are
/// always merged in ascending order.
pub(crate) fn chunk_ranges(rows: &Range<usize>) -> Vec<Range<usize>> {
    (rows.start..rows.end)
        .step_by(ROW_CHUNK)
        .map(|start| start..(start + ROW_CHUNK).min(rows.end))
        .collect()
}
