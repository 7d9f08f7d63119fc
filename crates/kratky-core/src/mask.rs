//! Geometric mask editing.
//!
//! Masks are `u8` matrices with the same shape as the image: nonzero marks a
//! valid pixel, zero an excluded one. The editing operations mutate the mask
//! in place and clip out-of-bounds shapes to the image without error;
//! [`annulus_mask`] and [`sector_mask`] instead derive a narrowed copy,
//! leaving the input untouched. None of these synchronize internally — the
//! caller serializes edits against concurrent reads.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use std::f64::consts::{PI, TAU};

/// How a geometric selection combines with the existing mask values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskingMode {
    /// Selected pixels become invalid.
    Mask,
    /// Selected pixels become valid.
    Unmask,
    /// Selected pixels toggle between valid and invalid.
    Flip,
}

fn apply(mask: &mut Array2<u8>, row: usize, col: usize, mode: MaskingMode) {
    let v = &mut mask[[row, col]];
    *v = match mode {
        MaskingMode::Mask => 0,
        MaskingMode::Unmask => 1,
        MaskingMode::Flip => u8::from(*v == 0),
    };
}

/// Apply `mode` to every pixel whose center lies within the closed disk of
/// `radius` around `(center_row, center_col)`.
///
/// Iteration is restricted to the disk's bounding box, expanded by one pixel
/// and clipped to the image; the inclusion test is the exact squared-distance
/// comparison, so the result matches a full scan. `radius <= 0` affects
/// nothing.
pub fn mask_circle(
    mask: &mut Array2<u8>,
    center_row: f64,
    center_col: f64,
    radius: f64,
    mode: MaskingMode,
) {
    if radius <= 0.0 {
        return;
    }
    let (h, w) = mask.dim();
    let r_sq = radius * radius;

    let row_lo = (center_row - radius - 1.0).floor().max(0.0);
    let row_hi = (center_row + radius + 1.0).ceil().min(h as f64 - 1.0);
    let col_lo = (center_col - radius - 1.0).floor().max(0.0);
    let col_hi = (center_col + radius + 1.0).ceil().min(w as f64 - 1.0);
    if row_lo > row_hi || col_lo > col_hi {
        return;
    }

    for row in row_lo as usize..=row_hi as usize {
        let dr = row as f64 - center_row;
        for col in col_lo as usize..=col_hi as usize {
            let dc = col as f64 - center_col;
            if dr * dr + dc * dc <= r_sq {
                apply(mask, row, col, mode);
            }
        }
    }
}

/// Apply `mode` to every pixel whose center lies inside the open rectangle.
///
/// Pixels are unit squares centered on integer coordinates, so the affected
/// index range along each axis is `floor(min + 0.5)..floor(max - 0.5)`,
/// clipped to the image. A degenerate rectangle (max - min <= 1) affects
/// nothing.
pub fn mask_rectangle(
    mask: &mut Array2<u8>,
    row_min: f64,
    col_min: f64,
    row_max: f64,
    col_max: f64,
    mode: MaskingMode,
) {
    let (h, w) = mask.dim();
    let row_lo = (row_min + 0.5).floor().max(0.0);
    let row_hi = (row_max - 0.5).floor().min(h as f64);
    let col_lo = (col_min + 0.5).floor().max(0.0);
    let col_hi = (col_max - 0.5).floor().min(w as f64);
    if row_lo >= row_hi || col_lo >= col_hi {
        return;
    }

    for row in row_lo as usize..row_hi as usize {
        for col in col_lo as usize..col_hi as usize {
            apply(mask, row, col, mode);
        }
    }
}

/// Apply `mode` to every pixel inside the polygon, by the even-odd rule.
///
/// `vertices` are `(col, row)` coordinate pairs describing an explicitly
/// closed polygon: the first vertex must be repeated as the last, no implicit
/// closing edge is assumed. For each candidate pixel a ray is cast to the
/// right along its row; an edge contributes a crossing iff its parametric
/// intersection satisfies `t in [0, 1)` and the intersection column is at or
/// right of the pixel. Horizontal edges never contribute. Fewer than three
/// vertices is a no-op.
pub fn mask_polygon(mask: &mut Array2<u8>, vertices: &[(f64, f64)], mode: MaskingMode) {
    if vertices.len() < 3 {
        return;
    }
    let (h, w) = mask.dim();

    let mut row_min = f64::INFINITY;
    let mut row_max = f64::NEG_INFINITY;
    let mut col_min = f64::INFINITY;
    let mut col_max = f64::NEG_INFINITY;
    for &(x, y) in vertices {
        row_min = row_min.min(y);
        row_max = row_max.max(y);
        col_min = col_min.min(x);
        col_max = col_max.max(x);
    }

    let row_lo = row_min.floor().max(0.0);
    let row_hi = row_max.ceil().min(h as f64 - 1.0);
    let col_lo = col_min.floor().max(0.0);
    let col_hi = col_max.ceil().min(w as f64 - 1.0);
    if row_lo > row_hi || col_lo > col_hi {
        return;
    }

    for row in row_lo as usize..=row_hi as usize {
        let y = row as f64;
        for col in col_lo as usize..=col_hi as usize {
            let x = col as f64;
            let mut crossings = 0usize;
            for edge in vertices.windows(2) {
                let (x0, y0) = edge[0];
                let (x1, y1) = edge[1];
                if y0 == y1 {
                    continue;
                }
                let t = (y - y0) / (y1 - y0);
                if !(0.0..1.0).contains(&t) {
                    continue;
                }
                if x0 + t * (x1 - x0) >= x {
                    crossings += 1;
                }
            }
            if crossings % 2 == 1 {
                apply(mask, row, col, mode);
            }
        }
    }
}

/// Derive a mask keeping only the valid pixels whose center distance from
/// `(center_row, center_col)` lies in the closed interval
/// `[radius_min, radius_max]` (pixel units). All other pixels come out zero;
/// pixels the input mask already excluded stay excluded.
pub fn annulus_mask(
    mask: &Array2<u8>,
    center_row: f64,
    center_col: f64,
    radius_min: f64,
    radius_max: f64,
) -> Array2<u8> {
    let (h, w) = mask.dim();
    let min_sq = radius_min * radius_min;
    let max_sq = radius_max * radius_max;
    let mut out = Array2::<u8>::zeros((h, w));
    for row in 0..h {
        let dr = row as f64 - center_row;
        for col in 0..w {
            let dc = col as f64 - center_col;
            let d_sq = dr * dr + dc * dc;
            if mask[[row, col]] != 0 && d_sq >= min_sq && d_sq <= max_sq {
                out[[row, col]] = 1;
            }
        }
    }
    out
}

/// Derive a mask keeping only the valid pixels whose azimuth around the beam
/// center lies within `phi_width / 2` of `phi_center` (radians, wrap-around
/// correct). With `symmetric` the opposite sector at `phi_center + π` is kept
/// as well.
pub fn sector_mask(
    mask: &Array2<u8>,
    center_row: f64,
    center_col: f64,
    phi_center: f64,
    phi_width: f64,
    symmetric: bool,
) -> Array2<u8> {
    let (h, w) = mask.dim();
    let half_width = phi_width * 0.5;
    let mut out = Array2::<u8>::zeros((h, w));
    for row in 0..h {
        let dr = row as f64 - center_row;
        for col in 0..w {
            if mask[[row, col]] == 0 {
                continue;
            }
            let dc = col as f64 - center_col;
            let phi = dr.atan2(dc);
            let mut delta = (phi - phi_center).rem_euclid(TAU);
            if delta > PI {
                delta -= TAU;
            }
            let in_sector = delta.abs() <= half_width
                || (symmetric && (PI - delta.abs()) <= half_width);
            if in_sector {
                out[[row, col]] = 1;
            }
        }
    }
    out
}
