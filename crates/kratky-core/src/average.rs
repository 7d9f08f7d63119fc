//! Error-propagation policies and multi-exposure averaging.
//!
//! Four ways of combining measured values y_i with uncertainties e_i:
//!
//!  1) Weighted (inverse variance):
//!       y = Σ(y_i/e_i²) / Σ(1/e_i²),  e = 1/sqrt(Σ(1/e_i²))
//!  2) Average (linear):
//!       y = mean(y_i),  e = mean(e_i)
//!  3) Gaussian (quadrature):
//!       y = mean(y_i),  e = sqrt(Σe_i²)/N
//!  4) Conservative:
//!       y = mean(y_i),  e = the larger of the Gaussian propagation and the
//!       empirical standard error of the mean.
//!
//! The same policies drive the per-bin statistics of the radial and azimuthal
//! averages and the elementwise [`ImageAverager`] used to combine repeated
//! exposures.

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{KratkyError, Result};

/// Policy for combining a set of values with individual uncertainties.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPropagation {
    /// Inverse-variance weighted mean.
    Weighted,
    /// Plain mean of the values, plain mean of the errors.
    Average,
    /// Plain mean of the values, quadrature-combined errors.
    Gaussian,
    /// Plain mean of the values; error is the larger of the quadrature
    /// combination and the empirical standard error of the mean.
    Conservative,
}

/// Running combination of scalar observations under one policy.
///
/// `merge` is the chunk-combination step of the parallel pixel scans; it adds
/// the same partial sums the sequential path accumulates pixel by pixel, so a
/// fixed merge order keeps results deterministic.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Accumulator {
    mode: ErrorPropagation,
    sum: f64,
    sum_sq: f64,
    err: f64,
    count: usize,
}

impl Accumulator {
    pub(crate) fn new(mode: ErrorPropagation) -> Self {
        Self {
            mode,
            sum: 0.0,
            sum_sq: 0.0,
            err: 0.0,
            count: 0,
        }
    }

    pub(crate) fn add(&mut self, value: f64, sigma: f64) {
        match self.mode {
            ErrorPropagation::Weighted => {
                // non-positive sigmas get unit weight instead of being excluded
                let s = if sigma > 0.0 { sigma } else { 1.0 };
                let weight = 1.0 / (s * s);
                self.sum += value * weight;
                self.err += weight;
            }
            ErrorPropagation::Average => {
                self.sum += value;
                self.err += sigma;
            }
            ErrorPropagation::Gaussian => {
                self.sum += value;
                self.err += sigma * sigma;
            }
            ErrorPropagation::Conservative => {
                self.sum += value;
                self.sum_sq += value * value;
                self.err += sigma * sigma;
            }
        }
        self.count += 1;
    }

    pub(crate) fn merge(&mut self, other: &Accumulator) {
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.err += other.err;
        self.count += other.count;
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Combined value and uncertainty; `(NaN, NaN)` with no observations.
    pub(crate) fn finish(&self) -> (f64, f64) {
        if self.count == 0 {
            return (f64::NAN, f64::NAN);
        }
        let n = self.count as f64;
        match self.mode {
            ErrorPropagation::Weighted => (self.sum / self.err, (1.0 / self.err).sqrt()),
            ErrorPropagation::Average => (self.sum / n, self.err / n),
            ErrorPropagation::Gaussian => (self.sum / n, self.err.sqrt() / n),
            ErrorPropagation::Conservative => {
                let mean = self.sum / n;
                let std_error = if self.count > 1 {
                    ((self.sum_sq - self.sum * self.sum / n) / (n - 1.0))
                        .max(0.0)
                        .sqrt()
                        / n.sqrt()
                } else {
                    0.0
                };
                let propagated = self.err.sqrt() / n;
                (mean, std_error.max(propagated))
            }
        }
    }
}

/// Elementwise averager for repeated exposures of the same sample.
///
/// Feed intensity/uncertainty matrix pairs with `add`, read the combined pair
/// back with `finish`. Uncertainty matrices are sanitized on the way in:
/// non-finite or non-positive entries are replaced by the smallest positive
/// entry of the same matrix (all-bad matrices degrade to all ones).
#[derive(Clone, Debug)]
pub struct ImageAverager {
    mode: ErrorPropagation,
    sum: Option<Array2<f64>>,
    sum_sq: Option<Array2<f64>>,
    err: Option<Array2<f64>>,
    count: usize,
}

impl ImageAverager {
    pub fn new(mode: ErrorPropagation) -> Self {
        Self {
            mode,
            sum: None,
            sum_sq: None,
            err: None,
            count: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn add(&mut self, intensity: &Array2<f64>, sigma: &Array2<f64>) -> Result<()> {
        if sigma.dim() != intensity.dim() {
            return Err(KratkyError::ShapeMismatch {
                expected: intensity.dim(),
                actual: sigma.dim(),
            });
        }
        if let Some(sum) = &self.sum {
            if intensity.dim() != sum.dim() {
                return Err(KratkyError::ShapeMismatch {
                    expected: sum.dim(),
                    actual: intensity.dim(),
                });
            }
        }

        let sanitized;
        let sigma = if sigma.iter().all(|s| s.is_finite() && *s > 0.0) {
            sigma
        } else {
            sanitized = sanitize_sigmas(sigma);
            &sanitized
        };

        match self.mode {
            ErrorPropagation::Weighted => {
                let weight = sigma.mapv(|s| 1.0 / (s * s));
                accumulate(&mut self.sum, &(intensity * &weight));
                accumulate(&mut self.err, &weight);
            }
            ErrorPropagation::Average => {
                accumulate(&mut self.sum, intensity);
                accumulate(&mut self.err, sigma);
            }
            ErrorPropagation::Gaussian => {
                accumulate(&mut self.sum, intensity);
                accumulate(&mut self.err, &(sigma * sigma));
            }
            ErrorPropagation::Conservative => {
                accumulate(&mut self.sum, intensity);
                accumulate(&mut self.sum_sq, &(intensity * intensity));
                accumulate(&mut self.err, &(sigma * sigma));
            }
        }
        self.count += 1;
        Ok(())
    }

    /// Combined intensity and uncertainty matrices.
    pub fn finish(self) -> Result<(Array2<f64>, Array2<f64>)> {
        let n = self.count as f64;
        let (sum, err) = match (self.sum, self.err) {
            (Some(sum), Some(err)) => (sum, err),
            _ => return Err(KratkyError::EmptySequence),
        };
        match self.mode {
            ErrorPropagation::Weighted => {
                let value = &sum / &err;
                let sigma = err.mapv(|e| (1.0 / e).sqrt());
                Ok((value, sigma))
            }
            ErrorPropagation::Average => Ok((sum / n, err / n)),
            ErrorPropagation::Gaussian => Ok((sum / n, err.mapv(|e| e.sqrt() / n))),
            ErrorPropagation::Conservative => {
                let sum_sq = self.sum_sq.unwrap_or_else(|| Array2::zeros(sum.dim()));
                let sigma = Zip::from(&sum)
                    .and(&sum_sq)
                    .and(&err)
                    .map_collect(|&s, &s2, &e| {
                        let std_error = if self.count > 1 {
                            ((s2 - s * s / n) / (n - 1.0)).max(0.0).sqrt() / n.sqrt()
                        } else {
                            0.0
                        };
                        (e.sqrt() / n).max(std_error)
                    });
                Ok((sum / n, sigma))
            }
        }
    }
}

fn accumulate(slot: &mut Option<Array2<f64>>, term: &Array2<f64>) {
    match slot {
        Some(acc) => *acc += term,
        None => *slot = Some(term.clone()),
    }
}

/// Replace non-finite and non-positive sigmas with the smallest positive one.
fn sanitize_sigmas(sigma: &Array2<f64>) -> Array2<f64> {
    let smallest = sigma
        .iter()
        .filter(|s| s.is_finite() && **s > 0.0)
        .fold(f64::INFINITY, |acc, &s| acc.min(s));
    if smallest.is_infinite() {
        return Array2::ones(sigma.dim());
    }
    sigma.mapv(|s| if s.is_finite() && s > 0.0 { s } else { smallest })
}
