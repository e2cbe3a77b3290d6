//! Lifetime estimates derived from phasor coordinates.
//!
//! Frequencies are in MHz and lifetimes in ns throughout, so the angular
//! frequency is `2π·f·10⁻³` rad/ns.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::error::{Error, Result};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use std::f64::consts::TAU;

/// Angular frequency in rad/ns for a repetition rate in MHz.
#[must_use]
pub fn angular_frequency(frequency: f64) -> f64 {
    TAU * frequency * 1e-3
}

/// Phase and modulation apparent lifetimes of a single phasor.
#[must_use]
pub fn apparent_lifetime(g: f64, s: f64, omega: f64) -> (f64, f64) {
    let phase = s / (g * omega);
    let mod_sq = g * g + s * s;
    // moduli above 1 give sqrt of a negative -> NaN
    let modulation = (1.0 / mod_sq - 1.0).sqrt() / omega;
    (phase, modulation)
}

/// Lifetime of the point on the universal semicircle closest to `(g, s)`,
/// taken along the ray from the semicircle's centre.
#[must_use]
pub fn normal_lifetime(g: f64, s: f64, omega: f64) -> f64 {
    if g.is_nan() || s.is_nan() {
        return f64::NAN;
    }
    let theta = s.atan2(g - 0.5);
    let t = 0.5 * (1.0 + theta.cos());
    if t <= 0.0 {
        return f64::INFINITY;
    }
    (1.0 / t - 1.0).sqrt() / omega
}

/// Phase and modulation apparent lifetime maps.
#[must_use]
pub fn phasor_to_apparent_lifetime(
    real: ArrayView2<'_, f64>,
    imag: ArrayView2<'_, f64>,
    frequency: f64,
) -> (Array2<f64>, Array2<f64>) {
    let omega = angular_frequency(frequency);
    let phase = Zip::from(&real)
        .and(&imag)
        .map_collect(|&g, &s| apparent_lifetime(g, s, omega).0);
    let modulation = Zip::from(&real)
        .and(&imag)
        .map_collect(|&g, &s| apparent_lifetime(g, s, omega).1);
    (phase, modulation)
}

/// Projected (normal) lifetime map.
#[must_use]
pub fn phasor_to_normal_lifetime(
    real: ArrayView2<'_, f64>,
    imag: ArrayView2<'_, f64>,
    frequency: f64,
) -> Array2<f64> {
    let omega = angular_frequency(frequency);
    Zip::from(&real)
        .and(&imag)
        .map_collect(|&g, &s| normal_lifetime(g, s, omega))
}

/// Largest number of candidates a [`LifetimeSearch`] may expand to.
pub const MAX_SEARCH_CANDIDATES: usize = 1_000_000;

/// Candidate grid for the two-component lifetime search (ns).
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LifetimeSearch {
    /// Smallest candidate lifetime.
    pub min: f64,
    /// Largest candidate lifetime.
    pub max: f64,
    /// Grid spacing.
    pub step: f64,
}

impl Default for LifetimeSearch {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 20.0,
            step: 0.01,
        }
    }
}

impl LifetimeSearch {
    /// Set the candidate range.
    #[must_use]
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Set the grid spacing.
    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Check that the grid is non-empty and finite.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfiguration`] for a negative minimum,
    /// `max < min`, a non-positive step, or a grid of more than
    /// [`MAX_SEARCH_CANDIDATES`] points.
    pub fn validate(&self) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite() && self.step.is_finite()) {
            return Err(Error::invalid_config("lifetime search bounds must be finite"));
        }
        if self.min < 0.0 || self.max < self.min {
            return Err(Error::invalid_config(format!(
                "invalid lifetime search range [{}, {}]",
                self.min, self.max
            )));
        }
        if self.step <= 0.0 {
            return Err(Error::invalid_config("lifetime search step must be positive"));
        }
        let points = ((self.max - self.min) / self.step).floor();
        if !points.is_finite() || points >= MAX_SEARCH_CANDIDATES as f64 {
            return Err(Error::invalid_config(format!(
                "lifetime search grid exceeds {MAX_SEARCH_CANDIDATES} candidates (step {})",
                self.step
            )));
        }
        Ok(())
    }

    /// Number of grid points. Only meaningful after [`Self::validate`].
    #[must_use]
    pub fn num_candidates(&self) -> usize {
        ((self.max - self.min) / self.step).floor() as usize + 1
    }

    fn candidates(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.num_candidates()).map(move |i| self.min + i as f64 * self.step)
    }
}

#[derive(Clone, Copy)]
struct Candidate {
    tau: f64,
    g1: f64,
    s1: f64,
    g2: f64,
    s2: f64,
}

fn single_exponential(omega: f64, tau: f64) -> (f64, f64) {
    let wt = omega * tau;
    let g = 1.0 / (1.0 + wt * wt);
    (g, wt * g)
}

/// Decompose each pixel into two single-exponential components.
///
/// Planes 0 and 1 of `real`/`imag` must hold the first and second harmonic.
/// For every candidate lifetime `τ₁` the line from its first-harmonic phasor
/// through the measured point is extended to the semicircle, giving `τ₂` and
/// the fraction of `τ₁`; the candidate whose mixture best reproduces the
/// measured second harmonic wins.
///
/// Returns `(lifetimes, fractions)`, both `[2, Y, X]`, with components
/// ordered by ascending lifetime. Pixels that are non-finite or lie outside
/// the semicircle are NaN.
///
/// # Errors
/// Returns [`Error::InvalidConfiguration`] if fewer than two harmonic planes
/// are supplied or `search` is invalid, and [`Error::ShapeMismatch`] if
/// `real` and `imag` differ in shape.
pub fn phasor_to_lifetime_search(
    real: &Array3<f64>,
    imag: &Array3<f64>,
    frequency: f64,
    search: &LifetimeSearch,
) -> Result<(Array3<f64>, Array3<f64>)> {
    if real.shape() != imag.shape() {
        return Err(Error::ShapeMismatch {
            expected: real.shape().to_vec(),
            found: imag.shape().to_vec(),
        });
    }
    if real.len_of(Axis(0)) < 2 {
        return Err(Error::invalid_config(
            "two-component lifetime search needs the first and second harmonic",
        ));
    }
    search.validate()?;

    let omega = angular_frequency(frequency);
    let grid: Vec<Candidate> = search
        .candidates()
        .map(|tau| {
            let (g1, s1) = single_exponential(omega, tau);
            let (g2, s2) = single_exponential(2.0 * omega, tau);
            Candidate { tau, g1, s1, g2, s2 }
        })
        .collect();

    let components = Zip::from(real.index_axis(Axis(0), 0))
        .and(imag.index_axis(Axis(0), 0))
        .and(real.index_axis(Axis(0), 1))
        .and(imag.index_axis(Axis(0), 1))
        .par_map_collect(|&g1, &s1, &g2, &s2| search_pixel([g1, s1], [g2, s2], omega, &grid));

    let (ny, nx) = components.dim();
    let mut lifetimes = Array3::<f64>::from_elem((2, ny, nx), f64::NAN);
    let mut fractions = Array3::<f64>::from_elem((2, ny, nx), f64::NAN);
    for ((y, x), c) in components.indexed_iter() {
        lifetimes[[0, y, x]] = c[0];
        lifetimes[[1, y, x]] = c[1];
        fractions[[0, y, x]] = c[2];
        fractions[[1, y, x]] = c[3];
    }
    Ok((lifetimes, fractions))
}

/// Returns `[tau_a, tau_b, frac_a, frac_b]` with `tau_a <= tau_b`.
fn search_pixel(first: [f64; 2], second: [f64; 2], omega: f64, grid: &[Candidate]) -> [f64; 4] {
    const NONE: [f64; 4] = [f64::NAN; 4];
    if first.iter().chain(&second).any(|v| !v.is_finite()) {
        return NONE;
    }
    let [pg, ps] = first;
    let mut best = NONE;
    let mut best_err = f64::INFINITY;

    for cand in grid {
        let (dg, ds) = (pg - cand.g1, ps - cand.s1);
        let dd = dg * dg + ds * ds;
        let (tau2, frac1, g2_pred, s2_pred) = if dd < 1e-18 {
            // measured point is this candidate's single exponential
            (cand.tau, 1.0, cand.g2, cand.s2)
        } else {
            // second intersection of the line A + t·d with the semicircle
            let t = -2.0 * ((cand.g1 - 0.5) * dg + cand.s1 * ds) / dd;
            if t < 1.0 - 1e-12 {
                continue;
            }
            let bg = cand.g1 + t * dg;
            let bs = cand.s1 + t * ds;
            if bs < -1e-12 || bg <= 0.0 {
                continue;
            }
            let tau2 = bs.max(0.0) / (bg * omega);
            let frac1 = ((t - 1.0) / t).clamp(0.0, 1.0);
            let (b2g, b2s) = single_exponential(2.0 * omega, tau2);
            (
                tau2,
                frac1,
                frac1 * cand.g2 + (1.0 - frac1) * b2g,
                frac1 * cand.s2 + (1.0 - frac1) * b2s,
            )
        };

        let err = (g2_pred - second[0]).powi(2) + (s2_pred - second[1]).powi(2);
        if err < best_err {
            best_err = err;
            best = if cand.tau <= tau2 {
                [cand.tau, tau2, frac1, 1.0 - frac1]
            } else {
                [tau2, cand.tau, 1.0 - frac1, frac1]
            };
        }
    }
    best
}
