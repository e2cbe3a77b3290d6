//! Phasor coordinates and the transforms that produce or correct them.
#![allow(clippy::cast_precision_loss, clippy::similar_names)]

use crate::error::{Error, Result};
use crate::lifetime::angular_frequency;
use ndarray::{s, Array1, Array2, Array3, ArrayView3, Axis, Zip};
use std::f64::consts::TAU;

/// Harmonics computed for every signal: fundamental and second.
pub const DEFAULT_HARMONICS: [usize; 2] = [1, 2];

/// Phasor coordinates of an image.
///
/// `mean` is `[Y, X]`; `real` and `imag` are `[H, Y, X]` where index 0 holds
/// the first entry of [`PhasorCoordinates::harmonics`]. Values are not
/// validated against the universal semicircle.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhasorCoordinates {
    pub mean: Array2<f64>,
    pub real: Array3<f64>,
    pub imag: Array3<f64>,
    pub harmonics: Vec<usize>,
}

impl PhasorCoordinates {
    /// Number of harmonic planes.
    #[must_use]
    pub fn num_harmonics(&self) -> usize {
        self.real.len_of(Axis(0))
    }

    /// Spatial shape `(Y, X)`.
    #[must_use]
    pub fn spatial_shape(&self) -> (usize, usize) {
        self.mean.dim()
    }
}

/// Compute phasor coordinates of `counts` (`[K, Y, X]`) along the sample axis.
///
/// `real_h = Σ x·cos(2πhk/K) / Σ x` and `imag_h = Σ x·sin(2πhk/K) / Σ x`;
/// pixels without photons yield NaN coordinates and zero mean.
///
/// # Errors
/// Returns [`Error::InvalidConfiguration`] for an empty sample axis, an empty
/// harmonic list or harmonic `0`.
pub fn phasor_from_signal(
    counts: ArrayView3<'_, u32>,
    harmonics: &[usize],
) -> Result<PhasorCoordinates> {
    let (samples, ny, nx) = counts.dim();
    if samples == 0 {
        return Err(Error::invalid_config("signal has no samples along H"));
    }
    if harmonics.is_empty() {
        return Err(Error::invalid_config("at least one harmonic is required"));
    }
    if harmonics.contains(&0) {
        return Err(Error::invalid_config("harmonics are 1-based"));
    }

    let tables: Vec<Vec<(f64, f64)>> = harmonics
        .iter()
        .map(|&h| {
            (0..samples)
                .map(|k| {
                    let angle = TAU * (h * k) as f64 / samples as f64;
                    (angle.cos(), angle.sin())
                })
                .collect()
        })
        .collect();

    let mut mean = Array2::<f64>::zeros((ny, nx));
    let mut real = Array3::<f64>::zeros((harmonics.len(), ny, nx));
    let mut imag = Array3::<f64>::zeros((harmonics.len(), ny, nx));

    for y in 0..ny {
        for x in 0..nx {
            let lane = counts.slice(s![.., y, x]);
            let dc: f64 = lane.iter().map(|&c| f64::from(c)).sum();
            mean[[y, x]] = dc / samples as f64;
            for (hi, table) in tables.iter().enumerate() {
                let (mut re, mut im) = (0.0, 0.0);
                for (&c, &(cos, sin)) in lane.iter().zip(table) {
                    let c = f64::from(c);
                    re += c * cos;
                    im += c * sin;
                }
                // 0/0 leaves empty pixels as NaN
                real[[hi, y, x]] = re / dc;
                imag[[hi, y, x]] = im / dc;
            }
        }
    }

    Ok(PhasorCoordinates {
        mean,
        real,
        imag,
        harmonics: harmonics.to_vec(),
    })
}

/// Rotate each harmonic plane by `phase[h]` radians and scale it by
/// `modulation[h]`.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if the inputs disagree in shape or the
/// per-harmonic slices do not match the number of planes.
pub fn phasor_transform(
    real: &Array3<f64>,
    imag: &Array3<f64>,
    phase: &[f64],
    modulation: &[f64],
) -> Result<(Array3<f64>, Array3<f64>)> {
    check_same_shape(real, imag)?;
    let planes = real.len_of(Axis(0));
    for len in [phase.len(), modulation.len()] {
        if len != planes {
            return Err(Error::ShapeMismatch {
                expected: vec![planes],
                found: vec![len],
            });
        }
    }

    let mut out_real = real.clone();
    let mut out_imag = imag.clone();
    for (h, (mut re_plane, mut im_plane)) in out_real
        .axis_iter_mut(Axis(0))
        .zip(out_imag.axis_iter_mut(Axis(0)))
        .enumerate()
    {
        let g_trans = modulation[h] * phase[h].cos();
        let s_trans = modulation[h] * phase[h].sin();
        Zip::from(&mut re_plane)
            .and(&mut im_plane)
            .for_each(|g, s| {
                let g_cal = *g * g_trans - *s * s_trans;
                let s_cal = *g * s_trans + *s * g_trans;
                *g = g_cal;
                *s = s_cal;
            });
    }
    Ok((out_real, out_imag))
}

/// Complex division `(real + i·imag) / (ref_real + i·ref_imag)`, element-wise.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] unless all four arrays share one shape.
pub fn phasor_divide(
    real: &Array3<f64>,
    imag: &Array3<f64>,
    ref_real: &Array3<f64>,
    ref_imag: &Array3<f64>,
) -> Result<(Array3<f64>, Array3<f64>)> {
    check_same_shape(real, imag)?;
    check_same_shape(real, ref_real)?;
    check_same_shape(real, ref_imag)?;

    let mut out_real = Array3::<f64>::zeros(real.raw_dim());
    let mut out_imag = Array3::<f64>::zeros(real.raw_dim());
    Zip::from(&mut out_real)
        .and(&mut out_imag)
        .and(real)
        .and(imag)
        .and(ref_real)
        .and(ref_imag)
        .for_each(|g, s, &re, &im, &rr, &ri| {
            let denom = rr * rr + ri * ri;
            *g = (re * rr + im * ri) / denom;
            *s = (im * rr - re * ri) / denom;
        });
    Ok((out_real, out_imag))
}

/// Intensity-weighted centre of the phasor cloud, one point per harmonic.
///
/// Only pixels whose mean, real and imag are all finite contribute. A
/// harmonic with no contributing intensity has a NaN centre.
#[must_use]
pub fn phasor_center(
    mean: &Array2<f64>,
    real: &Array3<f64>,
    imag: &Array3<f64>,
) -> (Array1<f64>, Array1<f64>) {
    let planes = real.len_of(Axis(0));
    let mut center_real = Array1::<f64>::from_elem(planes, f64::NAN);
    let mut center_imag = Array1::<f64>::from_elem(planes, f64::NAN);

    for h in 0..planes {
        let (mut sum_w, mut sum_g, mut sum_s) = (0.0, 0.0, 0.0);
        Zip::from(mean)
            .and(real.index_axis(Axis(0), h))
            .and(imag.index_axis(Axis(0), h))
            .for_each(|&w, &g, &s| {
                if w.is_finite() && g.is_finite() && s.is_finite() {
                    sum_w += w;
                    sum_g += w * g;
                    sum_s += w * s;
                }
            });
        if sum_w > 0.0 {
            center_real[h] = sum_g / sum_w;
            center_imag[h] = sum_s / sum_w;
        }
    }
    (center_real, center_imag)
}

/// Phasor of a single-exponential decay with `lifetime` (ns) at `harmonic`
/// of `frequency` (MHz).
#[must_use]
pub fn phasor_from_lifetime(frequency: f64, lifetime: f64, harmonic: usize) -> (f64, f64) {
    let wt = angular_frequency(frequency) * harmonic as f64 * lifetime;
    let g = 1.0 / (1.0 + wt * wt);
    (g, wt * g)
}

/// Phase offset and modulation factor separating a `known` phasor from the
/// `measured` one: `phase = φ_measured - φ_known`, `modulation = M_measured / M_known`.
///
/// Rotating by `-phase` and scaling by `1/modulation` maps measured onto known.
#[must_use]
pub fn polar_from_reference_phasor(
    measured_real: f64,
    measured_imag: f64,
    known_real: f64,
    known_imag: f64,
) -> (f64, f64) {
    let phase = measured_imag.atan2(measured_real) - known_imag.atan2(known_real);
    let modulation = measured_real.hypot(measured_imag) / known_real.hypot(known_imag);
    (phase, modulation)
}

fn check_same_shape(a: &Array3<f64>, b: &Array3<f64>) -> Result<()> {
    if a.shape() == b.shape() {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            expected: a.shape().to_vec(),
            found: b.shape().to_vec(),
        })
    }
}
