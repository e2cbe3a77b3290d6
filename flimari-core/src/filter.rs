//! Spatial median filtering of phasor coordinates.

use crate::error::{Error, Result};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayViewMut2, Axis, Zip};
use rayon::prelude::*;

/// Smallest window that actually filters.
pub const MIN_KERNEL_SIZE: usize = 3;

/// Median-filter `real` and `imag` independently, plane by plane.
///
/// The window is `size × size`, clipped at the image border. NaN values are
/// ignored, NaN pixels stay NaN, and pixels whose intensity in `mean` is not
/// positive neither contribute to nor are changed by the filter. The filter
/// is applied `repeat` times; `size < 3` or `repeat == 0` returns the inputs
/// unchanged. `mean` is passed through untouched.
///
/// # Errors
/// Returns [`Error::ShapeMismatch`] if `real`/`imag` differ in shape or their
/// spatial extent differs from `mean`.
pub fn phasor_filter_median(
    mean: &Array2<f64>,
    real: &Array3<f64>,
    imag: &Array3<f64>,
    repeat: usize,
    size: usize,
) -> Result<(Array2<f64>, Array3<f64>, Array3<f64>)> {
    if real.shape() != imag.shape() {
        return Err(Error::ShapeMismatch {
            expected: real.shape().to_vec(),
            found: imag.shape().to_vec(),
        });
    }
    if real.shape()[1..] != *mean.shape() {
        return Err(Error::ShapeMismatch {
            expected: mean.shape().to_vec(),
            found: real.shape()[1..].to_vec(),
        });
    }

    let mut out_real = real.clone();
    let mut out_imag = imag.clone();
    if size < MIN_KERNEL_SIZE || repeat == 0 {
        return Ok((mean.clone(), out_real, out_imag));
    }

    let filter_plane = |mut plane: ArrayViewMut2<'_, f64>| {
        for _ in 0..repeat {
            let filtered = median_filter_2d(plane.view(), mean.view(), size);
            plane.assign(&filtered);
        }
    };
    out_real
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(filter_plane);
    out_imag
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .for_each(filter_plane);

    Ok((mean.clone(), out_real, out_imag))
}

fn median_filter_2d(src: ArrayView2<'_, f64>, weight: ArrayView2<'_, f64>, size: usize) -> Array2<f64> {
    let (ny, nx) = src.dim();
    let lo = size / 2;
    let hi = size - 1 - lo;
    let is_active = |w: f64| w.is_finite() && w > 0.0;

    let mut out = src.to_owned();
    Zip::indexed(&mut out).par_for_each(|(y, x), value| {
        if value.is_nan() || !is_active(weight[[y, x]]) {
            return;
        }
        let rows = y.saturating_sub(lo)..(y + hi + 1).min(ny);
        let cols = x.saturating_sub(lo)..(x + hi + 1).min(nx);
        let window = src.slice(s![rows.clone(), cols.clone()]);
        let window_w = weight.slice(s![rows, cols]);

        let mut neighbours: Vec<f64> = window
            .iter()
            .zip(window_w.iter())
            .filter(|&(v, &w)| !v.is_nan() && is_active(w))
            .map(|(&v, _)| v)
            .collect();
        if let Some(m) = median(&mut neighbours) {
            *value = m;
        }
    });
    out
}

/// Median of `values`, averaging the two middle elements for even counts.
/// Reorders `values`. Returns `None` for an empty slice.
#[must_use]
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(0.5 * (values[mid - 1] + values[mid]))
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2, Array3};

    #[test]
    fn test_median_helper() {
        assert_eq!(median(&mut []), None);
        assert_relative_eq!(median(&mut [3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_relative_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]).unwrap(), 2.5);
    }

    #[test]
    fn test_removes_outlier() {
        let mean = Array2::<f64>::ones((3, 3));
        let mut real = Array3::<f64>::from_elem((1, 3, 3), 0.5);
        real[[0, 1, 1]] = 10.0;
        let imag = real.clone();

        let (m, g, s) = phasor_filter_median(&mean, &real, &imag, 1, 3).unwrap();
        assert_eq!(m, mean);
        assert_relative_eq!(g[[0, 1, 1]], 0.5);
        assert_relative_eq!(s[[0, 1, 1]], 0.5);
    }

    #[test]
    fn test_small_kernel_is_noop() {
        let mean = Array2::<f64>::ones((2, 2));
        let real = Array3::from_shape_vec((1, 2, 2), vec![0.1, 0.9, 0.4, 0.2]).unwrap();
        let (_, g, _) = phasor_filter_median(&mean, &real, &real, 5, 2).unwrap();
        assert_eq!(g, real);
        let (_, g, _) = phasor_filter_median(&mean, &real, &real, 0, 3).unwrap();
        assert_eq!(g, real);
    }

    #[test]
    fn test_nan_and_dark_pixels_untouched() {
        let mean = array![[1.0, 1.0, 1.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0]];
        let mut real = Array3::<f64>::from_elem((1, 3, 3), 0.2);
        real[[0, 1, 1]] = 0.9; // dark centre
        real[[0, 0, 0]] = f64::NAN;
        let (_, g, _) = phasor_filter_median(&mean, &real, &real, 2, 3).unwrap();
        assert!(g[[0, 0, 0]].is_nan());
        assert_relative_eq!(g[[0, 1, 1]], 0.9);
        assert_relative_eq!(g[[0, 2, 2]], 0.2);
    }

    #[test]
    fn test_shape_mismatch() {
        let mean = Array2::<f64>::ones((2, 3));
        let real = Array3::<f64>::zeros((1, 3, 2));
        assert!(phasor_filter_median(&mean, &real, &real, 1, 3).is_err());
    }
}
