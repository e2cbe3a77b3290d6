//! One sample's phasor data, filter pipeline and lifetime estimates.
#![allow(clippy::cast_precision_loss)]

use crate::calibration::Calibration;
use crate::color::group_color;
use crate::metrics::{Metric, Stat};
use flimari_core::{
    load_signal, phasor_filter_median, phasor_from_signal, phasor_to_apparent_lifetime,
    phasor_to_lifetime_search, phasor_to_normal_lifetime, Error, LifetimeSearch,
    PhasorCoordinates, Result, Signal, SignalLoader, DEFAULT_HARMONICS, MIN_KERNEL_SIZE,
};
use ndarray::{Array2, Array3, ArrayView2, Axis, Zip};
use std::path::{Path, PathBuf};

/// Group assigned to new datasets.
pub const DEFAULT_GROUP: &str = "default";

/// Average lifetimes above this value are replaced by NaN.
///
/// Units follow the lifetime maps (ns, unverified against the instrument).
pub const AVG_LIFETIME_CLAMP: f64 = 10.0;

/// Photon-count thresholds and smoothing settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FilterParams {
    /// Pixels with fewer total counts are masked.
    pub min_count: u64,
    /// Pixels with more total counts are masked.
    pub max_count: u64,
    /// Median window size; below 3 disables smoothing.
    pub kernel_size: usize,
    /// Median passes; 0 disables smoothing.
    pub repetition: usize,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            min_count: 0,
            max_count: 10_000,
            kernel_size: 3,
            repetition: 0,
        }
    }
}

impl FilterParams {
    /// Set the lower photon-count threshold.
    #[must_use]
    pub fn with_min_count(mut self, min_count: u64) -> Self {
        self.min_count = min_count;
        self
    }

    /// Set the upper photon-count threshold.
    #[must_use]
    pub fn with_max_count(mut self, max_count: u64) -> Self {
        self.max_count = max_count;
        self
    }

    /// Set the median window size.
    #[must_use]
    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    /// Set the number of median passes.
    #[must_use]
    pub fn with_repetition(mut self, repetition: usize) -> Self {
        self.repetition = repetition;
        self
    }

    /// Whether the median step runs with these settings.
    #[must_use]
    pub fn smoothing_enabled(&self) -> bool {
        self.kernel_size >= MIN_KERNEL_SIZE && self.repetition >= 1
    }
}

/// Photon-count class of a pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhotonClass {
    Low,
    Kept,
    High,
}

/// Classify every pixel of `counts` against `[min_count, max_count]`.
#[must_use]
pub fn classify_counts(counts: &Array2<u64>, min_count: u64, max_count: u64) -> Array2<PhotonClass> {
    counts.mapv(|c| {
        if c < min_count {
            PhotonClass::Low
        } else if c > max_count {
            PhotonClass::High
        } else {
            PhotonClass::Kept
        }
    })
}

/// Lifetime maps derived from working phasor coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Lifetimes {
    /// Apparent phase lifetime, first harmonic.
    pub phase: Array2<f64>,
    /// Apparent modulation lifetime, first harmonic.
    pub modulation: Array2<f64>,
    /// Lifetime projected onto the universal semicircle, first harmonic.
    pub normal: Array2<f64>,
    /// Two-component lifetimes, `[2, Y, X]`.
    pub geo_lifetime: Array3<f64>,
    /// Two-component fractions, `[2, Y, X]`.
    pub geo_fraction: Array3<f64>,
    /// Fraction-weighted lifetime, clamped at [`AVG_LIFETIME_CLAMP`].
    pub average: Array2<f64>,
}

impl Lifetimes {
    /// Derive every lifetime map from `(g, s)` at `frequency` (MHz).
    ///
    /// # Errors
    /// Propagates failures of the two-component search (fewer than two
    /// harmonics, invalid search grid).
    pub fn compute(
        g: &Array3<f64>,
        s: &Array3<f64>,
        frequency: f64,
        search: &LifetimeSearch,
    ) -> Result<Self> {
        let g1 = g.index_axis(Axis(0), 0);
        let s1 = s.index_axis(Axis(0), 0);
        let (phase, modulation) = phasor_to_apparent_lifetime(g1, s1, frequency);
        let normal = phasor_to_normal_lifetime(g1, s1, frequency);
        let (geo_lifetime, geo_fraction) = phasor_to_lifetime_search(g, s, frequency, search)?;
        let average = average_lifetime(&geo_lifetime, &geo_fraction);
        Ok(Self {
            phase,
            modulation,
            normal,
            geo_lifetime,
            geo_fraction,
            average,
        })
    }
}

/// `Σᵢ lifetime[i]·fraction[i]`, with values above [`AVG_LIFETIME_CLAMP`]
/// replaced by NaN.
#[must_use]
pub fn average_lifetime(geo_lifetime: &Array3<f64>, geo_fraction: &Array3<f64>) -> Array2<f64> {
    let mut average = (geo_lifetime * geo_fraction).sum_axis(Axis(0));
    average.mapv_inplace(|v| if v > AVG_LIFETIME_CLAMP { f64::NAN } else { v });
    average
}

/// Mask-restricted headline arrays of a dataset.
///
/// All arrays are pixel-aligned (same length, row-major order); NaN values
/// are kept.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Summary {
    pub name: String,
    pub group: String,
    pub channel: usize,
    pub photon_count: Vec<u64>,
    pub phi_lifetime: Vec<f64>,
    pub m_lifetime: Vec<f64>,
    pub proj_lifetime: Vec<f64>,
    pub avg_lifetime: Vec<f64>,
}

impl Summary {
    /// Number of pixel rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.photon_count.len()
    }

    /// Whether the mask selected no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.photon_count.is_empty()
    }

    /// Column for a headline metric as floats; `None` for other metrics.
    #[must_use]
    pub fn values(&self, metric: Metric) -> Option<Vec<f64>> {
        match metric {
            Metric::PhotonCount => Some(self.photon_count.iter().map(|&c| c as f64).collect()),
            Metric::PhiLifetime => Some(self.phi_lifetime.clone()),
            Metric::MLifetime => Some(self.m_lifetime.clone()),
            Metric::ProjLifetime => Some(self.proj_lifetime.clone()),
            Metric::AvgLifetime => Some(self.avg_lifetime.clone()),
            _ => None,
        }
    }
}

/// Everything recomputed by one pass of the filter pipeline.
#[derive(Clone, Debug)]
struct Working {
    g: Array3<f64>,
    s: Array3<f64>,
    mask: Array2<bool>,
    counts_filtered: Array2<u64>,
    lifetimes: Lifetimes,
}

/// A loaded sample and everything derived from it.
///
/// Raw data (`counts`, raw phasor) is fixed at construction. Calibrated
/// coordinates are replaced by [`calibrate_phasor`](Self::calibrate_phasor);
/// working coordinates, mask and lifetimes are replaced together by every
/// pipeline run, and only once the run has succeeded.
#[derive(Clone, Debug)]
pub struct Dataset {
    path: PathBuf,
    name: String,
    channel: usize,
    counts: Array2<u64>,
    raw: PhasorCoordinates,
    frequency: f64,
    real_calibrated: Array3<f64>,
    imag_calibrated: Array3<f64>,
    working: Working,
    params: FilterParams,
    search: LifetimeSearch,
    group: String,
    color: String,
}

impl Dataset {
    /// Load channel `channel` of `path` with `loader`.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if `path` is not a file and
    /// [`Error::Load`] if the loader fails.
    pub fn open<L: SignalLoader + ?Sized>(
        path: impl AsRef<Path>,
        channel: usize,
        loader: &L,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let signal = load_signal(loader, path, channel)?;
        Self::from_signal(path, channel, &signal)
    }

    /// Build a dataset from an already-loaded signal.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfiguration`] for a signal without samples.
    pub fn from_signal(path: impl Into<PathBuf>, channel: usize, signal: &Signal) -> Result<Self> {
        Self::with_lifetime_search(path, channel, signal, LifetimeSearch::default())
    }

    /// Like [`from_signal`](Self::from_signal) with a custom lifetime search grid.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfiguration`] for a signal without samples or
    /// an invalid search grid.
    pub fn with_lifetime_search(
        path: impl Into<PathBuf>,
        channel: usize,
        signal: &Signal,
        search: LifetimeSearch,
    ) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let counts = signal.total_counts();
        let raw = phasor_from_signal(signal.counts.view(), &DEFAULT_HARMONICS)?;
        let frequency = signal.frequency();

        let real_calibrated = raw.real.clone();
        let imag_calibrated = raw.imag.clone();
        let lifetimes = Lifetimes::compute(&real_calibrated, &imag_calibrated, frequency, &search)?;
        let working = Working {
            g: real_calibrated.clone(),
            s: imag_calibrated.clone(),
            mask: Array2::from_elem(counts.raw_dim(), true),
            counts_filtered: counts.clone(),
            lifetimes,
        };

        log::debug!(
            "loaded dataset {name} channel {channel}: {:?} pixels at {frequency} MHz",
            counts.dim()
        );
        Ok(Self {
            path,
            name,
            channel,
            counts,
            raw,
            frequency,
            real_calibrated,
            imag_calibrated,
            working,
            params: FilterParams::default(),
            search,
            group: DEFAULT_GROUP.to_string(),
            color: group_color(DEFAULT_GROUP),
        })
    }

    /// Correct the raw phasor with `calibration` and re-run the pipeline.
    ///
    /// A positive calibration frequency replaces the dataset frequency.
    ///
    /// # Errors
    /// Propagates the calibration's correction error; the dataset is left
    /// unchanged on failure.
    pub fn calibrate_phasor(&mut self, calibration: &Calibration) -> Result<()> {
        let (real, imag) = calibration.compute_calibrated_phasor(&self.raw.real, &self.raw.imag)?;
        let frequency = if calibration.frequency() > 0.0 {
            calibration.frequency()
        } else {
            self.frequency
        };
        let working = self.run_pipeline(&real, &imag, frequency, &self.params, &self.search)?;

        self.real_calibrated = real;
        self.imag_calibrated = imag;
        self.frequency = frequency;
        self.working = working;
        Ok(())
    }

    /// Run the filter pipeline with the current parameters.
    ///
    /// Steps, always in order: reset `g, s` from the calibrated phasor,
    /// median smoothing, photon-count mask, masking, lifetime derivation.
    ///
    /// # Errors
    /// Propagates primitive failures; the dataset is left unchanged on failure.
    pub fn apply_filters(&mut self) -> Result<()> {
        self.working = self.run_pipeline(
            &self.real_calibrated,
            &self.imag_calibrated,
            self.frequency,
            &self.params,
            &self.search,
        )?;
        Ok(())
    }

    /// Replace the filter parameters and re-run the pipeline.
    ///
    /// # Errors
    /// As [`apply_filters`](Self::apply_filters); parameters are only stored
    /// if the pipeline succeeds.
    pub fn set_filter_params(&mut self, params: FilterParams) -> Result<()> {
        self.working = self.run_pipeline(
            &self.real_calibrated,
            &self.imag_calibrated,
            self.frequency,
            &params,
            &self.search,
        )?;
        self.params = params;
        Ok(())
    }

    /// Replace the two-component search grid and re-derive lifetimes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfiguration`] for an invalid grid.
    pub fn set_lifetime_search(&mut self, search: LifetimeSearch) -> Result<()> {
        let lifetimes =
            Lifetimes::compute(&self.working.g, &self.working.s, self.frequency, &search)?;
        self.working.lifetimes = lifetimes;
        self.search = search;
        Ok(())
    }

    fn run_pipeline(
        &self,
        real_calibrated: &Array3<f64>,
        imag_calibrated: &Array3<f64>,
        frequency: f64,
        params: &FilterParams,
        search: &LifetimeSearch,
    ) -> Result<Working> {
        // reset
        let mut g = real_calibrated.clone();
        let mut s = imag_calibrated.clone();

        if params.smoothing_enabled() {
            log::debug!(
                "{}: median filter size {} x{}",
                self.name,
                params.kernel_size,
                params.repetition
            );
            let (_, g_filtered, s_filtered) =
                phasor_filter_median(&self.raw.mean, &g, &s, params.repetition, params.kernel_size)?;
            g = g_filtered;
            s = s_filtered;
        }

        let mask = classify_counts(&self.counts, params.min_count, params.max_count)
            .mapv(|class| class == PhotonClass::Kept);

        for mut plane in g.axis_iter_mut(Axis(0)).chain(s.axis_iter_mut(Axis(0))) {
            Zip::from(&mut plane).and(&mask).for_each(|v, &keep| {
                if !keep {
                    *v = f64::NAN;
                }
            });
        }
        let mut counts_filtered = self.counts.clone();
        Zip::from(&mut counts_filtered)
            .and(&mask)
            .for_each(|c, &keep| {
                if !keep {
                    *c = 0;
                }
            });

        let lifetimes = Lifetimes::compute(&g, &s, frequency, search)?;
        log::debug!(
            "{}: {} of {} pixels kept",
            self.name,
            mask.iter().filter(|&&k| k).count(),
            mask.len()
        );
        Ok(Working {
            g,
            s,
            mask,
            counts_filtered,
            lifetimes,
        })
    }

    /// Working `(g, s)` of a 1-based `harmonic`.
    ///
    /// # Errors
    /// Returns [`Error::HarmonicOutOfRange`] outside `1..=num_harmonics()`.
    pub fn get_phasor(&self, harmonic: usize) -> Result<(ArrayView2<'_, f64>, ArrayView2<'_, f64>)> {
        let available = self.num_harmonics();
        if harmonic == 0 || harmonic > available {
            return Err(Error::HarmonicOutOfRange {
                harmonic,
                available,
            });
        }
        let idx = harmonic - 1;
        Ok((
            self.working.g.index_axis(Axis(0), idx),
            self.working.s.index_axis(Axis(0), idx),
        ))
    }

    /// Finite values of `metric` at masked-in pixels, row-major.
    ///
    /// `harmonic` is only consulted for [`Metric::G`] and [`Metric::S`].
    ///
    /// # Errors
    /// Returns [`Error::HarmonicOutOfRange`] for a bad harmonic on `g`/`s`.
    pub fn pixel_values(&self, metric: Metric, harmonic: usize) -> Result<Vec<f64>> {
        let lifetimes = &self.working.lifetimes;
        let map: ArrayView2<'_, f64> = match metric {
            Metric::PhotonCount => {
                return Ok(self
                    .counts
                    .iter()
                    .zip(self.working.mask.iter())
                    .filter(|&(_, &keep)| keep)
                    .map(|(&c, _)| c as f64)
                    .collect());
            }
            Metric::G => self.get_phasor(harmonic)?.0,
            Metric::S => self.get_phasor(harmonic)?.1,
            Metric::PhiLifetime => lifetimes.phase.view(),
            Metric::MLifetime => lifetimes.modulation.view(),
            Metric::ProjLifetime => lifetimes.normal.view(),
            Metric::AvgLifetime => lifetimes.average.view(),
            Metric::GeoTau1 => lifetimes.geo_lifetime.index_axis(Axis(0), 0),
            Metric::GeoTau2 => lifetimes.geo_lifetime.index_axis(Axis(0), 1),
            Metric::GeoFrac1 => lifetimes.geo_fraction.index_axis(Axis(0), 0),
            Metric::GeoFrac2 => lifetimes.geo_fraction.index_axis(Axis(0), 1),
        };
        Ok(map
            .iter()
            .zip(self.working.mask.iter())
            .filter(|&(v, &keep)| keep && v.is_finite())
            .map(|(&v, _)| v)
            .collect())
    }

    /// One statistic over [`pixel_values`](Self::pixel_values); NaN when no
    /// pixel qualifies.
    ///
    /// # Errors
    /// As [`pixel_values`](Self::pixel_values).
    pub fn image_feature(&self, metric: Metric, stat: Stat, harmonic: usize) -> Result<f64> {
        let mut values = self.pixel_values(metric, harmonic)?;
        Ok(stat.reduce(&mut values))
    }

    /// Headline arrays restricted to the mask.
    #[must_use]
    pub fn summarize(&self) -> Summary {
        let mask = &self.working.mask;
        let lifetimes = &self.working.lifetimes;
        let select = |map: &Array2<f64>| -> Vec<f64> {
            map.iter()
                .zip(mask.iter())
                .filter(|&(_, &keep)| keep)
                .map(|(&v, _)| v)
                .collect()
        };
        Summary {
            name: self.name.clone(),
            group: self.group.clone(),
            channel: self.channel,
            photon_count: self
                .counts
                .iter()
                .zip(mask.iter())
                .filter(|&(_, &keep)| keep)
                .map(|(&c, _)| c)
                .collect(),
            phi_lifetime: select(&lifetimes.phase),
            m_lifetime: select(&lifetimes.modulation),
            proj_lifetime: select(&lifetimes.normal),
            avg_lifetime: select(&lifetimes.average),
        }
    }

    /// Assign a group and derive its colour.
    pub fn set_group(&mut self, group: impl Into<String>) {
        self.group = group.into();
        self.color = group_color(&self.group);
    }

    /// `"{name} (C{channel + 1}) [{group}]"`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} (C{}) [{}]", self.name, self.channel + 1, self.group)
    }

    /// Photon-count class of every pixel under the current thresholds.
    #[must_use]
    pub fn photon_classes(&self) -> Array2<PhotonClass> {
        classify_counts(&self.counts, self.params.min_count, self.params.max_count)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name of [`path`](Self::path).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Laser frequency (MHz) used for lifetime derivation.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Total photon counts per pixel.
    #[must_use]
    pub fn counts(&self) -> &Array2<u64> {
        &self.counts
    }

    /// Counts with masked-out pixels set to zero.
    #[must_use]
    pub fn counts_filtered(&self) -> &Array2<u64> {
        &self.working.counts_filtered
    }

    /// Raw phasor coordinates.
    #[must_use]
    pub fn raw_phasor(&self) -> &PhasorCoordinates {
        &self.raw
    }

    #[must_use]
    pub fn mean(&self) -> &Array2<f64> {
        &self.raw.mean
    }

    #[must_use]
    pub fn real_raw(&self) -> &Array3<f64> {
        &self.raw.real
    }

    #[must_use]
    pub fn imag_raw(&self) -> &Array3<f64> {
        &self.raw.imag
    }

    #[must_use]
    pub fn real_calibrated(&self) -> &Array3<f64> {
        &self.real_calibrated
    }

    #[must_use]
    pub fn imag_calibrated(&self) -> &Array3<f64> {
        &self.imag_calibrated
    }

    /// Working real coordinates, `[H, Y, X]`.
    #[must_use]
    pub fn g(&self) -> &Array3<f64> {
        &self.working.g
    }

    /// Working imaginary coordinates, `[H, Y, X]`.
    #[must_use]
    pub fn s(&self) -> &Array3<f64> {
        &self.working.s
    }

    #[must_use]
    pub fn num_harmonics(&self) -> usize {
        self.working.g.len_of(Axis(0))
    }

    /// Pixels kept by the photon-count thresholds.
    #[must_use]
    pub fn mask(&self) -> &Array2<bool> {
        &self.working.mask
    }

    #[must_use]
    pub fn filter_params(&self) -> FilterParams {
        self.params
    }

    #[must_use]
    pub fn lifetime_search(&self) -> LifetimeSearch {
        self.search
    }

    #[must_use]
    pub fn lifetimes(&self) -> &Lifetimes {
        &self.working.lifetimes
    }

    #[must_use]
    pub fn phase_lifetime(&self) -> &Array2<f64> {
        &self.working.lifetimes.phase
    }

    #[must_use]
    pub fn modulation_lifetime(&self) -> &Array2<f64> {
        &self.working.lifetimes.modulation
    }

    #[must_use]
    pub fn normal_lifetime(&self) -> &Array2<f64> {
        &self.working.lifetimes.normal
    }

    #[must_use]
    pub fn geo_lifetime(&self) -> &Array3<f64> {
        &self.working.lifetimes.geo_lifetime
    }

    #[must_use]
    pub fn geo_fraction(&self) -> &Array3<f64> {
        &self.working.lifetimes.geo_fraction
    }

    #[must_use]
    pub fn avg_lifetime(&self) -> &Array2<f64> {
        &self.working.lifetimes.average
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// `#rrggbb` colour of the group.
    #[must_use]
    pub fn color(&self) -> &str {
        &self.color
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array3};

    #[test]
    fn test_classify_counts() {
        let counts = array![[0_u64, 3, 6]];
        let classes = classify_counts(&counts, 1, 5);
        assert_eq!(
            classes,
            array![[PhotonClass::Low, PhotonClass::Kept, PhotonClass::High]]
        );
    }

    #[test]
    fn test_average_lifetime_clamp() {
        let mut lifetimes = Array3::<f64>::zeros((2, 1, 2));
        let mut fractions = Array3::<f64>::zeros((2, 1, 2));
        // pixel 0: 0.5*4 + 0.5*20 = 12 -> NaN
        lifetimes[[0, 0, 0]] = 4.0;
        lifetimes[[1, 0, 0]] = 20.0;
        fractions[[0, 0, 0]] = 0.5;
        fractions[[1, 0, 0]] = 0.5;
        // pixel 1: exactly at the clamp survives
        lifetimes[[0, 0, 1]] = 10.0;
        fractions[[0, 0, 1]] = 1.0;

        let avg = average_lifetime(&lifetimes, &fractions);
        assert!(avg[[0, 0]].is_nan());
        assert_relative_eq!(avg[[0, 1]], 10.0);
    }

    #[test]
    fn test_filter_params_builder() {
        let params = FilterParams::default()
            .with_min_count(5)
            .with_max_count(50)
            .with_kernel_size(5)
            .with_repetition(2);
        assert_eq!(params.min_count, 5);
        assert_eq!(params.max_count, 50);
        assert!(params.smoothing_enabled());
        assert!(!FilterParams::default().smoothing_enabled());
        assert!(!params.with_kernel_size(2).smoothing_enabled());
    }
}
