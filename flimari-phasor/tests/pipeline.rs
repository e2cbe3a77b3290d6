#![allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
use approx::assert_relative_eq;
use flimari_core::{phasor_from_lifetime, Error, Signal, FREQUENCY_ATTR};
use flimari_phasor::{
    average_lifetime, shared_values, AttrValue, Calibration, CalibrationMode, DatasetAttr, Dataset,
    FilterParams, LifetimeSearch, Metric, PhotonClass, Shared, Stat,
};
use ndarray::{array, Array2, Array3, Axis};

/// Two-sample signal whose per-pixel totals equal `totals`.
fn signal_with_totals(totals: &Array2<u32>) -> Signal {
    let (ny, nx) = totals.dim();
    let mut counts = Array3::<u32>::zeros((2, ny, nx));
    for ((y, x), &c) in totals.indexed_iter() {
        counts[[0, y, x]] = c - c / 2;
        counts[[1, y, x]] = c / 2;
    }
    Signal::new(counts).with_attr(FREQUENCY_ATTR, 80.0)
}

fn scenario_counts() -> Array2<u32> {
    array![[0, 3, 6], [2, 4, 2], [7, 1, 3]]
}

/// Exponential-decay histograms with a spread of brightness, eight samples.
fn decay_signal(ny: usize, nx: usize) -> Signal {
    let samples = 8;
    let mut counts = Array3::<u32>::zeros((samples, ny, nx));
    for y in 0..ny {
        for x in 0..nx {
            let amplitude = 20.0 + 15.0 * (y * nx + x) as f64;
            for k in 0..samples {
                let v = amplitude * (-(k as f64) / 2.5).exp();
                counts[[k, y, x]] = v.round() as u32;
            }
        }
    }
    Signal::new(counts).with_attr(FREQUENCY_ATTR, 80.0)
}

fn same_bits(a: &Array3<f64>, b: &Array3<f64>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

fn same_bits2(a: &Array2<f64>, b: &Array2<f64>) -> bool {
    a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[test]
fn test_scenario_mask_and_filtered_counts() {
    let mut ds = Dataset::from_signal("sample.tif", 0, &signal_with_totals(&scenario_counts())).unwrap();
    assert!(ds.mask().iter().all(|&k| k));
    assert_eq!(ds.counts(), &scenario_counts().mapv(u64::from));

    ds.set_filter_params(FilterParams::default().with_min_count(1).with_max_count(5))
        .unwrap();

    let expected = array![[false, true, false], [true, true, true], [false, true, true]];
    assert_eq!(ds.mask(), &expected);
    assert_eq!(
        ds.counts_filtered(),
        &array![[0_u64, 3, 0], [2, 4, 2], [0, 1, 3]]
    );
    for plane in ds.g().axis_iter(Axis(0)).chain(ds.s().axis_iter(Axis(0))) {
        for ((y, x), v) in plane.indexed_iter() {
            if !expected[[y, x]] {
                assert!(v.is_nan());
            }
        }
    }

    // kept counts: 3, 2, 4, 2, 1, 3
    let median = ds.image_feature(Metric::PhotonCount, Stat::Median, 1).unwrap();
    assert_relative_eq!(median, 2.5);
    let summary = ds.summarize();
    assert_eq!(summary.photon_count, vec![3, 2, 4, 2, 1, 3]);
    assert_eq!(summary.len(), summary.avg_lifetime.len());
}

#[test]
fn test_apply_filters_is_idempotent() {
    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(5, 5)).unwrap();
    ds.set_filter_params(
        FilterParams::default()
            .with_min_count(30)
            .with_kernel_size(3)
            .with_repetition(2),
    )
    .unwrap();
    let before = ds.clone();
    ds.apply_filters().unwrap();

    assert!(same_bits(ds.g(), before.g()));
    assert!(same_bits(ds.s(), before.s()));
    assert_eq!(ds.mask(), before.mask());
    assert_eq!(ds.counts_filtered(), before.counts_filtered());
    assert!(same_bits2(ds.phase_lifetime(), before.phase_lifetime()));
    assert!(same_bits2(ds.modulation_lifetime(), before.modulation_lifetime()));
    assert!(same_bits2(ds.normal_lifetime(), before.normal_lifetime()));
    assert!(same_bits(ds.geo_lifetime(), before.geo_lifetime()));
    assert!(same_bits(ds.geo_fraction(), before.geo_fraction()));
    assert!(same_bits2(ds.avg_lifetime(), before.avg_lifetime()));
}

#[test]
fn test_mask_ignores_smoothing_settings() {
    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(4, 4)).unwrap();
    let base = FilterParams::default().with_min_count(40).with_max_count(200);
    ds.set_filter_params(base).unwrap();
    let mask = ds.mask().clone();

    ds.set_filter_params(base.with_kernel_size(5).with_repetition(3))
        .unwrap();
    assert_eq!(ds.mask(), &mask);
}

#[test]
fn test_small_kernel_is_noop() {
    let mut smoothed = Dataset::from_signal("decay.tif", 0, &decay_signal(4, 4)).unwrap();
    let plain = smoothed.clone();
    smoothed
        .set_filter_params(FilterParams::default().with_kernel_size(2).with_repetition(4))
        .unwrap();
    assert!(same_bits(smoothed.g(), plain.g()));
    assert!(same_bits(smoothed.s(), plain.s()));
}

#[test]
fn test_smoothing_leaves_raw_untouched() {
    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(4, 4)).unwrap();
    let raw = ds.raw_phasor().clone();
    ds.set_filter_params(FilterParams::default().with_repetition(2))
        .unwrap();
    assert_eq!(ds.raw_phasor(), &raw);
    assert!(same_bits(ds.real_calibrated(), &raw.real));
}

#[test]
fn test_harmonic_range() {
    let ds = Dataset::from_signal("decay.tif", 0, &decay_signal(3, 2)).unwrap();
    assert_eq!(ds.num_harmonics(), 2);
    for harmonic in [1, 2] {
        let (g, s) = ds.get_phasor(harmonic).unwrap();
        assert_eq!(g.dim(), (3, 2));
        assert_eq!(s.dim(), (3, 2));
    }
    for harmonic in [0, 3] {
        let err = ds.get_phasor(harmonic).unwrap_err();
        assert!(matches!(err, Error::HarmonicOutOfRange { available: 2, .. }));
    }
    assert!(ds.pixel_values(Metric::G, 3).unwrap_err().is_range());
    // harmonic is irrelevant for lifetime metrics
    assert!(ds.pixel_values(Metric::PhiLifetime, 3).is_ok());
}

#[test]
fn test_pixel_values_are_finite_and_masked() {
    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(5, 5)).unwrap();
    ds.set_filter_params(FilterParams::default().with_min_count(60).with_max_count(120))
        .unwrap();
    let kept = ds.mask().iter().filter(|&&k| k).count();
    assert!(kept > 0 && kept < 25);

    for metric in Metric::ALL {
        let values = ds.pixel_values(metric, 1).unwrap();
        assert!(values.len() <= kept, "{metric} leaked masked pixels");
        assert!(values.iter().all(|v| v.is_finite()), "{metric} has non-finite values");
    }
    let counts = ds.pixel_values(Metric::PhotonCount, 1).unwrap();
    assert_eq!(counts.len(), kept);
    assert!(counts.iter().all(|&c| (60.0..=120.0).contains(&c)));
}

#[test]
fn test_image_feature_empty_selection_is_nan() {
    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(2, 2)).unwrap();
    ds.set_filter_params(FilterParams::default().with_min_count(u64::MAX))
        .unwrap();
    for stat in Stat::ALL {
        assert!(ds.image_feature(Metric::AvgLifetime, stat, 1).unwrap().is_nan());
    }
    assert!(ds.summarize().is_empty());
}

#[test]
fn test_identity_calibration() {
    // all photons in the first bin: phasor (1, 0), the phasor of a zero lifetime
    let mut reference = Array3::<u32>::zeros((4, 2, 2));
    reference.index_axis_mut(Axis(0), 0).fill(100);
    let mut calibration = Calibration::new();
    calibration
        .load_signal("ref.tif", Signal::new(reference))
        .unwrap();
    calibration.calibrate(40.0, 0.0).unwrap();

    let offsets = calibration.offsets().unwrap();
    for h in 0..2 {
        assert_relative_eq!(offsets.phase_zero[h], 0.0);
        assert_relative_eq!(offsets.modulation_zero[h], 1.0);
    }

    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(3, 3)).unwrap();
    ds.calibrate_phasor(&calibration).unwrap();
    assert!(same_bits(ds.real_calibrated(), ds.real_raw()));
    assert!(same_bits(ds.imag_calibrated(), ds.imag_raw()));
    assert_relative_eq!(ds.frequency(), 40.0);
}

#[test]
fn test_reference_roundtrip_with_nonzero_lifetime() {
    // every pixel holds the same decay, so each equals the weighted centre
    let mut counts = Array3::<u32>::zeros((8, 3, 3));
    for ((k, _, _), c) in counts.indexed_iter_mut() {
        *c = (1000.0 * (-(k as f64) / 2.5).exp()).round() as u32;
    }
    let signal = Signal::new(counts).with_attr(FREQUENCY_ATTR, 80.0);
    let mut calibration = Calibration::new();
    calibration.load_signal("ref.tif", signal.clone()).unwrap();
    calibration.calibrate(80.0, 2.5).unwrap();

    let mut ds = Dataset::from_signal("same.tif", 0, &signal).unwrap();
    ds.calibrate_phasor(&calibration).unwrap();
    for harmonic in [1, 2] {
        let (known_g, known_s) = phasor_from_lifetime(80.0, 2.5, harmonic);
        let (g, s) = ds.get_phasor(harmonic).unwrap();
        for (&gv, &sv) in g.iter().zip(s.iter()) {
            assert_relative_eq!(gv, known_g, epsilon = 1e-9);
            assert_relative_eq!(sv, known_s, epsilon = 1e-9);
        }
    }
    for &tau in ds.phase_lifetime() {
        assert_relative_eq!(tau, 2.5, epsilon = 1e-6);
    }
}

#[test]
fn test_irf_correction_on_dataset() {
    let signal = decay_signal(3, 3);
    let mut calibration = Calibration::new().with_mode(CalibrationMode::Irf);
    calibration.load_signal("irf.tif", signal.clone()).unwrap();

    let mut ds = Dataset::from_signal("decay.tif", 0, &signal).unwrap();
    ds.calibrate_phasor(&calibration).unwrap();
    // a decay divided by itself sits at (1, 0)
    for harmonic in [1, 2] {
        let (g, s) = ds.get_phasor(harmonic).unwrap();
        for (&gv, &sv) in g.iter().zip(s.iter()) {
            assert_relative_eq!(gv, 1.0, epsilon = 1e-12);
            assert_relative_eq!(sv, 0.0, epsilon = 1e-12);
        }
    }
    for &tau in ds.phase_lifetime() {
        assert_relative_eq!(tau, 0.0, epsilon = 1e-9);
    }
    // no offsets were derived, so the dataset keeps its own frequency
    assert_relative_eq!(ds.frequency(), 80.0);

    let mut small = Dataset::from_signal("small.tif", 0, &decay_signal(2, 2)).unwrap();
    let before = small.clone();
    let err = small.calibrate_phasor(&calibration).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
    assert!(same_bits(small.real_calibrated(), before.real_calibrated()));
    assert!(same_bits(small.g(), before.g()));
}

#[test]
fn test_failed_calibration_leaves_dataset_unchanged() {
    let mut calibration = Calibration::new();
    calibration
        .load_signal("ref.tif", decay_signal(3, 3))
        .unwrap();

    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(3, 3)).unwrap();
    let before = ds.clone();
    let err = ds.calibrate_phasor(&calibration).unwrap_err();
    assert!(matches!(err, Error::State(_)));
    assert!(same_bits(ds.g(), before.g()));
    assert_relative_eq!(ds.frequency(), before.frequency());
}

#[test]
fn test_average_lifetime_clamps_at_ten() {
    let lifetimes = Array3::from_shape_vec((2, 1, 2), vec![6.0, 2.0, 18.0, 4.0]).unwrap();
    let fractions = Array3::from_shape_vec((2, 1, 2), vec![0.5, 0.5, 0.5, 0.5]).unwrap();
    let avg = average_lifetime(&lifetimes, &fractions);
    // 0.5 * 6 + 0.5 * 18 = 12
    assert!(avg[[0, 0]].is_nan());
    assert_relative_eq!(avg[[0, 1]], 3.0);
}

#[test]
fn test_consistency_across_datasets() {
    let signal = decay_signal(2, 2);
    let mut datasets: Vec<Dataset> = (0..3)
        .map(|i| Dataset::from_signal(format!("s{i}.tif"), 0, &signal).unwrap())
        .collect();
    datasets[2]
        .set_filter_params(FilterParams::default().with_min_count(5))
        .unwrap();

    let result = shared_values(&datasets, &[DatasetAttr::MinCount, DatasetAttr::MaxCount]);
    assert_eq!(result[0], (DatasetAttr::MinCount, Shared::Mixed));
    assert_eq!(
        result[1],
        (DatasetAttr::MaxCount, Shared::Value(AttrValue::Int(10_000)))
    );

    let empty: Vec<Dataset> = Vec::new();
    let result = shared_values(&empty, &DatasetAttr::ALL);
    assert!(result.iter().all(|(_, shared)| shared.is_mixed()));
}

#[test]
fn test_group_and_display_name() {
    let mut ds = Dataset::from_signal("/data/cells.tif", 1, &decay_signal(2, 2)).unwrap();
    assert_eq!(ds.display_name(), "cells.tif (C2) [default]");
    let default_color = ds.color().to_string();

    ds.set_group("treated");
    assert_eq!(ds.display_name(), "cells.tif (C2) [treated]");
    assert_ne!(ds.color(), default_color);
    let mut other = ds.clone();
    other.set_group("treated");
    assert_eq!(other.color(), ds.color());
}

#[test]
fn test_open_missing_file() {
    struct Never;
    impl flimari_core::SignalLoader for Never {
        fn load(
            &self,
            _path: &std::path::Path,
            _channel: usize,
        ) -> Result<Signal, flimari_core::LoadError> {
            Err("not reached".into())
        }
    }
    let err = Dataset::open("/no/such/file.tif", 0, &Never).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_frequency_defaults_when_missing() {
    let ds = Dataset::from_signal("x.tif", 0, &Signal::new(Array3::from_elem((2, 1, 1), 3))).unwrap();
    assert_relative_eq!(ds.frequency(), 80.0);
}

#[test]
fn test_photon_classes_follow_thresholds() {
    use PhotonClass::{High, Kept, Low};

    let mut ds = Dataset::from_signal("sample.tif", 0, &signal_with_totals(&scenario_counts())).unwrap();
    assert!(ds.photon_classes().iter().all(|&c| c == Kept));
    ds.set_filter_params(FilterParams::default().with_min_count(1).with_max_count(5))
        .unwrap();
    assert_eq!(
        ds.photon_classes(),
        array![[Low, Kept, High], [Kept, Kept, Kept], [High, Kept, Kept]]
    );
}

#[test]
fn test_set_lifetime_search() {
    let mut ds = Dataset::from_signal("decay.tif", 0, &decay_signal(3, 3)).unwrap();
    let phase = ds.phase_lifetime().clone();
    let search = LifetimeSearch::default().with_range(0.5, 8.0).with_step(0.05);
    ds.set_lifetime_search(search).unwrap();
    assert_eq!(ds.lifetime_search(), search);
    assert!(same_bits2(ds.phase_lifetime(), &phase));

    let geo = ds.geo_lifetime().clone();
    let err = ds
        .set_lifetime_search(LifetimeSearch::default().with_step(1e-13))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfiguration(_)));
    assert_eq!(ds.lifetime_search(), search);
    assert!(same_bits(ds.geo_lifetime(), &geo));
}
