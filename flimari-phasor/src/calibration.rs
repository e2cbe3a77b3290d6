//! Phasor calibration against a reference measurement.

use flimari_core::{
    load_signal, phasor_center, phasor_divide, phasor_from_lifetime, phasor_from_signal,
    phasor_transform, polar_from_reference_phasor, Error, PhasorCoordinates, Result, Signal,
    SignalLoader, DEFAULT_HARMONICS,
};
use ndarray::{Array1, Array3};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Correction algorithm applied by [`Calibration::compute_calibrated_phasor`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CalibrationMode {
    /// Rotate and scale by offsets derived from a known-lifetime standard.
    #[default]
    Mapping,
    /// Complex division by the measured instrument response.
    Irf,
}

impl CalibrationMode {
    /// Human-readable label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Mapping => "Reference phasor",
            Self::Irf => "IRF",
        }
    }
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for CalibrationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mapping" | "reference" | "reference phasor" => Ok(Self::Mapping),
            "irf" => Ok(Self::Irf),
            other => Err(Error::invalid_config(format!(
                "unknown calibration mode: {other:?}"
            ))),
        }
    }
}

/// Per-harmonic phase offset (radians) and modulation factor.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CalibrationOffsets {
    pub phase_zero: Array1<f64>,
    pub modulation_zero: Array1<f64>,
}

/// Reference measurement and its phasor coordinates.
#[derive(Clone, Debug)]
pub struct Reference {
    pub path: PathBuf,
    pub signal: Signal,
    pub phasor: PhasorCoordinates,
}

/// Calibration state shared by every dataset it corrects.
///
/// Lifecycle: empty -> [`load`](Self::load) a reference ->
/// [`calibrate`](Self::calibrate) (Mapping mode only) -> read-only use via
/// [`compute_calibrated_phasor`](Self::compute_calibrated_phasor).
#[derive(Clone, Debug, Default)]
pub struct Calibration {
    reference: Option<Reference>,
    frequency: f64,
    offsets: Option<CalibrationOffsets>,
    mode: CalibrationMode,
}

impl Calibration {
    /// Create an empty calibration in Mapping mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the correction mode.
    #[must_use]
    pub fn with_mode(mut self, mode: CalibrationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Current correction mode.
    #[must_use]
    pub fn mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Switch correction mode. Offsets are kept.
    pub fn set_mode(&mut self, mode: CalibrationMode) {
        self.mode = mode;
    }

    /// Load the reference measurement from `path` and compute its phasor.
    ///
    /// Any previous offsets are discarded.
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the loader fails, or the phasor error for a
    /// signal without samples.
    pub fn load<L: SignalLoader + ?Sized>(
        &mut self,
        path: impl AsRef<Path>,
        channel: usize,
        loader: &L,
    ) -> Result<()> {
        let path = path.as_ref();
        let signal = load_signal(loader, path, channel)?;
        self.load_signal(path, signal)
    }

    /// Use an already-loaded signal as the reference.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfiguration`] for a signal without samples.
    pub fn load_signal(&mut self, path: impl Into<PathBuf>, signal: Signal) -> Result<()> {
        let phasor = phasor_from_signal(signal.counts.view(), &DEFAULT_HARMONICS)?;
        let path = path.into();
        log::debug!(
            "loaded calibration reference {} ({} samples, {:?})",
            path.display(),
            signal.samples(),
            signal.spatial_shape()
        );
        self.reference = Some(Reference {
            path,
            signal,
            phasor,
        });
        self.offsets = None;
        Ok(())
    }

    /// Whether a reference has been loaded.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.reference.is_some()
    }

    /// Loaded reference, if any.
    #[must_use]
    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    /// Path of the loaded reference, if any.
    #[must_use]
    pub fn reference_path(&self) -> Option<&Path> {
        self.reference.as_ref().map(|r| r.path.as_path())
    }

    /// Metadata attribute of the reference signal, if present.
    #[must_use]
    pub fn signal_attribute(&self, name: &str) -> Option<f64> {
        self.reference.as_ref().and_then(|r| r.signal.attr(name))
    }

    /// Frequency (MHz) used by the last [`calibrate`](Self::calibrate), or 0.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Offsets from the last successful [`calibrate`](Self::calibrate).
    #[must_use]
    pub fn offsets(&self) -> Option<&CalibrationOffsets> {
        self.offsets.as_ref()
    }

    /// Derive phase and modulation offsets from a reference of known
    /// single-exponential `lifetime` (ns) measured at `frequency` (MHz).
    ///
    /// The intensity-weighted centre of the reference phasor is compared,
    /// harmonic by harmonic, with the theoretical phasor of the standard:
    /// harmonic `h` is compared at `h * frequency`. Previous offsets are
    /// replaced.
    ///
    /// # Errors
    /// Returns [`Error::State`] if no reference is loaded and
    /// [`Error::InvalidConfiguration`] for a non-positive frequency, negative
    /// lifetime or a reference without valid pixels.
    pub fn calibrate(&mut self, frequency: f64, lifetime: f64) -> Result<()> {
        let reference = self
            .reference
            .as_ref()
            .ok_or_else(|| Error::state("calibrate() requires a loaded reference signal"))?;
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(Error::invalid_config(format!(
                "calibration frequency must be positive, got {frequency}"
            )));
        }
        if !(lifetime.is_finite() && lifetime >= 0.0) {
            return Err(Error::invalid_config(format!(
                "reference lifetime must be non-negative, got {lifetime}"
            )));
        }

        let phasor = &reference.phasor;
        let (center_real, center_imag) = phasor_center(&phasor.mean, &phasor.real, &phasor.imag);
        if center_real.iter().chain(&center_imag).any(|v| !v.is_finite()) {
            return Err(Error::invalid_config(
                "reference signal has no pixels with photons",
            ));
        }

        let planes = phasor.harmonics.len();
        let mut phase_zero = Array1::<f64>::zeros(planes);
        let mut modulation_zero = Array1::<f64>::ones(planes);
        for (i, &harmonic) in phasor.harmonics.iter().enumerate() {
            let (known_real, known_imag) = phasor_from_lifetime(frequency, lifetime, harmonic);
            let (phase, modulation) = polar_from_reference_phasor(
                center_real[i],
                center_imag[i],
                known_real,
                known_imag,
            );
            phase_zero[i] = phase;
            modulation_zero[i] = modulation;
        }

        log::debug!(
            "calibrated at {frequency} MHz / {lifetime} ns: phase {phase_zero}, modulation {modulation_zero}"
        );
        self.frequency = frequency;
        self.offsets = Some(CalibrationOffsets {
            phase_zero,
            modulation_zero,
        });
        Ok(())
    }

    /// Corrected copies of `real`/`imag` (`[H, Y, X]`). Does not mutate `self`.
    ///
    /// # Errors
    /// Mapping mode: [`Error::State`] before [`calibrate`](Self::calibrate).
    /// IRF mode: [`Error::State`] without a reference and
    /// [`Error::ShapeMismatch`] if the reference extent differs.
    pub fn compute_calibrated_phasor(
        &self,
        real: &Array3<f64>,
        imag: &Array3<f64>,
    ) -> Result<(Array3<f64>, Array3<f64>)> {
        match self.mode {
            CalibrationMode::Mapping => {
                let offsets = self.offsets.as_ref().ok_or_else(|| {
                    Error::state("mapping correction requested before calibrate()")
                })?;
                let phase: Vec<f64> = offsets.phase_zero.iter().map(|p| -p).collect();
                let modulation: Vec<f64> =
                    offsets.modulation_zero.iter().map(|m| m.recip()).collect();
                phasor_transform(real, imag, &phase, &modulation)
            }
            CalibrationMode::Irf => {
                let reference = self.reference.as_ref().ok_or_else(|| {
                    Error::state("IRF correction requires a loaded reference signal")
                })?;
                phasor_divide(real, imag, &reference.phasor.real, &reference.phasor.imag)
            }
        }
    }
}
