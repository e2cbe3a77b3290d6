//! Photon-count signals and the loader contract.

use crate::error::{Error, LoadError, Result};
use ndarray::{Array2, Array3, Axis};
use std::collections::BTreeMap;
use std::path::Path;

/// Laser repetition frequency (MHz) assumed when metadata carries none.
pub const DEFAULT_FREQUENCY_MHZ: f64 = 80.0;

/// Name of the metadata attribute holding the laser frequency.
pub const FREQUENCY_ATTR: &str = "frequency";

/// Numeric metadata attached to a signal (name -> value).
pub type SignalAttrs = BTreeMap<String, f64>;

/// Time-resolved photon counts for one channel.
///
/// `counts` is laid out as `[H, Y, X]`: H is the sample (time bin) axis that
/// the phasor transform integrates over, Y and X are spatial.
#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub counts: Array3<u32>,
    pub attrs: SignalAttrs,
}

impl Signal {
    /// Create a signal without metadata.
    #[must_use]
    pub fn new(counts: Array3<u32>) -> Self {
        Self {
            counts,
            attrs: SignalAttrs::new(),
        }
    }

    /// Attach one metadata attribute.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: f64) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Number of samples along the H axis.
    #[must_use]
    pub fn samples(&self) -> usize {
        self.counts.len_of(Axis(0))
    }

    /// Spatial shape `(Y, X)`.
    #[must_use]
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (_, y, x) = self.counts.dim();
        (y, x)
    }

    /// Metadata attribute by name.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<f64> {
        self.attrs.get(name).copied()
    }

    /// Laser frequency from metadata, falling back to
    /// [`DEFAULT_FREQUENCY_MHZ`] when absent or non-positive.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        match self.attr(FREQUENCY_ATTR) {
            Some(f) if f > 0.0 => f,
            Some(f) => {
                log::warn!("ignoring non-positive frequency metadata {f}, using {DEFAULT_FREQUENCY_MHZ} MHz");
                DEFAULT_FREQUENCY_MHZ
            }
            None => DEFAULT_FREQUENCY_MHZ,
        }
    }

    /// Photon counts summed over the H axis.
    #[must_use]
    pub fn total_counts(&self) -> Array2<u64> {
        self.counts
            .map(|&c| u64::from(c))
            .sum_axis(Axis(0))
    }
}

/// Reads a photon-count signal for one channel of a file.
///
/// Implementations do not check that the file exists beforehand; callers
/// that need a not-found error distinct from a read failure check first.
pub trait SignalLoader {
    /// Load channel `channel` (0-based) of the file at `path`.
    ///
    /// # Errors
    /// Returns the loader's own error if the file is unreadable, has an
    /// unsupported layout or does not contain `channel`.
    fn load(&self, path: &Path, channel: usize) -> std::result::Result<Signal, LoadError>;
}

impl<L: SignalLoader + ?Sized> SignalLoader for &L {
    fn load(&self, path: &Path, channel: usize) -> std::result::Result<Signal, LoadError> {
        (**self).load(path, channel)
    }
}

/// Run `loader` and wrap its failure into [`Error::Load`].
///
/// # Errors
/// Returns [`Error::Load`] when the loader fails.
pub fn load_signal<L: SignalLoader + ?Sized>(
    loader: &L,
    path: &Path,
    channel: usize,
) -> Result<Signal> {
    loader.load(path, channel).map_err(|source| Error::Load {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_frequency_defaults() {
        let signal = Signal::new(Array3::zeros((2, 1, 1)));
        assert!((signal.frequency() - DEFAULT_FREQUENCY_MHZ).abs() < f64::EPSILON);

        let signal = signal.with_attr(FREQUENCY_ATTR, -5.0);
        assert!((signal.frequency() - DEFAULT_FREQUENCY_MHZ).abs() < f64::EPSILON);

        let signal = signal.with_attr(FREQUENCY_ATTR, 40.0);
        assert!((signal.frequency() - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_total_counts() {
        let signal = Signal::new(array![[[1, 2], [3, 4]], [[10, 20], [30, 40]]]);
        assert_eq!(signal.total_counts(), array![[11_u64, 22], [33, 44]]);
        assert_eq!(signal.samples(), 2);
        assert_eq!(signal.spatial_shape(), (2, 2));
    }
}
