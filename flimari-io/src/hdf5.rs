//! HDF5 photon-count signals.
//!
//! The photon counts live in the dataset `/signal`, shaped `[C, H, Y, X]` or,
//! for single-channel files, `[H, Y, X]`. A scalar `frequency` attribute on
//! the dataset (or, failing that, on the root group) gives the laser
//! repetition rate in MHz.

use crate::{Error, Result};
use flimari_core::{LoadError, Signal, SignalLoader, FREQUENCY_ATTR};
use hdf5::types::H5Type;
use hdf5::{File, Location};
use ndarray::{Axis, Ix3};
use std::path::Path;

/// Name of the photon-count dataset.
pub const SIGNAL_DATASET: &str = "signal";

/// Loader for HDF5 signal files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Hdf5SignalLoader;

impl Hdf5SignalLoader {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Read channel `channel` of `path`.
    ///
    /// # Errors
    /// Returns an error if HDF5 I/O fails, `/signal` is not 3- or
    /// 4-dimensional, or `channel` is out of range.
    pub fn read(&self, path: impl AsRef<Path>, channel: usize) -> Result<Signal> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let dataset = file.dataset(SIGNAL_DATASET)?;
        let data = dataset.read_dyn::<u32>()?;

        let counts = match data.ndim() {
            3 if channel == 0 => data.into_dimensionality::<Ix3>(),
            3 => {
                return Err(Error::ChannelOutOfRange {
                    channel,
                    channels: 1,
                })
            }
            4 => {
                let channels = data.len_of(Axis(0));
                if channel >= channels {
                    return Err(Error::ChannelOutOfRange { channel, channels });
                }
                data.index_axis(Axis(0), channel)
                    .to_owned()
                    .into_dimensionality::<Ix3>()
            }
            n => {
                return Err(Error::InvalidFormat(format!(
                    "/{SIGNAL_DATASET} has {n} dimensions, expected 3 or 4"
                )))
            }
        }
        .map_err(|e| Error::InvalidFormat(e.to_string()))?;

        let mut signal = Signal::new(counts);
        let frequency = match read_attr_opt::<f64>(&dataset, FREQUENCY_ATTR)? {
            Some(value) => Some(value),
            None => read_attr_opt::<f64>(&file, FREQUENCY_ATTR)?,
        };
        if let Some(frequency) = frequency {
            signal = signal.with_attr(FREQUENCY_ATTR, frequency);
        }
        log::debug!(
            "read {} channel {channel}: {:?}, frequency {frequency:?}",
            path.display(),
            signal.counts.dim()
        );
        Ok(signal)
    }
}

impl SignalLoader for Hdf5SignalLoader {
    fn load(&self, path: &Path, channel: usize) -> std::result::Result<Signal, LoadError> {
        Ok(self.read(path, channel)?)
    }
}

fn read_attr_opt<T: H5Type>(location: &Location, name: &str) -> Result<Option<T>> {
    match location.attr(name) {
        Ok(attr) => Ok(Some(attr.read_scalar::<T>()?)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array3, Array4};
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_four_dimensional_signal() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = File::create(tmp.path()).unwrap();
            let data = Array4::<u32>::from_shape_fn((2, 3, 2, 2), |(c, h, _, _)| {
                u32::try_from(c * 10 + h).unwrap()
            });
            let dataset = file
                .new_dataset_builder()
                .with_data(&data)
                .create(SIGNAL_DATASET)
                .unwrap();
            dataset
                .new_attr::<f64>()
                .create(FREQUENCY_ATTR)
                .unwrap()
                .write_scalar(&40.0)
                .unwrap();
        }

        let signal = Hdf5SignalLoader::new().read(tmp.path(), 1).unwrap();
        assert_eq!(signal.counts.dim(), (3, 2, 2));
        assert_eq!(signal.counts[[2, 0, 0]], 12);
        assert_relative_eq!(signal.frequency(), 40.0);
        assert!(matches!(
            Hdf5SignalLoader::new().read(tmp.path(), 2),
            Err(Error::ChannelOutOfRange { channels: 2, .. })
        ));
    }

    #[test]
    fn test_root_frequency_fallback() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let file = File::create(tmp.path()).unwrap();
            let data = Array3::<u32>::from_elem((2, 1, 1), 5);
            file.new_dataset_builder()
                .with_data(&data)
                .create(SIGNAL_DATASET)
                .unwrap();
            file.new_attr::<f64>()
                .create(FREQUENCY_ATTR)
                .unwrap()
                .write_scalar(&20.0)
                .unwrap();
        }

        let signal = Hdf5SignalLoader::new().read(tmp.path(), 0).unwrap();
        assert_eq!(signal.attr(FREQUENCY_ATTR), Some(20.0));
        assert!(Hdf5SignalLoader::new().read(tmp.path(), 1).is_err());
    }
}
