//! Loader that picks a format from the file extension.

use crate::tiff::TiffSignalLoader;
use crate::{Error, Result};
use flimari_core::{LoadError, Signal, SignalLoader};
use std::path::Path;

/// Recognised signal file formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalFormat {
    Tiff,
    Hdf5,
}

impl SignalFormat {
    /// Format implied by the extension of `path`, if any.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tif" | "tiff" => Some(Self::Tiff),
            "h5" | "hdf5" | "nxs" => Some(Self::Hdf5),
            _ => None,
        }
    }
}

/// Dispatches to the TIFF or HDF5 loader by extension.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AutoSignalLoader {
    tiff: TiffSignalLoader,
}

impl AutoSignalLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings used for TIFF files.
    #[must_use]
    pub fn with_tiff(mut self, tiff: TiffSignalLoader) -> Self {
        self.tiff = tiff;
        self
    }

    /// Read channel `channel` of `path`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedFile`] for unknown extensions (and for
    /// HDF5 files when built without the `hdf5` feature), otherwise the
    /// error of the selected loader.
    pub fn read(&self, path: impl AsRef<Path>, channel: usize) -> Result<Signal> {
        let path = path.as_ref();
        match SignalFormat::from_path(path) {
            Some(SignalFormat::Tiff) => self.tiff.read(path, channel),
            #[cfg(feature = "hdf5")]
            Some(SignalFormat::Hdf5) => crate::hdf5::Hdf5SignalLoader::new().read(path, channel),
            #[cfg(not(feature = "hdf5"))]
            Some(SignalFormat::Hdf5) => Err(Error::UnsupportedFile(format!(
                "{} (built without HDF5 support)",
                path.display()
            ))),
            None => Err(Error::UnsupportedFile(path.display().to_string())),
        }
    }
}

impl SignalLoader for AutoSignalLoader {
    fn load(&self, path: &Path, channel: usize) -> std::result::Result<Signal, LoadError> {
        Ok(self.read(path, channel)?)
    }
}
