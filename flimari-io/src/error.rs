//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding or encoding error.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// CSV writing error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// HDF5 error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Requested channel is not present in the file.
    #[error("channel {channel} out of range ({channels} channels)")]
    ChannelOutOfRange { channel: usize, channels: usize },

    /// No loader handles this file type.
    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] flimari_core::Error),
}
