//! flimari-io: Signal loaders and summary export for flimari.
//!
//! This crate provides [`SignalLoader`](flimari_core::SignalLoader)
//! implementations for TIFF stacks and (with the `hdf5` feature) HDF5 files,
//! plus CSV export of dataset summaries.
//!

mod auto;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod tiff;
mod writer;

pub use auto::{AutoSignalLoader, SignalFormat};
pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use self::hdf5::{Hdf5SignalLoader, SIGNAL_DATASET};
pub use self::tiff::TiffSignalLoader;
pub use writer::{export_summaries, sanitize_file_name, ExportReport, SummaryCsvWriter};
