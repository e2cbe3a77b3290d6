//! flimari-core: Core types and numeric primitives for phasor FLIM analysis.
//!
//! This crate provides the error taxonomy, the photon-count [`Signal`] and
//! the [`SignalLoader`] contract, and the pure phasor and lifetime functions
//! that calibration and dataset processing are built from.
//!

pub mod error;
pub mod filter;
pub mod lifetime;
pub mod phasor;
pub mod signal;

pub use error::{Error, LoadError, Result};
pub use filter::{phasor_filter_median, MIN_KERNEL_SIZE};
pub use lifetime::{
    angular_frequency, phasor_to_apparent_lifetime, phasor_to_lifetime_search,
    phasor_to_normal_lifetime, LifetimeSearch, MAX_SEARCH_CANDIDATES,
};
pub use phasor::{
    phasor_center, phasor_divide, phasor_from_lifetime, phasor_from_signal, phasor_transform,
    polar_from_reference_phasor, PhasorCoordinates, DEFAULT_HARMONICS,
};
pub use signal::{
    load_signal, Signal, SignalAttrs, SignalLoader, DEFAULT_FREQUENCY_MHZ, FREQUENCY_ATTR,
};
