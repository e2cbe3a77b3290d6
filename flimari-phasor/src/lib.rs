//! flimari-phasor: Calibration and per-sample lifetime datasets.
//!
//! This crate builds the stateful layer on top of `flimari-core`:
//! - **Calibration** - reference phasor, offsets and the correction function
//! - **Dataset** - raw, calibrated and working phasor coordinates with the
//!   smoothing/threshold pipeline and lifetime maps
//! - **Session** - explicit registry of one calibration and many datasets
//!

pub mod calibration;
mod color;
pub mod consistency;
pub mod dataset;
pub mod metrics;
pub mod session;

pub use calibration::{Calibration, CalibrationMode, CalibrationOffsets, Reference};
pub use color::group_color;
pub use consistency::{shared, shared_values, AttrValue, DatasetAttr, Shared};
pub use dataset::{
    average_lifetime, classify_counts, Dataset, FilterParams, Lifetimes, PhotonClass, Summary,
    AVG_LIFETIME_CLAMP, DEFAULT_GROUP,
};
pub use metrics::{Metric, Stat};
pub use session::{CalibrationStatus, PartialFilterParams, Session};

// Re-export the core types callers need alongside datasets
pub use flimari_core::{Error, LifetimeSearch, Result, Signal, SignalLoader};
