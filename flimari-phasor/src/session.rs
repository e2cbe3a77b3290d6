//! Explicit registry of one calibration and the datasets it corrects.

use crate::calibration::{Calibration, CalibrationMode};
use crate::consistency::{shared_values, AttrValue, DatasetAttr, Shared};
use crate::dataset::{Dataset, FilterParams, DEFAULT_GROUP};
use crate::metrics::Metric;
use flimari_core::{Error, Result, SignalLoader};
use std::collections::BTreeMap;
use std::path::Path;

/// Filter parameters where `None` leaves the dataset's value untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartialFilterParams {
    pub min_count: Option<u64>,
    pub max_count: Option<u64>,
    pub kernel_size: Option<usize>,
    pub repetition: Option<usize>,
}

impl PartialFilterParams {
    /// Overlay the `Some` fields onto `base`.
    #[must_use]
    pub fn merge(&self, base: FilterParams) -> FilterParams {
        FilterParams {
            min_count: self.min_count.unwrap_or(base.min_count),
            max_count: self.max_count.unwrap_or(base.max_count),
            kernel_size: self.kernel_size.unwrap_or(base.kernel_size),
            repetition: self.repetition.unwrap_or(base.repetition),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<FilterParams> for PartialFilterParams {
    fn from(params: FilterParams) -> Self {
        Self {
            min_count: Some(params.min_count),
            max_count: Some(params.max_count),
            kernel_size: Some(params.kernel_size),
            repetition: Some(params.repetition),
        }
    }
}

/// How a dataset's correction relates to the session calibration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CalibrationStatus {
    /// Never corrected.
    Uncalibrated,
    /// Corrected with the current calibration.
    Current,
    /// The calibration changed after the dataset was corrected.
    Stale,
}

#[derive(Debug)]
struct Entry {
    dataset: Dataset,
    calibrated_with: Option<u64>,
}

/// One calibration plus an ordered list of datasets.
#[derive(Debug, Default)]
pub struct Session {
    calibration: Calibration,
    generation: u64,
    entries: Vec<Entry>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing calibration.
    #[must_use]
    pub fn with_calibration(calibration: Calibration) -> Self {
        Self {
            calibration,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Load the calibration reference.
    ///
    /// # Errors
    /// Returns [`Error::Load`] if the loader fails.
    pub fn load_reference<L: SignalLoader + ?Sized>(
        &mut self,
        path: impl AsRef<Path>,
        channel: usize,
        loader: &L,
    ) -> Result<()> {
        self.calibration.load(path, channel, loader)?;
        self.generation += 1;
        Ok(())
    }

    pub fn set_calibration_mode(&mut self, mode: CalibrationMode) {
        if self.calibration.mode() != mode {
            self.calibration.set_mode(mode);
            self.generation += 1;
        }
    }

    /// Recompute calibration offsets.
    ///
    /// # Errors
    /// As [`Calibration::calibrate`].
    pub fn recalibrate(&mut self, frequency: f64, lifetime: f64) -> Result<()> {
        self.calibration.calibrate(frequency, lifetime)?;
        self.generation += 1;
        log::debug!("calibration generation {}", self.generation);
        Ok(())
    }

    /// Append a dataset and return its index.
    pub fn add_dataset(&mut self, dataset: Dataset) -> usize {
        self.entries.push(Entry {
            dataset,
            calibrated_with: None,
        });
        self.entries.len() - 1
    }

    /// Remove and return the dataset at `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index.
    pub fn remove_dataset(&mut self, index: usize) -> Result<Dataset> {
        self.check_index(index)?;
        Ok(self.entries.remove(index).dataset)
    }

    pub fn datasets(&self) -> impl ExactSizeIterator<Item = &Dataset> + Clone {
        self.entries.iter().map(|e| &e.dataset)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index.
    pub fn dataset(&self, index: usize) -> Result<&Dataset> {
        self.entries
            .get(index)
            .map(|e| &e.dataset)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    /// Correct the selected datasets with the session calibration.
    ///
    /// Datasets are processed in order; the first failure stops the batch and
    /// earlier datasets keep their new correction.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index (before any dataset
    /// is touched) and propagates correction errors.
    pub fn calibrate_datasets(&mut self, indices: &[usize]) -> Result<()> {
        self.check_indices(indices)?;
        for &index in indices {
            let entry = &mut self.entries[index];
            entry.dataset.calibrate_phasor(&self.calibration)?;
            entry.calibrated_with = Some(self.generation);
            log::debug!(
                "calibrated {} ({} mode)",
                entry.dataset.display_name(),
                self.calibration.mode()
            );
        }
        Ok(())
    }

    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index.
    pub fn calibration_status(&self, index: usize) -> Result<CalibrationStatus> {
        self.check_index(index)?;
        Ok(match self.entries[index].calibrated_with {
            None => CalibrationStatus::Uncalibrated,
            Some(g) if g == self.generation => CalibrationStatus::Current,
            Some(_) => CalibrationStatus::Stale,
        })
    }

    /// Write the `Some` fields of `params` onto each selected dataset and
    /// re-run its pipeline.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index (before any dataset
    /// is touched) and propagates pipeline errors.
    pub fn apply_filter_params(&mut self, indices: &[usize], params: PartialFilterParams) -> Result<()> {
        self.check_indices(indices)?;
        for &index in indices {
            let dataset = &mut self.entries[index].dataset;
            let merged = params.merge(dataset.filter_params());
            dataset.set_filter_params(merged)?;
        }
        Ok(())
    }

    /// Move the selected datasets into group `name`; an empty name means
    /// the default group.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index.
    pub fn assign_group(&mut self, indices: &[usize], name: &str) -> Result<()> {
        self.check_indices(indices)?;
        let name = name.trim();
        let name = if name.is_empty() { DEFAULT_GROUP } else { name };
        for &index in indices {
            self.entries[index].dataset.set_group(name);
        }
        Ok(())
    }

    /// Filter parameters shared by the selection.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index.
    pub fn shared_filter_params(&self, indices: &[usize]) -> Result<Vec<(DatasetAttr, Shared<AttrValue>)>> {
        self.shared_attributes(
            indices,
            &[
                DatasetAttr::MinCount,
                DatasetAttr::MaxCount,
                DatasetAttr::KernelSize,
                DatasetAttr::Repetition,
            ],
        )
    }

    /// Any attributes shared by the selection.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index.
    pub fn shared_attributes(
        &self,
        indices: &[usize],
        attributes: &[DatasetAttr],
    ) -> Result<Vec<(DatasetAttr, Shared<AttrValue>)>> {
        self.check_indices(indices)?;
        let selected: Vec<&Dataset> = indices.iter().map(|&i| &self.entries[i].dataset).collect();
        Ok(shared_values(selected.iter().copied(), attributes))
    }

    /// Summary values of a headline `metric`, concatenated per group with
    /// NaN removed.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] for a bad index and
    /// [`Error::InvalidConfiguration`] for a metric not carried by summaries.
    pub fn pooled_by_group(&self, indices: &[usize], metric: Metric) -> Result<BTreeMap<String, Vec<f64>>> {
        self.check_indices(indices)?;
        let mut pooled: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for &index in indices {
            let summary = self.entries[index].dataset.summarize();
            let values = summary.values(metric).ok_or_else(|| {
                Error::invalid_config(format!("{metric} is not a summary metric"))
            })?;
            pooled
                .entry(summary.group)
                .or_default()
                .extend(values.into_iter().filter(|v| !v.is_nan()));
        }
        Ok(pooled)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(Error::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
        }
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        indices.iter().try_for_each(|&i| self.check_index(i))
    }
}
