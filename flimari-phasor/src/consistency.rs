//! Agreement of settings across a selection of datasets.

use crate::dataset::Dataset;
use std::fmt;

/// Dataset attribute compared by [`shared_values`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DatasetAttr {
    MinCount,
    MaxCount,
    KernelSize,
    Repetition,
    Channel,
    Group,
    Frequency,
}

impl DatasetAttr {
    pub const ALL: [Self; 7] = [
        Self::MinCount,
        Self::MaxCount,
        Self::KernelSize,
        Self::Repetition,
        Self::Channel,
        Self::Group,
        Self::Frequency,
    ];

    /// Value of this attribute on `dataset`.
    #[must_use]
    pub fn value_of(self, dataset: &Dataset) -> AttrValue {
        let params = dataset.filter_params();
        match self {
            Self::MinCount => AttrValue::Int(params.min_count),
            Self::MaxCount => AttrValue::Int(params.max_count),
            Self::KernelSize => AttrValue::Int(params.kernel_size as u64),
            Self::Repetition => AttrValue::Int(params.repetition as u64),
            Self::Channel => AttrValue::Int(dataset.channel() as u64),
            Self::Group => AttrValue::Text(dataset.group().to_string()),
            Self::Frequency => AttrValue::Float(dataset.frequency()),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MinCount => "min_count",
            Self::MaxCount => "max_count",
            Self::KernelSize => "kernel_size",
            Self::Repetition => "repetition",
            Self::Channel => "channel",
            Self::Group => "group",
            Self::Frequency => "frequency",
        }
    }
}

impl fmt::Display for DatasetAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Attribute value as compared across datasets.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum AttrValue {
    Int(u64),
    Float(f64),
    Text(String),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Either the single value every dataset agrees on, or `Mixed`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Shared<T> {
    Value(T),
    Mixed,
}

impl<T> Shared<T> {
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Mixed => None,
        }
    }

    #[must_use]
    pub fn is_mixed(&self) -> bool {
        matches!(self, Self::Mixed)
    }
}

/// Compare `attributes` across `datasets`.
///
/// Each attribute maps to `Shared::Value` if all datasets agree and to
/// `Shared::Mixed` otherwise. An empty selection is `Mixed` throughout.
#[must_use]
pub fn shared_values<'a, I>(datasets: I, attributes: &[DatasetAttr]) -> Vec<(DatasetAttr, Shared<AttrValue>)>
where
    I: IntoIterator<Item = &'a Dataset>,
    I::IntoIter: Clone,
{
    let datasets = datasets.into_iter();
    attributes
        .iter()
        .map(|&attr| (attr, shared(datasets.clone().map(|d| attr.value_of(d)))))
        .collect()
}

/// Fold an iterator of values into [`Shared`].
#[must_use]
pub fn shared<T: PartialEq>(mut values: impl Iterator<Item = T>) -> Shared<T> {
    let Some(first) = values.next() else {
        return Shared::Mixed;
    };
    for v in values {
        if v != first {
            return Shared::Mixed;
        }
    }
    Shared::Value(first)
}
