//! Per-pixel metrics and image-level statistics.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use flimari_core::Error;
use std::fmt;
use std::str::FromStr;

/// Per-pixel quantity exposed by a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Metric {
    PhotonCount,
    G,
    S,
    PhiLifetime,
    MLifetime,
    ProjLifetime,
    AvgLifetime,
    GeoTau1,
    GeoTau2,
    GeoFrac1,
    GeoFrac2,
}

impl Metric {
    /// Every metric.
    pub const ALL: [Self; 11] = [
        Self::PhotonCount,
        Self::G,
        Self::S,
        Self::PhiLifetime,
        Self::MLifetime,
        Self::ProjLifetime,
        Self::AvgLifetime,
        Self::GeoTau1,
        Self::GeoTau2,
        Self::GeoFrac1,
        Self::GeoFrac2,
    ];

    /// Metrics carried by a dataset summary, in export column order.
    pub const HEADLINE: [Self; 5] = [
        Self::PhotonCount,
        Self::PhiLifetime,
        Self::MLifetime,
        Self::ProjLifetime,
        Self::AvgLifetime,
    ];

    /// Stable key, as used in exports and on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PhotonCount => "photon_count",
            Self::G => "g",
            Self::S => "s",
            Self::PhiLifetime => "phi_lifetime",
            Self::MLifetime => "m_lifetime",
            Self::ProjLifetime => "proj_lifetime",
            Self::AvgLifetime => "avg_lifetime",
            Self::GeoTau1 => "geo_tau1",
            Self::GeoTau2 => "geo_tau2",
            Self::GeoFrac1 => "geo_frac1",
            Self::GeoFrac2 => "geo_frac2",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownKey {
                kind: "metric",
                key: s.to_string(),
            })
    }
}

/// Reduction of a metric's pixel values to one number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Stat {
    Median,
    Mean,
    Std,
    Iqr,
    P10,
    P90,
}

impl Stat {
    /// Every statistic.
    pub const ALL: [Self; 6] = [
        Self::Median,
        Self::Mean,
        Self::Std,
        Self::Iqr,
        Self::P10,
        Self::P90,
    ];

    /// Stable key.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Median => "median",
            Self::Mean => "mean",
            Self::Std => "std",
            Self::Iqr => "iqr",
            Self::P10 => "p10",
            Self::P90 => "p90",
        }
    }

    /// Reduce `values` (reordered in place). Empty input gives NaN.
    ///
    /// `Std` is the population standard deviation; percentiles interpolate
    /// linearly between closest ranks.
    #[must_use]
    pub fn reduce(self, values: &mut [f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        match self {
            Self::Median => percentile(values, 50.0),
            Self::Mean => mean(values),
            Self::Std => {
                let mu = mean(values);
                let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
                var.sqrt()
            }
            Self::Iqr => percentile(values, 75.0) - percentile(values, 25.0),
            Self::P10 => percentile(values, 10.0),
            Self::P90 => percentile(values, 90.0),
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Stat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::UnknownKey {
                kind: "statistic",
                key: s.to_string(),
            })
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Percentile `q` (0-100) of non-empty `values`, sorting them in place.
fn percentile(values: &mut [f64], q: f64) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}
