//! CSV export of dataset summaries.

use crate::Result;
use flimari_phasor::{Dataset, Metric, Summary};
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writer for per-pixel summary rows.
///
/// One row per masked-in pixel, one column per headline metric. NaN is
/// written as an empty cell.
pub struct SummaryCsvWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl SummaryCsvWriter<File> {
    /// Creates a writer on a new file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            writer: csv::Writer::from_path(path)?,
        })
    }
}

impl<W: Write> SummaryCsvWriter<W> {
    /// Wraps any writer.
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Writes the header and every row of `summary`.
    ///
    /// # Errors
    /// Returns an error if writing fails.
    pub fn write_summary(&mut self, summary: &Summary) -> Result<()> {
        self.writer.write_record(Metric::HEADLINE.map(Metric::as_str))?;
        for i in 0..summary.len() {
            self.writer.write_record([
                summary.photon_count[i].to_string(),
                format_cell(summary.phi_lifetime[i]),
                format_cell(summary.m_lifetime[i]),
                format_cell(summary.proj_lifetime[i]),
                format_cell(summary.avg_lifetime[i]),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Flushes and returns the inner writer.
    ///
    /// # Errors
    /// Returns an error if the final flush fails.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| crate::Error::Io(e.into_error()))
    }
}

fn format_cell(value: f64) -> String {
    if value.is_nan() {
        String::new()
    } else {
        value.to_string()
    }
}

/// Outcome of [`export_summaries`].
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Files written.
    pub exported: Vec<PathBuf>,
    /// Display names that failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// Write one CSV per dataset into `dir`.
///
/// File names come from [`Dataset::display_name`] with characters that are
/// unsafe in file names replaced by `_`. Names already taken in `dir` (or
/// earlier in the batch) get a ` (2)`, ` (3)`, ... suffix. A failing dataset
/// is recorded in the report and does not stop the batch.
///
/// # Errors
/// Returns an error only if `dir` cannot be created.
pub fn export_summaries<'a, I>(dir: impl AsRef<Path>, datasets: I) -> Result<ExportReport>
where
    I: IntoIterator<Item = &'a Dataset>,
{
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let mut report = ExportReport::default();
    let mut taken = HashSet::new();
    for dataset in datasets {
        let display_name = dataset.display_name();
        let path = unique_path(dir, &sanitize_file_name(&display_name), &mut taken);
        let result =
            SummaryCsvWriter::create(&path).and_then(|mut w| w.write_summary(&dataset.summarize()));
        match result {
            Ok(()) => {
                log::debug!("exported {display_name} to {}", path.display());
                report.exported.push(path);
            }
            Err(e) => {
                log::warn!("export of {display_name} failed: {e}");
                report.failed.push((display_name, e.to_string()));
            }
        }
    }
    Ok(report)
}

/// Replace path separators and other characters unsafe in file names.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.');
    if cleaned.is_empty() {
        "dataset".to_string()
    } else {
        cleaned.to_string()
    }
}

fn unique_path(dir: &Path, stem: &str, taken: &mut HashSet<PathBuf>) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.csv"));
    let mut n = 2;
    while candidate.exists() || taken.contains(&candidate) {
        candidate = dir.join(format!("{stem} ({n}).csv"));
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}
