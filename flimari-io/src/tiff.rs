//! Multi-page TIFF photon-count stacks.
//!
//! Each page is one sample along the decay axis. Files with several
//! channels store them channel-major: pages `c * samples .. (c + 1) * samples`
//! belong to channel `c`.

use crate::{Error, Result};
use flimari_core::{LoadError, Signal, SignalLoader, FREQUENCY_ATTR};
use ndarray::{Array2, Array3, Axis};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

/// Loader for grey integer TIFF stacks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TiffSignalLoader {
    channels: usize,
    frequency: Option<f64>,
}

impl Default for TiffSignalLoader {
    fn default() -> Self {
        Self {
            channels: 1,
            frequency: None,
        }
    }
}

impl TiffSignalLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels interleaved in the page sequence.
    #[must_use]
    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    /// Laser frequency (MHz) to attach as the `frequency` attribute.
    ///
    /// TIFF files carry no frequency; without this the signal has none.
    #[must_use]
    pub fn with_frequency(mut self, frequency: f64) -> Self {
        self.frequency = Some(frequency);
        self
    }

    /// Read channel `channel` of `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be decoded, a page is not a grey
    /// unsigned integer image, pages differ in size, the page count is not a
    /// multiple of the channel count, or `channel` is out of range.
    pub fn read(&self, path: impl AsRef<Path>, channel: usize) -> Result<Signal> {
        let path = path.as_ref();
        if channel >= self.channels {
            return Err(Error::ChannelOutOfRange {
                channel,
                channels: self.channels,
            });
        }

        let pages = read_pages(path)?;
        if pages.is_empty() || pages.len() % self.channels != 0 {
            return Err(Error::InvalidFormat(format!(
                "{} pages cannot be split into {} channels",
                pages.len(),
                self.channels
            )));
        }
        let samples = pages.len() / self.channels;
        let (ny, nx) = pages[0].dim();

        let mut counts = Array3::<u32>::zeros((samples, ny, nx));
        for (mut plane, page) in counts
            .axis_iter_mut(Axis(0))
            .zip(&pages[channel * samples..(channel + 1) * samples])
        {
            plane.assign(page);
        }
        log::debug!(
            "read {} channel {channel}: {samples} samples of {ny}x{nx}",
            path.display()
        );

        let mut signal = Signal::new(counts);
        if let Some(frequency) = self.frequency {
            signal = signal.with_attr(FREQUENCY_ATTR, frequency);
        }
        Ok(signal)
    }
}

impl SignalLoader for TiffSignalLoader {
    fn load(&self, path: &Path, channel: usize) -> std::result::Result<Signal, LoadError> {
        Ok(self.read(path, channel)?)
    }
}

fn read_pages(path: &Path) -> Result<Vec<Array2<u32>>> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let mut pages: Vec<Array2<u32>> = Vec::new();
    loop {
        let (width, height) = decoder.dimensions()?;
        match decoder.colortype()? {
            ColorType::Gray(8 | 16 | 32) => {}
            other => {
                return Err(Error::InvalidFormat(format!(
                    "page {} has unsupported colour type {other:?}",
                    pages.len()
                )))
            }
        }
        let shape = (height as usize, width as usize);
        let data: Vec<u32> = match decoder.read_image()? {
            DecodingResult::U8(v) => v.into_iter().map(u32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(u32::from).collect(),
            DecodingResult::U32(v) => v,
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "page {} is not unsigned integer data",
                    pages.len()
                )))
            }
        };
        let page = Array2::from_shape_vec(shape, data)
            .map_err(|e| Error::InvalidFormat(format!("page {}: {e}", pages.len())))?;
        if let Some(first) = pages.first() {
            if first.dim() != page.dim() {
                return Err(Error::InvalidFormat(format!(
                    "page {} is {:?}, expected {:?}",
                    pages.len(),
                    page.dim(),
                    first.dim()
                )));
            }
        }
        pages.push(page);

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tiff::encoder::{colortype, TiffEncoder};

    fn write_stack(pages: &[Vec<u16>], width: u32, height: u32) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut encoder = TiffEncoder::new(file.reopen().unwrap()).unwrap();
        for page in pages {
            encoder
                .write_image::<colortype::Gray16>(width, height, page)
                .unwrap();
        }
        file
    }

    #[test]
    fn test_read_single_channel() {
        let file = write_stack(&[vec![1, 2, 3, 4, 5, 6], vec![6, 5, 4, 3, 2, 1]], 3, 2);
        let signal = TiffSignalLoader::new()
            .with_frequency(40.0)
            .read(file.path(), 0)
            .unwrap();
        assert_eq!(signal.counts.dim(), (2, 2, 3));
        assert_eq!(signal.counts[[0, 1, 0]], 4);
        assert_eq!(signal.counts[[1, 0, 0]], 6);
        assert_eq!(signal.attr(FREQUENCY_ATTR), Some(40.0));
    }

    #[test]
    fn test_channel_major_layout() {
        let pages: Vec<Vec<u16>> = (0..6).map(|i| vec![i; 4]).collect();
        let file = write_stack(&pages, 2, 2);
        let loader = TiffSignalLoader::new().with_channels(2);
        let second = loader.read(file.path(), 1).unwrap();
        assert_eq!(second.samples(), 3);
        assert_eq!(second.counts[[0, 0, 0]], 3);
        assert_eq!(second.counts[[2, 1, 1]], 5);

        assert!(matches!(
            loader.read(file.path(), 2),
            Err(Error::ChannelOutOfRange { channels: 2, .. })
        ));
        assert!(matches!(
            TiffSignalLoader::new().with_channels(4).read(file.path(), 0),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_float_pages_rejected() {
        let file = NamedTempFile::new().unwrap();
        let mut encoder = TiffEncoder::new(file.reopen().unwrap()).unwrap();
        encoder
            .write_image::<colortype::Gray32Float>(1, 1, &[0.5])
            .unwrap();
        drop(encoder);
        assert!(matches!(
            TiffSignalLoader::new().read(file.path(), 0),
            Err(Error::InvalidFormat(_))
        ));
    }
}
