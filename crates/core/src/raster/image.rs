//! Multi-band image made of co-registered single-band rasters

use super::Raster;
use crate::error::{Error, Result};

/// An H×W image with one or more channels.
///
/// Each channel is a [`Raster<f64>`]; all channels share the same shape.
/// Images are the input artifact of the change-detection chain and are
/// never mutated after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    bands: Vec<Raster<f64>>,
}

impl Image {
    /// Build an image from its bands.
    ///
    /// Fails when no band is given or when band shapes differ.
    pub fn new(bands: Vec<Raster<f64>>) -> Result<Self> {
        let Some(first) = bands.first() else {
            return Err(Error::invalid_parameter(
                "bands",
                0,
                "an image needs at least one band",
            ));
        };
        let (rows, cols) = first.shape();
        if let Some(bad) = bands.iter().find(|b| b.shape() != (rows, cols)) {
            return Err(Error::ShapeMismatch {
                stage: "Image",
                expected: (rows, cols, bands.len()),
                actual: (bad.rows(), bad.cols(), bands.len()),
            });
        }
        Ok(Self { bands })
    }

    /// Single-band image
    pub fn single(band: Raster<f64>) -> Self {
        Self { bands: vec![band] }
    }

    /// Split interleaved (chunky) samples `[r, c, band]` into an image
    pub fn from_interleaved(samples: &[f64], rows: usize, cols: usize, band_count: usize) -> Result<Self> {
        if band_count == 0 || samples.len() != rows * cols * band_count {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        let bands = (0..band_count)
            .map(|b| Raster::from_fn(rows, cols, |r, c| samples[(r * cols + c) * band_count + b]))
            .collect();
        Ok(Self { bands })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.bands[0].rows()
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.bands[0].cols()
    }

    /// Dimensions as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].shape()
    }

    /// Dimensions as (rows, cols, bands), the form used in shape errors
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.rows(), self.cols(), self.bands.len())
    }

    /// Number of channels
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Borrow one channel
    pub fn band(&self, index: usize) -> Option<&Raster<f64>> {
        self.bands.get(index)
    }

    /// Borrow all channels
    pub fn bands(&self) -> &[Raster<f64>] {
        &self.bands
    }
}

impl From<Raster<f64>> for Image {
    fn from(band: Raster<f64>) -> Self {
        Image::single(band)
    }
}
