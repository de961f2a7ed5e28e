//! Collaborator interfaces for loading inputs and persisting outputs
//!
//! The change-detection chain never touches files itself. Callers hand it
//! [`Image`]s obtained from an [`ImageSource`] and pass its artifacts to a
//! [`RasterSink`]. The TIFF adapter in this module is the stock
//! implementation used by the command-line tool.

mod native;

use crate::error::Result;
use crate::raster::{Image, Raster, RasterElement};

pub use native::{
    read_image, read_image_from_buffer, write_raster, write_raster_to_buffer, TiffDirectory,
    TiffFile,
};

/// Supplies an already-aligned image
pub trait ImageSource {
    /// Load the image
    fn load(&self) -> Result<Image>;
}

/// Receives named output rasters
pub trait RasterSink {
    /// Persist `raster` under `name`
    fn write<T: RasterElement>(&mut self, name: &str, raster: &Raster<T>) -> Result<()>;
}
