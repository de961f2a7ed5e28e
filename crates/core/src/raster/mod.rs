//! Raster data structures and operations

mod element;
mod grid;
mod image;
mod neighborhood;

pub use element::RasterElement;
pub use grid::{Raster, RasterStatistics};
pub use image::Image;
pub use neighborhood::{clamp_index, Neighborhood, Window};
