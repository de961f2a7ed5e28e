//! Binary dilation
//!
//! A pixel is set if any cell under the reflected structuring element is
//! set. Cells past the map edge take the value of the nearest edge cell.

use changemap_core::raster::Raster;
use changemap_core::{Algorithm, Result};

use super::element::StructuringElement;
use super::erode::sweep;

/// Parameters for binary dilation
#[derive(Debug, Clone, Default)]
pub struct DilateParams {
    /// Structuring element shape
    pub element: StructuringElement,
}

/// Dilation algorithm
#[derive(Debug, Clone, Default)]
pub struct Dilate;

impl Algorithm for Dilate {
    type Input<'a> = &'a Raster<u8>;
    type Output = Raster<u8>;
    type Params = DilateParams;

    fn name(&self) -> &'static str {
        "Dilate"
    }

    fn description(&self) -> &'static str {
        "Binary dilation over the reflected structuring element"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        dilate(input, &params.element)
    }
}

/// Dilate a binary map (non-zero = set).
///
/// # Arguments
/// * `map` - Binary input map
/// * `element` - Structuring element; its reflection is applied
pub fn dilate(map: &Raster<u8>, element: &StructuringElement) -> Result<Raster<u8>> {
    element.validate()?;
    let offsets = element.reflected_offsets();
    sweep(map, &offsets, |hits, _| hits > 0)
}
