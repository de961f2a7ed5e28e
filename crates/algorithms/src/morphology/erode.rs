//! Binary erosion
//!
//! A pixel stays set only if every cell under the structuring element is
//! set. Cells past the map edge take the value of the nearest edge cell.

use ndarray::Array2;
use crate::maybe_rayon::*;
use changemap_core::raster::{clamp_index, Raster};
use changemap_core::{Algorithm, Error, Result};

use super::element::StructuringElement;

/// Parameters for binary erosion
#[derive(Debug, Clone, Default)]
pub struct ErodeParams {
    /// Structuring element shape
    pub element: StructuringElement,
}

/// Erosion algorithm
#[derive(Debug, Clone, Default)]
pub struct Erode;

impl Algorithm for Erode {
    type Input<'a> = &'a Raster<u8>;
    type Output = Raster<u8>;
    type Params = ErodeParams;

    fn name(&self) -> &'static str {
        "Erode"
    }

    fn description(&self) -> &'static str {
        "Binary erosion over a structuring element"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        erode(input, &params.element)
    }
}

/// Erode a binary map (non-zero = set).
///
/// # Arguments
/// * `map` - Binary input map
/// * `element` - Structuring element defining the neighborhood shape
pub fn erode(map: &Raster<u8>, element: &StructuringElement) -> Result<Raster<u8>> {
    element.validate()?;
    let offsets = element.offsets();
    sweep(map, &offsets, |hits, total| hits == total)
}

/// Visit every pixel, count set cells under `offsets` (border-replicated)
/// and keep the pixel when `keep(hits, offsets.len())` holds.
pub(super) fn sweep<F>(map: &Raster<u8>, offsets: &[(isize, isize)], keep: F) -> Result<Raster<u8>>
where
    F: Fn(usize, usize) -> bool + Sync + Send,
{
    let (rows, cols) = map.shape();
    if map.is_empty() {
        return Ok(map.clone());
    }

    let data: Vec<u8> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![0u8; cols];
            for (col, out) in row_data.iter_mut().enumerate() {
                let mut hits = 0;
                for &(dr, dc) in offsets {
                    let nr = clamp_index(row as isize + dr, rows);
                    let nc = clamp_index(col as isize + dc, cols);
                    if unsafe { map.get_unchecked(nr, nc) } != 0 {
                        hits += 1;
                    }
                }
                *out = u8::from(keep(hits, offsets.len()));
            }
            row_data
        })
        .collect();

    let array = Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(Raster::from_array(array))
}
