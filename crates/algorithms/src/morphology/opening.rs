//! Binary opening of a change map
//!
//! `iterations` erosions followed by `iterations` dilations. Removes specks
//! and thin protrusions smaller than the structuring element while keeping
//! larger changed regions.

use changemap_core::raster::Raster;
use changemap_core::{Algorithm, Result};

use super::dilate::dilate;
use super::element::StructuringElement;
use super::erode::erode;

/// Parameters for map cleaning
#[derive(Debug, Clone)]
pub struct CleanParams {
    /// Structuring element shape
    pub element: StructuringElement,
    /// Erosions (and then dilations) applied
    pub iterations: usize,
}

impl Default for CleanParams {
    fn default() -> Self {
        Self {
            element: StructuringElement::default(),
            iterations: 1,
        }
    }
}

/// Opening stage applied to the raw change map
#[derive(Debug, Clone, Default)]
pub struct MapCleaner;

impl MapCleaner {
    pub const NAME: &'static str = "MapCleaner";
}

impl Algorithm for MapCleaner {
    type Input<'a> = &'a Raster<u8>;
    type Output = Raster<u8>;
    type Params = CleanParams;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Morphological opening (erosion then dilation) of a binary change map"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        opening(input, &params.element, params.iterations)
    }
}

/// Open a binary map.
///
/// The result never sets a pixel that is unset in `map`. With
/// `iterations == 0` the map is returned unchanged.
///
/// # Arguments
/// * `map` - Binary input map (non-zero = set)
/// * `element` - Structuring element defining the neighborhood shape
/// * `iterations` - Number of erosions, then the same number of dilations
pub fn opening(map: &Raster<u8>, element: &StructuringElement, iterations: usize) -> Result<Raster<u8>> {
    element.validate()?;
    if iterations == 0 {
        return Ok(map.clone());
    }

    let mut current = erode(map, element)?;
    for _ in 1..iterations {
        current = erode(&current, element)?;
    }
    for _ in 0..iterations {
        current = dilate(&current, element)?;
    }

    // Replicated borders can let the dilation reach past what the erosion
    // kept; clip to the input.
    let clipped = Raster::from_fn(map.rows(), map.cols(), |r, c| {
        let kept = unsafe { current.get_unchecked(r, c) } != 0;
        let set = unsafe { map.get_unchecked(r, c) } != 0;
        u8::from(kept && set)
    });

    tracing::debug!(
        "opening with {:?} x{}: {} -> {} set pixels",
        element,
        iterations,
        map.count_where(|v| v != 0),
        clipped.count_where(|v| v != 0)
    );
    Ok(clipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(rows: usize, cols: usize, r0: usize, c0: usize, side: usize) -> Raster<u8> {
        Raster::from_fn(rows, cols, |r, c| {
            u8::from(r >= r0 && r < r0 + side && c >= c0 && c < c0 + side)
        })
    }

    #[test]
    fn test_opening_removes_speck() {
        let mut map = block(12, 12, 2, 2, 4);
        map.set(9, 9, 1).unwrap();
        let result = opening(&map, &StructuringElement::Square(1), 1).unwrap();
        assert_eq!(result, block(12, 12, 2, 2, 4));
    }

    #[test]
    fn test_opening_keeps_corner_block() {
        let map = block(8, 8, 0, 0, 4);
        let result = opening(&map, &StructuringElement::Square(1), 1).unwrap();
        assert_eq!(result, map);
    }

    #[test]
    fn test_opening_is_anti_extensive() {
        let map = Raster::from_fn(10, 10, |r, c| u8::from((r * 7 + c * 3) % 5 < 3));
        for element in [
            StructuringElement::Square(1),
            StructuringElement::Cross(1),
            StructuringElement::Disk(2),
        ] {
            let result = opening(&map, &element, 2).unwrap();
            for r in 0..10 {
                for c in 0..10 {
                    if result.get(r, c).unwrap() == 1 {
                        assert_eq!(map.get(r, c).unwrap(), 1, "({r}, {c}) added by {element:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_zero_iterations_is_identity() {
        let map = Raster::from_fn(4, 4, |r, c| u8::from(r == c));
        assert_eq!(opening(&map, &StructuringElement::Square(1), 0).unwrap(), map);
    }

    #[test]
    fn test_more_iterations_remove_larger_features() {
        let map = block(15, 15, 5, 5, 4);
        let once = MapCleaner.execute_default(&map).unwrap();
        assert_eq!(once.count_where(|v| v == 1), 16);
        let twice = MapCleaner
            .execute(&map, &CleanParams { iterations: 2, ..Default::default() })
            .unwrap();
        // 4x4 does not survive two erosions with a 3x3 element
        assert_eq!(twice.count_where(|v| v == 1), 0);
    }
}
