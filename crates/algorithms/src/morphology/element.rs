//! Structuring elements for binary morphology
//!
//! An element is a set of (dr, dc) offsets around the center pixel.

use serde::{Deserialize, Serialize};
use changemap_core::raster::Neighborhood;
use changemap_core::{Error, Result};

/// Shape of a structuring element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructuringElement {
    /// Square element of given radius (side = 2*radius + 1)
    Square(usize),
    /// Cross (plus-shaped) element of given radius
    Cross(usize),
    /// Disk element of given radius
    Disk(usize),
    /// User-provided boolean mask (must be odd-sized and square)
    Custom(Vec<Vec<bool>>),
}

impl Default for StructuringElement {
    fn default() -> Self {
        StructuringElement::Square(1)
    }
}

impl StructuringElement {
    /// Validate the structuring element, returning an error for invalid configurations
    pub fn validate(&self) -> Result<()> {
        match self {
            StructuringElement::Square(r) | StructuringElement::Cross(r) | StructuringElement::Disk(r) => {
                if *r == 0 {
                    return Err(Error::invalid_parameter("radius", 0, "structuring element radius must be at least 1"));
                }
                Ok(())
            }
            StructuringElement::Custom(mask) => {
                let size = mask.len();
                if size == 0 {
                    return Err(Error::invalid_parameter("custom_mask", "empty", "custom mask must not be empty"));
                }
                if size % 2 == 0 {
                    return Err(Error::invalid_parameter(
                        "custom_mask",
                        format!("{size}x{size}"),
                        "custom mask size must be odd",
                    ));
                }
                if let Some(row) = mask.iter().find(|row| row.len() != size) {
                    return Err(Error::invalid_parameter(
                        "custom_mask",
                        format!("row length {}", row.len()),
                        format!("custom mask must be square (expected {size})"),
                    ));
                }
                if !mask.iter().flatten().any(|&on| on) {
                    return Err(Error::invalid_parameter("custom_mask", "all false", "custom mask has no active cell"));
                }
                Ok(())
            }
        }
    }

    /// Get the radius of the structuring element
    pub fn radius(&self) -> usize {
        match self {
            StructuringElement::Square(r)
            | StructuringElement::Cross(r)
            | StructuringElement::Disk(r) => *r,
            StructuringElement::Custom(mask) => mask.len() / 2,
        }
    }

    /// (dr, dc) offsets of the active cells, row-major
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        match self {
            StructuringElement::Square(r) => Neighborhood::Square(*r).offsets(),
            StructuringElement::Cross(r) => Neighborhood::Cross(*r).offsets(),
            StructuringElement::Disk(r) => Neighborhood::Circle(*r).offsets(),
            StructuringElement::Custom(mask) => {
                let center = (mask.len() / 2) as isize;
                mask.iter()
                    .enumerate()
                    .flat_map(|(r, row)| {
                        row.iter()
                            .enumerate()
                            .filter(|(_, active)| **active)
                            .map(move |(c, _)| (r as isize - center, c as isize - center))
                    })
                    .collect()
            }
        }
    }

    /// Offsets of the element mirrored through its center
    pub fn reflected_offsets(&self) -> Vec<(isize, isize)> {
        self.offsets().into_iter().map(|(dr, dc)| (-dr, -dc)).collect()
    }
}
