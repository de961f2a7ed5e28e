//! Neighborhood shapes and edge-replicated sampling windows

use super::{Raster, RasterElement};
use crate::error::{Error, Result};

/// Defines a neighborhood pattern around a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighborhood {
    /// Square neighborhood of given radius (side = 2*radius + 1)
    Square(usize),
    /// Plus-shaped neighborhood of given radius
    Cross(usize),
    /// Circular neighborhood of given radius (in cells)
    Circle(usize),
}

impl Neighborhood {
    /// Get the radius of the neighborhood
    pub fn radius(&self) -> usize {
        match self {
            Neighborhood::Square(r) | Neighborhood::Cross(r) | Neighborhood::Circle(r) => *r,
        }
    }

    /// Get the size of the neighborhood (width and height)
    pub fn size(&self) -> usize {
        self.radius() * 2 + 1
    }

    /// Check if a relative position is within this neighborhood
    pub fn contains(&self, dr: isize, dc: isize) -> bool {
        let r = self.radius() as isize;
        match self {
            Neighborhood::Square(_) => dr.abs() <= r && dc.abs() <= r,
            Neighborhood::Cross(_) => {
                (dr.abs() <= r && dc == 0) || (dr == 0 && dc.abs() <= r)
            }
            Neighborhood::Circle(_) => {
                let dist = ((dr * dr + dc * dc) as f64).sqrt();
                dist <= r as f64
            }
        }
    }

    /// Relative positions in this neighborhood, row-major
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let r = self.radius() as isize;
        let mut offsets = Vec::new();

        for dr in -r..=r {
            for dc in -r..=r {
                if self.contains(dr, dc) {
                    offsets.push((dr, dc));
                }
            }
        }

        offsets
    }
}

/// Clamp a possibly negative or too-large index into `0..len` (border replication).
///
/// `len` must be non-zero.
#[inline]
pub fn clamp_index(index: isize, len: usize) -> usize {
    index.clamp(0, len as isize - 1) as usize
}

/// Square sampling window of side `h`, used both for non-overlapping tiles
/// and for the per-pixel sliding neighborhood.
///
/// For a sliding window the anchor pixel sits at offset `h / 2` in each
/// direction, so for even `h` the extra sample lies above and to the left
/// of the anchor: `h = 2` covers `{-1, 0}`, `h = 5` covers `{-2..=2}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    side: usize,
}

impl Window {
    /// Create a window, rejecting a zero side
    pub fn new(side: usize) -> Result<Self> {
        if side == 0 {
            return Err(Error::invalid_parameter(
                "window",
                side,
                "window side must be at least 1",
            ));
        }
        Ok(Self { side })
    }

    /// Side length h
    pub fn side(&self) -> usize {
        self.side
    }

    /// Number of samples h²
    pub fn len(&self) -> usize {
        self.side * self.side
    }

    /// Always false; a window holds at least one sample
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Number of samples before the anchor along each axis
    pub fn lead(&self) -> usize {
        self.side / 2
    }

    /// Number of tiles needed to cover `len` cells (ceil division)
    pub fn tiles_along(&self, len: usize) -> usize {
        len.div_ceil(self.side)
    }

    /// Flatten the tile whose top-left corner is `(row0, col0)` into `out`,
    /// replicating the border past the raster edge.
    pub fn gather_tile<T: RasterElement>(
        &self,
        raster: &Raster<T>,
        row0: usize,
        col0: usize,
        out: &mut [f64],
    ) {
        self.gather(raster, row0 as isize, col0 as isize, out);
    }

    /// Flatten the sliding neighborhood anchored at `(row, col)` into `out`,
    /// replicating the border past the raster edge.
    pub fn gather_centered<T: RasterElement>(
        &self,
        raster: &Raster<T>,
        row: usize,
        col: usize,
        out: &mut [f64],
    ) {
        let lead = self.lead() as isize;
        self.gather(raster, row as isize - lead, col as isize - lead, out);
    }

    fn gather<T: RasterElement>(
        &self,
        raster: &Raster<T>,
        top: isize,
        left: isize,
        out: &mut [f64],
    ) {
        debug_assert_eq!(out.len(), self.len());
        let (rows, cols) = raster.shape();
        let side = self.side as isize;
        let view = raster.view();
        for dr in 0..side {
            let r = clamp_index(top + dr, rows);
            for dc in 0..side {
                let c = clamp_index(left + dc, cols);
                out[(dr * side + dc) as usize] = view[(r, c)].to_f64().unwrap_or(0.0);
            }
        }
    }
}
