//! Block sampling of the difference image
//!
//! Two extraction modes share one vector layout (row-major h×h):
//! - non-overlapping tiles, used to estimate the covariance structure
//! - a sliding neighborhood per pixel, used for projection
//!
//! Both pad past the raster edge by border replication, so every vector
//! holds exactly h² samples.

use ndarray::{Array2, ArrayView1};
use changemap_core::raster::{Raster, Window};
use changemap_core::{Algorithm, Error, Result};

use crate::maybe_rayon::*;

/// Ordered collection of flattened h×h tiles.
///
/// Row `i` of [`BlockDataset::blocks`] is tile `i` in row-major tile order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDataset {
    blocks: Array2<f64>,
    window: Window,
    tiles: (usize, usize),
}

impl BlockDataset {
    /// One row per block, h² columns
    pub fn blocks(&self) -> &Array2<f64> {
        &self.blocks
    }

    /// Block `index` as a vector
    pub fn block(&self, index: usize) -> ArrayView1<'_, f64> {
        self.blocks.row(index)
    }

    /// Number of blocks N
    pub fn len(&self) -> usize {
        self.blocks.nrows()
    }

    /// Whether the dataset holds no block
    pub fn is_empty(&self) -> bool {
        self.blocks.nrows() == 0
    }

    /// Block vector length h²
    pub fn dim(&self) -> usize {
        self.blocks.ncols()
    }

    /// Sampling window
    pub fn window(&self) -> Window {
        self.window
    }

    /// Tile grid as (tile rows, tile cols)
    pub fn tiles(&self) -> (usize, usize) {
        self.tiles
    }
}

/// Parameters for block sampling
#[derive(Debug, Clone, Copy)]
pub struct BlockParams {
    /// Window side h
    pub window: usize,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self { window: 5 }
    }
}

/// Block sampling stage
#[derive(Debug, Clone, Default)]
pub struct BlockSampler;

impl BlockSampler {
    pub const NAME: &'static str = "BlockSampler";
}

impl Algorithm for BlockSampler {
    type Input<'a> = &'a Raster<f64>;
    type Output = BlockDataset;
    type Params = BlockParams;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Tile the difference image into flattened non-overlapping h×h blocks"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        sample_blocks(input, Window::new(params.window)?)
    }
}

/// Tile `diff` into ⌈H/h⌉·⌈W/h⌉ flattened blocks in row-major tile order.
///
/// # Arguments
/// * `diff` - Difference image
/// * `window` - Tile window (side h)
pub fn sample_blocks(diff: &Raster<f64>, window: Window) -> Result<BlockDataset> {
    if diff.is_empty() {
        return Err(Error::InvalidDimensions {
            width: diff.cols(),
            height: diff.rows(),
        });
    }

    let (rows, cols) = diff.shape();
    let side = window.side();
    let tile_rows = window.tiles_along(rows);
    let tile_cols = window.tiles_along(cols);
    let dim = window.len();

    let mut data = vec![0.0; tile_rows * tile_cols * dim];
    // One chunk per row of tiles
    for_each_chunk_mut(&mut data, tile_cols * dim, |tr, chunk| {
        for (tc, block) in chunk.chunks_mut(dim).enumerate() {
            window.gather_tile(diff, tr * side, tc * side, block);
        }
    });

    let blocks = Array2::from_shape_vec((tile_rows * tile_cols, dim), data)
        .map_err(|e| Error::Other(e.to_string()))?;

    tracing::debug!(
        "sampled {} blocks of {}x{} ({}x{} tiles) from {}x{} image",
        blocks.nrows(),
        side,
        side,
        tile_rows,
        tile_cols,
        rows,
        cols
    );

    Ok(BlockDataset {
        blocks,
        window,
        tiles: (tile_rows, tile_cols),
    })
}

/// Per-pixel sliding neighborhood extractor over a difference image
#[derive(Debug, Clone, Copy)]
pub struct NeighborhoodExtractor<'a> {
    diff: &'a Raster<f64>,
    window: Window,
}

impl<'a> NeighborhoodExtractor<'a> {
    pub fn new(diff: &'a Raster<f64>, window: Window) -> Self {
        Self { diff, window }
    }

    /// Write the neighborhood of `(row, col)` into `out` (length h²)
    pub fn extract_into(&self, row: usize, col: usize, out: &mut [f64]) {
        self.window.gather_centered(self.diff, row, col, out);
    }

    /// Neighborhood of `(row, col)` as a new vector
    pub fn extract(&self, row: usize, col: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.window.len()];
        self.extract_into(row, col, &mut out);
        out
    }
}
