//! Projection of per-pixel neighborhoods onto the eigen-basis
//!
//! Every pixel's sliding h×h neighborhood is centered with the block mean
//! and projected onto the retained eigenvectors. The result is the feature
//! vector space (FVS): H·W vectors of length S in row-major pixel order.
//!
//! Work is split into row bands. The FVS can be materialized in full
//! ([`project_features`]) or re-projected band by band on demand
//! ([`LazyFeatures`]) when it should not be held in memory.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use changemap_core::raster::Raster;
use changemap_core::{Algorithm, Error, Result};

use super::pca::EigenBasis;
use crate::change::NeighborhoodExtractor;
use crate::maybe_rayon::*;

/// Read access to a feature vector space, one row band at a time.
///
/// Bands cover `band_len()` consecutive vectors (the last may be shorter).
pub trait FeatureSource: Sync {
    /// Number of feature vectors (H·W)
    fn len(&self) -> usize;

    /// Whether the source holds no vector
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feature dimension S
    fn dim(&self) -> usize;

    /// Vectors per band
    fn band_len(&self) -> usize;

    /// Number of bands
    fn band_count(&self) -> usize {
        self.len().div_ceil(self.band_len().max(1))
    }

    /// Run `f` on the vectors of band `band` (one vector per row)
    fn with_band<R, F>(&self, band: usize, f: F) -> Result<R>
    where
        F: FnOnce(ArrayView2<'_, f64>) -> R;

    /// Feature vector `index`
    fn vector(&self, index: usize) -> Result<Array1<f64>>;
}

/// Materialized feature vector space
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSpace {
    data: Array2<f64>,
    rows: usize,
    cols: usize,
    band_rows: usize,
}

impl FeatureSpace {
    /// Feature space from explicit vectors, laid out as a single-column image
    pub fn from_vectors(vectors: &[&[f64]], band_rows: usize) -> Result<Self> {
        let dim = vectors.first().map_or(0, |v| v.len());
        if band_rows == 0 {
            return Err(Error::invalid_parameter("band_rows", 0, "band height must be at least 1"));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::ShapeMismatch {
                stage: FeatureVectorProjector::NAME,
                expected: (vectors.len(), 1, dim),
                actual: (vectors.len(), 1, bad.len()),
            });
        }
        let flat: Vec<f64> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
        let data = Array2::from_shape_vec((vectors.len(), dim), flat).map_err(|e| Error::Other(e.to_string()))?;
        Ok(Self {
            data,
            rows: vectors.len(),
            cols: 1,
            band_rows,
        })
    }

    /// All vectors, one per row, in row-major pixel order
    pub fn vectors(&self) -> &Array2<f64> {
        &self.data
    }

    /// Feature vector of pixel index `index`
    pub fn row_vector(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.row(index)
    }

    /// Image shape (rows, cols) the FVS was built from
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Feature component `component` laid out as a raster
    pub fn component_raster(&self, component: usize) -> Result<Raster<f64>> {
        if component >= self.data.ncols() {
            return Err(Error::invalid_parameter(
                "component",
                component,
                format!("feature space has {} components", self.data.ncols()),
            ));
        }
        Raster::from_vec(self.data.column(component).to_vec(), self.rows, self.cols)
    }
}

impl FeatureSource for FeatureSpace {
    fn len(&self) -> usize {
        self.data.nrows()
    }

    fn dim(&self) -> usize {
        self.data.ncols()
    }

    fn band_len(&self) -> usize {
        (self.band_rows * self.cols).max(1)
    }

    fn with_band<R, F>(&self, band: usize, f: F) -> Result<R>
    where
        F: FnOnce(ArrayView2<'_, f64>) -> R,
    {
        let start = (band * self.band_len()).min(self.len());
        let end = (start + self.band_len()).min(self.len());
        Ok(f(self.data.slice(ndarray::s![start..end, ..])))
    }

    fn vector(&self, index: usize) -> Result<Array1<f64>> {
        Ok(self.data.row(index).to_owned())
    }
}

/// Feature space that projects bands on demand instead of storing them
#[derive(Debug, Clone, Copy)]
pub struct LazyFeatures<'a> {
    diff: &'a Raster<f64>,
    basis: &'a EigenBasis,
    band_rows: usize,
}

impl<'a> LazyFeatures<'a> {
    pub fn new(diff: &'a Raster<f64>, basis: &'a EigenBasis, band_rows: usize) -> Result<Self> {
        validate(diff, band_rows)?;
        Ok(Self {
            diff,
            basis,
            band_rows,
        })
    }

    /// Materialize the whole space
    pub fn materialize(&self) -> Result<FeatureSpace> {
        project_features(self.diff, self.basis, self.band_rows)
    }
}

impl FeatureSource for LazyFeatures<'_> {
    fn len(&self) -> usize {
        self.diff.len()
    }

    fn dim(&self) -> usize {
        self.basis.components()
    }

    fn band_len(&self) -> usize {
        self.band_rows * self.diff.cols()
    }

    fn with_band<R, F>(&self, band: usize, f: F) -> Result<R>
    where
        F: FnOnce(ArrayView2<'_, f64>) -> R,
    {
        let rows = self.diff.rows();
        let start = (band * self.band_rows).min(rows);
        let end = (start + self.band_rows).min(rows);
        let block = project_rows(self.diff, self.basis, start, end)?;
        Ok(f(block.view()))
    }

    fn vector(&self, index: usize) -> Result<Array1<f64>> {
        let cols = self.diff.cols();
        let extractor = NeighborhoodExtractor::new(self.diff, self.basis.window());
        let sample = extractor.extract(index / cols, index % cols);
        let mut out = vec![0.0; self.basis.components()];
        self.basis.project_into(&sample, &mut out)?;
        Ok(Array1::from_vec(out))
    }
}

/// Parameters for the projection
#[derive(Debug, Clone, Copy)]
pub struct ProjectionParams {
    /// Rows per band
    pub band_rows: usize,
}

impl Default for ProjectionParams {
    fn default() -> Self {
        Self { band_rows: 64 }
    }
}

/// Projection stage
#[derive(Debug, Clone, Default)]
pub struct FeatureVectorProjector;

impl FeatureVectorProjector {
    pub const NAME: &'static str = "FeatureVectorProjector";
}

impl Algorithm for FeatureVectorProjector {
    type Input<'a> = (&'a Raster<f64>, &'a EigenBasis);
    type Output = FeatureSpace;
    type Params = ProjectionParams;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Project every pixel neighborhood onto the retained eigenvectors"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        project_features(input.0, input.1, params.band_rows)
    }
}

/// Build the full feature vector space.
///
/// # Arguments
/// * `diff` - Difference image
/// * `basis` - Eigen-basis estimated from the same difference image
/// * `band_rows` - Rows projected per parallel work item
pub fn project_features(diff: &Raster<f64>, basis: &EigenBasis, band_rows: usize) -> Result<FeatureSpace> {
    validate(diff, band_rows)?;

    let (rows, cols) = diff.shape();
    let s = basis.components();
    let mut data = vec![0.0; rows * cols * s];

    fold_chunks_mut(
        &mut data,
        band_rows * cols * s,
        Ok(()),
        |band, chunk| project_rows_into(diff, basis, band * band_rows, chunk),
        Result::and,
    )?;

    let data = Array2::from_shape_vec((rows * cols, s), data).map_err(|e| Error::Other(e.to_string()))?;
    tracing::debug!("projected {} neighborhoods onto {} component(s)", rows * cols, s);

    Ok(FeatureSpace {
        data,
        rows,
        cols,
        band_rows,
    })
}

/// Project rows `start..end` into a new (pixels × S) array
pub fn project_rows(diff: &Raster<f64>, basis: &EigenBasis, start: usize, end: usize) -> Result<Array2<f64>> {
    let cols = diff.cols();
    let s = basis.components();
    let pixels = end.saturating_sub(start) * cols;
    let mut out = vec![0.0; pixels * s];
    project_rows_into(diff, basis, start, &mut out)?;
    Array2::from_shape_vec((pixels, s), out).map_err(|e| Error::Other(e.to_string()))
}

fn project_rows_into(diff: &Raster<f64>, basis: &EigenBasis, row0: usize, out: &mut [f64]) -> Result<()> {
    let cols = diff.cols();
    let s = basis.components();
    let extractor = NeighborhoodExtractor::new(diff, basis.window());
    let mut sample = vec![0.0; basis.window().len()];
    for (i, feature) in out.chunks_mut(s).enumerate() {
        extractor.extract_into(row0 + i / cols, i % cols, &mut sample);
        basis.project_into(&sample, feature)?;
    }
    Ok(())
}

fn validate(diff: &Raster<f64>, band_rows: usize) -> Result<()> {
    if band_rows == 0 {
        return Err(Error::invalid_parameter("band_rows", 0, "band height must be at least 1"));
    }
    if diff.is_empty() {
        return Err(Error::InvalidDimensions {
            width: diff.cols(),
            height: diff.rows(),
        });
    }
    Ok(())
}
