//! Principal component analysis of the block dataset
//!
//! Builds the covariance matrix of the flattened h×h blocks, then extracts
//! eigenvalues/eigenvectors via cyclic Jacobi rotations. The eigen-basis is
//! ordered by descending eigenvalue and truncated to the selected number
//! of components.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use changemap_core::raster::Window;
use changemap_core::{Algorithm, Error, Result};

use super::projection::FeatureVectorProjector;
use crate::change::BlockDataset;

/// Covariance traces at or below this share of the raw block energy carry
/// no usable variance
pub const DEGENERACY_TOLERANCE: f64 = 1e-12;

/// Allowed deviation from orthonormality of the returned basis
pub const ORTHONORMALITY_TOLERANCE: f64 = 1e-6;

const MAX_SWEEPS: usize = 100;
const JACOBI_EPS: f64 = 1e-12;

/// How many eigen-components are retained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ComponentSelection {
    /// Exactly S components (1 ≤ S ≤ h²)
    Count(usize),
    /// Smallest S whose cumulative eigenvalue share reaches the fraction (0, 1]
    VarianceFraction(f64),
}

impl Default for ComponentSelection {
    fn default() -> Self {
        ComponentSelection::VarianceFraction(0.9)
    }
}

impl ComponentSelection {
    /// Validate against a block dimension h²
    pub fn validate(&self, dim: usize) -> Result<()> {
        match *self {
            ComponentSelection::Count(s) if s == 0 || s > dim => Err(Error::invalid_parameter(
                "components",
                s,
                format!("component count must be in 1..={}", dim),
            )),
            ComponentSelection::VarianceFraction(f) if !(f > 0.0 && f <= 1.0) => {
                Err(Error::invalid_parameter(
                    "components",
                    f,
                    "variance fraction must be in (0, 1]",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Number of components to keep given eigenvalues sorted in descending order
    pub fn resolve(&self, eigenvalues: &[f64]) -> usize {
        let dim = eigenvalues.len();
        match *self {
            ComponentSelection::Count(s) => s.clamp(1, dim),
            ComponentSelection::VarianceFraction(f) => {
                let total: f64 = eigenvalues.iter().sum();
                if total <= 0.0 {
                    return 1;
                }
                let mut cumulative = 0.0;
                for (i, ev) in eigenvalues.iter().enumerate() {
                    cumulative += ev;
                    if cumulative / total >= f - 1e-12 {
                        return i + 1;
                    }
                }
                dim
            }
        }
    }
}

/// Parameters for the eigen-space
#[derive(Debug, Clone, Copy)]
pub struct EigenParams {
    /// Component selection
    pub selection: ComponentSelection,
    /// Value added to the covariance diagonal for the single retry
    pub ridge: f64,
}

impl Default for EigenParams {
    fn default() -> Self {
        Self {
            selection: ComponentSelection::default(),
            ridge: 1e-6,
        }
    }
}

/// Ordered orthonormal eigen-basis of the block covariance
#[derive(Debug, Clone, PartialEq)]
pub struct EigenBasis {
    window: Window,
    mean: Array1<f64>,
    /// Retained eigenvectors, one per row
    vectors: Array2<f64>,
    /// All eigenvalues, descending
    eigenvalues: Vec<f64>,
    ridge: Option<f64>,
}

impl EigenBasis {
    /// Sampling window the basis was estimated with
    pub fn window(&self) -> Window {
        self.window
    }

    /// Mean block vector subtracted before projection
    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    /// Retained eigenvectors as rows (S × h²)
    pub fn vectors(&self) -> &Array2<f64> {
        &self.vectors
    }

    /// Eigenvector `i`
    pub fn vector(&self, i: usize) -> ArrayView1<'_, f64> {
        self.vectors.row(i)
    }

    /// Number of retained components S
    pub fn components(&self) -> usize {
        self.vectors.nrows()
    }

    /// Vector length h²
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    /// Eigenvalues of the retained components
    pub fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues[..self.components()]
    }

    /// Eigenvalues of every component, including discarded ones
    pub fn all_eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// Share of total variance carried by each retained component
    pub fn variance_explained(&self) -> Vec<f64> {
        let total: f64 = self.eigenvalues.iter().sum();
        self.eigenvalues()
            .iter()
            .map(|ev| if total > 0.0 { ev / total } else { 0.0 })
            .collect()
    }

    /// Share of total variance carried by all retained components
    pub fn variance_retained(&self) -> f64 {
        self.variance_explained().iter().sum()
    }

    /// Ridge added to the covariance diagonal, if the retry was needed
    pub fn ridge_applied(&self) -> Option<f64> {
        self.ridge
    }

    /// Project a flattened neighborhood: `out[i] = (sample - mean) · v_i`
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] unless `sample` has h² values and `out` has
    /// room for S components.
    pub fn project_into(&self, sample: &[f64], out: &mut [f64]) -> Result<()> {
        if sample.len() != self.dim() || out.len() != self.components() {
            return Err(Error::ShapeMismatch {
                stage: FeatureVectorProjector::NAME,
                expected: (1, self.dim(), self.components()),
                actual: (1, sample.len(), out.len()),
            });
        }
        for (o, v) in out.iter_mut().zip(self.vectors.rows()) {
            *o = v
                .iter()
                .zip(sample)
                .zip(self.mean.iter())
                .map(|((&vj, &x), &m)| vj * (x - m))
                .sum();
        }
        Ok(())
    }

    /// Largest deviation of `V Vᵀ` from the identity
    pub fn orthonormality_error(&self) -> f64 {
        orthonormality_error(&self.vectors)
    }
}

/// Eigen-space stage
#[derive(Debug, Clone, Default)]
pub struct EigenSpaceBuilder;

impl EigenSpaceBuilder {
    pub const NAME: &'static str = "EigenSpaceBuilder";
}

impl Algorithm for EigenSpaceBuilder {
    type Input<'a> = &'a BlockDataset;
    type Output = EigenBasis;
    type Params = EigenParams;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Ordered orthonormal eigen-basis of the block covariance matrix"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        eigen_basis(input, params)
    }
}

/// Compute the eigen-basis of a block dataset.
///
/// When the covariance cannot be decomposed (no variance, non-finite
/// entries, no convergence, or a basis that is not orthonormal), `ridge`
/// is added to its diagonal and the decomposition is retried once. A second
/// failure is returned as [`Error::DegenerateCovariance`].
///
/// # Arguments
/// * `dataset` - Blocks from [`crate::change::sample_blocks`]
/// * `params` - Component selection and ridge value
pub fn eigen_basis(dataset: &BlockDataset, params: &EigenParams) -> Result<EigenBasis> {
    let dim = dataset.dim();
    let n = dataset.len();
    params.selection.validate(dim)?;
    if !(params.ridge.is_finite() && params.ridge > 0.0) {
        return Err(Error::invalid_parameter(
            "ridge",
            params.ridge,
            "ridge must be a positive finite value",
        ));
    }

    let blocks = dataset.blocks();
    let mean = blocks
        .mean_axis(Axis(0))
        .ok_or_else(|| Error::Algorithm("block dataset is empty".into()))?;

    let denom = (n.saturating_sub(1)).max(1) as f64;
    let centered = blocks - &mean;
    let cov = centered.t().dot(&centered) / denom;
    // Same normalization as the covariance, so the ratio is scale-free
    let energy = blocks.iter().map(|v| v * v).sum::<f64>() / denom;

    let first = match has_variance(&cov, energy) {
        Ok(()) => decompose(&cov),
        Err(reason) => Err(reason),
    };
    let (eigenvalues, vectors, ridge) = match first {
        Ok((vals, vecs)) => (vals, vecs, None),
        Err(reason) => {
            tracing::warn!(
                "covariance {}x{} not decomposable ({}), retrying with ridge {:e}",
                dim,
                dim,
                reason,
                params.ridge
            );
            let mut regularized = cov.clone();
            regularized.diag_mut().mapv_inplace(|d| d + params.ridge);
            let (vals, vecs) =
                decompose(&regularized).map_err(|reason| Error::DegenerateCovariance {
                    stage: EigenSpaceBuilder::NAME,
                    dim,
                    samples: n,
                    ridge: params.ridge,
                    reason,
                })?;
            (vals, vecs, Some(params.ridge))
        }
    };

    let s = params.selection.resolve(&eigenvalues);
    let vectors = vectors.slice(ndarray::s![..s, ..]).to_owned();

    tracing::debug!(
        "eigen-basis: {} of {} components from {} blocks, leading eigenvalue {:.6e}",
        s,
        dim,
        n,
        eigenvalues.first().copied().unwrap_or(0.0)
    );

    Ok(EigenBasis {
        window: dataset.window(),
        mean,
        vectors,
        eigenvalues,
        ridge,
    })
}

/// Reject a covariance whose trace is negligible next to the block energy.
///
/// Non-finite entries pass through and are reported by [`decompose`].
fn has_variance(cov: &Array2<f64>, energy: f64) -> std::result::Result<(), String> {
    let trace = cov.diag().sum();
    if trace <= DEGENERACY_TOLERANCE * energy {
        return Err(format!(
            "covariance trace {:e} carries no variance against block energy {:e}",
            trace, energy
        ));
    }
    Ok(())
}

/// Sorted eigen-decomposition of a symmetric matrix.
///
/// Returns eigenvalues in descending order (ties by original index, negative
/// round-off clamped to zero) and the matching unit eigenvectors as rows.
fn decompose(cov: &Array2<f64>) -> std::result::Result<(Vec<f64>, Array2<f64>), String> {
    if cov.iter().any(|v| !v.is_finite()) {
        return Err("covariance has non-finite entries".into());
    }
    if cov.diag().sum() <= 0.0 {
        return Err("covariance has an empty diagonal".into());
    }

    let (values, vectors) = jacobi_eigen(cov)?;
    let n = values.len();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[b]
            .partial_cmp(&values[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let sorted_values: Vec<f64> = order.iter().map(|&i| values[i].max(0.0)).collect();
    let mut rows = Array2::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        rows.row_mut(dst).assign(&vectors.column(src));
    }

    let err = orthonormality_error(&rows);
    if err > ORTHONORMALITY_TOLERANCE {
        return Err(format!("eigenvectors deviate from orthonormality by {:e}", err));
    }

    Ok((sorted_values, rows))
}

/// Cyclic Jacobi eigenvalue algorithm for symmetric matrices.
///
/// Eigenvectors are returned as columns.
fn jacobi_eigen(matrix: &Array2<f64>) -> std::result::Result<(Vec<f64>, Array2<f64>), String> {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0_f64;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[(p, q)] * a[(p, q)];
            }
        }
        if off.sqrt() <= JACOBI_EPS * scale {
            let values = (0..n).map(|i| a[(i, i)]).collect();
            return Ok((values, v));
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[(p, q)];
                if apq == 0.0 {
                    continue;
                }

                // Rotation angle that zeroes a[p][q]
                let theta = (a[(q, q)] - a[(p, p)]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[(k, p)];
                    let akq = a[(k, q)];
                    a[(k, p)] = c * akp - s * akq;
                    a[(k, q)] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[(p, k)];
                    let aqk = a[(q, k)];
                    a[(p, k)] = c * apk - s * aqk;
                    a[(q, k)] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[(k, p)];
                    let vkq = v[(k, q)];
                    v[(k, p)] = c * vkp - s * vkq;
                    v[(k, q)] = s * vkp + c * vkq;
                }
            }
        }
    }

    Err(format!("Jacobi rotations did not converge in {} sweeps", MAX_SWEEPS))
}

fn orthonormality_error(rows: &Array2<f64>) -> f64 {
    let gram = rows.dot(&rows.t());
    let mut worst: f64 = 0.0;
    for ((i, j), &g) in gram.indexed_iter() {
        let target = if i == j { 1.0 } else { 0.0 };
        worst = worst.max((g - target).abs());
    }
    worst
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::sample_blocks;
    use changemap_core::raster::Raster;

    fn textured(rows: usize, cols: usize) -> Raster<f64> {
        Raster::from_fn(rows, cols, |r, c| {
            ((r * 7 + c * 13) % 17) as f64 + if r > rows / 2 { 20.0 } else { 0.0 }
        })
    }

    fn dataset(raster: &Raster<f64>, h: usize) -> BlockDataset {
        sample_blocks(raster, Window::new(h).unwrap()).unwrap()
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let ds = dataset(&textured(20, 20), 3);
        let basis = eigen_basis(
            &ds,
            &EigenParams {
                selection: ComponentSelection::Count(9),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(basis.components(), 9);
        for i in 0..9 {
            for j in 0..9 {
                let d = basis.vector(i).dot(&basis.vector(j));
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((d - expected).abs() < 1e-9, "v{i}·v{j} = {d}");
            }
        }
    }

    #[test]
    fn test_eigenvalues_non_increasing() {
        let ds = dataset(&textured(24, 18), 2);
        let basis = eigen_basis(&ds, &EigenParams::default()).unwrap();
        for w in basis.all_eigenvalues().windows(2) {
            assert!(w[0] >= w[1], "eigenvalues out of order: {:?}", w);
        }
        assert!(basis.all_eigenvalues().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn test_eigenpairs_satisfy_definition() {
        let ds = dataset(&textured(16, 16), 2);
        let basis = eigen_basis(
            &ds,
            &EigenParams {
                selection: ComponentSelection::Count(4),
                ..Default::default()
            },
        )
        .unwrap();
        let blocks = ds.blocks();
        let mean = blocks.mean_axis(Axis(0)).unwrap();
        let centered = blocks - &mean;
        let cov = centered.t().dot(&centered) / (ds.len() - 1) as f64;
        for i in 0..4 {
            let v = basis.vector(i);
            let av = cov.dot(&v);
            let lambda = basis.eigenvalues()[i];
            for (x, y) in av.iter().zip(v.iter()) {
                assert!((x - lambda * y).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_rank_one_dataset_picks_one_component() {
        // Corner block of ones: every block is either all-zero or all-one
        let raster = Raster::from_fn(8, 8, |r, c| if r < 4 && c < 4 { 1.0 } else { 0.0 });
        let ds = dataset(&raster, 2);
        let basis = eigen_basis(&ds, &EigenParams::default()).unwrap();
        assert_eq!(basis.components(), 1);
        assert!(basis.ridge_applied().is_none());
        // Leading direction is the uniform vector
        for x in basis.vector(0).iter() {
            assert!((x.abs() - 0.5).abs() < 1e-9);
        }
        assert!((basis.variance_retained() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_variance_recovers_with_ridge() {
        let raster = Raster::filled(6, 6, 0.0);
        let ds = dataset(&raster, 2);
        let basis = eigen_basis(&ds, &EigenParams::default()).unwrap();
        assert_eq!(basis.ridge_applied(), Some(1e-6));
        // Equal eigenvalues keep the original index order: identity basis
        assert!((basis.vector(0)[0] - 1.0).abs() < 1e-12);
        assert!(basis.orthonormality_error() < 1e-12);
    }

    #[test]
    fn test_non_finite_covariance_is_fatal() {
        let mut raster = Raster::filled(4, 4, 1.0);
        raster.set(0, 0, f64::NAN).unwrap();
        let ds = dataset(&raster, 2);
        let err = eigen_basis(&ds, &EigenParams::default()).unwrap_err();
        match err {
            Error::DegenerateCovariance { stage, dim, samples, .. } => {
                assert_eq!(stage, "EigenSpaceBuilder");
                assert_eq!(dim, 4);
                assert_eq!(samples, 4);
            }
            other => panic!("expected DegenerateCovariance, got {other:?}"),
        }
    }

    #[test]
    fn test_component_count_validation() {
        let ds = dataset(&textured(8, 8), 2);
        for s in [0, 5] {
            let params = EigenParams {
                selection: ComponentSelection::Count(s),
                ..Default::default()
            };
            assert!(matches!(
                eigen_basis(&ds, &params),
                Err(Error::InvalidParameter { .. })
            ));
        }
        let params = EigenParams {
            selection: ComponentSelection::VarianceFraction(1.5),
            ..Default::default()
        };
        assert!(eigen_basis(&ds, &params).is_err());
    }

    #[test]
    fn test_resolve_variance_fraction() {
        let sel = ComponentSelection::VarianceFraction(0.8);
        assert_eq!(sel.resolve(&[5.0, 3.0, 1.0, 1.0]), 2);
        assert_eq!(ComponentSelection::VarianceFraction(1.0).resolve(&[5.0, 3.0, 1.0, 1.0]), 4);
        assert_eq!(ComponentSelection::Count(3).resolve(&[1.0, 1.0, 1.0, 1.0]), 3);
    }

    #[test]
    fn test_project_into_subtracts_mean() {
        let ds = dataset(&textured(12, 12), 2);
        let basis = eigen_basis(&ds, &EigenParams::default()).unwrap();
        let mean = basis.mean().to_vec();
        let mut out = vec![1.0; basis.components()];
        basis.project_into(&mean, &mut out).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_project_into_rejects_wrong_lengths() {
        let ds = dataset(&textured(12, 12), 2);
        let basis = eigen_basis(
            &ds,
            &EigenParams {
                selection: ComponentSelection::Count(2),
                ..Default::default()
            },
        )
        .unwrap();
        // A 3x3 neighborhood against a 2x2 basis
        let mut out = vec![0.0; 2];
        match basis.project_into(&[0.0; 9], &mut out) {
            Err(Error::ShapeMismatch { stage, expected, actual }) => {
                assert_eq!(stage, "FeatureVectorProjector");
                assert_eq!(expected, (1, 4, 2));
                assert_eq!(actual, (1, 9, 2));
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
        let mut short = vec![0.0; 1];
        assert!(basis.project_into(&[0.0; 4], &mut short).is_err());
    }

    #[test]
    fn test_small_values_keep_their_variance() {
        // Same layout as the rank-one corner case, scaled far below one
        for v in [1e-6, 1e-13] {
            let raster = Raster::from_fn(8, 8, |r, c| if r < 4 && c < 4 { v } else { 0.0 });
            let basis = eigen_basis(&dataset(&raster, 2), &EigenParams::default()).unwrap();
            assert!(basis.ridge_applied().is_none(), "ridge applied at scale {v:e}");
            assert_eq!(basis.components(), 1);
            assert!((basis.variance_retained() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_constant_offset_has_no_variance() {
        let raster = Raster::filled(6, 6, 0.1);
        let basis = eigen_basis(&dataset(&raster, 2), &EigenParams::default()).unwrap();
        assert_eq!(basis.ridge_applied(), Some(1e-6));
    }
}
