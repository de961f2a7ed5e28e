//! Two-cluster k-means over a feature vector space
//!
//! Lloyd iterations with squared Euclidean distance. Assignment ties go to
//! cluster 0. Iteration stops when no label changes or when no centroid
//! moves by more than the tolerance.
//!
//! A cluster that ends an iteration empty is re-seeded with the vector
//! farthest from the surviving centroid, a bounded number of times.

use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use changemap_core::{Algorithm, Deadline, Error, Result};

use super::projection::{FeatureSource, FeatureSpace};
use crate::maybe_rayon::*;

/// Random draws tried before [`InitStrategy::RandomPair`] gives up
const RANDOM_PAIR_ATTEMPTS: usize = 32;

/// How the two initial centroids are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InitStrategy {
    /// Global mean and the vector farthest from it (lowest index on ties)
    #[default]
    MeanFarthest,
    /// A vector drawn with the seeded generator, then a distinct second one
    /// (farthest from the first if no distinct draw succeeds)
    RandomPair,
}

/// Parameters for 2-means clustering
#[derive(Debug, Clone, Copy)]
pub struct KmeansParams {
    /// Maximum Lloyd iterations (default: 100)
    pub max_iterations: usize,
    /// Centroid shift below which iteration stops (default: 1e-6)
    pub tolerance: f64,
    /// Seed for random initialization
    pub seed: u64,
    /// Initialization strategy
    pub init: InitStrategy,
    /// Empty-cluster re-seeds allowed before failing (default: 3)
    pub max_reinit: usize,
    /// Checked before every iteration
    pub deadline: Option<Deadline>,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-6,
            seed: 42,
            init: InitStrategy::MeanFarthest,
            max_reinit: 3,
            deadline: None,
        }
    }
}

impl KmeansParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::invalid_parameter("max_iterations", 0, "at least one iteration is required"));
        }
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(Error::invalid_parameter(
                "tolerance",
                self.tolerance,
                "must be finite and non-negative",
            ));
        }
        Ok(())
    }
}

/// Result of 2-means clustering
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterAssignment {
    /// Cluster (0 or 1) of every feature vector
    pub labels: Vec<u8>,
    /// Final centroids, one per row
    pub centroids: Array2<f64>,
    /// Lloyd iterations run
    pub iterations: usize,
    /// Whether the stopping criterion was met
    pub converged: bool,
    /// Empty-cluster re-seeds performed
    pub reinitializations: usize,
    /// All vectors identical; every label is 0
    pub degenerate: bool,
}

impl ClusterAssignment {
    /// Members of cluster 0 and cluster 1
    pub fn counts(&self) -> [usize; 2] {
        let ones = self.labels.iter().filter(|&&l| l == 1).count();
        [self.labels.len() - ones, ones]
    }

    pub fn centroid(&self, cluster: usize) -> ArrayView1<'_, f64> {
        self.centroids.row(cluster)
    }
}

/// Clustering stage
#[derive(Debug, Clone, Default)]
pub struct ClusterEngine;

impl ClusterEngine {
    pub const NAME: &'static str = "ClusterEngine";
}

impl Algorithm for ClusterEngine {
    type Input<'a> = &'a FeatureSpace;
    type Output = ClusterAssignment;
    type Params = KmeansParams;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Partition feature vectors into two clusters with k-means"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        two_means(input, params)
    }
}

/// Per-band partial sums of one assignment pass
#[derive(Debug, Clone)]
struct Partial {
    sums: [Vec<f64>; 2],
    counts: [usize; 2],
    changed: usize,
}

impl Partial {
    fn new(dim: usize) -> Self {
        Self {
            sums: [vec![0.0; dim], vec![0.0; dim]],
            counts: [0, 0],
            changed: 0,
        }
    }

    fn merge(mut self, other: Partial) -> Partial {
        for k in 0..2 {
            for (a, b) in self.sums[k].iter_mut().zip(&other.sums[k]) {
                *a += b;
            }
            self.counts[k] += other.counts[k];
        }
        self.changed += other.changed;
        self
    }
}

/// Cluster the vectors of `source` into two groups.
///
/// Works on any [`FeatureSource`], so the vectors may be materialized or
/// projected band by band. Results are identical in both cases.
///
/// # Errors
/// [`Error::EmptyCluster`] when a cluster stays empty after `max_reinit`
/// re-seeds. Non-convergence is not an error; see
/// [`ClusterAssignment::converged`].
pub fn two_means<S: FeatureSource>(source: &S, params: &KmeansParams) -> Result<ClusterAssignment> {
    params.validate()?;

    let n = source.len();
    let dim = source.dim();
    let mean = global_mean(source)?;

    if n < 2 || dim == 0 || all_identical(source)? {
        tracing::warn!("all {} feature vectors are identical; no change can be separated", n);
        return Ok(ClusterAssignment {
            labels: vec![0; n],
            centroids: Array2::from_shape_fn((2, dim), |(_, j)| mean[j]),
            iterations: 0,
            converged: true,
            reinitializations: 0,
            degenerate: true,
        });
    }

    let (_, farthest) = farthest_from(source, mean.view())?;
    let centroids = initial_centroids(source, params, &mean, farthest)?;
    tracing::debug!("2-means init {:?}, {} vectors of dim {}", params.init, n, dim);

    lloyd(source, centroids, params)
}

/// Lloyd iterations from the given initial centroids
fn lloyd<S: FeatureSource>(
    source: &S,
    mut centroids: Array2<f64>,
    params: &KmeansParams,
) -> Result<ClusterAssignment> {
    // No vector carries a valid label before the first pass
    let mut labels = vec![u8::MAX; source.len()];
    let mut iterations = 0;
    let mut converged = false;
    let mut reinitializations = 0;
    let mut reseeded = false;

    while iterations < params.max_iterations {
        if let Some(deadline) = params.deadline {
            deadline.check(ClusterEngine::NAME)?;
        }
        iterations += 1;
        let partial = assign(source, &centroids, &mut labels)?;

        reseeded = reseed_empty(
            source,
            &mut centroids,
            &partial,
            iterations,
            &mut reinitializations,
            params.max_reinit,
        )?;
        if reseeded {
            continue;
        }

        let shift = update_centroids(&mut centroids, &partial);
        if partial.changed == 0 || shift <= params.tolerance {
            converged = true;
            break;
        }
    }

    if reseeded {
        // Iterations ran out right after a re-seed: relabel against the new
        // centroids so both clusters are populated.
        let partial = assign(source, &centroids, &mut labels)?;
        if partial.counts.contains(&0) {
            return Err(Error::EmptyCluster {
                stage: ClusterEngine::NAME,
                iteration: iterations,
                retries: reinitializations,
            });
        }
        update_centroids(&mut centroids, &partial);
    }

    if converged {
        tracing::debug!("2-means converged after {} iteration(s)", iterations);
    } else {
        tracing::warn!(
            "2-means did not converge within {} iterations; using last assignment",
            params.max_iterations
        );
    }

    Ok(ClusterAssignment {
        labels,
        centroids,
        iterations,
        converged,
        reinitializations,
        degenerate: false,
    })
}

/// Re-seed a cluster that `partial` left empty with the vector farthest
/// from the surviving centroid. Returns whether a re-seed happened.
fn reseed_empty<S: FeatureSource>(
    source: &S,
    centroids: &mut Array2<f64>,
    partial: &Partial,
    iteration: usize,
    reinitializations: &mut usize,
    max_reinit: usize,
) -> Result<bool> {
    let Some(empty) = (0..2).find(|&k| partial.counts[k] == 0) else {
        return Ok(false);
    };
    if *reinitializations >= max_reinit {
        return Err(Error::EmptyCluster {
            stage: ClusterEngine::NAME,
            iteration,
            retries: *reinitializations,
        });
    }
    let survivor = centroids.row(1 - empty).to_owned();
    let (_, index) = farthest_from(source, survivor.view())?;
    centroids.row_mut(empty).assign(&source.vector(index)?);
    *reinitializations += 1;
    tracing::warn!(
        "cluster {} empty at iteration {}, re-seeded from vector {}",
        empty,
        iteration,
        index
    );
    Ok(true)
}

/// Move both centroids to the means of their members; returns the largest shift
fn update_centroids(centroids: &mut Array2<f64>, partial: &Partial) -> f64 {
    let mut shift = 0.0_f64;
    for k in 0..2 {
        let count = partial.counts[k] as f64;
        let mut moved = 0.0_f64;
        for (c, s) in centroids.row_mut(k).iter_mut().zip(&partial.sums[k]) {
            let next = s / count;
            moved += (next - *c) * (next - *c);
            *c = next;
        }
        shift = shift.max(moved.sqrt());
    }
    shift
}

fn global_mean<S: FeatureSource>(source: &S) -> Result<Array1<f64>> {
    let dim = source.dim();
    let sum = map_reduce(
        source.band_count(),
        Ok(vec![0.0; dim]),
        |band| {
            source.with_band(band, |view| {
                let mut acc = vec![0.0; dim];
                for row in view.rows() {
                    for (a, v) in acc.iter_mut().zip(row.iter()) {
                        *a += v;
                    }
                }
                acc
            })
        },
        |a: Result<Vec<f64>>, b| {
            let (mut a, b) = (a?, b?);
            for (x, y) in a.iter_mut().zip(&b) {
                *x += y;
            }
            Ok(a)
        },
    )?;
    let n = source.len().max(1) as f64;
    Ok(Array1::from_iter(sum.into_iter().map(|s| s / n)))
}

/// Whether every vector equals the first one exactly
fn all_identical<S: FeatureSource>(source: &S) -> Result<bool> {
    let first = source.vector(0)?;
    let (spread, _) = farthest_from(source, first.view())?;
    Ok(spread == 0.0)
}

/// Squared distance and index of the vector farthest from `point`.
///
/// Ties resolve to the lowest index.
fn farthest_from<S: FeatureSource>(source: &S, point: ArrayView1<'_, f64>) -> Result<(f64, usize)> {
    let band_len = source.band_len();
    map_reduce(
        source.band_count(),
        Ok((f64::NEG_INFINITY, usize::MAX)),
        |band| {
            source.with_band(band, |view| {
                let mut best = (f64::NEG_INFINITY, usize::MAX);
                for (i, row) in view.rows().into_iter().enumerate() {
                    let d = squared_distance(row, point);
                    if d > best.0 {
                        best = (d, band * band_len + i);
                    }
                }
                best
            })
        },
        |a: Result<(f64, usize)>, b| {
            let (a, b) = (a?, b?);
            Ok(if b.0 > a.0 || (b.0 == a.0 && b.1 < a.1) { b } else { a })
        },
    )
}

fn initial_centroids<S: FeatureSource>(
    source: &S,
    params: &KmeansParams,
    mean: &Array1<f64>,
    farthest: usize,
) -> Result<Array2<f64>> {
    let mut centroids = Array2::zeros((2, source.dim()));
    match params.init {
        InitStrategy::MeanFarthest => {
            centroids.row_mut(0).assign(mean);
            centroids.row_mut(1).assign(&source.vector(farthest)?);
        }
        InitStrategy::RandomPair => {
            let mut rng = StdRng::seed_from_u64(params.seed);
            let n = source.len();
            let first = source.vector(rng.random_range(0..n))?;
            let mut second = None;
            for _ in 0..RANDOM_PAIR_ATTEMPTS {
                let candidate = source.vector(rng.random_range(0..n))?;
                if candidate != first {
                    second = Some(candidate);
                    break;
                }
            }
            let second = match second {
                Some(v) => v,
                None => {
                    tracing::debug!("no distinct random draw, using the vector farthest from the first");
                    let (_, index) = farthest_from(source, first.view())?;
                    source.vector(index)?
                }
            };
            centroids.row_mut(0).assign(&first);
            centroids.row_mut(1).assign(&second);
        }
    }
    Ok(centroids)
}

/// One assignment pass: relabel every vector and accumulate cluster sums
fn assign<S: FeatureSource>(source: &S, centroids: &Array2<f64>, labels: &mut [u8]) -> Result<Partial> {
    let dim = source.dim();
    let c0 = centroids.row(0);
    let c1 = centroids.row(1);
    fold_chunks_mut(
        labels,
        source.band_len(),
        Ok(Partial::new(dim)),
        |band, chunk| {
            source.with_band(band, |view| {
                let mut partial = Partial::new(dim);
                for (row, label) in view.rows().into_iter().zip(chunk.iter_mut()) {
                    let next = if squared_distance(row, c1) < squared_distance(row, c0) { 1 } else { 0 };
                    if *label != next {
                        partial.changed += 1;
                        *label = next;
                    }
                    let k = next as usize;
                    for (s, v) in partial.sums[k].iter_mut().zip(row.iter()) {
                        *s += v;
                    }
                    partial.counts[k] += 1;
                }
                partial
            })
        },
        |a: Result<Partial>, b| Ok(a?.merge(b?)),
    )
}

#[inline]
fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::sample_blocks;
    use crate::classification::pca::{eigen_basis, EigenParams};
    use crate::classification::projection::{project_features, LazyFeatures};
    use changemap_core::raster::{Raster, Window};

    /// Feature space straight from a list of vectors, as a single-row image
    fn space(vectors: &[&[f64]], band_rows: usize) -> FeatureSpace {
        FeatureSpace::from_vectors(vectors, band_rows).unwrap()
    }

    #[test]
    fn test_two_obvious_groups() {
        let fvs = space(&[&[0.0], &[0.1], &[0.2], &[10.0], &[10.1]], 1);
        let result = two_means(&fvs, &KmeansParams::default()).unwrap();
        assert!(result.converged);
        assert!(!result.degenerate);
        assert_eq!(result.labels[0], result.labels[1]);
        assert_eq!(result.labels[1], result.labels[2]);
        assert_eq!(result.labels[3], result.labels[4]);
        assert_ne!(result.labels[0], result.labels[3]);
        assert_eq!(result.counts().iter().sum::<usize>(), 5);
    }

    #[test]
    fn test_identical_vectors_are_degenerate() {
        let fvs = space(&[&[2.0, 1.0], &[2.0, 1.0], &[2.0, 1.0]], 1);
        let result = two_means(&fvs, &KmeansParams::default()).unwrap();
        assert!(result.degenerate);
        assert_eq!(result.labels, vec![0, 0, 0]);
    }

    #[test]
    fn test_single_vector_is_degenerate() {
        let fvs = space(&[&[4.0]], 1);
        let result = two_means(&fvs, &KmeansParams::default()).unwrap();
        assert!(result.degenerate);
        assert_eq!(result.labels, vec![0]);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let diff = Raster::from_fn(12, 12, |r, c| ((r * 7 + c * 13) % 17) as f64);
        let ds = sample_blocks(&diff, Window::new(3).unwrap()).unwrap();
        let basis = eigen_basis(&ds, &EigenParams::default()).unwrap();
        let fvs = project_features(&diff, &basis, 4).unwrap();
        for init in [InitStrategy::MeanFarthest, InitStrategy::RandomPair] {
            let params = KmeansParams { init, seed: 7, ..Default::default() };
            let a = two_means(&fvs, &params).unwrap();
            let b = two_means(&fvs, &params).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_lazy_source_matches_materialized() {
        let diff = Raster::from_fn(10, 9, |r, c| if r > 5 && c > 4 { 8.0 } else { ((r + c) % 3) as f64 });
        let ds = sample_blocks(&diff, Window::new(3).unwrap()).unwrap();
        let basis = eigen_basis(&ds, &EigenParams::default()).unwrap();
        let full = project_features(&diff, &basis, 3).unwrap();
        let lazy = LazyFeatures::new(&diff, &basis, 3).unwrap();
        let params = KmeansParams::default();
        let a = two_means(&full, &params).unwrap();
        let b = two_means(&lazy, &params).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_tie_goes_to_cluster_zero() {
        let fvs = space(&[&[1.0], &[-3.0], &[5.0]], 2);
        let centroids = Array2::from_shape_vec((2, 1), vec![0.0, 2.0]).unwrap();
        let mut labels = vec![u8::MAX; 3];
        let partial = assign(&fvs, &centroids, &mut labels).unwrap();
        assert_eq!(labels, vec![0, 0, 1]);
        assert_eq!(partial.counts, [2, 1]);
        assert_eq!(partial.changed, 3);
        assert_eq!(partial.sums[0], vec![-2.0]);
    }

    #[test]
    fn test_tiny_but_distinct_vectors_are_separated() {
        let fvs = space(&[&[0.0], &[0.0], &[0.0], &[3e-13], &[3e-13]], 2);
        let result = two_means(&fvs, &KmeansParams::default()).unwrap();
        assert!(!result.degenerate);
        assert_eq!(result.labels, vec![0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_reseed_fills_empty_cluster() {
        let fvs = space(&[&[0.0], &[1.0], &[2.0]], 2);
        // Every vector is nearer to cluster 0
        let mut centroids = Array2::from_shape_vec((2, 1), vec![1.0, 100.0]).unwrap();
        let mut labels = vec![u8::MAX; 3];
        let partial = assign(&fvs, &centroids, &mut labels).unwrap();
        assert_eq!(partial.counts, [3, 0]);

        let mut reinitializations = 0;
        let reseeded = reseed_empty(&fvs, &mut centroids, &partial, 1, &mut reinitializations, 3).unwrap();
        assert!(reseeded);
        assert_eq!(reinitializations, 1);
        // Vectors 0 and 2 are equally far from the survivor; the lower index wins
        assert_eq!(centroids.row(1).to_vec(), vec![0.0]);

        let partial = assign(&fvs, &centroids, &mut labels).unwrap();
        assert_eq!(labels, vec![1, 0, 0]);
        assert_eq!(partial.counts, [2, 1]);
    }

    #[test]
    fn test_reseed_is_a_no_op_with_two_populated_clusters() {
        let fvs = space(&[&[0.0], &[5.0]], 1);
        let mut centroids = Array2::from_shape_vec((2, 1), vec![0.0, 5.0]).unwrap();
        let mut labels = vec![u8::MAX; 2];
        let partial = assign(&fvs, &centroids, &mut labels).unwrap();
        let mut reinitializations = 0;
        assert!(!reseed_empty(&fvs, &mut centroids, &partial, 1, &mut reinitializations, 3).unwrap());
        assert_eq!(reinitializations, 0);
    }

    #[test]
    fn test_exhausted_reseeds_fail() {
        let fvs = space(&[&[0.0], &[1.0], &[2.0]], 2);
        let mut centroids = Array2::from_shape_vec((2, 1), vec![1.0, 100.0]).unwrap();
        let mut labels = vec![u8::MAX; 3];
        let partial = assign(&fvs, &centroids, &mut labels).unwrap();
        let mut reinitializations = 2;
        match reseed_empty(&fvs, &mut centroids, &partial, 5, &mut reinitializations, 2) {
            Err(Error::EmptyCluster { stage, iteration, retries }) => {
                assert_eq!(stage, "ClusterEngine");
                assert_eq!(iteration, 5);
                assert_eq!(retries, 2);
            }
            other => panic!("expected EmptyCluster, got {other:?}"),
        }
    }

    #[test]
    fn test_no_reseeds_allowed_fails_on_empty_cluster() {
        let fvs = space(&[&[0.0], &[1.0], &[2.0]], 2);
        let centroids = Array2::from_shape_vec((2, 1), vec![1.0, 100.0]).unwrap();
        let params = KmeansParams { max_reinit: 0, ..Default::default() };
        assert!(matches!(
            lloyd(&fvs, centroids, &params),
            Err(Error::EmptyCluster { iteration: 1, retries: 0, .. })
        ));
    }

    #[test]
    fn test_reseed_on_last_iteration_still_yields_two_clusters() {
        let fvs = space(&[&[0.0], &[1.0], &[2.0], &[9.0]], 2);
        let centroids = Array2::from_shape_vec((2, 1), vec![3.0, 100.0]).unwrap();
        let params = KmeansParams { max_iterations: 1, ..Default::default() };
        let result = lloyd(&fvs, centroids, &params).unwrap();
        assert_eq!(result.iterations, 1);
        assert_eq!(result.reinitializations, 1);
        assert!(!result.converged);
        assert!(!result.degenerate);
        assert_eq!(result.labels, vec![0, 0, 0, 1]);
        assert_eq!(result.counts(), [3, 1]);
    }

    #[test]
    fn test_reseed_recovers_within_iterations() {
        let fvs = space(&[&[0.0], &[1.0], &[2.0], &[9.0]], 2);
        let centroids = Array2::from_shape_vec((2, 1), vec![3.0, 100.0]).unwrap();
        let result = lloyd(&fvs, centroids, &KmeansParams::default()).unwrap();
        assert!(result.converged);
        assert_eq!(result.reinitializations, 1);
        assert_eq!(result.labels, vec![0, 0, 0, 1]);
        assert_eq!(result.centroid(0).to_vec(), vec![1.0]);
        assert_eq!(result.centroid(1).to_vec(), vec![9.0]);
    }

    #[test]
    fn test_non_convergence_is_flagged() {
        let fvs = space(&[&[0.0], &[1.0], &[2.0], &[3.0], &[10.0], &[11.0], &[30.0]], 1);
        let params = KmeansParams { max_iterations: 1, tolerance: 0.0, ..Default::default() };
        let result = two_means(&fvs, &params).unwrap();
        assert_eq!(result.iterations, 1);
        assert!(!result.converged);
        assert_eq!(result.labels.len(), 7);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let fvs = space(&[&[0.0], &[1.0], &[5.0]], 1);
        let deadline = Deadline::start(Some(std::time::Duration::ZERO));
        std::thread::sleep(std::time::Duration::from_millis(2));
        let params = KmeansParams { deadline: Some(deadline), ..Default::default() };
        assert!(matches!(two_means(&fvs, &params), Err(Error::Timeout { .. })));
    }

    #[test]
    fn test_random_pair_separates_groups() {
        let fvs = space(&[&[0.0], &[0.5], &[1.0], &[20.0], &[21.0]], 2);
        let params = KmeansParams { init: InitStrategy::RandomPair, seed: 3, ..Default::default() };
        let result = two_means(&fvs, &params).unwrap();
        assert_eq!(result.labels[0], result.labels[2]);
        assert_ne!(result.labels[0], result.labels[4]);
    }

    #[test]
    fn test_invalid_params() {
        let fvs = space(&[&[0.0], &[1.0]], 1);
        let zero_iter = KmeansParams { max_iterations: 0, ..Default::default() };
        assert!(two_means(&fvs, &zero_iter).is_err());
        let bad_tol = KmeansParams { tolerance: f64::NAN, ..Default::default() };
        assert!(two_means(&fvs, &bad_tol).is_err());
    }

    #[test]
    fn test_stage_runs_with_defaults() {
        let fvs = space(&[&[0.0, 0.0], &[0.0, 1.0], &[9.0, 9.0]], 2);
        let result = ClusterEngine.execute_default(&fvs).unwrap();
        assert_eq!(result.labels[0], result.labels[1]);
        assert_ne!(result.labels[0], result.labels[2]);
    }
}
