//! End-to-end change detection
//!
//! Runs the stages in order, each consuming the previous artifact:
//! difference image, block dataset, eigen-basis, feature space, cluster
//! labels, change map, cleaned change map. The wall-clock limit is checked
//! between stages and between cluster iterations.

use serde::Serialize;
use changemap_core::raster::{Image, Raster};
use changemap_core::{Deadline, Result};

use super::assemble::{assemble_change_map, changed_cluster, count_changed, ChangeMapAssembler};
use super::blocks::{sample_blocks, BlockDataset, BlockSampler};
use super::config::PipelineConfig;
use super::difference::{difference_image, DifferenceImageBuilder};
use crate::classification::{
    eigen_basis, project_features, two_means, ClusterAssignment, ClusterEngine, EigenBasis,
    EigenSpaceBuilder, FeatureSpace, FeatureVectorProjector, LazyFeatures,
};
use crate::morphology::{opening, MapCleaner};

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
    pub window: usize,
    /// Blocks used for the covariance
    pub blocks: usize,
    /// Retained components S
    pub components: usize,
    /// Share of total variance kept by the retained components
    pub variance_retained: f64,
    /// Ridge added to the covariance diagonal, if the retry was needed
    pub ridge_applied: Option<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub reinitializations: usize,
    pub degenerate: bool,
    /// Cluster resolved as "changed"
    pub changed_cluster: Option<u8>,
    /// Changed pixels before cleanup
    pub changed_pixels: usize,
    /// Changed pixels after cleanup
    pub changed_pixels_clean: usize,
    pub streaming: bool,
    pub elapsed_secs: f64,
}

/// Every artifact of a run
#[derive(Debug, Clone)]
pub struct ChangeDetection {
    pub difference: Raster<f64>,
    pub blocks: BlockDataset,
    pub basis: EigenBasis,
    /// Materialized feature space; `None` in streaming mode
    pub features: Option<FeatureSpace>,
    pub assignment: ClusterAssignment,
    pub change_map: Raster<u8>,
    pub cleaned: Raster<u8>,
    pub report: RunReport,
}

/// Detect changed pixels between two co-registered images.
///
/// # Arguments
/// * `before` - Image at time T1
/// * `after` - Image at time T2, same rows, columns and bands
/// * `config` - Run configuration, validated first
///
/// # Errors
/// The first stage error, or [`changemap_core::Error::Timeout`] when the
/// configured limit is exceeded. No partial result is returned.
pub fn detect_changes(before: &Image, after: &Image, config: &PipelineConfig) -> Result<ChangeDetection> {
    config.validate()?;
    let deadline = Deadline::start(config.timeout());
    let window = config.window()?;

    deadline.check(DifferenceImageBuilder::NAME)?;
    let difference = difference_image(before, after, config.channel_rule)?;

    deadline.check(BlockSampler::NAME)?;
    let blocks = sample_blocks(&difference, window)?;

    deadline.check(EigenSpaceBuilder::NAME)?;
    let basis = eigen_basis(&blocks, &config.eigen_params())?;

    deadline.check(FeatureVectorProjector::NAME)?;
    let kmeans = config.kmeans_params(Some(deadline));
    let (features, assignment) = if config.streaming {
        let lazy = LazyFeatures::new(&difference, &basis, config.band_rows)?;
        deadline.check(ClusterEngine::NAME)?;
        (None, two_means(&lazy, &kmeans)?)
    } else {
        let fvs = project_features(&difference, &basis, config.band_rows)?;
        deadline.check(ClusterEngine::NAME)?;
        let assignment = two_means(&fvs, &kmeans)?;
        (Some(fvs), assignment)
    };

    deadline.check(ChangeMapAssembler::NAME)?;
    let change_map = assemble_change_map(&assignment, &difference)?;
    let changed_cluster = changed_cluster(&assignment, &difference)?;

    deadline.check(MapCleaner::NAME)?;
    let cleaned = opening(&change_map, &config.element, config.morph_iterations)?;

    let (rows, cols, bands) = before.dims();
    let report = RunReport {
        rows,
        cols,
        bands,
        window: window.side(),
        blocks: blocks.len(),
        components: basis.components(),
        variance_retained: basis.variance_retained(),
        ridge_applied: basis.ridge_applied(),
        iterations: assignment.iterations,
        converged: assignment.converged,
        reinitializations: assignment.reinitializations,
        degenerate: assignment.degenerate,
        changed_cluster,
        changed_pixels: count_changed(&change_map),
        changed_pixels_clean: count_changed(&cleaned),
        streaming: config.streaming,
        elapsed_secs: deadline.elapsed().as_secs_f64(),
    };

    tracing::info!(
        "{}x{}: S={} ({:.1}% variance), {} iteration(s){}, {} changed ({} after cleanup) in {:.3}s",
        rows,
        cols,
        report.components,
        report.variance_retained * 100.0,
        report.iterations,
        if report.converged { "" } else { " without convergence" },
        report.changed_pixels,
        report.changed_pixels_clean,
        report.elapsed_secs
    );

    Ok(ChangeDetection {
        difference,
        blocks,
        basis,
        features,
        assignment,
        change_map,
        cleaned,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use changemap_core::Error;

    fn pair(rows: usize, cols: usize) -> (Image, Image) {
        let before = Image::single(Raster::from_fn(rows, cols, |r, c| ((r * 3 + c) % 4) as f64));
        let after = Image::single(Raster::from_fn(rows, cols, |r, c| {
            let base = ((r * 3 + c) % 4) as f64;
            if r >= rows / 2 && c >= cols / 2 { base + 50.0 } else { base }
        }));
        (before, after)
    }

    #[test]
    fn test_artifact_shapes() {
        let (before, after) = pair(12, 10);
        let config = PipelineConfig { window: 3, ..Default::default() };
        let run = detect_changes(&before, &after, &config).unwrap();
        assert_eq!(run.difference.shape(), (12, 10));
        assert_eq!(run.blocks.len(), 4 * 4);
        assert_eq!(run.features.as_ref().map(|f| f.vectors().nrows()), Some(120));
        assert_eq!(run.assignment.labels.len(), 120);
        assert_eq!(run.change_map.shape(), (12, 10));
        assert_eq!(run.cleaned.shape(), (12, 10));
        assert!(run.report.changed_pixels_clean <= run.report.changed_pixels);
    }

    #[test]
    fn test_streaming_skips_feature_space() {
        let (before, after) = pair(9, 9);
        let config = PipelineConfig { window: 3, streaming: true, band_rows: 2, ..Default::default() };
        let run = detect_changes(&before, &after, &config).unwrap();
        assert!(run.features.is_none());
        assert!(run.report.streaming);
    }

    #[test]
    fn test_invalid_config_rejected_before_work() {
        let (before, after) = pair(4, 4);
        let config = PipelineConfig { window: 0, ..Default::default() };
        assert!(matches!(
            detect_changes(&before, &after, &config),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch_propagates() {
        let (before, _) = pair(4, 4);
        let (_, after) = pair(4, 5);
        assert!(matches!(
            detect_changes(&before, &after, &PipelineConfig::default()),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
