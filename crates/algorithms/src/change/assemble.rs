//! Change map assembly
//!
//! Decides which of the two clusters means "changed" and paints the binary
//! change map. Labels are only relabeled, never reassigned.

use ndarray::Array2;
use changemap_core::raster::Raster;
use changemap_core::{Algorithm, Error, Result};

use crate::classification::ClusterAssignment;

/// Change map value of a changed pixel
pub const CHANGED: u8 = 1;
/// Change map value of an unchanged pixel
pub const UNCHANGED: u8 = 0;

/// Assembly stage
#[derive(Debug, Clone, Default)]
pub struct ChangeMapAssembler;

impl ChangeMapAssembler {
    pub const NAME: &'static str = "ChangeMapAssembler";
}

impl Algorithm for ChangeMapAssembler {
    type Input<'a> = (&'a ClusterAssignment, &'a Raster<f64>);
    type Output = Raster<u8>;
    type Params = ();

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Label the cluster with the larger mean difference as changed"
    }

    fn execute(&self, input: Self::Input<'_>, _params: &Self::Params) -> Result<Self::Output> {
        assemble_change_map(input.0, input.1)
    }
}

/// Mean difference value of the members of each cluster (`None` if empty)
pub fn cluster_magnitudes(assignment: &ClusterAssignment, diff: &Raster<f64>) -> Result<[Option<f64>; 2]> {
    check_shape(assignment, diff)?;

    let mut sums = [0.0; 2];
    let mut counts = [0usize; 2];
    for (&label, &value) in assignment.labels.iter().zip(diff.data().iter()) {
        let k = usize::from(label == 1);
        sums[k] += value;
        counts[k] += 1;
    }
    Ok([0, 1].map(|k| (counts[k] > 0).then(|| sums[k] / counts[k] as f64)))
}

/// Cluster meaning "changed", or `None` when only one cluster is populated.
///
/// Cluster 1 is changed iff its mean difference is strictly larger, so an
/// exact tie resolves to cluster 0.
pub fn changed_cluster(assignment: &ClusterAssignment, diff: &Raster<f64>) -> Result<Option<u8>> {
    if assignment.degenerate {
        return Ok(None);
    }
    Ok(match cluster_magnitudes(assignment, diff)? {
        [Some(m0), Some(m1)] => Some(u8::from(m1 > m0)),
        _ => None,
    })
}

/// Build the binary change map (1 = changed) from cluster labels.
///
/// # Arguments
/// * `assignment` - One label per pixel, row-major
/// * `diff` - Difference image the labels were derived from
pub fn assemble_change_map(assignment: &ClusterAssignment, diff: &Raster<f64>) -> Result<Raster<u8>> {
    check_shape(assignment, diff)?;
    let (rows, cols) = diff.shape();
    let changed = changed_cluster(assignment, diff)?;

    let data: Vec<u8> = match changed {
        Some(cluster) => assignment
            .labels
            .iter()
            .map(|&label| if label == cluster { CHANGED } else { UNCHANGED })
            .collect(),
        None => {
            tracing::debug!("single populated cluster, change map is empty");
            vec![UNCHANGED; rows * cols]
        }
    };

    let array = Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(Raster::from_array(array))
}

/// Number of changed pixels in a change map
pub fn count_changed(map: &Raster<u8>) -> usize {
    map.count_where(|v| v == CHANGED)
}

fn check_shape(assignment: &ClusterAssignment, diff: &Raster<f64>) -> Result<()> {
    if assignment.labels.len() != diff.len() {
        return Err(Error::ShapeMismatch {
            stage: ChangeMapAssembler::NAME,
            expected: (diff.rows(), diff.cols(), 1),
            actual: (assignment.labels.len(), 1, 1),
        });
    }
    Ok(())
}
