//! Difference image construction
//!
//! Per-pixel magnitude of change between two co-registered images. For
//! multi-band inputs the per-band absolute differences are combined with a
//! [`ChannelRule`].

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use changemap_core::raster::{Image, Raster};
use changemap_core::{Algorithm, Error, Result};

use crate::maybe_rayon::*;

/// How per-band absolute differences are combined into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelRule {
    /// Mean of the band differences
    #[default]
    Mean,
    /// Largest band difference
    Max,
    /// Root of the summed squared band differences
    Euclidean,
}

impl ChannelRule {
    fn combine(self, diffs: &[f64]) -> f64 {
        match self {
            ChannelRule::Mean => diffs.iter().sum::<f64>() / diffs.len() as f64,
            ChannelRule::Max => diffs.iter().copied().fold(0.0, f64::max),
            ChannelRule::Euclidean => diffs.iter().map(|d| d * d).sum::<f64>().sqrt(),
        }
    }
}

/// Parameters for the difference image
#[derive(Debug, Clone, Copy, Default)]
pub struct DifferenceParams {
    /// Band combination rule
    pub channel_rule: ChannelRule,
}

/// Difference image stage
#[derive(Debug, Clone, Default)]
pub struct DifferenceImageBuilder;

impl DifferenceImageBuilder {
    pub const NAME: &'static str = "DifferenceImageBuilder";
}

impl Algorithm for DifferenceImageBuilder {
    type Input<'a> = (&'a Image, &'a Image);
    type Output = Raster<f64>;
    type Params = DifferenceParams;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn description(&self) -> &'static str {
        "Per-pixel magnitude of change between two aligned images"
    }

    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output> {
        difference_image(input.0, input.1, params.channel_rule)
    }
}

/// Compute the difference image `combine_b |after_b - before_b|`.
///
/// Both images must have the same rows, columns and band count. A pixel
/// where any sample of either image is non-finite gets a difference of
/// `0.0`; the number of such pixels is logged.
///
/// # Arguments
/// * `before` - Image at time T1
/// * `after` - Image at time T2
/// * `rule` - How band differences are combined
pub fn difference_image(before: &Image, after: &Image, rule: ChannelRule) -> Result<Raster<f64>> {
    if before.dims() != after.dims() {
        return Err(Error::ShapeMismatch {
            stage: DifferenceImageBuilder::NAME,
            expected: before.dims(),
            actual: after.dims(),
        });
    }

    let (rows, cols) = before.shape();
    let bands = before.band_count();

    let rows_out: Vec<(Vec<f64>, usize)> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut out = Vec::with_capacity(cols);
            let mut diffs = vec![0.0; bands];
            let mut skipped = 0;
            for col in 0..cols {
                let mut finite = true;
                for (b, d) in diffs.iter_mut().enumerate() {
                    let x0 = unsafe { before.bands()[b].get_unchecked(row, col) };
                    let x1 = unsafe { after.bands()[b].get_unchecked(row, col) };
                    if !x0.is_finite() || !x1.is_finite() {
                        finite = false;
                        break;
                    }
                    *d = (x1 - x0).abs();
                }
                if finite {
                    out.push(rule.combine(&diffs));
                } else {
                    skipped += 1;
                    out.push(0.0);
                }
            }
            (out, skipped)
        })
        .collect();

    let mut data = Vec::with_capacity(rows * cols);
    let mut skipped = 0;
    for (row, n) in rows_out {
        data.extend(row);
        skipped += n;
    }
    if skipped > 0 {
        tracing::warn!("{} pixel(s) with non-finite samples treated as unchanged", skipped);
    }
    tracing::debug!("difference image {}x{} from {} band(s), rule {:?}", rows, cols, bands, rule);

    let array = Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))?;
    Ok(Raster::from_array(array))
}
