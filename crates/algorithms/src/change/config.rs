//! Pipeline configuration
//!
//! One flat, serde-(de)serializable structure with explicit defaults. Every
//! field may be omitted from a configuration file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use changemap_core::raster::Window;
use changemap_core::{Deadline, Error, Result};

use super::difference::{ChannelRule, DifferenceParams};
use crate::classification::{ComponentSelection, EigenParams, InitStrategy, KmeansParams, ProjectionParams};
use crate::morphology::{CleanParams, StructuringElement};

/// Configuration of a change-detection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Block and neighborhood side h
    pub window: usize,
    /// Retained eigen-components
    pub components: ComponentSelection,
    /// Clustering iteration cap
    pub max_iterations: usize,
    /// Centroid-shift convergence threshold
    pub tolerance: f64,
    /// Seed for random cluster initialization
    pub seed: u64,
    /// Cluster initialization strategy
    pub init: InitStrategy,
    /// Empty-cluster re-seeds allowed
    pub max_reinit: usize,
    /// Structuring element for the opening
    pub element: StructuringElement,
    /// Opening iterations (0 disables cleanup)
    pub morph_iterations: usize,
    /// Band combination rule for the difference image
    pub channel_rule: ChannelRule,
    /// Diagonal regularization used when the covariance is degenerate
    pub ridge: f64,
    /// Rows per parallel chunk
    pub band_rows: usize,
    /// Cluster a lazily projected feature space instead of a stored one
    pub streaming: bool,
    /// Overall time limit in seconds
    pub timeout_secs: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: 5,
            components: ComponentSelection::default(),
            max_iterations: 100,
            tolerance: 1e-6,
            seed: 42,
            init: InitStrategy::default(),
            max_reinit: 3,
            element: StructuringElement::default(),
            morph_iterations: 1,
            channel_rule: ChannelRule::default(),
            ridge: 1e-6,
            band_rows: 64,
            streaming: false,
            timeout_secs: None,
        }
    }
}

impl PipelineConfig {
    /// Check every field, reporting the first invalid one
    pub fn validate(&self) -> Result<()> {
        let window = Window::new(self.window)?;
        self.components.validate(window.len())?;
        self.kmeans_params(None).validate()?;
        self.element.validate()?;
        if !self.ridge.is_finite() || self.ridge <= 0.0 {
            return Err(Error::invalid_parameter("ridge", self.ridge, "must be finite and positive"));
        }
        if self.band_rows == 0 {
            return Err(Error::invalid_parameter("band_rows", 0, "band height must be at least 1"));
        }
        if let Some(t) = self.timeout_secs {
            if !t.is_finite() || t <= 0.0 {
                return Err(Error::invalid_parameter("timeout_secs", t, "must be finite and positive"));
            }
        }
        Ok(())
    }

    pub fn window(&self) -> Result<Window> {
        Window::new(self.window)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs_f64)
    }

    pub fn difference_params(&self) -> DifferenceParams {
        DifferenceParams {
            channel_rule: self.channel_rule,
        }
    }

    pub fn eigen_params(&self) -> EigenParams {
        EigenParams {
            selection: self.components,
            ridge: self.ridge,
        }
    }

    pub fn projection_params(&self) -> ProjectionParams {
        ProjectionParams {
            band_rows: self.band_rows,
        }
    }

    pub fn kmeans_params(&self, deadline: Option<Deadline>) -> KmeansParams {
        KmeansParams {
            max_iterations: self.max_iterations,
            tolerance: self.tolerance,
            seed: self.seed,
            init: self.init,
            max_reinit: self.max_reinit,
            deadline,
        }
    }

    pub fn clean_params(&self) -> CleanParams {
        CleanParams {
            element: self.element.clone(),
            iterations: self.morph_iterations,
        }
    }
}
