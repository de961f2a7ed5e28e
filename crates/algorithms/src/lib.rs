//! # changemap algorithms
//!
//! Unsupervised change detection between two co-registered rasters.
//!
//! ## Modules
//!
//! - **change**: difference image, block sampling, change-map assembly and
//!   the end-to-end [`change::detect_changes`] driver
//! - **classification**: eigen-basis (PCA), neighborhood projection, 2-means
//! - **morphology**: binary erosion, dilation and opening

pub mod change;
pub mod classification;
pub mod morphology;
pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::change::{
        assemble_change_map, count_changed, detect_changes, difference_image, sample_blocks,
        ChangeDetection, ChangeMapAssembler, BlockSampler, ChannelRule, DifferenceImageBuilder,
        PipelineConfig, RunReport,
    };
    pub use crate::classification::{
        eigen_basis, project_features, two_means, ClusterAssignment, ClusterEngine,
        ComponentSelection, EigenBasis, EigenSpaceBuilder, FeatureSource, FeatureSpace,
        FeatureVectorProjector, InitStrategy, LazyFeatures,
    };
    pub use crate::morphology::{opening, CleanParams, MapCleaner, StructuringElement};
    pub use changemap_core::prelude::*;
}
