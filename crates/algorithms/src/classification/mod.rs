//! Eigen-space construction and unsupervised classification
//!
//! - **PCA**: eigen-basis of the difference-image block covariance
//! - **Projection**: per-pixel neighborhoods mapped into the eigen-space
//! - **K-means**: two-cluster partition of the feature vectors

mod pca;
mod projection;
mod kmeans;

pub use pca::{eigen_basis, ComponentSelection, EigenBasis, EigenParams, EigenSpaceBuilder};
pub use projection::{
    project_features, project_rows, FeatureSource, FeatureSpace, FeatureVectorProjector, LazyFeatures,
    ProjectionParams,
};
pub use kmeans::{two_means, ClusterAssignment, ClusterEngine, InitStrategy, KmeansParams};
