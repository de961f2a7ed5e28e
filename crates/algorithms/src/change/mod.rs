//! Unsupervised change detection between two co-registered images
//!
//! Stages, leaf-first:
//! - **difference**: per-pixel change magnitude
//! - **blocks**: non-overlapping tiles and sliding neighborhoods
//! - **assemble**: cluster labels to a binary change map
//! - **pipeline**: the full run, driven by a [`PipelineConfig`]

mod assemble;
mod blocks;
mod config;
mod difference;
mod pipeline;

pub use assemble::{
    assemble_change_map, changed_cluster, cluster_magnitudes, count_changed, ChangeMapAssembler, CHANGED,
    UNCHANGED,
};
pub use blocks::{sample_blocks, BlockDataset, BlockParams, BlockSampler, NeighborhoodExtractor};
pub use config::PipelineConfig;
pub use difference::{difference_image, ChannelRule, DifferenceImageBuilder, DifferenceParams};
pub use pipeline::{detect_changes, ChangeDetection, RunReport};
