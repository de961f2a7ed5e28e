//! # changemap core
//!
//! Core types, traits and collaborator I/O for the changemap workspace.
//!
//! This crate provides:
//! - `Raster<T>`: single-band grid used for every pipeline artifact
//! - `Image`: multi-band input image
//! - `Window`: edge-replicated h×h sampling window
//! - the `Algorithm` trait implemented by each pipeline stage
//! - `ImageSource` / `RasterSink` interfaces plus a TIFF adapter

pub mod deadline;
pub mod error;
pub mod io;
pub mod raster;

pub use deadline::Deadline;
pub use error::{Error, Result};
pub use raster::{Image, Raster, RasterElement, Window};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::deadline::Deadline;
    pub use crate::error::{Error, Result};
    pub use crate::io::{ImageSource, RasterSink};
    pub use crate::raster::{Image, Raster, RasterElement, Window};
    pub use crate::Algorithm;
}

/// Core trait for the pipeline stages.
///
/// Stages are pure functions: they borrow an immutable input artifact and
/// return a freshly built output artifact.
pub trait Algorithm {
    /// Input borrowed by the stage
    type Input<'a>;
    /// Artifact produced by the stage
    type Output;
    /// Parameters controlling stage behavior
    type Params: Default;

    /// Returns the stage name, used in error context
    fn name(&self) -> &'static str;

    /// Returns a description of what the stage does
    fn description(&self) -> &'static str;

    /// Execute the stage
    fn execute(&self, input: Self::Input<'_>, params: &Self::Params) -> Result<Self::Output>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input<'_>) -> Result<Self::Output> {
        self.execute(input, &Self::Params::default())
    }
}
