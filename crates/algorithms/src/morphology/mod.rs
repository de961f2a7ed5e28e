//! Binary morphology for change-map cleanup
//!
//! - **Erosion**: keep pixels whose whole element neighborhood is set
//! - **Dilation**: set pixels reached by the reflected element
//! - **Opening**: erosion then dilation (the MapCleaner stage)

mod dilate;
mod element;
mod erode;
mod opening;

pub use dilate::{dilate, Dilate, DilateParams};
pub use element::StructuringElement;
pub use erode::{erode, Erode, ErodeParams};
pub use opening::{opening, CleanParams, MapCleaner};
