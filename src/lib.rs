//! Forensic image views: a spatial noise residual and the centered
//! magnitude spectrum of that residual, computed in single-flight passes.

pub mod arena;
pub mod error;
pub mod forensics;
pub mod pipeline;
pub mod raster;
pub mod settings;
pub mod util;

pub use error::{ErrorKind, ForensicError, Result};
pub use forensics::ProcessingParameters;
pub use pipeline::worker::{CoordinatorHandle, PassReport, StatusEvent};
pub use pipeline::{ForensicPipeline, PresentationTarget};
pub use raster::{DisplayBuffer, Interpolation, RawImage};
