//! Core types for the Mosaic engine
//!
//! This crate defines the foundation shared by every layer:
//! - `Scalar`: the element types the engine is generic over
//! - `Error`: the engine-wide error taxonomy
//! - `Options` / `Target`: driver configuration
//! - `Diagnostics`: the non-fatal numeric event channel

pub mod diag;
pub mod error;
pub mod options;
pub mod pivot;
pub mod scalar;

pub use diag::{DiagEvent, Diagnostics};
pub use error::{Error, Result};
pub use options::{OptionKey, OptionValue, Options, ResolvedOptions, Target};
pub use pivot::{PivotEntry, PivotVector};
pub use scalar::{Scalar, C32, C64};
