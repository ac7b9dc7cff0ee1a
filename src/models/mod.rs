//! Models module for score streams
//!
//! This module contains the leaf data types of the container model:
//! durations, window-length markers and elements.

pub mod duration;
pub mod element;
pub mod meter;

// Re-export commonly used types
pub use duration::{rational_to_f64, to_rational, Duration, Rational};
pub use element::{Element, ElementId, ElementKind, StreamKind, TieRole};
pub use meter::Meter;
