//! Terminal output: progress renderers and shared formatting.

pub mod batch_progress;
pub mod icons;

pub use batch_progress::{FancyRenderer, SimpleRenderer, format_duration};
