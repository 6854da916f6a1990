//! Run summaries.

mod generator;

pub use generator::{summarize, write_report};
