//! Batch input handling
//!
//! - [`classifier`]: format sniffing for raw records
//! - [`segmenter`]: splitting a batch into per-query working directories
//! - [`reformat`]: A3M to aligned FASTA conversion used by the pipeline

pub mod classifier;
pub mod reformat;
pub mod segmenter;

pub use classifier::{classify, Classification};
pub use segmenter::{InputSegmenter, Segmentation};
