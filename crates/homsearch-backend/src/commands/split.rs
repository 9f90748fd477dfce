//! `homsearch split` command implementation
//!
//! Segments a batch into query directories without running any tool.

use crate::commands::run::load_config;
use crate::error::Result;
use crate::input::InputSegmenter;
use colored::Colorize;
use std::path::Path;

/// Segment `input` under `job_root` and print the query table
pub async fn run(
    input: &Path,
    job_root: &Path,
    name: &str,
    config: Option<&Path>,
    max_queries: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config, None, None)?;
    if let Some(max) = max_queries {
        config.max_queries = max;
        config.validate()?;
    }

    let segmentation = InputSegmenter::new(&config, name, job_root).segment_file(input)?;

    println!("{}", format!("{} queries", segmentation.table.len()).cyan().bold());
    for unit in segmentation.table.iter() {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            unit.index,
            unit.format,
            unit.query_length,
            unit.size_bytes,
            unit.input_path.display()
        );
    }
    for warning in &segmentation.warnings {
        println!("{} {}", "Warning:".yellow(), warning);
    }

    Ok(())
}
