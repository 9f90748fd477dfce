//! Homsearch - Main entry point

use anyhow::Context;
use clap::Parser;
use homsearch_backend::commands::{self, run::RunOptions};
use homsearch_backend::{Cli, Commands};
use homsearch_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Verbose mode logs debug to the console; otherwise warnings only
    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Warn
        })
        .output(LogOutput::Console)
        .log_file_prefix("homsearch")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The backend works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Execute the CLI command
async fn execute_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run {
            input,
            job_root,
            name,
            config,
            cpus,
            method,
            no_progress,
        } => {
            let context = format!("Job {} failed", name);
            commands::run::run(RunOptions {
                input,
                job_root,
                name,
                config,
                cpus,
                method,
                show_progress: !no_progress,
            })
            .await
            .context(context)
        },

        Commands::Split {
            input,
            job_root,
            name,
            config,
            max_queries,
        } => commands::split::run(&input, &job_root, &name, config.as_deref(), max_queries)
            .await
            .context("Failed to split input"),
    }
}
