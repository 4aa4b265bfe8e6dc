//! CLI argument parsing for the tournee-planner binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tournee-planner", about = "Tour order optimization and arrival time scheduling")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Optimize the visit order of a plan and print the resulting tour
    Optimize {
        /// JSON plan file (sites + tour)
        #[arg(long, short)]
        input: PathBuf,
        /// Use straight-line estimates instead of the routing provider
        #[arg(long)]
        fallback: bool,
    },
    /// Recalculate arrival times without reordering
    Recalculate {
        #[arg(long, short)]
        input: PathBuf,
        /// 0-based index of the first stop to recompute
        #[arg(long, default_value_t = 1)]
        from: usize,
        /// Fill failing legs with straight-line estimates
        #[arg(long)]
        fallback: bool,
    },
    /// Print route geometry and legs between consecutive stops
    Route {
        #[arg(long, short)]
        input: PathBuf,
    },
}
