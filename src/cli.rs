//! Command-line arguments.

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable output for local development.
    Pretty,
    /// Structured JSON lines for log aggregation.
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "odekake", version, about = "Family spot/event discovery backend")]
pub struct Args {
    /// Log output format.
    #[arg(long, value_enum, default_value = "pretty")]
    pub tracing: TracingFormat,
}
