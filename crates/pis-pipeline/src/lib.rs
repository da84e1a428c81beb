//! PIS Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
//!
//! Extraction and embedding pipeline for the protein information system.
//!
//! # Stages
//!
//! - **Accessions**: seed accession codes from the UniProt search API and CSV
//! - **UniProt**: resolve accessions into proteins, sequences, GO terms and
//!   structure stubs
//! - **PDB**: materialize structure stubs into chains and states
//! - **Embeddings**: compute sequence and 3Di vectors for whatever lacks them
//!
//! Every stage reads and writes the entity graph through
//! [`store::EntityGraphStore`] and returns a [`report::StageReport`]. Re-running
//! a stage is always safe.

pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod models;
pub mod report;
pub mod sources;
pub mod store;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use report::StageReport;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// PIS - protein extraction and embedding pipeline
#[derive(Parser, Debug)]
#[command(name = "pis")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Pipeline configuration file
    #[arg(
        short,
        long,
        env = "PIS_CONFIG",
        default_value = config::DEFAULT_CONFIG_PATH,
        global = true
    )]
    pub config: PathBuf,

    /// Cap on items processed per stage (overrides `limit_execution`)
    #[arg(short, long, global = true)]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Seed accessions from the UniProt search API and an optional CSV file
    Accessions {
        /// CSV file with one accession per row (overrides `accessions_csv`)
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Resolve pending accessions against UniProtKB
    Uniprot,

    /// Download and store structure stubs from the PDB
    Pdb,

    /// Compute missing sequence embeddings
    EmbedSequences,

    /// Compute missing 3Di structure embeddings
    #[command(name = "embed-3di")]
    Embed3di,

    /// Run every stage in order
    Run,

    /// Apply database migrations
    Migrate,
}
