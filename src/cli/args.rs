//! Command line argument parsing for the Quiver CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Quiver - vector similarity search over immutable segments
#[derive(Parser, Debug, Clone)]
#[command(name = "quiver")]
#[command(about = "Vector similarity search with filtered top-K queries")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct QuiverArgs {
    /// Verbosity level (repeat for more: -v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory holding all indexes
    #[arg(short = 'd', long, env = "QUIVER_DATA_DIR", default_value = "quiver-data")]
    pub data_dir: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(short, long, env = "QUIVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl QuiverArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n.saturating_add(1),
            }
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create a new index
    #[command(name = "create-index")]
    CreateIndex(CreateIndexArgs),

    /// Delete an index and all of its data
    #[command(name = "drop-index")]
    DropIndex(IndexArgs),

    /// List all indexes
    Indexes,

    /// Insert or overwrite vectors from a JSONL file
    Put(PutArgs),

    /// Run a top-K similarity query
    Query(QueryArgs),

    /// Fetch vectors by key
    Get(KeysArgs),

    /// Delete vectors by key
    Delete(KeysArgs),

    /// List vectors page by page
    List(ListArgs),

    /// Seal buffered writes into a segment
    Flush(IndexArgs),

    /// Rewrite all segments into one, dropping deleted records
    Compact(IndexArgs),

    /// Show index statistics
    Stats(StatsArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CreateIndexArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Vector dimension
    #[arg(short = 'n', long)]
    pub dimension: usize,

    /// Distance metric: euclidean, cosine or dot
    #[arg(short, long, default_value = "euclidean")]
    pub metric: String,

    /// ANN backend: flat, hnsw or ivf_pq
    #[arg(short, long, default_value = "flat")]
    pub backend: String,

    /// Backend parameters as a JSON object
    #[arg(long, value_name = "JSON")]
    pub params: Option<String>,

    /// Metadata keys that may not be used in filters (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub non_filterable: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct PutArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// JSONL file with one {"key", "vector", "metadata"} object per line
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Records per write batch
    #[arg(short, long, default_value = "500")]
    pub batch_size: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct QueryArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Query vector, as a JSON array or comma-separated numbers
    #[arg(value_name = "VECTOR", allow_hyphen_values = true)]
    pub vector: String,

    /// Number of results
    #[arg(short, long, default_value = "10")]
    pub k: usize,

    /// Metadata filter as JSON
    #[arg(long, value_name = "JSON")]
    pub filter: Option<String>,

    /// Return stored vectors
    #[arg(long)]
    pub include_vector: bool,

    /// Omit metadata from results
    #[arg(long)]
    pub no_metadata: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct KeysArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Vector keys
    #[arg(value_name = "KEY", required = true)]
    pub keys: Vec<String>,

    /// Return stored vectors
    #[arg(long)]
    pub include_vector: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct ListArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Token returned by the previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Records per page
    #[arg(short, long)]
    pub page_size: Option<usize>,

    /// Return stored vectors
    #[arg(long)]
    pub include_vector: bool,

    /// Return metadata
    #[arg(long)]
    pub include_metadata: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Include build health
    #[arg(long)]
    pub health: bool,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_index_args() {
        let args = QuiverArgs::try_parse_from([
            "quiver",
            "--data-dir",
            "/tmp/q",
            "create-index",
            "docs",
            "--dimension",
            "128",
            "--backend",
            "hnsw",
            "--non-filterable",
            "body,raw",
        ])
        .unwrap();

        assert_eq!(args.data_dir, PathBuf::from("/tmp/q"));
        match args.command {
            Command::CreateIndex(create) => {
                assert_eq!(create.index, "docs");
                assert_eq!(create.dimension, 128);
                assert_eq!(create.metric, "euclidean");
                assert_eq!(create.backend, "hnsw");
                assert_eq!(create.non_filterable, vec!["body", "raw"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_query_accepts_negative_vector() {
        let argv = ["quiver", "-f", "json", "query", "docs", "-1.5,2", "-k", "3"];
        let args = QuiverArgs::try_parse_from(argv).unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
        match args.command {
            Command::Query(query) => {
                assert_eq!(query.vector, "-1.5,2");
                assert_eq!(query.k, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_verbosity() {
        let args = QuiverArgs::try_parse_from(["quiver", "-vv", "indexes"]).unwrap();
        assert_eq!(args.verbosity(), 3);
        let args = QuiverArgs::try_parse_from(["quiver", "-q", "-v", "indexes"]).unwrap();
        assert_eq!(args.verbosity(), 0);
    }
}
