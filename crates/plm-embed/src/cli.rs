use super::commands;
use clap::{Args, Parser, Subcommand};
use plm_embed::{ComputeDevice, Precision};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed a protein dataset with AMPLIFY and project it to 2D.
    Run(RunArgs),
    /// Project embeddings saved by an earlier run.
    Project(ProjectArgs),
}

#[derive(Args, Debug, Default)]
pub struct UmapArgs {
    #[arg(long)]
    pub n_neighbors: Option<usize>,
    #[arg(long)]
    pub min_dist: Option<f32>,
    #[arg(long)]
    pub n_epochs: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Every flag overrides the matching field of the config file (or of the defaults).
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON run configuration.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    // Model
    /// `hf` or `pytorch`
    #[arg(long)]
    pub source: Option<String>,
    #[arg(long)]
    pub model_id: Option<String>,
    #[arg(long)]
    pub revision: Option<String>,
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    #[arg(long)]
    pub model_config: Option<PathBuf>,
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,
    #[arg(long)]
    pub device: Option<ComputeDevice>,
    #[arg(long)]
    pub precision: Option<Precision>,

    // Batching
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub max_length: Option<usize>,
    #[arg(long)]
    pub num_workers: Option<usize>,
    #[arg(long)]
    pub layers: Option<usize>,

    // Dataset
    #[arg(short, long)]
    pub dataset: Option<PathBuf>,
    #[arg(long)]
    pub label_column: Option<String>,
    #[arg(long)]
    pub sequence_column: Option<String>,
    #[arg(long)]
    pub n_rows: Option<usize>,

    // Outputs
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    #[arg(long)]
    pub plot: Option<PathBuf>,
    #[arg(long)]
    pub embeddings: Option<PathBuf>,

    #[command(flatten)]
    pub umap: UmapArgs,
}

#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// safetensors file with an `embeddings` tensor.
    #[arg(long)]
    pub embeddings: PathBuf,
    /// The dataset the embeddings were extracted from.
    #[arg(long)]
    pub labels: PathBuf,
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long)]
    pub plot: Option<PathBuf>,
    #[arg(long, default_value = "name")]
    pub label_column: String,
    #[arg(long, default_value = "sequence")]
    pub sequence_column: String,
    #[arg(long)]
    pub n_rows: Option<usize>,
    #[command(flatten)]
    pub umap: UmapArgs,
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Run(args) => commands::run::execute(args),
            Commands::Project(args) => commands::project::execute(args),
        }
    }
}
