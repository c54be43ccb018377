//! CLI surface. Bounds on rounds and peers are enforced here, before any
//! remote call is made.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use conformity_core::model::Mode;

#[derive(Parser)]
#[command(
    name = "conformity",
    version,
    about = "Peer-pressure conformity study harness for multiple-choice LLM evaluation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the evaluation sweep for one model
    Run(RunArgs),
    /// Behavioral follow-up interviews over an existing sweep's outputs
    Interview(InterviewArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ModeArg {
    #[default]
    Default,
    Empowered,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Default => Mode::Default,
            ModeArg::Empowered => Mode::Empowered,
        }
    }
}

impl std::fmt::Display for ModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModeArg::Default => "default",
            ModeArg::Empowered => "empowered",
        })
    }
}

#[derive(Parser, Clone)]
pub struct RunArgs {
    /// Model identifier (gpt-4o, GLM-4-Plus, or any Ollama model)
    #[arg(long)]
    pub model: String,

    /// Output directory for checkpoints and result tables
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, default_value = "data/bbh")]
    pub data_dir: PathBuf,

    /// Prior discussion rounds included in multi-round prompts
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(0..=5))]
    pub rounds: u8,

    /// Simulated peers endorsing the majority answer
    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u8).range(3..=6))]
    pub peers: u8,

    #[arg(long, value_enum, default_value_t)]
    pub mode: ModeArg,

    /// Max concurrent workers per configuration
    #[arg(long, default_value_t = 5)]
    pub batch: usize,

    /// Comma-separated task subset (defaults to the full BBH task list)
    #[arg(long, value_delimiter = ',')]
    pub tasks: Option<Vec<String>>,

    /// Resume from existing checkpoints, retrying only their failed indices
    #[arg(long)]
    pub resume: bool,

    /// Request budget per minute against the provider
    #[arg(long, default_value_t = 100)]
    pub rate_limit: usize,

    /// Checkpoint after this many completions
    #[arg(long, default_value_t = 100)]
    pub checkpoint_every: usize,

    /// Per-task timeout in seconds
    #[arg(long, default_value_t = 500)]
    pub task_timeout_secs: u64,
}

#[derive(Parser, Clone)]
pub struct InterviewArgs {
    /// Model whose sweep outputs are interviewed
    #[arg(long)]
    pub model: String,

    /// Judge model that classifies interview replies
    #[arg(long, default_value = "gpt-4o")]
    pub judge_model: String,

    /// Sweep output directory holding the checkpoints
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(0..=5))]
    pub rounds: u8,

    #[arg(long, default_value_t = 6, value_parser = clap::value_parser!(u8).range(3..=6))]
    pub peers: u8,

    #[arg(long, value_enum, default_value_t)]
    pub mode: ModeArg,

    #[arg(long, value_delimiter = ',')]
    pub tasks: Option<Vec<String>>,

    #[arg(long, default_value_t = 100)]
    pub rate_limit: usize,

    /// Samples interviewed per task/protocol pair
    #[arg(long, default_value_t = 5)]
    pub max_samples: usize,
}
