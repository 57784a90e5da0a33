use clap::{Parser, Subcommand, ValueEnum};

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "trinity")]
#[command(version, about = "Trinity - autonomous engineering orchestration core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// State directory (defaults to $TRINITY_DIR or ~/.trinity)
    #[arg(long, global = true, env = "TRINITY_DIR")]
    pub dir: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the orchestration loop
    Run,

    /// Workflow management
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },

    /// Foundation health
    Foundation {
        #[command(subcommand)]
        command: FoundationCommands,
    },

    /// Pattern store operations
    Pattern {
        #[command(subcommand)]
        command: PatternCommands,
    },
}

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// List all workflows
    List,
    /// Show one workflow with its checkpoints
    Status { id: String },
    /// Resume a checkpointed or paused workflow
    Resume { id: String },
}

#[derive(Subcommand)]
pub enum FoundationCommands {
    /// Run the Foundation Verifier once and print the health structure
    Verify,
}

#[derive(Subcommand)]
pub enum PatternCommands {
    /// Semantic search over the pattern store
    Search {
        query: String,
        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}
