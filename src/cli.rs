use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::backend::RetryPolicy;
use crate::chunker::{ChunkerConfig, DEFAULT_MAX_CHARS, DEFAULT_OVERLAP_CHARS};
use crate::model::ContentType;
use crate::semantic::LOCAL_EMBEDDING_DIM;

#[derive(Parser, Debug)]
#[command(
    name = "convocatorias",
    version,
    about = "Grant announcement indexing, refinement and cross-validation"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk and index each grant's PDFs into its own vector index.
    Index(IndexArgs),
    /// Cross-validate pending drafts against their grant indexes.
    Refine(RefineArgs),
    /// Append every PDF to the shared index used for conversational retrieval.
    Publish(PublishArgs),
    /// Index, refine and publish in one go.
    Run(RunArgs),
    Search(SearchArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(long, default_value = "data")]
    pub data_root: PathBuf,

    /// Shared index directory. Defaults to `<data-root>/shared`.
    #[arg(long)]
    pub shared_index_dir: Option<PathBuf>,
}

impl DataArgs {
    pub fn json_root(&self) -> PathBuf {
        self.data_root.join("json")
    }

    pub fn pdf_root(&self) -> PathBuf {
        self.data_root.join("pdf")
    }

    pub fn vec_root(&self) -> PathBuf {
        self.data_root.join("vec")
    }

    pub fn manifest_dir(&self) -> PathBuf {
        self.data_root.join("manifests")
    }

    pub fn shared_index_dir(&self) -> PathBuf {
        self.shared_index_dir
            .clone()
            .unwrap_or_else(|| self.data_root.join("shared"))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbeddingBackend {
    Local,
    Http,
}

#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    #[arg(long, value_enum, default_value_t = EmbeddingBackend::Local)]
    pub embedding_backend: EmbeddingBackend,

    #[arg(
        long,
        env = "CONVOCATORIAS_EMBEDDING_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub embedding_url: String,

    #[arg(long, env = "CONVOCATORIAS_EMBEDDING_KEY", hide_env_values = true)]
    pub embedding_key: Option<String>,

    #[arg(long, default_value = "text-embedding-3-small")]
    pub embedding_model: String,

    #[arg(long, default_value_t = LOCAL_EMBEDDING_DIM)]
    pub embedding_dim: usize,

    #[arg(long, default_value_t = 32)]
    pub embed_batch: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RetryArgs {
    /// Attempts per backend call before the batch is halted.
    #[arg(long, default_value_t = 5)]
    pub max_retries: usize,

    #[arg(long, default_value_t = 10_000)]
    pub retry_delay_ms: u64,

    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,
}

impl RetryArgs {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeciderArgs {
    #[arg(
        long,
        env = "CONVOCATORIAS_LLM_URL",
        default_value = "https://api.openai.com/v1"
    )]
    pub llm_url: String,

    #[arg(long, env = "CONVOCATORIAS_LLM_KEY", hide_env_values = true)]
    pub llm_key: Option<String>,

    #[arg(long, env = "CONVOCATORIAS_LLM_MODEL", default_value = "gpt-4o-mini")]
    pub llm_model: String,
}

#[derive(Args, Debug, Clone)]
pub struct ChunkArgs {
    #[arg(long, default_value_t = DEFAULT_MAX_CHARS)]
    pub chunk_max_chars: usize,

    #[arg(long, default_value_t = DEFAULT_OVERLAP_CHARS)]
    pub chunk_overlap_chars: usize,
}

impl ChunkArgs {
    pub fn config(&self) -> ChunkerConfig {
        ChunkerConfig::new(self.chunk_max_chars, self.chunk_overlap_chars)
    }
}

#[derive(Args, Debug, Clone)]
pub struct RefineTuningArgs {
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Refine drafts even when both artifacts already exist.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long, default_value_t = 5_000)]
    pub search_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub chunk: ChunkArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub retry: RetryArgs,

    /// Restrict indexing to these grant folders.
    #[arg(long = "vector-id")]
    pub vector_ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RefineArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub retry: RetryArgs,

    #[command(flatten)]
    pub decider: DeciderArgs,

    #[command(flatten)]
    pub tuning: RefineTuningArgs,

    /// Restrict refinement to these document ids.
    #[arg(long = "document")]
    pub documents: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub chunk: ChunkArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub retry: RetryArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub chunk: ChunkArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub retry: RetryArgs,

    #[command(flatten)]
    pub decider: DeciderArgs,

    #[command(flatten)]
    pub tuning: RefineTuningArgs,

    #[arg(long, default_value_t = false)]
    pub skip_publish: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ChunkTypeArg {
    Text,
    Table,
}

impl From<ChunkTypeArg> for ContentType {
    fn from(value: ChunkTypeArg) -> Self {
        match value {
            ChunkTypeArg::Text => ContentType::Text,
            ChunkTypeArg::Table => ContentType::Table,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub data: DataArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,

    #[command(flatten)]
    pub retry: RetryArgs,

    #[arg(long)]
    pub query: String,

    /// Grant folder to search. Searches the shared index when omitted.
    #[arg(long)]
    pub vector_id: Option<String>,

    #[arg(long, default_value_t = 4)]
    pub k: usize,

    #[arg(long = "type", value_enum)]
    pub content_type: Option<ChunkTypeArg>,

    #[arg(long)]
    pub document: Option<String>,

    /// Use the 80/20 prose/table split instead of a plain search.
    #[arg(long, default_value_t = false)]
    pub mixed: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long, default_value_t = 5_000)]
    pub search_timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub data: DataArgs,
}
