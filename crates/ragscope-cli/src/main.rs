//! ragscope CLI - inspect every stage of retrieval over a folder of text files.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ragscope_chunk::windows;
use ragscope_core::{AnswerGenerator, ChunkParams, Embedder, RagConfig, RagError, StartupError};
use ragscope_embed::{CachingEmbedder, MockEmbedder, OnnxEmbedder};
use ragscope_query::Retriever;
use ragscope_service::{ChatCompletionsGenerator, DebugRequest, DebugResponse, RagService};

/// ragscope - explainable retrieval over a folder of text files
#[derive(Parser)]
#[command(name = "ragscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/ragscope/config.toml, then ./ragscope.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus directory (overrides the config file)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use a hash-based embedder instead of loading the ONNX model
    #[arg(long, global = true)]
    mock_embedder: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve the chunks most similar to a query
    Query {
        /// The question
        query: String,

        /// Number of chunks in the context
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Window size in chars
        #[arg(long, allow_negative_numbers = true)]
        chunk_size: Option<i64>,

        /// Overlap between windows in chars
        #[arg(long, allow_negative_numbers = true)]
        overlap: Option<i64>,

        /// Generate an answer from the retrieved context
        #[arg(long)]
        generate: bool,

        /// Print the full debug response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show how a file is split into windows
    Chunk {
        /// File to split
        file: PathBuf,

        /// Window size in chars
        #[arg(long, allow_negative_numbers = true)]
        chunk_size: Option<i64>,

        /// Overlap between windows in chars
        #[arg(long, allow_negative_numbers = true)]
        overlap: Option<i64>,
    },

    /// Index the corpus and show statistics
    Stats,
}

/// Anything that ends the process with an error.
enum Failure {
    Startup(StartupError),
    Request(RagError),
}

impl Failure {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Startup(e) => e.error_code(),
            Self::Request(e) => e.error_code(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup(e) => write!(f, "{}", e),
            Self::Request(e) => write!(f, "{}", e),
        }
    }
}

impl From<StartupError> for Failure {
    fn from(err: StartupError) -> Self {
        Self::Startup(err)
    }
}

impl From<RagError> for Failure {
    fn from(err: RagError) -> Self {
        Self::Request(err)
    }
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<RagConfig, Failure> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path),
        None => RagConfig::load_default(),
    }
    .map_err(StartupError::from)?;

    if let Some(dir) = &cli.corpus {
        config.corpus.dir = dir.clone();
    }

    Ok(config)
}

fn build_embedder(config: &RagConfig, mock: bool) -> Arc<dyn Embedder> {
    if mock {
        debug!("Using mock embedder (dim={})", config.embedding.dimension);
        Arc::new(MockEmbedder::with_dimension(config.embedding.dimension))
    } else {
        Arc::new(CachingEmbedder::new(OnnxEmbedder::new(
            config.embedding.clone(),
        )))
    }
}

fn build_generator(
    config: &RagConfig,
    generate: bool,
) -> Result<Option<Arc<dyn AnswerGenerator>>, Failure> {
    if !generate {
        return Ok(None);
    }
    let generator = ChatCompletionsGenerator::from_env(config.generation.clone())?;
    Ok(Some(Arc::new(generator)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error [{}]: {}", e.error_code(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Failure> {
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Query {
            query,
            top_k,
            chunk_size,
            overlap,
            generate,
            json,
        } => {
            // One-shot: index the corpus directly at the requested chunking
            if let Some(size) = chunk_size {
                config.chunking.chunk_size = size;
            }
            if let Some(overlap) = overlap {
                config.chunking.chunk_overlap = overlap;
            }

            let request = DebugRequest {
                query,
                chunk_size: config.chunking.chunk_size,
                chunk_overlap: config.chunking.chunk_overlap,
                top_k: top_k.unwrap_or(config.search.default_top_k),
                generate,
            };

            // Check the API key before spending time on indexing
            let generator = build_generator(&config, generate)?;

            let embedder = build_embedder(&config, cli.mock_embedder);
            let retriever = Retriever::open(&config, embedder).await?;
            let mut service = RagService::new(Arc::new(retriever));
            if let Some(generator) = generator {
                service = service.with_generator(generator);
            }

            let response = service.debug(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response).map_err(RagError::from)?);
            } else {
                print_response(&response);
            }
        }
        Commands::Chunk {
            file,
            chunk_size,
            overlap,
        } => {
            let text = fs::read_to_string(&file)
                .map_err(|e| RagError::document_read(file.display().to_string(), e))?;
            let params = ChunkParams::new(
                chunk_size.unwrap_or(config.chunking.chunk_size),
                overlap.unwrap_or(config.chunking.chunk_overlap),
            );

            println!("{} ({} chars, {})\n", file.display(), text.chars().count(), params);
            for (i, window) in windows(&text, params).enumerate() {
                println!("[{}] {}..{}  {:?}", i, window.start, window.end, window.text);
            }
        }
        Commands::Stats => {
            let embedder = build_embedder(&config, cli.mock_embedder);
            let retriever = Retriever::open(&config, embedder).await?;
            let stats = retriever.stats();

            println!("Corpus: {}\n", config.corpus.dir.display());
            println!("- Documents: {}", stats.documents);
            println!("- Chunks: {} ({})", stats.chunks, stats.params);
            println!("- Embedding dimension: {}", stats.dimension);
            println!("- Skipped: {}", stats.skipped);
            for skipped in retriever.corpus().skipped() {
                println!("  {}", skipped);
            }
        }
    }

    Ok(())
}

fn print_response(response: &DebugResponse) {
    println!(
        "{} documents, {} chunks\n",
        response.documents.len(),
        response.chunks.len()
    );

    for (i, chunk) in response.top_k_chunks.iter().enumerate() {
        println!(
            "---\n[{}] {}#{} (score: {:.4})\n{}\n",
            i + 1,
            chunk.file,
            chunk.chunk_id,
            chunk.score,
            chunk.text
        );
    }

    if let Some(answer) = &response.answer {
        println!("===\nAnswer:\n{}", answer);
    }
}
