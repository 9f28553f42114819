use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use docrag_core::config::Config;
use docrag_hybrid::{build_generator, Assistant, HybridEngine};

const CHAT_EXIT: &str = "\\bye";

#[derive(Parser)]
#[command(name = "docrag", version, about = "Hybrid dense + lexical retrieval over a project tree")]
struct Cli {
    /// Config file; defaults to config.toml + config.<RUST_ENV>.toml + DOCRAG_* env
    #[arg(long, short, global = true, env = "DOCRAG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and index every supported file under ROOT
    Ingest {
        /// Defaults to project.root_dir
        root: Option<PathBuf>,
        /// Clear both indexes first
        #[arg(long)]
        reset: bool,
    },
    /// Fused retrieval without generation
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Answer one question from the indexed sources
    Ask {
        query: String,
        /// Print `{answer, hits}` as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive question loop; `\bye` exits
    Chat,
    /// Entry counts per index
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .context("loading configuration")?;
    let settings = config.settings().context("invalid configuration")?;
    let engine = HybridEngine::open(settings, config.base_dir()).await.context("opening indexes")?;
    info!(project = %engine.settings().project.id, index = %engine.layout().root().display(), "engine ready");

    match cli.command {
        Command::Ingest { root, reset } => {
            if reset {
                engine.reset().await?;
                println!("🧹 Cleared existing indexes");
            }
            let report = engine.ingest(root.as_deref(), true).await.context("ingest failed")?;
            println!(
                "✅ Ingested {} chunks from {} files ({} skipped, {} batches)",
                report.chunks_indexed, report.files_seen, report.files_skipped, report.batches
            );
        }
        Command::Search { query, k } => {
            let k = k.unwrap_or(engine.settings().retrieval.top_k);
            let hits = engine.search(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let preview: String = hit.chunk.text.lines().next().unwrap_or_default().chars().take(100).collect();
                println!("{:>2}. {:.4} [{}] {} @ {}  {}", i + 1, hit.score, hit.source, hit.chunk.source_path, hit.chunk.position, preview);
            }
        }
        Command::Ask { query, json } => {
            let assistant = assistant(&engine)?;
            let answer = assistant.ask(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Command::Chat => {
            let assistant = assistant(&engine)?;
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                print!("Task: ");
                std::io::stdout().flush()?;
                let Some(line) = lines.next_line().await? else { break };
                let q = line.trim();
                if q == CHAT_EXIT {
                    println!("exiting...");
                    break;
                }
                if q.is_empty() {
                    continue;
                }
                match assistant.ask(q).await {
                    Ok(answer) => print_answer(&answer),
                    Err(e) => warn!(error = %e, "ask failed"),
                }
            }
        }
        Command::Stats => {
            let stats = engine.stats().await?;
            println!("📊 {} @ {}", engine.settings().project.id, engine.layout().root().display());
            println!("   dense:   {}", stats.dense);
            println!("   lexical: {}", stats.lexical);
        }
    }
    Ok(())
}

fn assistant(engine: &HybridEngine) -> anyhow::Result<Assistant> {
    let generator = build_generator(&engine.settings().llm).context("configuring llm backend")?;
    Ok(engine.assistant(generator))
}

fn print_answer(answer: &docrag_hybrid::Answer) {
    println!("{}", answer.answer);
    if !answer.hits.is_empty() {
        println!();
        for (i, hit) in answer.hits.iter().enumerate() {
            println!("  [Source {}] {} @ {} ({:.4})", i + 1, hit.source_path, hit.position, hit.score);
        }
    }
}
