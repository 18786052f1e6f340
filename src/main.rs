use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use video_discovery::agent::{AgentEvent, Orchestrator, Termination};
use video_discovery::{create_embedder, create_llm, Config, IngestionPipeline, Retriever, VideoKnowledgeBase};

#[derive(Parser)]
#[command(name = "video-discovery")]
#[command(version, author = "TigreRoll")]
#[command(about = "Question answering over long videos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to video-discovery.toml or environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Folder holding frames/, captions/ and database.json of one video
    #[arg(long, global = true)]
    video_root: Option<PathBuf>,

    /// Only use subtitles: no frame captioning and no frame_inspect tool
    #[arg(long, global = true)]
    lite: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Caption a video's clips and build its knowledge base
    Ingest {
        /// Subtitle (.srt) file of the video
        #[arg(long)]
        subtitles: Option<PathBuf>,

        /// Number of parallel captioning workers
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Answer a question about an ingested video
    Ask {
        question: String,

        /// Maximum number of orchestrator model calls
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Print assistant messages and tool calls as they happen
        #[arg(long)]
        stream: bool,
    },
}

fn load_config(cli: &Cli) -> Config {
    let loaded = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    };
    let mut config = loaded.unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    if let Some(root) = &cli.video_root {
        config.storage.video_root = root.clone();
    }
    if cli.lite {
        config.ingestion.lite_mode = true;
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "video_discovery=debug,info"
    } else {
        "video_discovery=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = load_config(&cli);

    match cli.command {
        Commands::Ingest { subtitles, workers } => {
            if let Some(workers) = workers {
                config.ingestion.max_workers = workers;
            }
            config.validate()?;
            info!("🚀 Video Discovery starting...\n{}", config.summary());

            let caption_llm = create_llm(&config.models.caption)?;
            let embedder = create_embedder(&config.models.embedding)?;
            let pipeline = IngestionPipeline::new(config, caption_llm).await?;

            let (_, report) = pipeline.run(subtitles.as_deref()).await?;
            let db = pipeline.open_knowledge_base(embedder.as_ref()).await?;

            info!("🎉 Ingestion completed in {:.2}s", report.total_time.as_secs_f64());
            info!("✅ Captioned: {}", report.captioned);
            info!("📋 From checkpoints: {}", report.from_checkpoint);
            info!("❌ Empty: {}", report.empty);
            info!("👥 Subjects: {}", report.subjects);
            info!("📚 Knowledge base: {} clips, {}s of video", db.entries.len(), db.video_length_secs);
        }

        Commands::Ask {
            question,
            max_iterations,
            stream,
        } => {
            if let Some(n) = max_iterations {
                config.agent.max_iterations = n;
            }
            config.validate()?;

            let embedder = create_embedder(&config.models.embedding)?;
            let db = VideoKnowledgeBase::open_for(&config, embedder.as_ref()).await?;
            let retriever = Retriever::new(create_llm(&config.models.tool)?, embedder, (&config.agent).into());
            let orchestrator = Orchestrator::new(
                create_llm(&config.models.orchestrator)?,
                retriever,
                Arc::new(db),
                &config.agent,
                config.ingestion.lite_mode,
            )?;

            let outcome = if stream {
                let (tx, mut rx) = mpsc::unbounded_channel();
                let printer = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        match event {
                            AgentEvent::Assistant(message) => {
                                if let Some(text) = message.content.as_deref().filter(|t| !t.trim().is_empty()) {
                                    println!("🤖 {}", text.trim());
                                }
                            }
                            AgentEvent::ToolCall { name, arguments } => println!("🛠️ {}({})", name, arguments),
                            AgentEvent::ToolResult(message) => {
                                let content = message.content.unwrap_or_default();
                                let preview: String = content.chars().take(300).collect();
                                println!("📎 {}", preview);
                            }
                            AgentEvent::Done { .. } => {}
                            AgentEvent::Failed(reason) => eprintln!("❌ {}", reason),
                        }
                    }
                });
                let outcome = orchestrator.stream_run(&question, tx).await;
                if let Err(e) = printer.await {
                    error!("Event printer failed: {}", e);
                }
                outcome?
            } else {
                orchestrator.run(&question).await?
            };

            match &outcome.termination {
                Termination::Finished => info!("🏁 Answered in {} iterations", outcome.iterations),
                Termination::Exhausted => warn!("Iteration budget exhausted without a final answer"),
                Termination::Aborted(reason) => return Err(anyhow!("session aborted: {}", reason)),
            }

            let answer = outcome
                .final_text()
                .ok_or_else(|| anyhow!("no answer produced after {} iterations", outcome.iterations))?;
            println!("{}", answer);
        }
    }

    Ok(())
}
