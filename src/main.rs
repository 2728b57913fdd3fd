mod chunk;
mod error;
mod llm_client;
mod normalize;
mod qa;
mod rag;

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use chunk::{chunk as chunk_text, ChunkConfig, CodeLanguage, ContentKind};
use llm_client::{build_llm_client_from_env, SharedLlmClient};
use normalize::normalize;
use qa::{DocumentInterview, InterviewFlow, ProjectInterview, RetrievalAnswerer};
use rag::{
    build_knowledge_store_from_env, ChunkFilters, ConversationTurn, IngestOrigin,
    IngestionPipeline, SharedKnowledgeStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "knowledge-relay",
    about = "Knowledge transfer assistant: interview outgoing team members, answer incoming ones"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Chunk and ingest a text or source file into a project's knowledge base.
    IngestFile {
        project: String,
        path: String,
        /// Stable document id; derived from the file path when omitted.
        #[arg(long)]
        document_id: Option<String>,
        /// Override the detected content kind ('prose' or 'code').
        #[arg(long)]
        kind: Option<String>,
    },
    /// Ingest a text snippet directly.
    IngestText {
        project: String,
        text: String,
        #[arg(long, default_value = "prose")]
        kind: String,
        /// Originating identifier recorded in chunk metadata.
        #[arg(long, default_value = "adhoc")]
        origin: String,
    },
    /// Ask the project's knowledge base a question; omit it for a chat REPL.
    Ask {
        project: String,
        #[arg(short, long)]
        question: Option<String>,
    },
    /// Run the adaptive project interview for an outgoing member.
    Interview {
        project: String,
        #[arg(long, default_value_t = ProjectInterview::DEFAULT_MAX_TURNS)]
        max_turns: usize,
    },
    /// Interview over a document: one generated question per chunk.
    DocQuestions {
        project: String,
        path: String,
        #[arg(long)]
        document_id: Option<String>,
    },
    /// Drop every stored chunk for a project.
    Purge { project: String },
    /// Ingest a sample chunk and immediately query it back to verify wiring.
    StoreSmoke,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let llm_client = build_llm_client_from_env(true).context("LLM client initialization failed")?;
    let store = build_knowledge_store_from_env(true).context("knowledge store initialization failed")?;
    let pipeline = IngestionPipeline::new(store.clone());

    match cli.command {
        Commands::IngestFile {
            project,
            path,
            document_id,
            kind,
        } => run_ingest_file(&pipeline, &project, &path, document_id, kind).await,
        Commands::IngestText {
            project,
            text,
            kind,
            origin,
        } => run_ingest_text(&pipeline, &project, &text, &kind, &origin).await,
        Commands::Ask { project, question } => {
            let answerer = RetrievalAnswerer::new(store, llm_client);
            match question {
                Some(question) => run_ask_once(&answerer, &project, &question).await,
                None => run_ask_repl(&answerer, &project).await,
            }
        }
        Commands::Interview { project, max_turns } => {
            run_interview(&pipeline, llm_client, &project, max_turns).await
        }
        Commands::DocQuestions {
            project,
            path,
            document_id,
        } => run_doc_questions(&pipeline, llm_client, &project, &path, document_id).await,
        Commands::Purge { project } => run_purge(&store, &project).await,
        Commands::StoreSmoke => run_store_smoke(&pipeline, &store).await,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

/// Extensions routed to the code splitter; grammars exist for a subset, the
/// rest fall back to line-boundary cuts.
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "java", "c", "cpp", "go",
];

fn detect_content_kind(path: &str) -> ContentKind {
    let ext = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_ascii_lowercase());

    match ext.as_deref() {
        Some(ext) if CODE_EXTENSIONS.contains(&ext) => ContentKind::Code,
        _ => ContentKind::Prose,
    }
}

fn derive_document_id(path: &str) -> String {
    let hash = blake3::hash(path.as_bytes()).to_hex().to_string();
    format!("doc-{}", &hash[..8])
}

fn file_name_of(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

async fn run_ingest_file(
    pipeline: &IngestionPipeline,
    project: &str,
    path: &str,
    document_id: Option<String>,
    kind_override: Option<String>,
) -> anyhow::Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read file {path}"))?;

    let kind = match kind_override {
        Some(value) => ContentKind::parse(&value)?,
        None => detect_content_kind(path),
    };
    let document_id = document_id.unwrap_or_else(|| derive_document_id(path));

    let ids = pipeline
        .ingest_text(
            project,
            &content,
            kind,
            IngestOrigin::Document {
                document_id: document_id.clone(),
                file_name: file_name_of(path),
            },
        )
        .await?;

    println!(
        "Ingested {} as {} chunk(s) into project '{}' (document_id={}, kind={}).",
        path,
        ids.len(),
        project,
        document_id,
        kind.as_str()
    );
    Ok(())
}

async fn run_ingest_text(
    pipeline: &IngestionPipeline,
    project: &str,
    text: &str,
    kind: &str,
    origin: &str,
) -> anyhow::Result<()> {
    let kind = ContentKind::parse(kind)?;
    let ids = pipeline
        .ingest_text(
            project,
            text,
            kind,
            IngestOrigin::Document {
                document_id: origin.to_string(),
                file_name: None,
            },
        )
        .await?;

    println!("Stored {} chunk(s) under project '{}'.", ids.len(), project);
    for id in ids {
        println!("- {id}");
    }
    Ok(())
}

async fn run_ask_once(
    answerer: &RetrievalAnswerer,
    project: &str,
    question: &str,
) -> anyhow::Result<()> {
    let record = answerer.answer(project, question, &[]).await?;
    print_answer(&record);
    Ok(())
}

async fn run_ask_repl(answerer: &RetrievalAnswerer, project: &str) -> anyhow::Result<()> {
    println!("Knowledge Relay Q&A for project '{project}'. Type 'exit' to quit.\n");
    let stdin = io::stdin();
    let mut history: Vec<ConversationTurn> = Vec::new();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        stdin.read_line(&mut buffer)?;
        let trimmed = buffer.trim();

        if trimmed.eq_ignore_ascii_case("exit") {
            info!("User exited Q&A");
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        let record = answerer.answer(project, trimmed, &history).await?;
        print_answer(&record);

        history.push(ConversationTurn::human(trimmed));
        history.push(ConversationTurn::ai(record.answer));
    }

    Ok(())
}

fn print_answer(record: &rag::AnswerRecord) {
    println!("\nAnswer:\n{}\n", record.answer);
    for source in &record.sources {
        println!(
            "Source: [{} | {}] {}",
            source.origin, source.origin_id, source.excerpt
        );
    }
    if !record.sources.is_empty() {
        println!();
    }
}

async fn run_interview(
    pipeline: &IngestionPipeline,
    llm_client: SharedLlmClient,
    project: &str,
    max_turns: usize,
) -> anyhow::Result<()> {
    println!(
        "Starting knowledge-transfer interview for project '{project}' (up to {max_turns} questions). Type 'exit' to stop.\n"
    );

    let mut session = ProjectInterview::new(llm_client, project).with_max_turns(max_turns);
    drive_interview(pipeline, &mut session).await?;

    println!(
        "Interview complete: {} answer(s) captured.",
        session.exchanges().len()
    );
    Ok(())
}

async fn run_doc_questions(
    pipeline: &IngestionPipeline,
    llm_client: SharedLlmClient,
    project: &str,
    path: &str,
    document_id: Option<String>,
) -> anyhow::Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read file {path}"))?;
    let document_id = document_id.unwrap_or_else(|| derive_document_id(path));

    let clean = normalize(&content);
    let kind = detect_content_kind(path);
    let language = CodeLanguage::from_extension(path);
    let config = ChunkConfig::for_kind(kind, language);
    let chunks: Vec<String> = chunk_text(&clean, kind, &config)
        .into_iter()
        .map(|span| span.text)
        .collect();

    println!(
        "Interviewing over {} chunk(s) of {} (document_id={}). Type 'exit' to stop.\n",
        chunks.len(),
        path,
        document_id
    );

    let mut session = DocumentInterview::new(llm_client, project, document_id, chunks)?;
    drive_interview(pipeline, &mut session).await?;

    println!("Document interview complete.");
    Ok(())
}

/// Shared question/answer loop for both interview flows.
async fn drive_interview<S: InterviewFlow>(
    pipeline: &IngestionPipeline,
    session: &mut S,
) -> anyhow::Result<()> {
    let stdin = io::stdin();

    while let Some(question) = session.next_question().await? {
        println!("Q: {question}");

        loop {
            print!("A > ");
            io::stdout().flush()?;

            let mut buffer = String::new();
            stdin.read_line(&mut buffer)?;
            let trimmed = buffer.trim();

            if trimmed.eq_ignore_ascii_case("exit") {
                info!("User ended the interview early");
                return Ok(());
            }
            if trimmed.is_empty() {
                println!("(an answer is required; type 'exit' to stop)");
                continue;
            }

            let ids = session.record_answer(pipeline, trimmed).await?;
            println!("Recorded {} chunk(s).\n", ids.len());
            break;
        }
    }

    Ok(())
}

async fn run_purge(store: &SharedKnowledgeStore, project: &str) -> anyhow::Result<()> {
    store.purge_project(project).await?;
    println!("Purged all knowledge for project '{project}'.");
    Ok(())
}

async fn run_store_smoke(
    pipeline: &IngestionPipeline,
    store: &SharedKnowledgeStore,
) -> anyhow::Result<()> {
    let project = "relay-smoke";
    let text = "We deploy via GitHub Actions to staging, then promote to prod.";

    println!("Ingesting smoke chunk into project '{project}'...");
    let ids = pipeline
        .ingest_text(
            project,
            text,
            ContentKind::Prose,
            IngestOrigin::Document {
                document_id: "smoke-doc".to_string(),
                file_name: Some("smoke.md".to_string()),
            },
        )
        .await?;
    println!("Stored {} chunk(s).", ids.len());

    println!("Querying the smoke chunk back...");
    let hits = store
        .query(project, "How do we deploy?", &ChunkFilters::default(), 5)
        .await?;

    println!("Retrieved {} chunk(s):", hits.len());
    for hit in &hits {
        println!(
            "- score={:.3} [{}] {}",
            hit.score,
            hit.metadata.origin_label(),
            hit.text
        );
    }

    Ok(())
}
