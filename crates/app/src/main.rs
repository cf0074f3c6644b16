use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use doc_chat_core::config::{
    DEFAULT_COMPLETION_MODEL, DEFAULT_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL,
};
use doc_chat_core::models::EMBEDDING_DIMENSIONS;
use doc_chat_core::{
    discover_documents, Accounts, ChatOrchestrator, ChatTranscript, ChunkIndex, ChunkWorker,
    ChunkingConfig, CitationParser, DocumentLibrary, Embedder, HashingEmbedder,
    IngestionPipeline, LopdfExtractor, MediaStore, OpenAiClient, OpenAiConfig, QdrantStore,
    RequestContext, Retriever, RetrievedChunk, Sender, SqliteStore, TeamRole, TokioTaskQueue,
    User,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "doc-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database URL
    #[arg(long, env = "DOC_CHAT_DATABASE_URL", default_value = "sqlite://doc-chat.db")]
    database_url: String,

    /// Directory uploaded files are copied into
    #[arg(long, env = "DOC_CHAT_MEDIA_ROOT", default_value = "media")]
    media_root: PathBuf,

    /// Public URL the media directory is served under
    #[arg(long, env = "DOC_CHAT_MEDIA_URL", default_value = "http://localhost:8000/media/")]
    media_url: Url,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Embedding model name
    #[arg(long, env = "DOC_CHAT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Chat-completion model name
    #[arg(long, env = "DOC_CHAT_COMPLETION_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    completion_model: String,

    /// Where embeddings come from
    #[arg(long, env = "DOC_CHAT_EMBEDDER", value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Where embedded chunks are stored and searched
    #[arg(
        long,
        env = "DOC_CHAT_VECTOR_STORE",
        value_enum,
        default_value_t = VectorStoreKind::Sqlite
    )]
    vector_store: VectorStoreKind,

    /// Qdrant base URL
    #[arg(long, env = "DOC_CHAT_QDRANT_URL", default_value = "http://localhost:6333")]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "DOC_CHAT_QDRANT_COLLECTION", default_value = "document_chunks")]
    qdrant_collection: String,

    /// Account email
    #[arg(long, env = "DOC_CHAT_EMAIL")]
    email: Option<String>,

    /// Account password
    #[arg(long, env = "DOC_CHAT_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// OpenAI embeddings endpoint
    Openai,
    /// Offline trigram hashing, no network
    Local,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum VectorStoreKind {
    Sqlite,
    Qdrant,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema (and the Qdrant collection when selected).
    Init,
    /// Register an account with the --email/--password credentials.
    CreateUser {
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Create a team administered by the logged-in user.
    CreateTeam {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Add an existing user to a team. Requires team admin.
    AddMember {
        #[arg(long)]
        team: Uuid,
        /// Email of the user to add
        member: String,
        /// admin, staff or guest
        #[arg(long, default_value = "staff", value_parser = parse_role)]
        role: TeamRole,
    },
    /// List the logged-in user's teams.
    Teams,
    /// Upload a file, or every supported file under a folder.
    Upload {
        #[arg(long)]
        team: Uuid,
        path: PathBuf,
        /// Override the content type guessed from the extension
        #[arg(long)]
        content_type: Option<String>,
    },
    /// List team documents, newest first.
    Documents {
        #[arg(long)]
        team: Uuid,
    },
    /// Replace a document's metadata with a JSON object ("null" clears it).
    SetMetadata {
        #[arg(long)]
        team: Uuid,
        document: Uuid,
        metadata: String,
    },
    /// Delete a document, its chunks and its stored file.
    DeleteDocument {
        #[arg(long)]
        team: Uuid,
        document: Uuid,
    },
    /// Start a chat with a question and print the first answer.
    Chat {
        #[arg(long)]
        team: Uuid,
        query: String,
    },
    /// Ask a follow-up question in an existing chat.
    Ask {
        #[arg(long)]
        team: Uuid,
        #[arg(long)]
        chat: Uuid,
        query: String,
    },
    /// Print a chat transcript, answering it first if it is still fresh.
    Show {
        #[arg(long)]
        team: Uuid,
        #[arg(long)]
        chat: Uuid,
    },
    /// List recent chats in a team.
    Chats {
        #[arg(long)]
        team: Uuid,
    },
}

struct App {
    store: SqliteStore,
    accounts: Accounts,
    library: DocumentLibrary,
    chats: ChatOrchestrator,
    queue: Arc<TokioTaskQueue>,
    qdrant: Option<Arc<QdrantStore>>,
    parser: CitationParser,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-chat boot"
    );

    let app = build_app(&cli).await?;
    run(&cli, &app).await?;

    if app.queue.pending() > 0 {
        info!(pending = app.queue.pending(), "waiting for embeddings to finish");
    }
    app.queue.drain().await;
    Ok(())
}

async fn build_app(cli: &Cli) -> anyhow::Result<App> {
    let store = SqliteStore::connect(&cli.database_url)
        .await
        .with_context(|| format!("opening database {}", cli.database_url))?;
    let media = MediaStore::new(&cli.media_root, cli.media_url.clone());

    let openai = Arc::new(OpenAiClient::new(
        OpenAiConfig {
            embedding_model: cli.embedding_model.clone(),
            completion_model: cli.completion_model.clone(),
            ..OpenAiConfig::default()
        }
        .with_base_url(cli.openai_base_url.clone())
        .with_api_key(cli.openai_api_key.clone()),
    ));
    if openai.config().api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; model calls will likely fail");
    }

    let embedder: Arc<dyn Embedder> = match cli.embedder {
        EmbedderKind::Openai => openai.clone(),
        EmbedderKind::Local => Arc::new(HashingEmbedder::default()),
    };

    let qdrant = match cli.vector_store {
        VectorStoreKind::Sqlite => None,
        VectorStoreKind::Qdrant => Some(Arc::new(QdrantStore::new(
            &cli.qdrant_url,
            &cli.qdrant_collection,
            EMBEDDING_DIMENSIONS,
        ))),
    };
    let index: Arc<dyn ChunkIndex> = match &qdrant {
        Some(qdrant) => qdrant.clone(),
        None => Arc::new(store.clone()),
    };

    let worker = Arc::new(ChunkWorker::new(embedder.clone(), index.clone()));
    let queue = Arc::new(TokioTaskQueue::new(worker));
    let pipeline = IngestionPipeline::new(
        media.clone(),
        Arc::new(LopdfExtractor),
        ChunkingConfig::default(),
        queue.clone(),
    );

    let retriever = Retriever::new(index.clone(), store.clone(), media.clone());
    Ok(App {
        accounts: Accounts::new(store.clone()),
        library: DocumentLibrary::new(store.clone(), media, pipeline, index),
        chats: ChatOrchestrator::new(store.clone(), retriever, embedder, openai),
        store,
        queue,
        qdrant,
        parser: CitationParser::new()?,
    })
}

async fn run(cli: &Cli, app: &App) -> anyhow::Result<()> {
    match &cli.command {
        Command::Init => {
            app.store.migrate().await?;
            if let Some(qdrant) = &app.qdrant {
                qdrant.ensure_collection().await?;
            }
            println!("database ready at {}", cli.database_url);
        }
        Command::CreateUser { name } => {
            let (email, password) = credentials(cli)?;
            let user = app
                .accounts
                .create_user(email, password, name.as_deref())
                .await?;
            println!("created user {} ({})", user.email, user.id);
        }
        Command::CreateTeam { name, description } => {
            let user = login(cli, app).await?;
            let team = app
                .accounts
                .create_team(&user, name, description.as_deref())
                .await?;
            println!("created team {} ({})", team.name, team.id);
        }
        Command::AddMember { team, member, role } => {
            let ctx = context(cli, app, *team).await?;
            let added = app.accounts.add_member(&ctx, member, *role).await?;
            println!("added {member} to {team} as {}", added.role.as_str());
        }
        Command::Teams => {
            let user = login(cli, app).await?;
            for team in app.accounts.teams_for(&user).await? {
                println!("{}  {}", team.id, team.name);
            }
        }
        Command::Upload {
            team,
            path,
            content_type,
        } => {
            let ctx = context(cli, app, *team).await?;
            ensure_qdrant(app).await?;
            upload(app, &ctx, path, content_type.as_deref()).await?;
        }
        Command::Documents { team } => {
            let ctx = context(cli, app, *team).await?;
            for summary in app.library.documents(&ctx).await? {
                let document = summary.document;
                println!(
                    "{}  {}  {}  {} bytes  {} chunks  {}",
                    document.id,
                    document.name,
                    document.content_type.as_deref().unwrap_or("-"),
                    document.size.unwrap_or_default(),
                    chunk_count_label(summary.chunk_count, app.qdrant.is_some()),
                    document.created_at.to_rfc3339(),
                );
            }
        }
        Command::SetMetadata {
            team,
            document,
            metadata,
        } => {
            let ctx = context(cli, app, *team).await?;
            let value: Value = serde_json::from_str(metadata).context("metadata must be JSON")?;
            let value = (!value.is_null()).then_some(value);
            app.library.set_metadata(&ctx, *document, value).await?;
            println!("updated metadata of {document}");
        }
        Command::DeleteDocument { team, document } => {
            let ctx = context(cli, app, *team).await?;
            ensure_qdrant(app).await?;
            let deleted = app.library.delete(&ctx, *document).await?;
            println!("deleted {} ({})", deleted.name, deleted.id);
        }
        Command::Chat { team, query } => {
            let ctx = context(cli, app, *team).await?;
            ensure_qdrant(app).await?;
            let chat = app.chats.start_chat(&ctx, query).await?;
            println!("chat {} \"{}\"", chat.id, chat.title);

            let first = app.chats.ensure_first_answer(&ctx, chat.id).await?;
            match first.reply {
                Some(reply) => print_answer(&app.parser, &reply.message),
                None => println!("(no answer)"),
            }
        }
        Command::Ask { team, chat, query } => {
            let ctx = context(cli, app, *team).await?;
            ensure_qdrant(app).await?;
            let turn = app.chats.ask(&ctx, *chat, query).await?;
            log_sources(&turn.sources);
            match turn.reply {
                Some(reply) => print_answer(&app.parser, &reply.message),
                None => println!("(no answer)"),
            }
        }
        Command::Show { team, chat } => {
            let ctx = context(cli, app, *team).await?;
            ensure_qdrant(app).await?;
            app.chats.ensure_first_answer(&ctx, *chat).await?;
            let transcript = app.chats.transcript(&ctx, *chat).await?;
            print_transcript(&app.parser, &transcript);
        }
        Command::Chats { team } => {
            let ctx = context(cli, app, *team).await?;
            for chat in app.chats.chats(&ctx).await? {
                println!(
                    "{}  {}  {:?}  {}",
                    chat.id,
                    chat.title,
                    chat.state(),
                    chat.created_at.to_rfc3339()
                );
            }
        }
    }

    Ok(())
}

async fn upload(
    app: &App,
    ctx: &RequestContext,
    path: &Path,
    content_type: Option<&str>,
) -> anyhow::Result<()> {
    let files = if path.is_dir() {
        discover_documents(path)
    } else {
        vec![path.to_path_buf()]
    };
    if files.is_empty() {
        println!("0 documents uploaded (no supported files found)");
        return Ok(());
    }

    let mut uploaded = 0usize;
    for file in &files {
        match app.library.upload(ctx, file, content_type).await {
            Ok(report) => {
                uploaded += 1;
                println!(
                    "{}  {}  {} units queued",
                    report.document.id, report.document.name, report.queued_units
                );
            }
            Err(error) if files.len() > 1 => {
                warn!(path = %file.display(), %error, "skipped file");
            }
            Err(error) => return Err(error.into()),
        }
    }

    app.queue.drain().await;
    println!(
        "{uploaded} document(s) uploaded at {}",
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn ensure_qdrant(app: &App) -> anyhow::Result<()> {
    if let Some(qdrant) = &app.qdrant {
        qdrant.ensure_collection().await?;
    }
    Ok(())
}

fn credentials(cli: &Cli) -> anyhow::Result<(&str, &str)> {
    match (cli.email.as_deref(), cli.password.as_deref()) {
        (Some(email), Some(password)) => Ok((email, password)),
        _ => bail!("--email and --password (or DOC_CHAT_EMAIL/DOC_CHAT_PASSWORD) are required"),
    }
}

async fn login(cli: &Cli, app: &App) -> anyhow::Result<User> {
    let (email, password) = credentials(cli)?;
    app.accounts
        .authenticate(email, password)
        .await?
        .ok_or_else(|| anyhow!("invalid email or password"))
}

async fn context(cli: &Cli, app: &App, team_id: Uuid) -> anyhow::Result<RequestContext> {
    let user = login(cli, app).await?;
    Ok(RequestContext::new(team_id, user.id))
}

fn parse_role(value: &str) -> Result<TeamRole, String> {
    TeamRole::parse(value)
        .ok_or_else(|| format!("unknown role {value:?}; use admin, staff or guest"))
}

/// Chunks kept in Qdrant are not counted by the SQLite listing.
fn chunk_count_label(count: i64, qdrant: bool) -> String {
    if qdrant {
        "-".to_string()
    } else {
        count.to_string()
    }
}

fn log_sources(sources: &[RetrievedChunk]) {
    for source in sources {
        info!(
            document = %source.document.name,
            chunk_index = source.chunk_index,
            distance = source.distance,
            "context chunk"
        );
    }
}

fn print_answer(parser: &CitationParser, message: &str) {
    let parsed = parser.parse(message);
    println!("{}", parsed.answer);
    if parsed.citations.is_empty() {
        return;
    }

    println!("sources:");
    for (position, citation) in parsed.citations.iter().enumerate() {
        println!(
            "  [{}] {}  doc={} chunk={} confidence={}%",
            position + 1,
            parser.link_text(citation),
            citation.document_id,
            citation.chunk_index,
            citation.confidence
        );
    }
}

fn print_transcript(parser: &CitationParser, transcript: &ChatTranscript) {
    let chat = &transcript.chat;
    println!("{} \"{}\" ({:?})", chat.id, chat.title, chat.state());
    for message in &transcript.conversations {
        match message.sender {
            Sender::User => println!("\n> {}", message.message),
            Sender::Bot => {
                println!();
                print_answer(parser, &message.message);
            }
        }
    }

    let others = transcript
        .previous_chats
        .iter()
        .filter(|previous| previous.id != chat.id)
        .collect::<Vec<_>>();
    if !others.is_empty() {
        println!("\nrecent chats:");
        for previous in others {
            println!("  {}  {}", previous.id, previous.title);
        }
    }
}
