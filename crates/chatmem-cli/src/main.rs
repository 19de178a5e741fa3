// ============================================================================
// chatmem - command-line front end for the chat memory store
// ============================================================================
// Usage:
//   chatmem create-chat --user U [--title T]          Create a chat
//   chatmem record --chat C --user U --query Q --response R
//                                                     Store one exchange
//   chatmem context --chat C --query Q [--prompt]     Relevant earlier exchanges
//   chatmem list-chats --user U                       A user's chats, newest first
//   chatmem list-messages --chat C                    A chat's exchanges in order
//   chatmem delete-chat --user U --chat C             Delete messages + metadata
// ============================================================================

use anyhow::Result;
use chatmem_core::{
    build_prompt, ChatMemory, IndexLayout, MemoryConfig, Outcome, StoreBackend,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

/// Responses the assistant produces when it could not answer; these are not
/// worth remembering.
const FALLBACK_MARKERS: &[&str] = &["sorry", "i couldn't", "error", "please try again"];

/// Chat memory tool
#[derive(Parser)]
#[command(name = "chatmem", version, about = "Store and retrieve conversational memory")]
struct Cli {
    /// Vector store backend: qdrant or embedded
    #[arg(long, global = true)]
    backend: Option<StoreBackend>,

    /// Embedded database file (default: ~/.chatmem/index.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Qdrant gRPC endpoint
    #[arg(long, global = true)]
    qdrant_url: Option<String>,

    /// Message index layout: per-chat or shared
    #[arg(long, global = true)]
    layout: Option<IndexLayout>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a chat for a user
    CreateChat {
        #[arg(long, env = "CHATMEM_USER")]
        user: String,
        /// Title (default: "Chat N")
        #[arg(long)]
        title: Option<String>,
    },

    /// Record one query/response exchange
    Record {
        #[arg(long)]
        chat: String,
        #[arg(long, env = "CHATMEM_USER")]
        user: String,
        #[arg(long)]
        query: String,
        #[arg(long)]
        response: String,
        /// Store the exchange even if the response looks like a fallback
        #[arg(long)]
        force: bool,
    },

    /// Fetch earlier exchanges relevant to a query
    Context {
        #[arg(long)]
        chat: String,
        #[arg(long)]
        query: String,
        /// Number of exchanges (default: CHATMEM_CONTEXT_LIMIT or 3)
        #[arg(long)]
        limit: Option<usize>,
        /// Print the assembled prompt instead of JSON
        #[arg(long)]
        prompt: bool,
    },

    /// List a user's chats
    ListChats {
        #[arg(long, env = "CHATMEM_USER")]
        user: String,
    },

    /// List a chat's exchanges, oldest first
    ListMessages {
        #[arg(long)]
        chat: String,
        /// Keep only the most recent N (default: CHATMEM_MESSAGE_LIMIT or 500)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a chat and all of its messages
    DeleteChat {
        #[arg(long, env = "CHATMEM_USER")]
        user: String,
        #[arg(long)]
        chat: String,
    },

    /// Change a chat's title
    RenameChat {
        #[arg(long, env = "CHATMEM_USER")]
        user: String,
        #[arg(long)]
        chat: String,
        #[arg(long)]
        title: String,
    },

    /// Find a user's chats by title
    SearchChats {
        #[arg(long, env = "CHATMEM_USER")]
        user: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        limit: usize,
    },

    /// List every index in the store
    Indexes,

    /// Check that the store is reachable
    Health,
}

fn is_fallback_response(response: &str) -> bool {
    let lower = response.to_lowercase();
    FALLBACK_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// JSON view of a best-effort result
fn outcome_json<T: serde::Serialize>(key: &str, outcome: &Outcome<T>) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(key.to_string(), json!(outcome.value()));
    if let Some(error) = outcome.error() {
        body.insert("degraded".to_string(), json!(error.to_string()));
    }
    serde_json::Value::Object(body)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chatmem_core=info".parse()?)
                .add_directive("chatmem_cli=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = MemoryConfig::default();
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(path) = cli.db_path {
        config.db_path = Some(path);
    }
    if let Some(url) = cli.qdrant_url {
        config.qdrant_url = url;
    }
    if let Some(layout) = cli.layout {
        config.layout = layout;
    }

    let memory = ChatMemory::from_config(config)?;

    match cli.command {
        Commands::CreateChat { user, title } => cmd_create_chat(&memory, &user, title).await,
        Commands::Record {
            chat,
            user,
            query,
            response,
            force,
        } => cmd_record(&memory, &chat, &user, &query, &response, force).await,
        Commands::Context {
            chat,
            query,
            limit,
            prompt,
        } => cmd_context(&memory, &chat, &query, limit, prompt).await,
        Commands::ListChats { user } => cmd_list_chats(&memory, &user).await,
        Commands::ListMessages { chat, limit } => cmd_list_messages(&memory, &chat, limit).await,
        Commands::DeleteChat { user, chat } => cmd_delete_chat(&memory, &user, &chat).await,
        Commands::RenameChat { user, chat, title } => {
            let chat = memory.rename_chat(&user, &chat, &title).await?;
            print_json(&json!(chat))
        }
        Commands::SearchChats { user, query, limit } => {
            let matches = memory.search_chats(&user, &query, limit).await?;
            print_json(&json!({ "chats": matches }))
        }
        Commands::Indexes => {
            let names = memory.index_names().await?;
            print_json(&json!({ "indexes": names }))
        }
        Commands::Health => cmd_health(&memory).await,
    }
}

async fn cmd_create_chat(memory: &ChatMemory, user: &str, title: Option<String>) -> Result<()> {
    let created = memory.create_chat(user, title.as_deref()).await?;
    print_json(&json!(created))
}

async fn cmd_record(
    memory: &ChatMemory,
    chat: &str,
    user: &str,
    query: &str,
    response: &str,
    force: bool,
) -> Result<()> {
    if !force && is_fallback_response(response) {
        info!("Not recording fallback response in chat {}", chat);
        return print_json(&json!({
            "message_id": null,
            "skipped": "response looks like a fallback; pass --force to store it",
        }));
    }

    let outcome = memory.record_exchange(chat, user, query, response).await;
    if let Outcome::Failed(error) = &outcome {
        print_json(&json!({ "message_id": null, "error": error }))?;
        return Err(error.clone().into());
    }
    print_json(&outcome_json("message_id", &outcome))
}

async fn cmd_context(
    memory: &ChatMemory,
    chat: &str,
    query: &str,
    limit: Option<usize>,
    prompt: bool,
) -> Result<()> {
    let outcome = memory.fetch_context(chat, query, limit).await;
    if let Outcome::Failed(error) = &outcome {
        return Err(error.clone().into());
    }

    if prompt {
        let messages = outcome.value().map(Vec::as_slice).unwrap_or_default();
        println!("{}", build_prompt(messages, query));
        return Ok(());
    }
    print_json(&outcome_json("messages", &outcome))
}

async fn cmd_list_chats(memory: &ChatMemory, user: &str) -> Result<()> {
    let chats = memory.list_chats(user).await?;
    print_json(&json!({ "user_id": user, "chats": chats }))
}

async fn cmd_list_messages(memory: &ChatMemory, chat: &str, limit: Option<usize>) -> Result<()> {
    let outcome = memory.list_messages(chat, limit).await;
    if let Outcome::Failed(error) = &outcome {
        return Err(error.clone().into());
    }
    print_json(&outcome_json("messages", &outcome))
}

async fn cmd_delete_chat(memory: &ChatMemory, user: &str, chat: &str) -> Result<()> {
    match memory.delete_chat(user, chat).await {
        Ok(()) => print_json(&json!({ "chat_id": chat, "deleted": true })),
        Err(error) => {
            print_json(&json!({ "chat_id": chat, "deleted": false, "error": error }))?;
            Err(error.into())
        }
    }
}

async fn cmd_health(memory: &ChatMemory) -> Result<()> {
    let config = memory.config();
    let healthy = memory.health_check().await.unwrap_or(false);
    print_json(&json!({
        "status": if healthy { "ok" } else { "unavailable" },
        "backend": config.backend,
        "layout": config.layout,
        "dimension": config.dimension,
    }))
}
