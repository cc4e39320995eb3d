//! ChatIM CLI - command-line client for the ChatIM sync engine
//!
//! Usage: chatim <command> [options]

mod output;

use anyhow::{anyhow, Context};
use chat_common::{ChatError, ConversationId, EXIT_AUTH, EXIT_CONFIG_ERROR, EXIT_ERROR};
use chat_config::{Config, CONFIG_DIR, DEFAULT_CONFIG_TOML};
use chat_sync::{
    CursorStore, HttpChatApi, Session, SessionEnd, SnapshotStore, SyncConfig, SyncEngine,
    SyncError,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::Path;

#[derive(Parser)]
#[command(name = "chatim", version, about = "ChatIM message sync client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Bearer credential for the server
    #[arg(long, global = true, env = "CHATIM_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .chatim/config.toml in the current directory
    Init {
        /// Local user id to write into the config
        #[arg(long)]
        user: Option<String>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show configuration and persisted sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Catch up once from the stored cursor
    Pull {
        /// Messages per conversation (defaults to sync.pull_limit)
        #[arg(long)]
        limit: Option<u32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a message, e.g. `chatim send private:U2 "hello"`
    Send {
        /// Conversation id (private:<user> or group:<group>)
        conversation: String,

        content: String,
    },

    /// Stay connected to the push feed until Ctrl-C
    Listen {
        /// Conversation to treat as open (its messages do not count as unread)
        #[arg(long)]
        select: Option<String>,
    },

    /// Delete the persisted cursor and snapshot
    Reset,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    chat_common::telemetry::init_tracing(cli.verbose, cli.json_logs);
    tracing::debug!("ChatIM CLI started");

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let root = std::env::current_dir()?;

    match cli.command {
        Commands::Init { user, force } => cmd_init(&root, user, force),
        Commands::Status { json } => cmd_status(&root, json),
        Commands::Pull { limit, json } => cmd_pull(&root, cli.token, limit, json).await,
        Commands::Send {
            conversation,
            content,
        } => cmd_send(&root, cli.token, &conversation, &content).await,
        Commands::Listen { select } => cmd_listen(&root, cli.token, select).await,
        Commands::Reset => cmd_reset(&root),
    }
}

//
// Helper functions
//

fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(e) = error.downcast_ref::<SyncError>() {
        if e.is_auth() {
            return EXIT_AUTH;
        }
        if matches!(e, SyncError::ConfigError(_)) {
            return EXIT_CONFIG_ERROR;
        }
    }
    if let Some(ChatError::ConfigError(_)) = error.downcast_ref::<ChatError>() {
        return EXIT_CONFIG_ERROR;
    }
    EXIT_ERROR
}

/// Workspace config with env overrides, validated
fn load_config(root: &Path) -> anyhow::Result<SyncConfig> {
    let mut config = Config::load(root)?;
    config.apply_env();

    let sync = SyncConfig::from_config(&config);
    sync.validate().map_err(SyncError::ConfigError)?;
    Ok(sync)
}

fn credential(token: Option<String>) -> anyhow::Result<String> {
    token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SyncError::Auth("no credential; pass --token or set CHATIM_TOKEN".into()))
        .map_err(Into::into)
}

fn parse_conversation(raw: &str) -> anyhow::Result<ConversationId> {
    raw.parse()
        .with_context(|| format!("invalid conversation id {:?}", raw))
}

fn persist<A: chat_sync::ChatApi>(engine: &mut SyncEngine<A>) {
    if let Err(e) = engine.persist() {
        tracing::warn!("Failed to persist sync state: {}", e);
    }
}

//
// Command implementations
//

fn cmd_init(root: &Path, user: Option<String>, force: bool) -> anyhow::Result<()> {
    let dir = root.join(CONFIG_DIR);
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
        eprintln!("✓ Created {}/", CONFIG_DIR);
    }

    let config_path = Config::path_in(root);
    if config_path.exists() && !force {
        eprintln!("✓ {}/config.toml already exists", CONFIG_DIR);
        return Ok(());
    }

    let template = match &user {
        Some(user) => DEFAULT_CONFIG_TOML.replace(
            "user_id = \"\"",
            &format!("user_id = {}", toml::Value::String(user.clone())),
        ),
        None => DEFAULT_CONFIG_TOML.to_string(),
    };
    fs::write(&config_path, template)?;
    eprintln!("✓ Wrote {}/config.toml", CONFIG_DIR);

    if user.is_none() {
        eprintln!("  Set [session] user_id (or CHATIM_USER) before syncing");
    }
    Ok(())
}

fn cmd_status(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let state_dir = config.state_dir();

    let cursor = CursorStore::open(&state_dir).load();
    let snapshot = SnapshotStore::new(&state_dir, config.snapshot_enabled).load();

    output::status(&config, cursor, &snapshot, json)
}

async fn cmd_pull(
    root: &Path,
    token: Option<String>,
    limit: Option<u32>,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let credential = credential(token)?;
    let api = HttpChatApi::new(&config.api_base, &credential, config.request_timeout)?;

    let mut engine = SyncEngine::new(&config, api);
    engine.restore();
    let summary = engine.pull(limit.unwrap_or(config.pull_limit)).await?;
    persist(&mut engine);

    output::pull(&summary, engine.conversations(), engine.total_unread(), json)
}

async fn cmd_send(
    root: &Path,
    token: Option<String>,
    conversation: &str,
    content: &str,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let id = parse_conversation(conversation)?;
    if content.trim().is_empty() {
        return Err(anyhow!("message content cannot be empty"));
    }
    let credential = credential(token)?;
    let api = HttpChatApi::new(&config.api_base, &credential, config.request_timeout)?;

    let mut engine = SyncEngine::new(&config, api);
    engine.restore();
    let message = engine.send_message(&id, content).await?;
    persist(&mut engine);

    eprintln!(
        "✓ Sent to {} ({})",
        id,
        message.id.as_deref().unwrap_or("no server id")
    );
    Ok(())
}

async fn cmd_listen(
    root: &Path,
    token: Option<String>,
    select: Option<String>,
) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let selected = select.as_deref().map(parse_conversation).transpose()?;
    let credential = credential(token)?;
    let api = HttpChatApi::new(&config.api_base, &credential, config.request_timeout)?;

    let mut session = Session::new(config, api)?;
    session.start(&credential)?;
    session.engine_mut().select_conversation(selected);

    eprintln!("Listening for messages (Ctrl-C to stop)");
    let end = session
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    let engine = session.engine();
    output::conversations(engine.conversations(), engine.total_unread(), false)?;

    match end {
        SessionEnd::Shutdown | SessionEnd::LoggedOut => Ok(()),
        SessionEnd::AuthRejected(reason) => Err(SyncError::Auth(reason).into()),
        SessionEnd::GaveUp { attempts } => Err(anyhow!(
            "push feed unreachable after {} reconnect attempts",
            attempts
        )),
        SessionEnd::ChannelClosed => Err(anyhow!("connection event channel closed")),
    }
}

fn cmd_reset(root: &Path) -> anyhow::Result<()> {
    let config = load_config(root)?;
    let state_dir = config.state_dir();

    CursorStore::open(&state_dir).clear_durable()?;
    SnapshotStore::new(&state_dir, true).clear()?;

    eprintln!("✓ Cleared sync state for {}", config.user_id);
    Ok(())
}
