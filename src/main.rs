use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use serde::Serialize;
use tracing::{info, Level};

use colloquy_core::{ConversationKey, Role, TurnMetadata};
use colloquy_engine::{ConversationManager, EngineConfig};
use colloquy_llm::{LlmSummarizer, OpenAiChatModel, OpenAiConfig};
use colloquy_remote::{
    BreakerConfig, CircuitBreakerStore, ContextStore, HttpContextStore, HttpStoreConfig,
};
use colloquy_settings::Settings;
use colloquy_store::{ContextMap, Database, LocalStore};
use colloquy_telemetry::{init_telemetry, EventFilter, EventLog, Severity, TelemetryConfig};

#[derive(Parser)]
#[command(name = "colloquy")]
#[command(about = "Durable conversation history with remote mirroring and compaction", long_about = None)]
struct Cli {
    /// Settings file (defaults to ~/.colloquy/settings.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one turn to a conversation
    Append {
        key: String,
        role: Role,
        content: String,
        /// Model that produced the turn
        #[arg(long)]
        model: Option<String>,
    },
    /// Print the active view of a conversation
    Load {
        key: String,
        /// Print compacted-away turns instead
        #[arg(long)]
        archive: bool,
    },
    /// Compact a conversation if it exceeds its token budget
    Summarize {
        key: String,
        #[arg(long)]
        budget: Option<u32>,
    },
    /// Keyword search over local history
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Only search keys with this prefix
        #[arg(long)]
        scope: Option<String>,
    },
    /// Delete a conversation locally and remotely
    Delete { key: String },
    /// List conversations and their remote mappings
    List,
    /// Check the remote context store
    Health,
    /// Show persisted warnings and errors, newest first
    Logs {
        /// Only events about this conversation
        #[arg(long)]
        key: Option<String>,
        /// Least severe level to show (warn or error)
        #[arg(long)]
        severity: Option<Severity>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => colloquy_settings::load_settings_from_path(path),
        None => colloquy_settings::load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(telemetry_config(&settings));
    let manager = build_manager(&settings)?;

    run(&manager, telemetry.events(), cli.command).await
}

async fn run(manager: &ConversationManager, events: Option<&EventLog>, command: Commands) -> Result<()> {
    match command {
        Commands::Append {
            key,
            role,
            content,
            model,
        } => {
            let key = ConversationKey::from_raw(key);
            let metadata = match model {
                Some(model) => TurnMetadata::default().with_model(model),
                None => TurnMetadata::default(),
            };
            let turn = manager.append(&key, role, content, metadata).await?;
            manager.wait_idle(&key).await;
            print_json(&turn)
        }
        Commands::Load { key, archive } => {
            let key = ConversationKey::from_raw(key);
            if archive {
                print_json(&manager.load_archive(&key).await?)
            } else {
                print_json(&manager.load(&key).await?)
            }
        }
        Commands::Summarize { key, budget } => {
            let key = ConversationKey::from_raw(key);
            let budget = budget.unwrap_or(manager.config().token_budget);
            let outcome = manager.summarize_if_needed(&key, budget).await?;
            manager.wait_idle(&key).await;
            print_json(&outcome)
        }
        Commands::Search {
            query,
            limit,
            scope,
        } => {
            let hits = match scope {
                Some(scope) => manager.search_past_scoped(&scope, None, &query, limit).await?,
                None => manager.search_past(&query, limit).await?,
            };
            print_json(&hits)
        }
        Commands::Delete { key } => {
            manager.delete(&ConversationKey::from_raw(key)).await?;
            Ok(())
        }
        Commands::List => {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Listing<T, M> {
                conversations: T,
                context_map: M,
            }
            print_json(&Listing {
                conversations: manager.list_conversations().await?,
                context_map: manager.context_map_entries(),
            })
        }
        Commands::Health => {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Health {
                remote_configured: bool,
                remote_healthy: bool,
                remote_contexts: Option<usize>,
            }
            let contexts = manager.remote_contexts().await;
            print_json(&Health {
                remote_configured: manager.has_remote(),
                remote_healthy: manager.remote_health().await,
                remote_contexts: contexts.map(|c| c.len()),
            })
        }
        Commands::Logs {
            key,
            severity,
            limit,
        } => {
            let events = events.context("event log is off; set logging.logToSqlite")?;
            let filter = EventFilter {
                severity,
                conversation_key: key,
                ..EventFilter::default()
            };
            print_json(&events.recent(&filter, limit)?)
        }
    }
}

fn build_manager(settings: &Settings) -> Result<ConversationManager> {
    let storage = &settings.storage;
    let local = LocalStore::open(storage.records_path())
        .with_context(|| format!("failed to open records at {}", storage.records_path().display()))?;
    let db = Database::open(&storage.context_map_path()).context("failed to open context map")?;
    let map = ContextMap::open(db).context("failed to load context map")?;

    let mut builder = ConversationManager::builder(local, map).config(engine_config(settings));

    if let Some(remote) = build_remote(settings)? {
        builder = builder.remote(remote);
    }

    let llm = &settings.llm;
    if llm.enabled {
        let model = OpenAiChatModel::new(OpenAiConfig {
            base_url: llm.base_url.clone(),
            model: llm.model.clone(),
            api_key: secret_from_env(llm.api_key_env.as_deref()),
            timeout: Duration::from_millis(llm.timeout_ms),
            max_tokens: llm.max_tokens,
        })
        .context("failed to build chat model")?;
        let timeout = Duration::from_millis(settings.compaction.summarize_timeout_ms);
        builder = builder.summarizer(Arc::new(LlmSummarizer::new(Arc::new(model), timeout)));
    } else {
        info!("summarizer disabled, compaction will be skipped");
    }

    Ok(builder.build())
}

fn build_remote(settings: &Settings) -> Result<Option<Arc<dyn ContextStore>>> {
    let remote = &settings.remote;
    if !remote.enabled {
        return Ok(None);
    }

    let mut config = HttpStoreConfig::new(&remote.base_url)
        .with_timeout(remote.request_timeout());
    if let Some(key) = secret_from_env(remote.api_key_env.as_deref()) {
        config = config.with_api_key(key);
    }
    let store = HttpContextStore::new(config).context("failed to build context store client")?;

    let breaker = &remote.circuit_breaker;
    let store: Arc<dyn ContextStore> = if breaker.enabled {
        Arc::new(CircuitBreakerStore::new(
            store,
            BreakerConfig {
                failure_threshold: breaker.failure_threshold,
                cooldown: Duration::from_millis(breaker.cooldown_ms),
            },
        ))
    } else {
        Arc::new(store)
    };
    Ok(Some(store))
}

fn engine_config(settings: &Settings) -> EngineConfig {
    EngineConfig {
        token_budget: settings.compaction.token_budget,
        preserve_recent_turns: settings.compaction.preserve_recent_turns,
        max_active_turns: settings.compaction.max_active_turns,
        remote_timeout: settings.remote.operation_timeout(),
        remote_read_limit: settings.remote.read_limit,
        summarize_timeout: Duration::from_millis(settings.compaction.summarize_timeout_ms),
    }
}

fn telemetry_config(settings: &Settings) -> TelemetryConfig {
    let log_level = colloquy_settings::loader::parse_level(&settings.logging.level)
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    TelemetryConfig {
        log_level,
        json: settings.logging.json,
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.storage.log_db_path(),
        max_persisted_events: settings.logging.max_persisted_events,
        ..TelemetryConfig::default()
    }
}

fn secret_from_env(var: Option<&str>) -> Option<SecretString> {
    let var = var?;
    match std::env::var(var) {
        Ok(value) if !value.is_empty() => Some(SecretString::from(value)),
        _ => {
            info!(env_var = var, "credential env var not set, sending unauthenticated requests");
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{out}");
    Ok(())
}
