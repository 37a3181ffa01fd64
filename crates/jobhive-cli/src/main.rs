use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod catalog;

use catalog::{CatalogSearch, ConsoleMessenger};
use jobhive_bus::EventBus;
use jobhive_core::*;
use jobhive_gateway::{spawn_event_listener, spawn_purge_task, EventStats, Gateway, RateLimiter};
use jobhive_memory::{InMemoryStore, KeyValueStore, SqliteStore};
use jobhive_schema::{InboundMessage, UserId};

const PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Parser)]
#[command(name = "jobhive", version, about = "jobhive WhatsApp job-search assistant")]
struct Cli {
    #[arg(
        long,
        default_value = ".",
        help = "Root directory (contains config/, logs/ and the data store)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Local REPL that plays one WhatsApp user against the job catalogue")]
    Chat {
        #[arg(long, default_value = "33600000000", help = "Phone number or WhatsApp JID")]
        user: String,
        #[arg(long, help = "Job catalogue YAML (defaults to config/jobs.yaml)")]
        catalog: Option<PathBuf>,
    },
    #[command(subcommand, about = "Inspect or reset a user's conversation")]
    Session(SessionCommands),
    #[command(about = "Validate config files")]
    Validate,
    #[command(about = "Delete expired sessions from the store")]
    Purge,
}

#[derive(Subcommand)]
enum SessionCommands {
    #[command(about = "Print the stored conversation context")]
    Show {
        #[arg(help = "Phone number or WhatsApp JID")]
        user: String,
    },
    #[command(about = "Remove the conversation context and liveness token")]
    Clear {
        #[arg(help = "Phone number or WhatsApp JID")]
        user: String,
    },
    #[command(about = "Time the conversation out now")]
    Expire {
        #[arg(help = "Phone number or WhatsApp JID")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "jobhive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(&cli.config_root.join("config"))?;

    match command {
        Commands::Validate => {
            println!(
                "Config valid. session ttl {}s, debounce {}ms, page size {}, store {:?}.",
                config.conversation.session_ttl_secs,
                config.conversation.debounce_ms,
                config.conversation.page_size,
                config.store.backend
            );
        }
        Commands::Chat { user, catalog } => {
            let catalog = catalog.unwrap_or_else(|| cli.config_root.join("config/jobs.yaml"));
            run_repl(&cli.config_root, &config, &catalog, &user).await?;
        }
        Commands::Session(cmd) => {
            let orchestrator = bootstrap(&cli.config_root, &config)?;
            match cmd {
                SessionCommands::Show { user } => {
                    let user_id = UserId::from_whatsapp_jid(&user);
                    match orchestrator.get_context(&user_id).await? {
                        Some(context) => println!("{}", serde_json::to_string_pretty(&context)?),
                        None => println!("No active session for '{user_id}'."),
                    }
                }
                SessionCommands::Clear { user } => {
                    let user_id = UserId::from_whatsapp_jid(&user);
                    match orchestrator.clear_session(&user_id).await? {
                        true => println!("Session for '{user_id}' cleared."),
                        false => println!("Session for '{user_id}' not found."),
                    }
                }
                SessionCommands::Expire { user } => {
                    let user_id = UserId::from_whatsapp_jid(&user);
                    match orchestrator.expire_session(&user_id).await? {
                        Some(_) => println!("Session for '{user_id}' expired."),
                        None => println!("Session for '{user_id}' not found."),
                    }
                }
            }
        }
        Commands::Purge => {
            let orchestrator = bootstrap(&cli.config_root, &config)?;
            let stats = orchestrator.purge_expired().await?;
            println!("Purged {} expired entries.", stats.expired_entries);
        }
    }

    Ok(())
}

fn open_store(root: &Path, config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Sqlite => {
            let path = root.join(&config.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = SqliteStore::open(&path.to_string_lossy())
                .with_context(|| format!("failed to open session store: {}", path.display()))?;
            Ok(Arc::new(store))
        }
    }
}

fn bootstrap(root: &Path, config: &JobhiveConfig) -> Result<Arc<ConversationOrchestrator>> {
    let store = open_store(root, &config.store)?;
    Ok(Arc::new(ConversationOrchestrator::new(
        store,
        &config.conversation,
    )))
}

async fn run_repl(root: &Path, config: &JobhiveConfig, catalog: &Path, user: &str) -> Result<()> {
    let orchestrator = bootstrap(root, config)?;
    let search = Arc::new(CatalogSearch::load(catalog)?);
    let bus = EventBus::new(64);
    let stats = Arc::new(EventStats::new());
    let events = spawn_event_listener(&bus, stats.clone()).await;
    let rate_limiter = RateLimiter::new(config.rate_limit.clone());
    let gateway = Gateway::new(
        orchestrator.clone(),
        search,
        Arc::new(ConsoleMessenger),
        bus.publisher(),
        rate_limiter.clone(),
        DebounceCoordinator::new(config.conversation.debounce_delay()),
    );
    let purge = spawn_purge_task(orchestrator, rate_limiter, PURGE_INTERVAL);

    let sender = user.to_string();
    println!(
        "jobhive REPL as {}. Type 'quit' to exit.",
        UserId::from_whatsapp_jid(&sender)
    );
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let inbound = InboundMessage::whatsapp(&sender, input, None);
        if let Err(err) = gateway.handle_inbound(inbound).await {
            eprintln!("Error: {err}");
        }
    }

    gateway.shutdown();
    purge.abort();
    events.abort();
    tracing::info!(events = %stats.summary(), "chat ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_with_user() {
        let cli = Cli::try_parse_from(["jobhive", "chat", "--user", "221771234567"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::Chat { user, catalog: None } if user == "221771234567"
        ));
    }

    #[test]
    fn parses_session_show_subcommand() {
        let cli = Cli::try_parse_from(["jobhive", "session", "show", "33600000001"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::Session(SessionCommands::Show { .. })
        ));
    }

    #[test]
    fn parses_session_expire_subcommand() {
        let cli = Cli::try_parse_from(["jobhive", "session", "expire", "33600000001"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::Session(SessionCommands::Expire { .. })
        ));
    }

    #[test]
    fn parses_config_root_and_purge() {
        let cli = Cli::try_parse_from(["jobhive", "--config-root", "/srv/jobhive", "purge"]).unwrap();
        assert_eq!(cli.config_root, PathBuf::from("/srv/jobhive"));
        assert!(matches!(cli.command.unwrap(), Commands::Purge));
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::try_parse_from(["jobhive"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[tokio::test]
    async fn sqlite_store_is_created_under_root() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = StoreConfig {
            backend: StoreBackend::Sqlite,
            path: "data/nested/jobhive.db".into(),
        };
        let store = open_store(tmp.path(), &config).unwrap();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert!(tmp.path().join("data/nested/jobhive.db").exists());
    }

    #[tokio::test]
    async fn session_commands_operate_on_shared_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config: JobhiveConfig =
            serde_yaml::from_str("app:\n  name: t\n  env: t\nstore:\n  path: jobhive.db\n").unwrap();
        config.conversation.debounce_ms = 10;

        let user = UserId::from_whatsapp_jid("+33600000001");
        {
            let orchestrator = bootstrap(tmp.path(), &config).unwrap();
            orchestrator.handle_message(&user, "Bonjour").await.unwrap();
        }

        let orchestrator = bootstrap(tmp.path(), &config).unwrap();
        assert!(orchestrator.get_context(&user).await.unwrap().is_some());
        assert!(orchestrator.expire_session(&user).await.unwrap().is_some());
        assert!(orchestrator.get_context(&user).await.unwrap().is_none());
        assert!(orchestrator.clear_session(&user).await.unwrap());
    }
}
