use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;

use searchdesk_auth::{ConnectMode, ReqwestTransport, TokenStore};
use searchdesk_core::{AgentEvent, AssistantSession, SnapshotExecutor};
use searchdesk_provider::{AuthResult, Provider};

#[derive(Parser)]
#[command(name = "searchdesk", about = "Chat assistant for Azure AI Search", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Provider to use (github-copilot, openai)
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Model to use (e.g. gpt-4o, gpt-4.1)
    #[arg(short, long, global = true)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in to a provider
    Login {
        /// device_code, browser, or token
        #[arg(long)]
        mode: Option<String>,
        /// Personal token or API key for token mode
        #[arg(long)]
        token: Option<String>,
    },
    /// Forget the stored credential for a provider
    Logout,
    /// Ask the assistant a question
    Ask {
        prompt: String,
        /// JSON snapshot of the search service's resources
        #[arg(long)]
        resources: Option<PathBuf>,
    },
    /// List the provider's models
    Models,
    /// Show sign-in status for every provider
    Status,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("searchdesk=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = searchdesk_config::Config::load()?;
    searchdesk_config::Config::ensure_dirs()?;

    let provider_id = cli
        .provider
        .clone()
        .unwrap_or_else(|| config.provider.default.clone());
    let store = TokenStore::open_default();
    tracing::debug!(provider = %provider_id, store = %store.path().display(), "Starting");

    match cli.command {
        Commands::Config => {
            let path = searchdesk_config::Config::config_path();
            println!("Config path: {}", path.display());
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Status => {
            for id in searchdesk_provider::PROVIDER_IDS {
                let name = searchdesk_config::find_provider_def(id).map_or(*id, |def| def.name);
                println!("{id:<16} {name:<16} {}", searchdesk_auth::auth_status(id, &store));
            }
            return Ok(());
        }
        _ => {}
    }

    let transport = Arc::new(ReqwestTransport::new());
    let provider: Arc<dyn Provider> =
        searchdesk_provider::create_provider(&provider_id, &config, transport, store)?.into();

    match cli.command {
        Commands::Login { mode, token } => login(provider.as_ref(), mode, token).await?,
        Commands::Logout => {
            provider.sign_out().await?;
            eprintln!("Signed out of {provider_id}.");
        }
        Commands::Ask { prompt, resources } => {
            let executor = match resources {
                Some(path) => SnapshotExecutor::load(&path)?,
                None => SnapshotExecutor::default(),
            };
            let mut session = AssistantSession::new(provider, Arc::new(executor), &config);
            if let Some(model) = cli.model {
                session.set_model(model);
            }
            ask(session, &prompt).await?;
        }
        Commands::Models => {
            let current = cli.model.as_deref().unwrap_or(provider.default_model());
            for m in provider.supported_models() {
                let marker = if m.id == current { "*" } else { " " };
                println!("{marker} {:<24} {:<20} {}k context", m.id, m.name, m.context_window / 1000);
            }
        }
        Commands::Config | Commands::Status => {}
    }

    Ok(())
}

async fn login(provider: &dyn Provider, mode: Option<String>, token: Option<String>) -> Result<()> {
    let default_mode = match searchdesk_config::find_provider_def(provider.id()) {
        Some(def) if def.supports_device_code => "device_code",
        _ => "token",
    };
    let mode = ConnectMode::parse(mode.as_deref().unwrap_or(default_mode), token)?;

    let session = match provider.connect(mode).await? {
        AuthResult::Connected => {
            eprintln!("Connected to {}.", provider.id());
            return Ok(());
        }
        AuthResult::PendingApproval(session) => session,
    };

    eprintln!(
        "Please visit: {}\nEnter code: {}",
        session.verification_uri, session.user_code
    );
    eprintln!("Waiting for authorization...");

    tokio::select! {
        result = provider.complete_device_login(&session) => result?,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("login cancelled"),
    }

    eprintln!("Authorization complete.");
    Ok(())
}

async fn ask(mut session: AssistantSession, prompt: &str) -> Result<()> {
    use std::io::Write;

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut streamed = String::new();
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event {
                AgentEvent::TextDelta(text) => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                    streamed.push_str(&text);
                }
                AgentEvent::ToolCallStart { description, .. } => eprintln!("[{description}]"),
                AgentEvent::ToolCallDone { label, elapsed_ms, .. } => {
                    eprintln!("[{label} in {elapsed_ms}ms]")
                }
                AgentEvent::StepLimitReached { steps } => {
                    eprintln!("[stopped after {steps} model requests]")
                }
                AgentEvent::TurnComplete => {}
            }
        }
        streamed
    });

    let answer = session.send(prompt).await.content.clone();
    drop(session);

    let streamed = printer.await?;
    if !streamed.is_empty() {
        println!();
    }
    if !streamed.ends_with(answer.as_str()) {
        println!("{answer}");
    }
    Ok(())
}
