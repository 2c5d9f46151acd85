use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use wellchat::llm::OllamaClient;
use wellchat::relay::{ChatTransport, OllamaBridge, RelayClient};
use wellchat::session::{JsonFileStore, Message, SessionConfig, SessionController, SessionError};
use wellchat::status::{self, HealthCheck};

#[derive(Parser)]
#[command(name = "wellchat")]
#[command(about = "Wellchat CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config.json and the state directory.
    Init {
        /// Config file path (default: WELLCHAT_CONFIG_PATH or ~/.wellchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the relay server (POST /api/chat as SSE, GET /api/ollama-status, GET /health).
    Serve {
        /// Config file path (default: WELLCHAT_CONFIG_PATH or ~/.wellchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Probe the model service once and print online or offline.
    Status {
        /// Config file path (default: WELLCHAT_CONFIG_PATH or ~/.wellchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Ask a running relay instead of the model service directly.
        #[arg(long, value_name = "URL")]
        relay: Option<String>,
    },

    /// Chat interactively. Talks to the model service in-process unless --relay is given.
    Chat {
        /// Config file path (default: WELLCHAT_CONFIG_PATH or ~/.wellchat/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Relay base URL, e.g. http://127.0.0.1:8000
        #[arg(long, value_name = "URL")]
        relay: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("wellchat {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("relay failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Status { config, relay }) => {
            if let Err(e) = run_status(config, relay).await {
                log::error!("status failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, relay }) => {
            if let Err(e) = run_chat(config, relay).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(wellchat::config::default_config_path);
    let dir = wellchat::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, _) = wellchat::config::load_config(config_path)?;
    if let Some(p) = port {
        config.relay.port = p;
    }
    log::info!("starting relay on {}:{}", config.relay.bind, config.relay.port);
    wellchat::relay::run_relay(config).await
}

/// Health target: the relay when given, otherwise the model service from config.
fn health_target(config: &wellchat::config::Config, relay: Option<&str>) -> Arc<dyn HealthCheck> {
    match relay {
        Some(url) => Arc::new(RelayClient::new(url)),
        None => Arc::new(OllamaClient::new(Some(
            wellchat::config::resolve_upstream_base_url(config),
        ))),
    }
}

async fn run_status(config_path: Option<PathBuf>, relay: Option<String>) -> anyhow::Result<()> {
    let (config, _) = wellchat::config::load_config(config_path)?;
    let timeout = config.upstream.probe_timeout();
    if let Some(url) = relay.as_deref() {
        let client = RelayClient::new(url);
        match client.status(timeout).await {
            Ok(res) => {
                println!("{}: {}", res.status, res.message);
                if let (Some(version), Some(model)) = (res.version, res.model) {
                    println!("version {}, model {}", version, model);
                }
            }
            Err(e) => {
                log::debug!("relay status request failed: {}", e);
                println!("offline: relay at {} did not answer", client.base_url());
            }
        }
        return Ok(());
    }
    let target = health_target(&config, None);
    let state = status::probe_once(target.as_ref(), timeout).await;
    println!("{}", state);
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>, relay: Option<String>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, path) = wellchat::config::load_config(config_path)?;
    let state_path = wellchat::config::resolve_state_path(&config, &path);
    let store = Arc::new(JsonFileStore::load(&state_path).await);
    log::info!("conversation state: {}", store.path().display());

    let transport: Arc<dyn ChatTransport> = match relay.as_deref() {
        Some(url) => Arc::new(
            RelayClient::new(url).with_request_timeout(config.upstream.request_timeout()),
        ),
        None => Arc::new(OllamaBridge::from_config(&config)),
    };
    let session_config = SessionConfig {
        health_check: Some(health_target(&config, relay.as_deref())),
        probe_interval: config.upstream.probe_interval(),
        probe_timeout: config.upstream.probe_timeout(),
        ..SessionConfig::default()
    };
    let session = SessionController::load(transport, store, session_config).await?;

    let identity = session.identity().await;
    for message in session.messages().await {
        print_message(&message, &identity.display_name);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match ChatCommand::parse(input) {
            ChatCommand::Exit => break,
            ChatCommand::Clear => {
                session.clear_conversation().await;
                let identity = session.identity().await;
                for message in session.messages().await {
                    print_message(&message, &identity.display_name);
                }
            }
            ChatCommand::Status => {
                println!("model service: {}", session.connectivity());
            }
            ChatCommand::Avatars => {
                let identity = session.regenerate_avatars().await?;
                println!("you: {}", identity.user_avatar);
                println!("assistant: {}", identity.assistant_avatar);
            }
            ChatCommand::Name(name) => match session.set_display_name(name).await {
                Ok(()) => println!("display name set to {}", name.trim()),
                Err(SessionError::InvalidInput(reason)) => eprintln!("{}", reason),
                Err(e) => return Err(e.into()),
            },
            ChatCommand::Say(text) => {
                if let Err(e) = stream_reply(&session, text).await {
                    eprintln!("chat error: {}", e);
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

/// One line typed into `wellchat chat`.
#[derive(Debug, PartialEq, Eq)]
enum ChatCommand<'a> {
    Exit,
    Clear,
    Status,
    Avatars,
    /// `/name <name>`; the argument may be blank, which the session rejects.
    Name(&'a str),
    /// Anything else is sent to the assistant.
    Say(&'a str),
}

impl<'a> ChatCommand<'a> {
    fn parse(input: &'a str) -> Self {
        let (head, rest) = match input.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (input, ""),
        };
        let is = |cmd: &str| head.eq_ignore_ascii_case(cmd);
        if rest.is_empty() && (is("/exit") || is("/quit")) {
            ChatCommand::Exit
        } else if rest.is_empty() && is("/clear") {
            ChatCommand::Clear
        } else if rest.is_empty() && is("/status") {
            ChatCommand::Status
        } else if rest.is_empty() && is("/avatars") {
            ChatCommand::Avatars
        } else if is("/name") {
            ChatCommand::Name(rest)
        } else {
            ChatCommand::Say(input)
        }
    }
}

/// Send one message and print the reply as it grows.
async fn stream_reply(session: &SessionController, input: &str) -> Result<(), SessionError> {
    use std::io::Write;

    let mut rx = session.subscribe();
    rx.borrow_and_update();
    // the reply lands right after the user message appended by this send
    let reply_index = session.messages().await.len() + 1;
    let task = session.send_message(input).await?;
    let mut shown = String::new();

    let wait = task.wait();
    tokio::pin!(wait);
    loop {
        tokio::select! {
            outcome = &mut wait => {
                log::debug!("send finished: {:?}", outcome);
                let messages = session.messages().await;
                show_reply(&messages, reply_index, &mut shown);
                break;
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let messages = rx.borrow_and_update().clone();
                show_reply(&messages, reply_index, &mut shown);
            }
        }
        let _ = std::io::stdout().flush();
    }
    println!();
    Ok(())
}

fn show_reply(messages: &[Message], index: usize, shown: &mut String) {
    let Some(reply) = messages.get(index) else {
        return;
    };
    match reply.content.strip_prefix(shown.as_str()) {
        Some(rest) => print!("{}", rest),
        // a partial reply was replaced by the apology
        None => print!("\n{}", reply.content),
    }
    *shown = reply.content.clone();
}

fn print_message(message: &Message, display_name: &str) {
    let who = match message.role {
        wellchat::session::Role::User => display_name,
        wellchat::session::Role::Assistant => "assistant",
    };
    println!("[{}] {}: {}", message.timestamp.format("%H:%M"), who, message.content);
}
