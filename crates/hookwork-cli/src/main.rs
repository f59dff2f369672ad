mod prompts;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use hookwork_auth::AuthRegistry;
use hookwork_core::settings::{LoggingConfig, Settings};
use hookwork_plugins::{Host, HookKind, ToolCall};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "hookwork",
    about = "Plugin host: load plugins, run their hooks, intercept tool calls",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Plugin management
    Plugins {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Event bus catalog
    Events {
        #[command(subcommand)]
        action: EventAction,
    },

    /// Run tools through the plugin hooks
    Tool {
        #[command(subcommand)]
        action: ToolAction,
    },

    /// Auth provider management
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum PluginAction {
    /// Load the configured plugins and list them
    List,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the config after every plugin's config hook
    Show,
    /// Get a settings value by dotted path
    Get { key: String },
    /// Set a settings value by dotted path
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum EventAction {
    /// List the built-in event types
    List {
        /// Also print each payload schema
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Subcommand)]
enum ToolAction {
    /// Run one tool call
    Run {
        name: String,
        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
        /// Session id passed to hooks
        #[arg(long, default_value = "cli")]
        session: String,
    },
    /// List callable tools
    List,
}

#[derive(Subcommand)]
enum AuthAction {
    /// List auth providers and their state
    List,
    /// Log in to a provider
    Login {
        provider: String,
        /// Method index (asked interactively when omitted)
        #[arg(long)]
        method: Option<usize>,
    },
    /// Forget a provider's stored credential
    Logout { provider: String },
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let logging = logging.cloned().unwrap_or_default();
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };
    let mut directives = vec![level.to_string()];
    directives.extend(logging.filters.iter().cloned());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives.join(",")));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match (logging.format == "json", logging.output == "stdout") {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

/// Parse a CLI value as JSON, falling back to a plain string.
fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn start_host(settings: Settings) -> anyhow::Result<Host> {
    let directory = std::env::current_dir()?;
    Ok(Host::from_settings(settings, directory).await?)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Settings::default_path);
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("failed to load {}", settings_path.display()))?;

    init_logging(settings.logging.as_ref(), cli.verbose);

    let (warnings, errors) = settings.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("{error}");
        }
        bail!("{} settings error(s) in {}", errors.len(), settings_path.display());
    }

    match cli.command {
        Commands::Plugins { action } => match action {
            PluginAction::List => {
                let host = start_host(settings).await?;
                if host.plugins().is_empty() {
                    println!("No plugins configured.");
                }
                for plugin in host.plugins() {
                    println!("{}", plugin.source);
                    println!("  module:   {}", plugin.module.name);
                    println!("  resolved: {}", plugin.resolved);
                    println!("  invoked:  {}", plugin.invoked.join(", "));
                    if !plugin.skipped.is_empty() {
                        println!("  skipped:  {}", plugin.skipped.join(", "));
                    }
                }
                let hooks = host.hooks();
                for kind in HookKind::ALL {
                    let count = hooks.count(kind);
                    if count > 0 {
                        println!("{kind}: {count}");
                    }
                }
                host.dispose().await;
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let host = start_host(settings).await?;
                for rejection in host.rejected() {
                    tracing::warn!(
                        plugin = %rejection.plugin,
                        field = rejection.field.as_deref().unwrap_or_default(),
                        "Config injection rejected: {}",
                        rejection.reason
                    );
                }
                let printed = print_json(host.config());
                host.dispose().await;
                printed?;
            }
            ConfigAction::Get { key } => match settings.get_path(&key) {
                Some(value) => print_json(&value)?,
                None => bail!("{key} is not set"),
            },
            ConfigAction::Set { key, value } => {
                let mut settings = settings;
                settings.set_path(&key, parse_value(&value))?;
                settings.save(&settings_path)?;
                println!("Set {key} in {}", settings_path.display());
            }
        },
        Commands::Events { action } => match action {
            EventAction::List { schema } => {
                for (kind, payload) in hookwork_bus::catalog::builtin() {
                    if schema {
                        println!("{kind}: {payload}");
                    } else {
                        println!("{kind}");
                    }
                }
            }
        },
        Commands::Tool { action } => {
            let host = start_host(settings).await?;
            let result = tool_command(&host, action).await;
            dispose_then(&host, result).await?;
        }
        Commands::Auth { action } => {
            let host = start_host(settings).await?;
            let result = auth_command(host.auth(), action).await;
            dispose_then(&host, result).await?;
        }
        Commands::Status => {
            println!("hookwork v{}", env!("CARGO_PKG_VERSION"));
            println!("Settings: {}", display_path(&settings_path));
            println!("Plugins: {}", settings.plugins.len());
            println!("Cache: {}", settings.cache_dir().display());
            println!("Credentials: {}", settings.auth_file().display());
        }
    }

    Ok(())
}

fn display_path(path: &Path) -> String {
    if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    }
}

/// Dispose `host` whatever `result` is, then hand `result` back.
async fn dispose_then<T>(host: &Host, result: anyhow::Result<T>) -> anyhow::Result<T> {
    host.dispose().await;
    result
}

async fn tool_command(host: &Host, action: ToolAction) -> anyhow::Result<()> {
    match action {
        ToolAction::List => {
            for name in host.interceptor().tools().await {
                println!("{name}");
            }
            Ok(())
        }
        ToolAction::Run {
            name,
            args,
            session,
        } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).context("--args must be JSON")?;
            run_tool(host, ToolCall::new(name, args).with_session(session)).await
        }
    }
}

async fn auth_command(auth: &AuthRegistry, action: AuthAction) -> anyhow::Result<()> {
    match action {
        AuthAction::List => {
            let providers = auth.list().await;
            if providers.is_empty() {
                println!("No auth providers registered.");
            }
            for status in providers {
                let methods: Vec<String> = status
                    .methods
                    .iter()
                    .enumerate()
                    .map(|(i, (label, kind))| format!("[{i}] {label} ({kind})"))
                    .collect();
                println!("{}  {}  {}", status.provider, status.state, methods.join(", "));
                if let Some(error) = status.last_error {
                    println!("  last error: {error}");
                }
            }
        }
        AuthAction::Login { provider, method } => {
            prompts::login(auth, &provider, method).await?;
        }
        AuthAction::Logout { provider } => {
            auth.logout(&provider).await?;
            println!("Logged out of {provider}");
        }
    }
    Ok(())
}

/// Run one call; Ctrl-C aborts it.
async fn run_tool(host: &Host, call: ToolCall) -> anyhow::Result<()> {
    let abort = CancellationToken::new();
    let trigger = abort.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let result = host.interceptor().execute(call, abort).await;
    ctrl_c.abort();

    let output = result?;
    if !output.title.is_empty() {
        println!("# {}", output.title);
    }
    println!("{}", output.output);
    if output.is_error {
        bail!("tool reported an error");
    }
    Ok(())
}
