//! modelmesh CLI - Chat with and route between LLM backends.

use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use modelmesh::config::{Config, LogVerbosity};
use modelmesh::free_models::{CapabilityFilter, FreeModelScanner};
use modelmesh::logger;
use modelmesh::stream::UnitStream;
use modelmesh::{
    Backend, BackendConfig, BackendEnv, BackendKind, BackendManager, ChatMessage, FileConfigStore, ModelDescriptor,
    MultiModelRouter, RoutingStrategy, SamplingParams, StreamUnit, UseCase,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "modelmesh")]
#[command(about = "Route chat requests across interchangeable LLM backends")]
#[command(version)]
struct Cli {
    /// Output verbosity (defaults to the config file setting)
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every registered backend
    Status,

    /// List supported models per backend
    Models {
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// List free models
    Free {
        /// general, reasoning, coding, chat or multimodal
        #[arg(short, long)]
        use_case: Option<String>,

        #[arg(long)]
        reasoning: bool,

        #[arg(long)]
        vision: bool,

        #[arg(long)]
        function_calling: bool,

        #[arg(long)]
        min_context: Option<u32>,

        /// Fetch the live OpenRouter listing first
        #[arg(long)]
        discover: bool,
    },

    /// Send one prompt to one backend
    Chat {
        #[arg(short, long)]
        prompt: String,

        /// Backend name, or `backend:model`
        #[arg(short, long)]
        backend: Option<String>,

        #[arg(short, long)]
        model: Option<String>,

        #[arg(long)]
        temperature: Option<f64>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        no_stream: bool,
    },

    /// Send one prompt through the multi-model router
    Route {
        #[arg(short, long)]
        prompt: String,

        /// Enabled models (defaults to the config file list)
        #[arg(short, long, value_delimiter = ',')]
        models: Vec<String>,

        #[arg(short, long)]
        strategy: Option<String>,

        /// Ask this many models at once
        #[arg(long)]
        concurrent: Option<usize>,
    },

    /// Ask several backends and keep the first answer
    Race {
        #[arg(short, long)]
        prompt: String,

        /// Backends to race (defaults to all)
        #[arg(short, long, value_delimiter = ',')]
        backends: Vec<String>,
    },

    /// Validate, register and persist a backend
    Configure {
        name: String,

        /// openai, openrouter, glm or custom
        #[arg(short, long)]
        kind: String,

        #[arg(short, long)]
        api_key: String,

        #[arg(long)]
        base_url: Option<String>,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show current configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogLevel {
    Minimal,
    Compact,
    Verbose,
}

impl From<LogLevel> for LogVerbosity {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Minimal => LogVerbosity::Minimal,
            LogLevel::Compact => LogVerbosity::Compact,
            LogLevel::Verbose => LogVerbosity::Verbose,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path.clone())?,
        None => Config::load()?,
    };
    let config = config.with_env_overrides();

    init_tracing(cli.json_logs || config.app.json_logs);
    let verbosity = cli.log_level.map(LogVerbosity::from).unwrap_or(config.app.log_verbosity);

    match cli.command {
        Commands::Config { path } => show_config(&config, path),
        command => run(command, &config, &verbosity).await,
    }
}

async fn run(command: Commands, config: &Config, verbosity: &LogVerbosity) -> anyhow::Result<()> {
    let store = Arc::new(FileConfigStore::new(config.store.resolved_path()));
    let manager = Arc::new(BackendManager::new(store));
    manager.bootstrap(&BackendEnv::from_env());

    match command {
        Commands::Status => {
            print_block(&logger::format_backend_status(&manager.status().await, verbosity))?;
        }
        Commands::Models { backend } => {
            let models: BTreeMap<String, Vec<ModelDescriptor>> = match backend {
                Some(name) => {
                    let backend = manager.get(&name).ok_or_else(|| anyhow!("unknown backend: {}", name))?;
                    let models = backend.supported_models().await;
                    [(name, models.as_ref().clone())].into_iter().collect()
                }
                None => manager.list_models().await,
            };
            print_block(&logger::format_models(&models, verbosity))?;
        }
        Commands::Free { use_case, reasoning, vision, function_calling, min_context, discover } => {
            let registry = manager.free_registry();
            if discover {
                let found = registry.discover(&FreeModelScanner::new()).await;
                tracing::info!(found, "Discovered free models");
            }

            let filter = CapabilityFilter {
                reasoning: reasoning.then_some(true),
                vision: vision.then_some(true),
                function_calling: function_calling.then_some(true),
                min_context,
            };
            let models: Vec<_> = match use_case {
                Some(use_case) => {
                    let use_case: UseCase = use_case.parse().map_err(|e: String| anyhow!(e))?;
                    registry.recommended(use_case).into_iter().filter(|m| filter.matches(m)).collect()
                }
                None => registry.filter(&filter),
            };
            print_block(&logger::format_free_models(&models, verbosity))?;
        }
        Commands::Chat { prompt, backend, model, temperature, max_tokens, no_stream } => {
            let mut params = SamplingParams { stream: !no_stream, ..SamplingParams::default() };
            if let Some(temperature) = temperature {
                params.temperature = temperature;
            }
            if let Some(max_tokens) = max_tokens {
                params.max_tokens = max_tokens;
            }

            let target = backend.clone().or_else(|| manager.default_name()).unwrap_or_default();
            let shown_model = model.clone().unwrap_or_else(|| "default".to_string());
            status_block(&logger::format_request_start(&target, &shown_model, verbosity))?;

            let started = Instant::now();
            let stream = manager
                .route(backend.as_deref(), model.as_deref(), vec![ChatMessage::user(prompt)], params)
                .await?;
            let units = print_stream(stream).await?;
            status_block(&logger::format_response_end(&units, elapsed_ms(started), verbosity))?;
        }
        Commands::Route { prompt, models, strategy, concurrent } => {
            let mut router_config = config.router.clone();
            if !models.is_empty() {
                router_config.enabled_models = models;
            }
            if let Some(strategy) = strategy {
                router_config.strategy = strategy.parse::<RoutingStrategy>().map_err(|e| anyhow!(e))?;
            }
            if router_config.enabled_models.is_empty() {
                bail!("no models enabled; pass --models or set [router].enabled_models");
            }

            let router = MultiModelRouter::from_config(manager.clone(), &router_config);
            let messages = vec![ChatMessage::user(prompt)];
            let started = Instant::now();

            match concurrent {
                Some(count) => {
                    let mut stream = router.concurrent_request(messages, SamplingParams::default(), count)?;
                    let mut current = String::new();
                    while let Some((model, unit)) = stream.next().await {
                        if model != current {
                            println!("\n{}", logger::format_request_start(&unit.backend, &model, verbosity));
                            current = model;
                        }
                        print!("{}", unit.content);
                        std::io::stdout().flush()?;
                    }
                    println!();
                }
                None => {
                    let units = print_stream(router.route_request(messages, SamplingParams::default())).await?;
                    status_block(&logger::format_response_end(&units, elapsed_ms(started), verbosity))?;
                }
            }
            print_block(&logger::format_router_stats(&router.stats(), verbosity))?;
        }
        Commands::Race { prompt, backends } => {
            let started = Instant::now();
            let outcome = manager
                .race(&backends, vec![ChatMessage::user(prompt)], SamplingParams::default())
                .await?;
            print_block(&logger::format_request_start(&outcome.backend, "race winner", verbosity))?;
            println!("{}", outcome.content());
            status_block(&logger::format_response_end(&outcome.units, elapsed_ms(started), verbosity))?;
        }
        Commands::Configure { name, kind, api_key, base_url, model } => {
            let kind: BackendKind = kind.parse().map_err(|e: String| anyhow!(e))?;
            let mut backend_config = BackendConfig::new(kind, api_key);
            if let Some(url) = base_url {
                backend_config = backend_config.with_base_url(&url);
            }
            if let Some(model) = model {
                backend_config = backend_config.with_default_model(&model);
            }
            manager.configure(&name, backend_config)?;
            println!("Configured backend '{}'", name);
        }
        Commands::Config { path } => show_config(config, path)?,
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Print units as they arrive and return them.
async fn print_stream(mut stream: UnitStream) -> anyhow::Result<Vec<StreamUnit>> {
    let mut units = Vec::new();
    let mut stdout = std::io::stdout();
    while let Some(unit) = stream.next().await {
        let unit = unit?;
        print!("{}", unit.content);
        stdout.flush()?;
        units.push(unit);
    }
    println!();
    Ok(units)
}

fn print_block(block: &str) -> anyhow::Result<()> {
    logger::write_block(&mut std::io::stdout(), block)?;
    Ok(())
}

/// Request banners go to stderr so stdout carries only the answer.
fn status_block(block: &str) -> anyhow::Result<()> {
    logger::write_block(&mut std::io::stderr(), block)?;
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn show_config(config: &Config, show_path: bool) -> anyhow::Result<()> {
    if show_path {
        println!("{}", Config::default_path().display());
        return Ok(());
    }

    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
