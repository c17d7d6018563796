use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use semsearch::config::{self, Config};
use semsearch::coordination::CoordinationServer;
use semsearch::discovery::DiscoveryCache;
use semsearch::embedding::provider::EmbeddingProvider;
use semsearch::embedding::providers::{local::LocalProvider, openai::OpenAiProvider};
use semsearch::embedding::ProviderRegistry;
use semsearch::http;
use semsearch::indexing;
use semsearch::mcp::McpServer;
use semsearch::parser::registry::ParserRegistry;
use semsearch::storage::Storage;
use semsearch::watcher::{EventKind, FileWatcher};

#[derive(Debug, Parser)]
#[command(name = "semsearch")]
#[command(version)]
#[command(about = "Local-first semantic code search engine")]
struct Cli {
    /// Database path (a LanceDB directory). Overrides config/env.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Glob(s) of files to include. May be passed multiple times.
    #[arg(long)]
    include: Vec<String>,

    /// Glob(s) of files to exclude. May be passed multiple times.
    #[arg(long)]
    exclude: Vec<String>,

    /// Debounce window for the file watcher, in milliseconds.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Embedding provider to use ("local" or "openai").
    #[arg(long)]
    provider: Option<String>,

    /// Embedding model name/repo id.
    #[arg(long)]
    model: Option<String>,

    /// API key for a remote embedding provider.
    #[arg(long)]
    api_key: Option<String>,

    /// Base URL for a remote embedding provider.
    #[arg(long)]
    base_url: Option<String>,

    /// Skip embedding generation entirely (regex search only).
    #[arg(long)]
    no_embeddings: bool,

    /// HTTP bind host, for `server`.
    #[arg(long)]
    host: Option<String>,

    /// HTTP bind port, for `server`.
    #[arg(long)]
    port: Option<u16>,

    /// Verbose logging.
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index a directory tree, then watch it and keep the index current.
    Run {
        /// Directory to index.
        path: PathBuf,
    },
    /// Run the HTTP query surface.
    Server,
    /// Run the MCP stdio server.
    Mcp,
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .try_init();
}

/// Applies CLI flags as the final override layer on top of the loaded
/// config cascade (defaults ← user config ← project config ← env).
fn apply_cli_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if !cli.include.is_empty() {
        config.scan.include = cli.include.clone();
    }
    if !cli.exclude.is_empty() {
        config.scan.exclude = cli.exclude.clone();
    }
    if let Some(ms) = cli.debounce_ms {
        config.watch.debounce_ms = ms;
    }
    if let Some(provider) = &cli.provider {
        config.embedding.provider = Some(provider.clone());
    }
    if let Some(model) = &cli.model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(key) = &cli.api_key {
        config.embedding.api_key = Some(key.clone());
    }
    if let Some(url) = &cli.base_url {
        config.embedding.base_url = Some(url.clone());
    }
    if cli.no_embeddings {
        config.embedding.enabled = false;
    }
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.verbose {
        config.verbose = true;
    }
    config
}

/// Builds the provider registry from config, registering whichever
/// provider the config names as default. Returns an empty registry when
/// embeddings are disabled or no provider is configured — callers treat
/// that as "regex search only".
fn build_providers(config: &Config) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    if !config.embedding.enabled {
        return Ok(registry);
    }

    match config.embedding.provider.as_deref() {
        Some("openai") | None if config.embedding.api_key.is_some() => {
            let model = config.embedding.model.clone().unwrap_or_else(|| "text-embedding-3-small".to_string());
            let provider = OpenAiProvider::new(&model, config.embedding.api_key.clone(), config.embedding.base_url.clone())?;
            registry.register("openai", Arc::new(provider), true);
        }
        Some("local") | None => {
            let model_id = config.embedding.model.clone().unwrap_or_else(|| "minishlab/potion-retrieval-32M".to_string());
            let provider = LocalProvider::load(&model_id)?;
            registry.register("local", Arc::new(provider), true);
        }
        Some(other) => {
            return Err(semsearch::error::SearchError::configuration(format!("unknown embedding provider '{other}'")).into());
        }
    }

    Ok(registry)
}

/// Exit code 130 on interrupt (spec §6), 1 on any other error, 0 on a
/// clean run. clap/anyhow errors print via their own `Display`.
fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    match rt.block_on(async_main(cli)) {
        Ok(Interrupted::No) => std::process::ExitCode::SUCCESS,
        Ok(Interrupted::Yes) => std::process::ExitCode::from(130),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

enum Interrupted {
    No,
    Yes,
}

async fn async_main(cli: Cli) -> Result<Interrupted> {
    let repo_root = std::env::current_dir().context("failed to get current directory")?;
    let config = apply_cli_overrides(config::load_config(&repo_root), &cli);

    match &cli.cmd {
        Command::Run { path } => run_and_watch(&config, path).await,
        Command::Server => {
            run_server(&config).await?;
            Ok(Interrupted::No)
        }
        Command::Mcp => {
            run_mcp(&config).await?;
            Ok(Interrupted::No)
        }
    }
}

/// `run <path>`: index once, then keep the process alive watching for
/// changes and applying them incrementally, until interrupted. Combines
/// C6 (indexing), C7 (discovery cache), C8 (watcher), and C9 (the
/// coordination rendezvous a short-lived `mcp`/`server` sibling process
/// can pause this loop through).
async fn run_and_watch(config: &Config, path: &PathBuf) -> Result<Interrupted> {
    let parsers = ParserRegistry::new();
    let providers = build_providers(config)?;
    let provider: Option<Arc<dyn EmbeddingProvider>> = if config.embedding.enabled && !providers.is_empty() {
        Some(providers.get(config.embedding.provider.as_deref())?)
    } else {
        None
    };

    let mut discovery = DiscoveryCache::new();
    let scan_started_at = now_secs();

    // The initial scan is itself a short-lived-indexer operation relative
    // to any `mcp`/`server` process already watching this database — C9's
    // client half pauses that sibling for the duration of the scan so the
    // two processes never write concurrently.
    let db_path = config.db_path.clone();
    let include = config.scan.include.clone();
    let exclude = config.scan.exclude.clone();
    let provider_for_scan = provider.clone();
    let report = semsearch::coordination::with_paused_server(&db_path, || async move {
        let storage = Storage::connect(&db_path).await?;
        let result = indexing::process_directory(&storage, &parsers, &mut discovery, path, &include, &exclude, provider_for_scan.as_deref()).await;
        storage.disconnect().await;
        result
    })
    .await?;

    tracing::info!(
        processed = report.processed,
        up_to_date = report.up_to_date,
        skipped = report.skipped,
        errors = report.errors.len(),
        "initial indexing complete"
    );
    for err in &report.errors {
        tracing::warn!(%err, "failed to index file");
    }

    if !config.watch.enabled {
        return Ok(Interrupted::No);
    }

    let parsers = ParserRegistry::new();
    let extensions = parsers.all_extensions();
    let roots = if config.watch.paths.is_empty() { vec![path.clone()] } else { config.watch.paths.clone() };
    let watcher = FileWatcher::start(&roots, extensions, config.watch.debounce_ms)?;
    watcher.catch_up(&roots, scan_started_at);

    let mut storage = Some(Storage::connect(&config.db_path).await?);
    let coordination = CoordinationServer::install(&config.db_path)?;
    tracing::info!(db = %config.db_path.display(), "watching for changes");

    let interrupted = watch_loop(&mut storage, &config.db_path, &parsers, provider.as_deref(), &watcher, &coordination).await;
    coordination.cleanup();
    if let Some(storage) = storage.take() {
        storage.disconnect().await;
    }
    Ok(interrupted)
}

/// Polls the watcher queue and the coordination signal channel roughly
/// once a second, applying each event through [`indexing::process_file`]
/// (or a full delete for a `deleted` event), until ctrl-c. `storage` is
/// `None` only for the duration of an S_PAUSE handshake: the connection
/// is genuinely dropped before `ready.flag` is written and reopened
/// before the loop resumes.
async fn watch_loop(
    storage: &mut Option<Storage>,
    db_path: &std::path::Path,
    parsers: &ParserRegistry,
    provider: Option<&dyn EmbeddingProvider>,
    watcher: &FileWatcher,
    coordination: &CoordinationServer,
) -> Interrupted {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                return Interrupted::Yes;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
        }

        if let Some(signal) = coordination.poll() {
            use semsearch::coordination::CoordinationSignal;
            match signal {
                CoordinationSignal::Terminate => return Interrupted::No,
                CoordinationSignal::Pause => {
                    let taken = storage.take();
                    let pause_result = coordination
                        .handle_pause(|| async move {
                            if let Some(s) = taken {
                                s.disconnect().await;
                            }
                            Ok(())
                        })
                        .await;
                    if let Err(e) = pause_result {
                        tracing::error!(error = %e, "S_PAUSE handshake failed");
                    }

                    let resume_result = coordination
                        .handle_resume(|| async {
                            *storage = Some(Storage::connect(db_path).await?);
                            Ok(())
                        })
                        .await;
                    if let Err(e) = resume_result {
                        tracing::error!(error = %e, "failed to reconnect after pause, retrying once");
                        *storage = Storage::connect(db_path).await.ok();
                    }
                }
                CoordinationSignal::Resume => {}
            }
        }

        let Some(storage_ref) = storage.as_ref() else {
            // Paused mid-iteration (handle_pause timed out without a
            // resume): skip this tick rather than touch a dropped
            // connection; the next iteration retries.
            continue;
        };

        for event in watcher.poll(10) {
            if let Err(e) = apply_watch_event(storage_ref, parsers, provider, &event).await {
                tracing::warn!(path = %event.path.display(), error = %e, "failed to apply watch event");
            }
        }

        let dropped = watcher.dropped_count();
        if dropped > 0 {
            tracing::warn!(dropped, "watcher queue overflow, events dropped");
        }
    }
}

async fn apply_watch_event(
    storage: &Storage,
    parsers: &ParserRegistry,
    provider: Option<&dyn EmbeddingProvider>,
    event: &semsearch::watcher::WatchEvent,
) -> Result<()> {
    match event.kind {
        EventKind::Deleted => {
            let abs_path = event.path.to_string_lossy().to_string();
            if let Some(file) = storage.get_file_by_path(&abs_path).await? {
                storage.delete_file_completely(file.id).await?;
            }
            Ok(())
        }
        EventKind::Created | EventKind::Modified | EventKind::Moved => {
            indexing::process_file(storage, parsers, &event.path, provider.is_none(), provider, false).await?;
            Ok(())
        }
    }
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

async fn run_server(config: &Config) -> Result<()> {
    let storage = Storage::connect(&config.db_path).await?;
    let providers = build_providers(config)?;
    let state = Arc::new(http::AppState { storage, providers });
    let router = http::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind HTTP listener")?;
    tracing::info!(%addr, "serving HTTP query surface");
    axum::serve(listener, router).await.context("HTTP server error")?;
    Ok(())
}

async fn run_mcp(config: &Config) -> Result<()> {
    let storage = Storage::connect(&config.db_path).await?;
    let providers = build_providers(config)?;
    let mut server = McpServer::new(storage, providers);
    server.run_stdio().await?;
    Ok(())
}
