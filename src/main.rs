use newsrag::cli::{Cli, Commands, ConfigAction};
use newsrag::config::{expand_tilde, Config, ConfigValidator};
use newsrag::daemon::{Daemon, DaemonStatus, IpcClient, IpcMessage, IpcResponse};
use newsrag::error::{RagError, Result};
use newsrag::query::Answer;
use newsrag::storage::format_size;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    run(cli).map_err(|e| {
        tracing::debug!("{:?}", e);
        anyhow::anyhow!(e.user_message())
    })
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let profile = cli.profile;

    match cli.command {
        Commands::Serve => cmd_serve(load_config(config_path, profile)?),
        Commands::Start => cmd_start(load_config(config_path, profile)?),
        Commands::Stop => cmd_stop(&load_config(config_path, profile)?),
        Commands::Status => cmd_status(&load_config(config_path, profile)?),
        Commands::Health { json } => cmd_health(&load_config(config_path, profile)?, json),
        Commands::Ingest {
            title,
            url,
            file,
            content,
        } => {
            let config = load_config(config_path, profile)?;
            let content = read_content(file.as_deref(), content)?;
            cmd_ingest(&config, title, url, content)
        }
        Commands::Ask {
            question,
            top_k,
            json,
        } => cmd_ask(&load_config(config_path, profile)?, &question, top_k, json),
        Commands::Config { action } => cmd_config(config_path, profile, action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "newsrag=debug" } else { "newsrag=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RagError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn client(config: &Config) -> IpcClient {
    IpcClient::new(expand_tilde(&config.daemon.socket_path))
}

fn cmd_serve(config: Config) -> Result<()> {
    let daemon = Daemon::new(config);
    runtime()?.block_on(daemon.run_foreground())
}

fn cmd_start(config: Config) -> Result<()> {
    let socket_path = expand_tilde(&config.daemon.socket_path);
    let daemon = Daemon::new(config);

    if let DaemonStatus::Running { pid } = daemon.status() {
        println!("Daemon is already running (PID: {})", display_pid(pid));
        return Ok(());
    }

    println!("✓ Starting newsrag daemon...");
    println!("  Socket: {}", socket_path.display());

    // Forks: the parent exits inside, the child keeps serving
    daemon.start_daemon()
}

fn cmd_stop(config: &Config) -> Result<()> {
    let daemon = Daemon::new(config.clone());
    let pm = daemon.process_manager();

    if !pm.is_running() {
        println!("Daemon is not running");
        return Ok(());
    }

    println!("Sending SIGTERM to daemon...");
    daemon.stop_daemon()?;

    // Shutdown waits for queued ingestion jobs
    if pm.wait_for_exit(Duration::from_secs(30)) {
        println!("✓ Daemon stopped gracefully");
        return Ok(());
    }

    println!("Daemon not responding, sending SIGKILL...");
    pm.signal(nix::sys::signal::Signal::SIGKILL)?;

    if pm.wait_for_exit(Duration::from_secs(2)) {
        pm.release()?;
        println!("✓ Daemon force killed");
    } else {
        println!("⚠ Warning: Daemon may still be running");
    }

    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let daemon = Daemon::new(config.clone());

    println!("newsrag status");
    println!("==============");

    match daemon.status() {
        DaemonStatus::Running { pid } => println!("\nDaemon: Running (PID: {})", display_pid(pid)),
        DaemonStatus::Stopped => {
            println!("\nDaemon: Stopped");
            return Ok(());
        }
    }

    let response = runtime()?
        .block_on(client(config).send(&IpcMessage::Stats))?
        .into_result()?;

    if let IpcResponse::Stats(stats) = response {
        match stats.store {
            Some(store) => {
                println!("\nVector store:");
                println!("  Chunks:     {}", store.chunk_count);
                println!("  Articles:   {}", store.document_count);
                println!("  Duplicates: {}", store.duplicate_chunks);
                println!("  Model:      {} ({}D, {})", store.embedding_model, store.dimension, store.metric);
            }
            None => println!("\nVector store: not loaded yet"),
        }
        println!("  Size:       {}", format_size(stats.database_bytes));

        println!("\nIngestion queue:");
        println!("  Queued:     {}", stats.queue.queued);
        println!("  Completed:  {}", stats.queue.completed);
        println!("  Failed:     {}", stats.queue.failed);
    }

    Ok(())
}

fn cmd_health(config: &Config, json: bool) -> Result<()> {
    let response = runtime()?
        .block_on(client(config).send(&IpcMessage::Health))?
        .into_result()?;

    let IpcResponse::Health(report) = response else {
        return Err(RagError::Daemon("Unexpected reply to health request".to_string()));
    };

    if json {
        println!("{}", to_json(&report)?);
        return Ok(());
    }

    let mark = |ok: bool| if ok { "✓" } else { "✗" };
    println!("Status: {}", report.status);
    println!(
        "  {} Embedding model {} {}",
        mark(report.embedding_loaded),
        report.embedding_model,
        if report.embedding_loaded { "loaded" } else { "not loaded yet" }
    );
    println!(
        "  {} Generation model {} {}",
        mark(report.generation_reachable),
        report.generation_model,
        if report.generation_reachable { "reachable" } else { "unreachable" }
    );

    Ok(())
}

fn read_content(file: Option<&Path>, content: Option<String>) -> Result<String> {
    if let Some(content) = content {
        return Ok(content);
    }

    let path = file.ok_or_else(|| RagError::InvalidInput("Provide --file or --content".to_string()))?;

    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer).map_err(|e| RagError::Io {
            source: e,
            context: "Failed to read article from stdin".to_string(),
        })?;
        return Ok(buffer);
    }

    std::fs::read_to_string(path).map_err(|e| RagError::Io {
        source: e,
        context: format!("Failed to read article file: {}", path.display()),
    })
}

fn cmd_ingest(config: &Config, title: String, url: String, content: String) -> Result<()> {
    let chars = content.chars().count();
    let message = IpcMessage::Ingest {
        title: title.clone(),
        content,
        url,
    };

    let response = runtime()?
        .block_on(client(config).send(&message))?
        .into_result()?;

    match response {
        IpcResponse::Accepted { job_id, message } => {
            println!("✓ {}: '{}' ({} chars)", message, title, chars);
            println!("  Job: {}", job_id);
            Ok(())
        }
        other => Err(RagError::Daemon(format!("Unexpected reply to ingest: {:?}", other))),
    }
}

fn cmd_ask(config: &Config, question: &str, top_k: Option<usize>, json: bool) -> Result<()> {
    let client = client(config);
    let rt = runtime()?;

    if json {
        let mut text = String::new();
        let sources = rt.block_on(client.ask(question, top_k, |token| text.push_str(token)))?;
        println!("{}", to_json(&Answer { text, sources })?);
        return Ok(());
    }

    let mut stdout = std::io::stdout();
    let sources = rt.block_on(client.ask(question, top_k, |token| {
        let _ = write!(stdout, "{}", token);
        let _ = stdout.flush();
    }))?;
    println!();

    if !sources.is_empty() {
        println!("\nSources:");
        for (rank, source) in sources.iter().enumerate() {
            println!("  {}. {} ({:.2})", rank + 1, source.title, source.score);
            println!("     {}", source.url);
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, profile: Option<String>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let rendered = toml::to_string_pretty(&config)?;
            println!("{}", rendered);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let mut config = Config::load(&path)?;
            if let Some(profile) = profile {
                config.apply_profile(&profile)?;
                ConfigValidator::validate(&config)?;
            }
            println!("✓ Configuration is valid");
            println!("  File: {}", path.display());
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found at {}, using defaults. Run 'newsrag config init' to create one.",
            path.display()
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn display_pid(pid: Option<i32>) -> String {
    pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
}
