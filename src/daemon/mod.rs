// Daemon module: background service answering ingestion and query requests

mod ipc;
mod process;
mod service;
mod signals;

pub use ipc::{
    read_frame, write_frame, HealthReport, IpcClient, IpcMessage, IpcResponse, IpcServer,
    StatsReport,
};
pub use process::ProcessManager;
pub use service::{serve, RagService};
pub use signals::{ShutdownSignal, SignalHandler};

use crate::chunker::Chunker;
use crate::config::{expand_tilde, Config};
use crate::error::{RagError, Result};
use crate::generation::OllamaClient;
use crate::index::LazyIndex;
use crate::ingest::{IngestQueue, IngestionPipeline};
use crate::query::QueryPipeline;
use std::sync::Arc;
use std::time::Duration;

/// Owns the daemon's lifecycle: PID file, socket, service, shutdown
pub struct Daemon {
    config: Config,
    process_manager: ProcessManager,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let pid_file = expand_tilde(&config.daemon.pid_file);
        Self {
            config,
            process_manager: ProcessManager::new(pid_file),
        }
    }

    /// Wire up the service from configuration. The index itself stays
    /// uninitialised until the first request that needs it.
    pub fn build_service(config: &Config) -> Result<RagService> {
        let chunker = Chunker::from_config(&config.chunking)?;
        let generator = OllamaClient::new(&config.generation)?;
        let index = Arc::new(LazyIndex::from_config(config));

        let pipeline = Arc::new(IngestionPipeline::new(Arc::clone(&index), chunker));
        let queue = IngestQueue::start(pipeline, &config.ingestion);
        let query = QueryPipeline::new(
            Arc::clone(&index),
            Arc::new(generator),
            config.retrieval.top_k,
        );

        Ok(RagService::new(
            index,
            queue,
            query,
            config.embedding.model.clone(),
            config.db_path(),
        )
        .with_request_timeout(Duration::from_secs(config.daemon.request_timeout_secs)))
    }

    /// Run the daemon in the current process until a signal or `stop`
    pub async fn run_foreground(&self) -> Result<()> {
        self.process_manager.acquire()?;

        let result = self.serve_until_shutdown().await;

        if let Err(e) = self.process_manager.release() {
            tracing::error!("Failed to cleanup on exit: {}", e);
        }

        result
    }

    async fn serve_until_shutdown(&self) -> Result<()> {
        tracing::info!("Daemon starting (pid {})", std::process::id());

        let mut signal_handler = SignalHandler::new()?;

        let service = Arc::new(Self::build_service(&self.config)?);

        let mut server = IpcServer::new(expand_tilde(&self.config.daemon.socket_path));
        server.bind().await?;

        tracing::info!(
            "Daemon ready: generation model {} at {}",
            self.config.generation.model,
            self.config.generation.base_url
        );

        let shutdown = async move {
            let sig = signal_handler.wait().await;
            tracing::info!("Shutting down on {:?}", sig);
        };

        let served = serve(
            &server,
            Arc::clone(&service),
            self.config.daemon.max_connections,
            shutdown,
        )
        .await;

        tracing::info!("Shutting down daemon");
        service.shutdown().await;
        server.shutdown()?;
        tracing::info!("Daemon shutdown complete");

        served
    }

    /// Fork into the background and run there
    pub fn start_daemon(&self) -> Result<()> {
        if self.process_manager.is_running() {
            let pid = self.process_manager.read_pid()?;
            return Err(RagError::DaemonAlreadyRunning { pid: pid as u32 });
        }

        let log_file = expand_tilde(&self.config.daemon.log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create log directory: {:?}", parent),
            })?;
        }

        let stdout = std::fs::File::create(log_file.with_extension("stdout")).map_err(|e| {
            RagError::Io {
                source: e,
                context: "Failed to create stdout log file".to_string(),
            }
        })?;
        let stderr = std::fs::File::create(log_file.with_extension("stderr")).map_err(|e| {
            RagError::Io {
                source: e,
                context: "Failed to create stderr log file".to_string(),
            }
        })?;

        let working_directory = std::env::current_dir().map_err(|e| RagError::Io {
            source: e,
            context: "Failed to get current directory".to_string(),
        })?;

        // The PID file is written by `run_foreground` in the child
        daemonize::Daemonize::new()
            .working_directory(working_directory)
            .stdout(stdout)
            .stderr(stderr)
            .start()
            .map_err(|e| RagError::Daemon(format!("Failed to daemonize: {}", e)))?;

        let runtime = tokio::runtime::Runtime::new().map_err(|e| RagError::Io {
            source: e,
            context: "Failed to create tokio runtime".to_string(),
        })?;

        runtime.block_on(async {
            if let Err(e) = self.run_foreground().await {
                tracing::error!("Daemon error: {}", e);
            }
        });

        Ok(())
    }

    /// Ask a running daemon to stop via SIGTERM
    pub fn stop_daemon(&self) -> Result<()> {
        if !self.process_manager.is_running() {
            return Err(RagError::DaemonNotRunning);
        }

        self.process_manager
            .signal(nix::sys::signal::Signal::SIGTERM)?;

        tracing::info!("Sent shutdown signal to daemon");

        Ok(())
    }

    pub fn status(&self) -> DaemonStatus {
        if self.process_manager.is_running() {
            DaemonStatus::Running {
                pid: self.process_manager.read_pid().ok(),
            }
        } else {
            DaemonStatus::Stopped
        }
    }

    pub fn process_manager(&self) -> &ProcessManager {
        &self.process_manager
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: Option<i32> },
    Stopped,
}
