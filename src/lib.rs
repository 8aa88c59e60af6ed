//! # usenet-engine
//!
//! Headless Usenet (NNTP) download engine library.
//!
//! The engine ingests job descriptors (NZB documents and HTTP/HTTPS URLs that
//! resolve to NZBs), downloads the referenced binary articles from a pool of
//! NNTP servers with failover across server levels, reassembles and decodes
//! them into files, and exposes a binary RPC control surface for operators
//! and automation. Par repair, unpacking and other post-processing are
//! external collaborators attached through [`hooks::Collaborators`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use usenet_engine::{Config, ServerConfig, UsenetEngine, run_with_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         servers: vec![ServerConfig {
//!             host: "news.example.com".to_string(),
//!             port: 563,
//!             tls: true,
//!             username: Some("user".to_string()),
//!             password: Some("pass".to_string()),
//!             max_connections: 10,
//!             level: 0,
//!             ..Default::default()
//!         }],
//!         ..Default::default()
//!     };
//!
//!     let engine = UsenetEngine::new(config).await?;
//!     engine.start();
//!     engine.spawn_rpc_server();
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let nzb = std::fs::read("example.nzb")?;
//!     engine
//!         .add_nzb_content(&nzb, "example", Default::default())
//!         .await?;
//!
//!     run_with_shutdown(engine).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// File assembly (joining, dedupe, health gating)
pub mod assembler;
/// Configuration types
pub mod config;
pub(crate) mod downloader;
/// Engine facade and shared context
pub mod engine;
/// Error types
pub mod error;
/// RSS/Atom feed ingestion and the filter-rule engine
pub mod feed;
/// Completed/deleted job history
pub mod history;
/// Collaborator hooks (par, unpack, dupe history)
pub mod hooks;
/// NNTP client connections and the leveled server pool
pub mod nntp;
/// NZB document parsing
pub mod nzb;
/// The prioritized download queue
pub mod queue;
/// Binary RPC control surface
pub mod rpc;
pub(crate) mod scheduler;
/// Sliding-window download speed accounting
pub mod speedmeter;
/// Core types and events
pub mod types;
/// URL fetching for NZB-by-URL jobs and feeds
pub mod urlfetch;
/// Utility functions
pub mod utils;
/// Incremental yEnc decoding
pub mod yenc;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, FeedConfig, HealthAction, RpcConfig, ServerConfig};
pub use engine::{AddOptions, EngineStatus, UsenetEngine};
pub use error::{ArticleError, Error, FetchError, Result};
pub use hooks::{Collaborators, DupeAction, NoOpCollaborators};
pub use queue::{DownloadQueue, MoveTarget};
pub use types::{
    ArticleStatus, DeleteStatus, DupeMode, Event, FileId, JobId, JobKind, JobSnapshot,
    MessageKind, PauseTarget,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()`
/// method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal
///   registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(engine: UsenetEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
