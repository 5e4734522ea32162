//! # media-dl
//!
//! Concurrent media download orchestration library.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Backend-agnostic** - Fetch implementations plug in behind the [`Backend`] trait
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! The engine supervises every download end to end: URL validation and
//! routing, FIFO scheduling under a concurrency bound, retries with
//! exponential backoff and jitter, throttled progress reporting, and
//! guaranteed cleanup of each task's isolated working directory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, DownloadEngine, Router};
//!
//! # fn my_backend() -> std::sync::Arc<dyn media_dl::Backend> { unimplemented!() }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.register_platform(my_backend());
//!
//!     let engine = DownloadEngine::new(Config::default(), router).await?;
//!     engine.start().await;
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id = engine.submit("https://example.com/video.mp4").await?;
//!     println!("queued as {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backend trait (the fetch capability contract)
pub mod backend;
/// Configuration types
pub mod config;
/// Core engine implementation (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Isolated per-task directory lifecycle
pub mod lifecycle;
/// Progress throttling and display formatting
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// URL classification and backend selection
pub mod router;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use backend::Backend;
pub use config::{
    Config, DownloadConfig, ProgressConfig, RetryConfig, SweepConfig, TimeoutConfig,
};
pub use engine::DownloadEngine;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleManager, ScopeGuard, ScopeOutcome, ScopeState};
pub use progress::{ProgressReporter, ProgressSummary};
pub use router::{Confidence, RouteDecision, RouteTier, Router, RouterConfig};
pub use types::{
    CorrelationId, DownloadOptions, EngineStats, Event, FetchResult, FormatDescriptor, Metadata,
    ProgressSnapshot, ProgressStatus, Task, TaskStatus,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, DownloadEngine, Router, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = DownloadEngine::new(Config::default(), Router::new()).await?;
///     engine.start().await;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: DownloadEngine) -> Result<()> {
    shutdown_on(engine, wait_for_signal()).await
}

/// Shut the engine down once `trigger` resolves.
///
/// Split out from [`run_with_shutdown`] so the shutdown path is testable
/// without delivering a real OS signal.
async fn shutdown_on(engine: DownloadEngine, trigger: impl std::future::Future<Output = ()>) -> Result<()> {
    trigger.await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests);
    // fall back to whichever handlers did register.
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "No SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "No SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "No unix signal handlers, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}
