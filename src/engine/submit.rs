//! URL validation, routing, and queue admission.

use std::sync::atomic::Ordering;

use crate::error::{Error, Result};
use crate::types::{CorrelationId, DownloadOptions, Event, ProgressSnapshot, Task};

use super::{DownloadEngine, ProgressSink};

impl DownloadEngine {
    /// Submit a URL for download with the engine's default options.
    ///
    /// Validates and routes the URL, assigns a correlation ID, and places
    /// the task at the back of the FIFO queue. Returns immediately; the
    /// fetch happens asynchronously once a concurrency slot frees up.
    ///
    /// # Errors
    ///
    /// - [`Error::UrlValidation`] for malformed or non-http(s) URLs
    /// - [`Error::UnsupportedUrl`] when no backend can handle the URL
    /// - [`Error::ShuttingDown`] once shutdown has begun
    pub async fn submit(&self, url: &str) -> Result<CorrelationId> {
        let options = DownloadOptions::from_config(&self.config);
        self.submit_with_options(url, options).await
    }

    /// Submit a URL with per-task option overrides
    pub async fn submit_with_options(
        &self,
        url: &str,
        options: DownloadOptions,
    ) -> Result<CorrelationId> {
        self.admit(url, options, None).await
    }

    /// Submit a URL and attach a progress sink.
    ///
    /// The sink receives throttled [`ProgressSnapshot`]s for this task only,
    /// in addition to the broadcast [`Event::Progress`] stream. It is
    /// dropped once the task reaches a terminal state.
    pub async fn submit_with_progress<F>(
        &self,
        url: &str,
        options: DownloadOptions,
        sink: F,
    ) -> Result<CorrelationId>
    where
        F: Fn(ProgressSnapshot) + Send + Sync + 'static,
    {
        self.admit(url, options, Some(std::sync::Arc::new(sink)))
            .await
    }

    async fn admit(
        &self,
        url: &str,
        options: DownloadOptions,
        sink: Option<ProgressSink>,
    ) -> Result<CorrelationId> {
        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        // Route before creating any task state: an unsupported URL must be
        // rejected synchronously, with nothing to clean up afterwards.
        let decision = self.router.route(url)?;

        let id = CorrelationId::generate();
        let task = Task::new(id.clone(), url, options, decision.platform.clone());

        {
            let mut tasks = self.registry.tasks.lock().await;
            tasks.insert(id.clone(), task);
        }
        if let Some(sink) = sink {
            self.registry.sinks.lock().await.insert(id.clone(), sink);
        }
        self.queue_state.queue.lock().await.push_back(id.clone());

        tracing::info!(
            correlation_id = %id,
            url = %url,
            backend = %decision.platform,
            confidence = ?decision.confidence,
            "Download queued"
        );
        let _ = self.event_tx.send(Event::Queued {
            id: id.clone(),
            url: url.to_string(),
            backend: decision.platform,
        });

        Ok(id)
    }
}
