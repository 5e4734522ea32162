//! URL classification and backend selection
//!
//! The router evaluates registered backends in a fixed priority order:
//! platform-specific backends first (registration order), then a generic
//! direct-file backend for raw media URLs, then a catch-all extractor, then
//! an HTML-page scraper. The first match wins. The tier order is a design
//! default, adjustable via [`RouterConfig`].

use std::path::Path;
use std::sync::Arc;
use url::Url;

use crate::backend::Backend;
use crate::error::{Error, Result};

/// File extensions treated as raw media for the direct-file tier
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "avi", "mov", "flv", "ts", "mp3", "m4a", "aac", "flac", "wav", "ogg",
    "opus",
];

/// How certain the router is that the selected backend fits the URL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Confidence {
    /// Exact platform match or a raw media file
    High,
    /// Generic fallback capable of attempting the URL
    Medium,
    /// Best-effort extraction (page scraping)
    Low,
}

/// One slot in the router's priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteTier {
    /// Platform-specific backends, in registration order
    Platform,
    /// Generic backend for URLs whose path names a raw media file
    DirectFile,
    /// Catch-all extraction backend for arbitrary URLs
    Extractor,
    /// HTML-page scraper looking for embedded media references
    Scraper,
}

/// Router configuration
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Tier evaluation order; the default mirrors the priority policy above
    pub tier_order: Vec<RouteTier>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            tier_order: vec![
                RouteTier::Platform,
                RouteTier::DirectFile,
                RouteTier::Extractor,
                RouteTier::Scraper,
            ],
        }
    }
}

/// Result of routing a URL: the selected backend plus classification context
///
/// Not persisted; recomputed per submission.
#[derive(Clone)]
pub struct RouteDecision {
    /// The backend instance that will perform the fetch
    pub backend: Arc<dyn Backend>,
    /// Human-readable platform label (the backend's name)
    pub platform: String,
    /// Confidence tier of the match
    pub confidence: Confidence,
}

impl std::fmt::Debug for RouteDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteDecision")
            .field("platform", &self.platform)
            .field("confidence", &self.confidence)
            .finish_non_exhaustive()
    }
}

/// Classifies URLs and selects the backend best suited to handle them
///
/// Backend instances are registered once, cached as `Arc`s, and shared
/// across routing calls; backends must not keep per-fetch mutable state.
#[derive(Default)]
pub struct Router {
    config: RouterConfig,
    platform_backends: Vec<Arc<dyn Backend>>,
    direct_file: Option<Arc<dyn Backend>>,
    extractor: Option<Arc<dyn Backend>>,
    scraper: Option<Arc<dyn Backend>>,
}

impl Router {
    /// Create a router with the default tier order
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with a custom tier order
    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config,
            platform_backends: Vec::new(),
            direct_file: None,
            extractor: None,
            scraper: None,
        }
    }

    /// Register a platform-specific backend.
    ///
    /// Platform backends are evaluated in registration order; the first one
    /// whose `can_handle` returns true wins with high confidence.
    pub fn register_platform(&mut self, backend: Arc<dyn Backend>) {
        self.platform_backends.push(backend);
    }

    /// Set the generic direct-file backend (high confidence for raw media URLs)
    pub fn set_direct_file(&mut self, backend: Arc<dyn Backend>) {
        self.direct_file = Some(backend);
    }

    /// Set the catch-all extraction backend (medium confidence)
    pub fn set_extractor(&mut self, backend: Arc<dyn Backend>) {
        self.extractor = Some(backend);
    }

    /// Set the HTML-page scraper backend (low confidence)
    pub fn set_scraper(&mut self, backend: Arc<dyn Backend>) {
        self.scraper = Some(backend);
    }

    /// Validate and parse a submitted URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UrlValidation`] for unparseable URLs or schemes
    /// other than http/https.
    pub fn parse_url(raw: &str) -> Result<Url> {
        let url = Url::parse(raw).map_err(|e| Error::UrlValidation(format!("{raw}: {e}")))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(Error::UrlValidation(format!(
                "{raw}: unsupported scheme '{other}'"
            ))),
        }
    }

    /// Route a raw URL string (validates first)
    pub fn route(&self, raw: &str) -> Result<RouteDecision> {
        let url = Self::parse_url(raw)?;
        self.route_url(&url)
    }

    /// Route an already-validated URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedUrl`] when no tier matches.
    pub fn route_url(&self, url: &Url) -> Result<RouteDecision> {
        for tier in &self.config.tier_order {
            if let Some(decision) = self.try_tier(*tier, url) {
                tracing::debug!(
                    url = %url,
                    platform = %decision.platform,
                    confidence = ?decision.confidence,
                    "Routed URL"
                );
                return Ok(decision);
            }
        }
        Err(Error::UnsupportedUrl(url.to_string()))
    }

    fn try_tier(&self, tier: RouteTier, url: &Url) -> Option<RouteDecision> {
        match tier {
            RouteTier::Platform => self
                .platform_backends
                .iter()
                .find(|b| b.can_handle(url))
                .map(|b| decision(b, Confidence::High)),
            RouteTier::DirectFile => self
                .direct_file
                .as_ref()
                .filter(|_| has_media_extension(url))
                .filter(|b| b.can_handle(url))
                .map(|b| decision(b, Confidence::High)),
            RouteTier::Extractor => self
                .extractor
                .as_ref()
                .filter(|b| b.can_handle(url))
                .map(|b| decision(b, Confidence::Medium)),
            RouteTier::Scraper => self
                .scraper
                .as_ref()
                .filter(|b| b.can_handle(url))
                .map(|b| decision(b, Confidence::Low)),
        }
    }
}

fn decision(backend: &Arc<dyn Backend>, confidence: Confidence) -> RouteDecision {
    RouteDecision {
        backend: Arc::clone(backend),
        platform: backend.name().to_string(),
        confidence,
    }
}

/// Whether the URL path ends in a known raw media extension
fn has_media_extension(url: &Url) -> bool {
    Path::new(url.path())
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            MEDIA_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
