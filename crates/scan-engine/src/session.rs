//! A scanning session over the spans of one configuration.

use std::sync::Arc;

use scan_config::{log_scan_info, Config, ResolvedVolume, SpanConfig};
use tracing::instrument;

use crate::cache::ResultCache;
use crate::http::HeaderParser;
use crate::pool::FixedThrottle;
use crate::source::open_span;
use crate::span::{enumerate_span, ScanOptions, Span, SpanCatalog, SpanId};
use crate::usage::UsageReport;
use crate::{Result, ScanError};

/// Owns the configuration, the stripe pool bound and the catalog cache.
///
/// Catalogs live as long as the session; storage is assumed not to change
/// underneath it.
#[derive(Debug)]
pub struct ScanSession {
    config: Config,
    options: ScanOptions,
    throttle: FixedThrottle,
    cache: ResultCache,
}

impl ScanSession {
    pub fn new(config: Config) -> Self {
        let options = ScanOptions::from(&config.scan);
        let throttle = config
            .scan
            .threads
            .map(FixedThrottle)
            .unwrap_or_default();
        Self {
            config,
            options,
            throttle,
            cache: ResultCache::new(),
        }
    }

    /// Replace the header parser used to recover request URLs.
    pub fn with_parser(mut self, parser: Arc<dyn HeaderParser>) -> Self {
        self.options.parser = parser;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Catalog of one span, scanned at most once per session.
    ///
    /// Stripe placement comes from the span entry when it lists stripes,
    /// otherwise from the span's own header.
    #[instrument(skip(self), fields(path = %span.path.display()), level = "debug")]
    pub fn scan_span(&self, span: &SpanConfig) -> Result<Arc<SpanCatalog>> {
        let id = SpanId::from(span.path.as_path());
        self.cache.get_or_compute(&id, || {
            let source = open_span(span).map_err(|source| ScanError::Open {
                path: span.path.clone(),
                source,
            })?;
            let layout = if span.stripes.is_empty() {
                Span::discover(&*source, id.clone())?
            } else {
                Span::from_layout(id.clone(), &span.stripes)
            };
            enumerate_span(&layout, &*source, &self.options, &self.throttle)
        })
    }

    /// Catalogs of every configured span, in configuration order.
    pub fn scan_all(&self) -> Result<Vec<Arc<SpanCatalog>>> {
        self.config
            .storage
            .spans
            .iter()
            .map(|span| self.scan_span(span))
            .collect()
    }

    /// Per-host usage across every configured span.
    ///
    /// Capacity is the declared span size total, or the scanned stripe
    /// lengths when no sizes are declared.
    pub fn usage(&self) -> Result<UsageReport> {
        let catalogs = self.scan_all()?;
        let capacity = match self.config.storage.total_capacity() {
            0 => catalogs
                .iter()
                .flat_map(|c| c.volume_bytes().into_values())
                .sum(),
            declared => declared,
        };
        let report = UsageReport::build(catalogs.iter().flat_map(|c| c.objects.iter()), capacity);
        log_scan_info!(
            "Usage computed",
            spans = catalogs.len(),
            hosts = report.hosts.len(),
            used = report.used,
            capacity = report.capacity
        );
        Ok(report)
    }

    /// Configured volumes resolved against the declared capacity.
    pub fn volumes(&self) -> Result<Vec<ResolvedVolume>> {
        Ok(self.config.resolved_volumes()?)
    }
}
