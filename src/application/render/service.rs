use std::{num::NonZeroUsize, sync::Arc};

use bytes::Bytes;
use dashmap::{DashMap, mapref::entry::Entry};
use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use tracing::{debug, info};

use crate::{
    cache::ResultCache,
    config::RenderSettings,
    domain::{
        key::ArtifactKey,
        types::{CacheStatus, OutputFormat},
        validation::SourceValidator,
    },
};

use super::{
    artifacts::ArtifactWorkspace,
    error::RenderError,
    pipeline::RenderPipeline,
    queue::{CompilationQueue, JobHandle, QueueStats},
};

type SharedRender = Shared<BoxFuture<'static, Result<Bytes, RenderError>>>;

/// Rendered bytes plus whether they came from the cache.
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub key: ArtifactKey,
    pub bytes: Bytes,
    pub cache: CacheStatus,
    pub format: OutputFormat,
}

/// Renders that are queued or running, keyed by artifact key.
///
/// A second miss for a key that is already in flight awaits the same result
/// instead of starting another pipeline over the same temp-file base path.
#[derive(Default, Clone)]
pub struct InFlightRenders {
    pending: Arc<DashMap<String, SharedRender>>,
}

impl InFlightRenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared future for `key`, calling `start` only when nothing
    /// is in flight for it. The flag is true for the caller that started it.
    fn join_or_start(
        &self,
        key: &ArtifactKey,
        start: impl FnOnce() -> BoxFuture<'static, Result<Bytes, RenderError>>,
    ) -> (SharedRender, bool) {
        match self.pending.entry(key.as_str().to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let shared = start().shared();
                entry.insert(shared.clone());
                (shared, true)
            }
        }
    }

    /// Removes the entry for `key` once dropped, panics included.
    fn completion(&self, key: &ArtifactKey) -> FlightCompletion {
        FlightCompletion {
            pending: Arc::clone(&self.pending),
            key: key.as_str().to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

struct FlightCompletion {
    pending: Arc<DashMap<String, SharedRender>>,
    key: String,
}

impl Drop for FlightCompletion {
    fn drop(&mut self) {
        self.pending.remove(&self.key);
    }
}

/// Validates, consults the cache, and schedules pipeline runs on misses.
#[derive(Clone)]
pub struct RenderService {
    validator: Arc<SourceValidator>,
    cache: Arc<ResultCache>,
    queue: CompilationQueue,
    pipeline: Arc<RenderPipeline>,
    in_flight: Option<InFlightRenders>,
}

impl RenderService {
    pub fn new(
        validator: SourceValidator,
        cache: Arc<ResultCache>,
        pipeline: RenderPipeline,
        concurrency: NonZeroUsize,
        coalesce_identical: bool,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            cache,
            queue: CompilationQueue::new(concurrency),
            pipeline: Arc::new(pipeline),
            in_flight: coalesce_identical.then(InFlightRenders::new),
        }
    }

    /// Build the service from settings. Fails only when a deny pattern does
    /// not compile.
    pub fn from_settings(
        settings: &RenderSettings,
        cache: Arc<ResultCache>,
    ) -> Result<Self, regex::Error> {
        let validator =
            SourceValidator::new(settings.max_source_bytes.get(), &settings.deny_patterns)?;
        Ok(Self::new(
            validator,
            cache,
            RenderPipeline::from_settings(settings),
            settings.max_concurrency,
            settings.coalesce_identical,
        ))
    }

    pub fn workspace(&self) -> &ArtifactWorkspace {
        self.pipeline.workspace()
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn validator(&self) -> &SourceValidator {
        &self.validator
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn in_flight(&self) -> Option<&InFlightRenders> {
        self.in_flight.as_ref()
    }

    pub async fn render(
        &self,
        source: Option<&str>,
        format: OutputFormat,
    ) -> Result<RenderOutcome, RenderError> {
        let source = self.validator.validate(source)?;
        let key = ArtifactKey::for_render(source, format);

        if let Some(bytes) = self.cache.get(&key) {
            info!(
                target = "tikzrender::render::service",
                op = "render",
                result = "cache_hit",
                key = %key,
                format = format.as_str(),
                output_bytes = bytes.len(),
                "Render served from cache"
            );
            return Ok(RenderOutcome {
                key,
                bytes,
                cache: CacheStatus::Hit,
                format,
            });
        }

        let bytes = match &self.in_flight {
            Some(in_flight) => {
                let (shared, started) =
                    in_flight.join_or_start(&key, || self.submit(&key, source, format).boxed());
                if !started {
                    debug!(
                        target = "tikzrender::render::service",
                        op = "render",
                        result = "coalesced",
                        key = %key,
                        "Joined in-flight render"
                    );
                }
                shared.await?
            }
            None => self.submit(&key, source, format).await?,
        };

        Ok(RenderOutcome {
            key,
            bytes,
            cache: CacheStatus::Miss,
            format,
        })
    }

    /// Queue one pipeline run. The job writes the cache itself so the result
    /// is kept even when every caller has gone away.
    fn submit(
        &self,
        key: &ArtifactKey,
        source: &str,
        format: OutputFormat,
    ) -> JobHandle<Bytes, RenderError> {
        let key = key.clone();
        let source = source.to_string();
        let pipeline = Arc::clone(&self.pipeline);
        let cache = Arc::clone(&self.cache);
        let completion = self
            .in_flight
            .as_ref()
            .map(|in_flight| in_flight.completion(&key));

        self.queue.add(move || async move {
            let _completion = completion;
            let result = pipeline.run(&key, &source, format).await;
            if let Ok(bytes) = &result {
                cache.set(&key, bytes.clone());
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn second_caller_joins_the_first_flight() {
        let in_flight = InFlightRenders::new();
        let key = ArtifactKey::for_render("x", OutputFormat::Svg);
        let starts = AtomicUsize::new(0);
        let (tx, rx) = tokio::sync::oneshot::channel::<Bytes>();

        let (first, started_first) = in_flight.join_or_start(&key, || {
            starts.fetch_add(1, Ordering::SeqCst);
            async move { rx.await.map_err(|_| RenderError::Aborted) }.boxed()
        });
        let (second, started_second) = in_flight.join_or_start(&key, || {
            starts.fetch_add(1, Ordering::SeqCst);
            async { Err(RenderError::Aborted) }.boxed()
        });

        assert!(started_first);
        assert!(!started_second);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(in_flight.len(), 1);

        tx.send(Bytes::from_static(b"<svg/>")).expect("receiver alive");
        let (a, b) = futures::join!(first, second);
        assert_eq!(a.expect("first"), Bytes::from_static(b"<svg/>"));
        assert_eq!(b.expect("second"), Bytes::from_static(b"<svg/>"));
    }

    #[test]
    fn completion_guard_clears_the_entry() {
        let in_flight = InFlightRenders::new();
        let key = ArtifactKey::for_render("x", OutputFormat::Png);
        let (_shared, _) =
            in_flight.join_or_start(&key, || async { Err(RenderError::Aborted) }.boxed());
        assert!(!in_flight.is_empty());

        drop(in_flight.completion(&key));
        assert!(in_flight.is_empty());
    }
}
