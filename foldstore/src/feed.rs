//! Feed consumption with durable checkpoints.
//!
//! The feed enumerates commits across all aggregates in arrival order so
//! downstream projections can fold them into their own state. A processor
//! owns one consumer's position: it resumes from the checkpoint persisted
//! under its observer id, applies each page of commit documents through
//! the dispatcher's stream-direct entry point, and saves the new
//! checkpoint only after the whole page has been applied. Delivery is
//! therefore at-least-once; folds must tolerate reprocessing the last
//! page after a crash between apply and save.

use crate::dispatch::Dispatcher;
use crate::errors::{FeedError, FeedResult};
use crate::replay::fold_commit_document;
use crate::store::{CheckpointStore, CommitFeed};
use crate::stream::{SegmentPool, TokenReader};
use crate::types::ObserverId;
use futures::stream::{self, Stream};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Tuning for a feed consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    /// Upper bound on commit documents requested per poll.
    pub max_items: usize,
    /// Pause between pages, as a rate limit on the backend. Zero polls
    /// back-to-back.
    pub page_delay: Duration,
}

impl FeedConfig {
    /// Default per-poll document bound.
    pub const DEFAULT_MAX_ITEMS: usize = 64;

    /// Creates the default configuration: 64 documents per page, no pause.
    pub const fn new() -> Self {
        Self {
            max_items: Self::DEFAULT_MAX_ITEMS,
            page_delay: Duration::ZERO,
        }
    }

    /// Overrides the per-poll document bound.
    pub const fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    /// Overrides the pause between pages.
    pub const fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Signals a running feed consumer to stop after its current page.
#[derive(Debug, Clone)]
pub struct FeedStop(Arc<AtomicBool>);

impl FeedStop {
    /// Requests the consumer stop; the current page still completes.
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// One processed feed page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedBatch<M> {
    /// The projection state after folding the page.
    pub memento: M,
    /// How many commit documents the page carried.
    pub documents: usize,
    /// How many events were folded out of them.
    pub events_applied: usize,
}

/// Drives one named consumer over the commit feed, folding every commit
/// into a projection memento.
pub struct FeedProcessor<F, K, M> {
    feed: F,
    checkpoints: K,
    observer: ObserverId,
    dispatcher: Arc<Dispatcher<M>>,
    pool: SegmentPool,
    config: FeedConfig,
    stop: Arc<AtomicBool>,
}

impl<F, K, M> FeedProcessor<F, K, M>
where
    F: CommitFeed,
    K: CheckpointStore,
    M: Send + 'static,
{
    /// Creates a processor for the given consumer identity.
    pub fn new(feed: F, checkpoints: K, observer: ObserverId, dispatcher: Arc<Dispatcher<M>>) -> Self {
        Self {
            feed,
            checkpoints,
            observer,
            dispatcher,
            pool: SegmentPool::default(),
            config: FeedConfig::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replaces the consumer tuning.
    #[must_use]
    pub fn with_config(mut self, config: FeedConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the segment pool used to decode commit documents.
    #[must_use]
    pub fn with_pool(mut self, pool: SegmentPool) -> Self {
        self.pool = pool;
        self
    }

    /// A handle that stops [`run`](Self::run) and the page stream from
    /// another task.
    pub fn stop_handle(&self) -> FeedStop {
        FeedStop(Arc::clone(&self.stop))
    }

    /// Polls one page from the consumer's checkpoint, folds it into the
    /// memento, and persists the advanced checkpoint.
    ///
    /// The checkpoint is saved only after every document on the page has
    /// been applied, so a crash mid-page replays the page from its start.
    #[instrument(skip_all, fields(observer = %self.observer))]
    pub async fn poll_once(&self, memento: M) -> FeedResult<FeedBatch<M>> {
        let checkpoint = self.checkpoints.load(&self.observer).await?;
        let page = self
            .feed
            .poll(checkpoint.as_ref(), self.config.max_items)
            .await?;

        let documents = page.documents.len();
        let mut memento = memento;
        let mut events_applied = 0;
        for document in &page.documents {
            let mut reader =
                TokenReader::new(Cursor::new(document.as_slice()), self.pool.clone());
            let applied = fold_commit_document(&self.dispatcher, memento, None, &mut reader)?;
            memento = applied.memento;
            events_applied += applied.events_applied;
        }

        self.checkpoints
            .save(&self.observer, &page.checkpoint)
            .await
            .map_err(|source| FeedError::CheckpointSave {
                observer: self.observer.to_string(),
                source,
            })?;
        debug!(documents, events_applied, "feed page applied");
        Ok(FeedBatch {
            memento,
            documents,
            events_applied,
        })
    }

    /// Polls pages until stopped, pausing `page_delay` between polls.
    ///
    /// Returns the projection state as of the last completed page. An
    /// empty page is not a stop condition; a live consumer keeps tailing
    /// the feed until its [`FeedStop`] handle fires.
    pub async fn run(&self, memento: M) -> FeedResult<M> {
        let mut memento = memento;
        while !self.stop.load(Ordering::Relaxed) {
            let batch = self.poll_once(memento).await?;
            memento = batch.memento;
            if !self.config.page_delay.is_zero() {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }
        Ok(memento)
    }

    /// Adapts the processor into a stream of processed pages.
    ///
    /// Each item is the outcome of one poll; the stream ends when the
    /// [`FeedStop`] handle fires or a poll fails. Requires a cloneable
    /// memento so each batch can carry the state it produced.
    ///
    /// As in [`run`](Self::run), `page_delay` pauses only between pages:
    /// the first poll happens immediately.
    pub fn into_stream(self, memento: M) -> impl Stream<Item = FeedResult<FeedBatch<M>>>
    where
        M: Clone,
    {
        stream::unfold(Some((self, memento, true)), |state| async move {
            let (processor, memento, first) = state?;
            if processor.stop.load(Ordering::Relaxed) {
                return None;
            }
            if !first && !processor.config.page_delay.is_zero() {
                tokio::time::sleep(processor.config.page_delay).await;
            }
            match processor.poll_once(memento).await {
                Ok(batch) => {
                    let next = batch.memento.clone();
                    Some((Ok(batch), Some((processor, next, false))))
                }
                Err(err) => Some((Err(err), None)),
            }
        })
    }
}
