//! Prioritized batch preloading.
//!
//! Keys are reordered so priority indices come first, split into small
//! batches and processed strictly one batch at a time. Each batch waits for
//! all of its members to resolve (success or failure) and a short pause
//! separates batches, which bounds concurrent fetch + decode work to the
//! batch size.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::asset::AssetKey;
use crate::config::CacheConfig;
use crate::error::AssetError;
use crate::fetch::FetchCoordinator;

/// An ordered key list plus the indices to load first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadRequest {
    pub keys: Vec<AssetKey>,
    pub priority: BTreeSet<usize>,
}

impl PreloadRequest {
    pub fn new(
        keys: Vec<AssetKey>,
        priority: impl IntoIterator<Item = usize>,
    ) -> Self {
        Self {
            keys,
            priority: priority.into_iter().collect(),
        }
    }

    /// Gallery preload: the first `head` items go ahead of the rest.
    pub fn for_gallery(keys: Vec<AssetKey>, head: usize) -> Self {
        let head = head.min(keys.len());
        Self::new(keys, 0..head)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Priority items in ascending index order, then the remainder in their
    /// original order. Out-of-range priority indices are ignored.
    pub fn ordered(&self) -> Vec<AssetKey> {
        let first = self
            .priority
            .iter()
            .filter_map(|&index| self.keys.get(index));
        let rest = self
            .keys
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.priority.contains(index))
            .map(|(_, key)| key);
        first.chain(rest).cloned().collect()
    }
}

/// Snapshot of a running preload.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PreloadProgress {
    pub resolved: usize,
    pub total: usize,
    /// Fraction at which the first item may be shown.
    pub display_ready_at: f64,
}

impl PreloadProgress {
    /// Resolved share of the request; an empty request counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.resolved as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.resolved >= self.total
    }

    pub fn is_display_ready(&self) -> bool {
        self.fraction() >= self.display_ready_at
    }
}

/// Outcome of one preload call.
#[derive(Debug, Clone, Default)]
pub struct PreloadReport {
    pub total: usize,
    pub loaded: usize,
    /// Items that were already cached and needed no fetch.
    pub cache_hits: usize,
    pub failed: Vec<(AssetKey, AssetError)>,
    pub elapsed: Duration,
}

impl PreloadReport {
    pub fn resolved(&self) -> usize {
        self.loaded + self.failed.len()
    }
}

/// Drives batched, priority-ordered loading through a [`FetchCoordinator`].
#[derive(Debug, Clone)]
pub struct PrioritizedBatchPreloader {
    coordinator: FetchCoordinator,
    batch_size: usize,
    batch_pause: Duration,
    priority_head: usize,
    display_ready_fraction: f64,
}

impl PrioritizedBatchPreloader {
    pub fn new(coordinator: FetchCoordinator, config: &CacheConfig) -> Self {
        Self {
            coordinator,
            batch_size: config.batch_size.max(1),
            batch_pause: config.batch_pause(),
            priority_head: config.priority_head,
            display_ready_fraction: config.display_ready_fraction,
        }
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Request for a gallery's key list using the configured priority head.
    pub fn gallery_request(&self, keys: Vec<AssetKey>) -> PreloadRequest {
        PreloadRequest::for_gallery(keys, self.priority_head)
    }

    /// Load `keys`, priority indices first, reporting the resolved fraction
    /// after every item and calling `on_complete` once at the end.
    ///
    /// Failures count as resolved and never stop the preload. An empty key
    /// list completes immediately without any progress call.
    pub async fn preload<P, C>(
        &self,
        keys: &[AssetKey],
        priority: impl IntoIterator<Item = usize>,
        on_progress: P,
        on_complete: C,
    ) -> PreloadReport
    where
        P: FnMut(f64) + Send,
        C: FnOnce() + Send,
    {
        let request = PreloadRequest::new(keys.to_vec(), priority);
        self.run(&request, on_progress, on_complete).await
    }

    pub async fn run<P, C>(
        &self,
        request: &PreloadRequest,
        mut on_progress: P,
        on_complete: C,
    ) -> PreloadReport
    where
        P: FnMut(f64) + Send,
        C: FnOnce() + Send,
    {
        let started = Instant::now();
        let order = request.ordered();
        let total = order.len();
        let mut report = PreloadReport {
            total,
            ..PreloadReport::default()
        };

        if total == 0 {
            on_complete();
            return report;
        }

        info!(
            "Preloading {} assets in batches of {} ({} prioritized)",
            total,
            self.batch_size,
            request.priority.iter().filter(|&&i| i < total).count()
        );

        let mut resolved = 0usize;
        for (batch_index, batch) in order.chunks(self.batch_size).enumerate() {
            if batch_index > 0 && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }

            let mut pending = FuturesUnordered::new();
            for key in batch {
                let ticket = self.coordinator.ensure_loading(key);
                if ticket.is_ready() {
                    report.cache_hits += 1;
                    report.loaded += 1;
                    resolved += 1;
                    on_progress(resolved as f64 / total as f64);
                    continue;
                }
                pending.push(async move {
                    let key = ticket.key().clone();
                    (key, ticket.wait().await)
                });
            }

            while let Some((key, outcome)) = pending.next().await {
                match outcome {
                    Ok(_) => report.loaded += 1,
                    Err(err) => {
                        debug!("Preload: {} did not load: {}", key, err);
                        report.failed.push((key, err));
                    }
                }
                resolved += 1;
                on_progress(resolved as f64 / total as f64);
            }
        }

        report.elapsed = started.elapsed();
        if report.failed.is_empty() {
            info!(
                "Preload finished: {} assets in {:?} ({} already cached)",
                total, report.elapsed, report.cache_hits
            );
        } else {
            warn!(
                "Preload finished with {} of {} assets failing in {:?}",
                report.failed.len(),
                total,
                report.elapsed
            );
        }

        on_complete();
        report
    }

    /// Run `request` on the runtime, publishing progress on a watch channel.
    pub fn spawn(&self, request: PreloadRequest) -> PreloadHandle {
        let initial = PreloadProgress {
            resolved: 0,
            total: request.len(),
            display_ready_at: self.display_ready_fraction,
        };
        let (tx, rx) = watch::channel(initial);
        let preloader = self.clone();

        let task = tokio::spawn(async move {
            let total = request.len();
            let mut resolved = 0usize;
            preloader
                .run(
                    &request,
                    |_| {
                        resolved += 1;
                        tx.send_replace(PreloadProgress {
                            resolved,
                            ..initial
                        });
                    },
                    || debug!("Preload of {} assets complete", total),
                )
                .await
        });

        PreloadHandle { progress: rx, task }
    }
}

/// A preload running in the background.
#[derive(Debug)]
pub struct PreloadHandle {
    progress: watch::Receiver<PreloadProgress>,
    task: JoinHandle<PreloadReport>,
}

impl PreloadHandle {
    pub fn progress(&self) -> PreloadProgress {
        *self.progress.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PreloadProgress> {
        self.progress.clone()
    }

    /// Wait until enough of the preload has resolved to show the first item.
    pub async fn display_ready(&mut self) -> PreloadProgress {
        if let Ok(progress) = self
            .progress
            .wait_for(|progress| progress.is_display_ready())
            .await
        {
            return *progress;
        }
        // Task finished and dropped the sender; the last value is final.
        *self.progress.borrow()
    }

    pub async fn join(self) -> Result<PreloadReport, AssetError> {
        self.task.await.map_err(|_| AssetError::Cancelled)
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
