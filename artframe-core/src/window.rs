//! Focus-window eviction.
//!
//! Three radii around the focused item drive what stays resident:
//! discrete next/previous steps prune immediately to the step radius, a
//! debounced sync prunes to the keep radius once focus has settled, and the
//! load radius marks items lazy widgets may still fetch (deferred) rather
//! than drop.
//!
//! Debouncing runs on a dedicated task fed by an unbounded channel. Each
//! focus command restarts its single timer; only the last focus of a burst is
//! applied.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep_until};

use crate::asset::AssetKey;
use crate::config::CacheConfig;
use crate::fetch::FetchCoordinator;

/// The three radii, nearest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRadii {
    pub step: usize,
    pub keep: usize,
    pub load: usize,
}

impl WindowRadii {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            step: config.step_radius,
            keep: config.keep_radius,
            load: config.load_radius,
        }
    }
}

impl Default for WindowRadii {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// How a lazy widget at some index should treat its asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDecision {
    /// Within the keep radius: load now.
    Immediate,
    /// Within the load radius: load after a short delay.
    Deferred,
    /// Beyond the load radius: drop it.
    Unload,
}

/// A focus index over an ordered list of `len` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusWindow {
    focus: usize,
    len: usize,
    radii: WindowRadii,
}

impl FocusWindow {
    /// `focus` is clamped into the list.
    pub fn new(focus: usize, len: usize, radii: WindowRadii) -> Self {
        Self {
            focus: focus.min(len.saturating_sub(1)),
            len,
            radii,
        }
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Indices within `radius` of the focus, clipped to the list.
    pub fn range(&self, radius: usize) -> Range<usize> {
        if self.len == 0 {
            return 0..0;
        }
        let start = self.focus.saturating_sub(radius);
        let end = self.focus.saturating_add(radius).min(self.len - 1) + 1;
        start..end
    }

    pub fn step_range(&self) -> Range<usize> {
        self.range(self.radii.step)
    }

    pub fn keep_range(&self) -> Range<usize> {
        self.range(self.radii.keep)
    }

    pub fn load_range(&self) -> Range<usize> {
        self.range(self.radii.load)
    }

    pub fn distance(&self, index: usize) -> usize {
        self.focus.abs_diff(index)
    }

    pub fn decision_for(&self, index: usize) -> LoadDecision {
        let distance = self.distance(index);
        if distance <= self.radii.keep {
            LoadDecision::Immediate
        } else if distance <= self.radii.load {
            LoadDecision::Deferred
        } else {
            LoadDecision::Unload
        }
    }

    /// Load-range indices that fall outside the keep range.
    pub fn edge_indices(&self) -> impl Iterator<Item = usize> + '_ {
        let keep = self.keep_range();
        self.load_range().filter(move |index| !keep.contains(index))
    }
}

/// What one debounced sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSync {
    pub focus: usize,
    pub removed: usize,
    pub requested: usize,
}

enum WindowCommand {
    Focus {
        window: FocusWindow,
        items: Arc<[AssetKey]>,
        generation: u64,
    },
    Cancel,
}

#[derive(Debug, Default)]
struct PolicyState {
    /// Bumped by close; debounced syncs from an older generation are dropped.
    generation: u64,
}

struct Shared {
    coordinator: FetchCoordinator,
    state: Mutex<PolicyState>,
    synced: watch::Sender<Option<WindowSync>>,
}

/// Keeps the cache bounded to the neighbourhood of the focused item.
pub struct WindowEvictionPolicy {
    shared: Arc<Shared>,
    radii: WindowRadii,
    commands: mpsc::UnboundedSender<WindowCommand>,
}

impl fmt::Debug for WindowEvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowEvictionPolicy")
            .field("radii", &self.radii)
            .field("generation", &self.shared.state.lock().generation)
            .finish()
    }
}

impl WindowEvictionPolicy {
    /// Spawn the debounce task on the ambient tokio runtime.
    pub fn new(
        coordinator: FetchCoordinator,
        config: &CacheConfig,
    ) -> anyhow::Result<Self> {
        let runtime = Handle::try_current().context(
            "WindowEvictionPolicy must be created within a tokio runtime",
        )?;
        Ok(Self::with_runtime(
            coordinator,
            WindowRadii::from_config(config),
            config.debounce(),
            &runtime,
        ))
    }

    pub fn with_runtime(
        coordinator: FetchCoordinator,
        radii: WindowRadii,
        debounce: Duration,
        runtime: &Handle,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (synced, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            coordinator,
            state: Mutex::new(PolicyState::default()),
            synced,
        });

        runtime.spawn(debounce_loop(rx, Arc::clone(&shared), debounce));

        Self {
            shared,
            radii,
            commands,
        }
    }

    pub fn radii(&self) -> WindowRadii {
        self.radii
    }

    /// Receives a report after every applied debounced sync.
    pub fn subscribe_syncs(&self) -> watch::Receiver<Option<WindowSync>> {
        self.shared.synced.subscribe()
    }

    /// Record a new focus. Returns the window at once for lazy widgets; the
    /// cache is pruned to the keep range only after focus has been quiet for
    /// the debounce interval.
    pub fn on_focus_changed(
        &self,
        index: usize,
        items: Arc<[AssetKey]>,
    ) -> FocusWindow {
        let window = FocusWindow::new(index, items.len(), self.radii);
        let generation = self.shared.state.lock().generation;
        trace!(
            "Focus moved to {} (keep {:?}, load {:?})",
            window.focus(),
            window.keep_range(),
            window.load_range()
        );
        if self
            .commands
            .send(WindowCommand::Focus {
                window,
                items,
                generation,
            })
            .is_err()
        {
            debug!("Window debounce task has stopped; focus change ignored");
        }
        window
    }

    /// Discrete next/previous navigation: prune to the step radius now and
    /// make sure the newly selected item is loading.
    pub fn on_step(&self, index: usize, items: &[AssetKey]) -> FocusWindow {
        let window = FocusWindow::new(index, items.len(), self.radii);
        if window.is_empty() {
            return window;
        }

        let _state = self.shared.state.lock();
        let removed = prune_outside(
            &self.shared.coordinator,
            items,
            window.step_range(),
        );
        self.shared
            .coordinator
            .request_load(&items[window.focus()]);

        debug!(
            "Step to {}: evicted {} assets outside radius {}",
            window.focus(),
            removed,
            self.radii.step
        );
        window
    }

    /// Viewer closed: drop any pending sync and keep only `selected`.
    pub fn on_close(&self, selected: Option<&AssetKey>) -> usize {
        let removed = {
            let mut state = self.shared.state.lock();
            state.generation += 1;
            self.shared
                .coordinator
                .evict_unless(|key| Some(key) == selected)
        };
        let _ = self.commands.send(WindowCommand::Cancel);
        debug!("Window closed: evicted {} assets", removed);
        removed
    }

    /// Low-memory signal: drop everything, then reload only `selected`.
    pub fn on_memory_pressure(&self, selected: Option<&AssetKey>) -> usize {
        let removed = {
            let _state = self.shared.state.lock();
            self.shared.coordinator.evict_all()
        };
        warn!(
            "Memory pressure: cleared {} cached assets{}",
            removed,
            if selected.is_some() {
                ", reloading the selection"
            } else {
                ""
            }
        );
        if let Some(key) = selected {
            self.shared.coordinator.request_load(key);
        }
        removed
    }
}

/// Evict every listed key outside `keep`, forgetting remembered failures
/// too. Keys that appear both inside and outside the range are kept.
fn prune_outside(
    coordinator: &FetchCoordinator,
    items: &[AssetKey],
    keep: Range<usize>,
) -> usize {
    let kept: HashSet<&AssetKey> = items[keep.clone()].iter().collect();
    items
        .iter()
        .enumerate()
        .filter(|(index, key)| !keep.contains(index) && !kept.contains(key))
        .filter(|(_, key)| coordinator.evict(key))
        .count()
}

fn apply_sync(
    shared: &Shared,
    window: FocusWindow,
    items: &[AssetKey],
    generation: u64,
) -> Option<WindowSync> {
    let state = shared.state.lock();
    if state.generation != generation || window.is_empty() {
        return None;
    }

    let coordinator = &shared.coordinator;
    let removed = prune_outside(coordinator, items, window.keep_range());

    let mut requested = 0usize;
    let wanted = window.keep_range().chain(window.edge_indices());
    for index in wanted {
        let key = &items[index];
        if !coordinator.cache().contains(key) {
            coordinator.request_load(key);
            requested += 1;
        }
    }
    drop(state);

    debug!(
        "Window sync at {}: evicted {}, requested {}",
        window.focus(),
        removed,
        requested
    );
    Some(WindowSync {
        focus: window.focus(),
        removed,
        requested,
    })
}

async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<WindowCommand>,
    shared: Arc<Shared>,
    debounce: Duration,
) {
    let mut pending: Option<(Instant, FocusWindow, Arc<[AssetKey]>, u64)> =
        None;

    loop {
        let deadline = pending.as_ref().map(|(deadline, ..)| *deadline);
        tokio::select! {
            command = rx.recv() => match command {
                Some(WindowCommand::Focus { window, items, generation }) => {
                    pending = Some((Instant::now() + debounce, window, items, generation));
                }
                Some(WindowCommand::Cancel) => pending = None,
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some((_, window, items, generation)) = pending.take()
                    && let Some(sync) = apply_sync(&shared, window, &items, generation)
                {
                    shared.synced.send_replace(Some(sync));
                }
            }
        }
    }
    trace!("Window debounce task stopped");
}
