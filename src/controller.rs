//! Render window and scroll-to-locator control
//!
//! The controller owns the window bounds and the per-index page slots the
//! rendering surface reads from. Scrolling goes Idle → Resolving → Scrolling →
//! Idle; a newer `scroll_to` supersedes one still resolving.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinSet;
use url::Url;

use crate::backend::{DocumentBackend, FetchError};
use crate::cache::PaginatedContentCache;
use crate::history::{NavigationHistory, ReadingPosition};
use crate::model::{Page, PageLocator};
use crate::resolver::LocatorIndexResolver;
use crate::settings::ReadingMode;
use crate::share::{ShareAnchor, ShareAnchorCodec};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    Start,
    Center,
    End,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollPhase {
    Idle,
    Resolving,
    Scrolling,
}

/// What the rendering surface is asked to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScrollCommand {
    /// Jump in place (continuous mode)
    ScrollToIndex { index: usize, align: Align },
    /// Route to a page-scoped URL (single-page mode)
    Navigate { url: Url },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScrollOutcome {
    Executed(ScrollCommand),
    /// A newer scroll request won while this one was resolving
    Superseded,
    /// The locator didn't resolve to an addressable page
    Unresolved,
}

/// The UI element that actually scrolls or routes
pub trait ScrollSurface: Send + Sync {
    fn execute(&self, command: &ScrollCommand);
}

/// Surface that only logs, for headless use
#[derive(Debug, Default)]
pub struct LoggingSurface;

impl ScrollSurface for LoggingSurface {
    fn execute(&self, command: &ScrollCommand) {
        info!("Scroll command: {command:?}");
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderWindow {
    pub start: usize,
    pub count: usize,
    pub overscan: usize,
}

impl RenderWindow {
    /// Indices to materialize, `[start - overscan, start + count + overscan)`
    /// clipped to `total` when it is known (non-zero)
    #[must_use]
    pub fn materialized(&self, total: usize) -> Range<usize> {
        let start = self.start.saturating_sub(self.overscan);
        let mut end = self
            .start
            .saturating_add(self.count)
            .saturating_add(self.overscan);
        if total > 0 {
            end = end.min(total);
        }
        start.min(end)..end
    }
}

/// State of one render index as seen by the surface
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageSlot {
    Loading,
    Ready(Page),
    /// Past the end of the document
    Missing,
    /// Retried on the next `set_window`
    Failed(FetchError),
}

struct ControllerState {
    window: RenderWindow,
    slots: BTreeMap<usize, PageSlot>,
    phase: ScrollPhase,
    generation: u64,
    position: usize,
    history: NavigationHistory,
}

pub struct VirtualizedScrollController<B> {
    cache: Arc<PaginatedContentCache<B>>,
    resolver: Arc<LocatorIndexResolver<B>>,
    codec: ShareAnchorCodec,
    surface: Arc<dyn ScrollSurface>,
    mode: ReadingMode,
    state: Mutex<ControllerState>,
}

impl<B: DocumentBackend + 'static> VirtualizedScrollController<B> {
    pub fn new(
        cache: Arc<PaginatedContentCache<B>>,
        resolver: Arc<LocatorIndexResolver<B>>,
        codec: ShareAnchorCodec,
        surface: Arc<dyn ScrollSurface>,
        mode: ReadingMode,
        overscan: usize,
        history_size: usize,
    ) -> Self {
        Self {
            cache,
            resolver,
            codec,
            surface,
            mode,
            state: Mutex::new(ControllerState {
                window: RenderWindow {
                    start: 0,
                    count: 0,
                    overscan,
                },
                slots: BTreeMap::new(),
                phase: ScrollPhase::Idle,
                generation: 0,
                position: 0,
                history: NavigationHistory::new(history_size),
            }),
        }
    }

    pub fn mode(&self) -> ReadingMode {
        self.mode
    }

    #[must_use]
    pub fn window(&self) -> RenderWindow {
        self.lock().window
    }

    #[must_use]
    pub fn phase(&self) -> ScrollPhase {
        self.lock().phase
    }

    /// Render index the reader is currently at
    #[must_use]
    pub fn position(&self) -> usize {
        self.lock().position
    }

    #[must_use]
    pub fn slot(&self, render_index: usize) -> Option<PageSlot> {
        self.lock().slots.get(&render_index).cloned()
    }

    /// Number of render indices currently holding a slot
    #[must_use]
    pub fn resident_slots(&self) -> usize {
        self.lock().slots.len()
    }

    /// Indices the initial render can show without fetching
    #[must_use]
    pub fn bundled_count(&self) -> usize {
        self.cache.session().bundled_pages().len()
    }

    /// Move the visible window and fetch whatever it needs.
    ///
    /// Returns the indices that were requested. Slots outside the new
    /// materialized range are released; in single-page mode only `start` is
    /// ever resident.
    pub async fn set_window(&self, start: usize, count: usize) -> Vec<usize> {
        let total = self.cache.session().total_render_count();
        let wanted: Vec<usize> = {
            let mut state = self.lock();
            state.window.start = start;
            state.window.count = count;
            let range = match self.mode {
                ReadingMode::Scroll => state.window.materialized(total),
                ReadingMode::SinglePage if total == 0 || start < total => start..start + 1,
                ReadingMode::SinglePage => start..start,
            };
            // Only the materialized range stays in memory
            state.slots.retain(|index, _| range.contains(index));

            let wanted: Vec<usize> = range
                .filter(|index| {
                    matches!(
                        state.slots.get(index),
                        None | Some(PageSlot::Failed(_))
                    )
                })
                .collect();
            for index in &wanted {
                state.slots.insert(*index, PageSlot::Loading);
            }
            wanted
        };

        if wanted.is_empty() {
            return wanted;
        }
        debug!("Window {start}+{count} requests {} pages", wanted.len());

        let mut fetches = JoinSet::new();
        for index in wanted.iter().copied() {
            let cache = Arc::clone(&self.cache);
            fetches.spawn(async move { (index, cache.page(index).await) });
        }

        // Chunks settle in any order; each result is applied on its own.
        while let Some(joined) = fetches.join_next().await {
            let Ok((index, result)) = joined else {
                warn!("Page fetch task failed to complete");
                continue;
            };
            let slot = match result {
                Ok(Some(page)) => PageSlot::Ready(page),
                Ok(None) => PageSlot::Missing,
                Err(e) => PageSlot::Failed(e),
            };
            // A newer window may have released this index meanwhile
            if let Some(current) = self.lock().slots.get_mut(&index) {
                *current = slot;
            }
        }

        // A task that never reported back leaves its slot retryable
        let mut state = self.lock();
        for index in &wanted {
            if state.slots.get(index) == Some(&PageSlot::Loading) {
                state.slots.insert(
                    *index,
                    PageSlot::Failed(FetchError::transport("fetch task aborted")),
                );
            }
        }
        wanted
    }

    /// Resolve `locator` and scroll (or navigate) to it
    pub async fn scroll_to(&self, locator: &PageLocator, align: Align) -> ScrollOutcome {
        self.scroll(locator, align, true).await
    }

    /// Go back to where the previous jump started
    pub async fn go_back(&self) -> Option<ScrollOutcome> {
        let current = self.current_position();
        let target = self.lock().history.back(current)?;
        Some(
            self.scroll(&PageLocator::render(target.render_index), Align::Start, false)
                .await,
        )
    }

    pub async fn go_forward(&self) -> Option<ScrollOutcome> {
        let current = self.current_position();
        let target = self.lock().history.forward(current)?;
        Some(
            self.scroll(&PageLocator::render(target.render_index), Align::Start, false)
                .await,
        )
    }

    /// Share link for the current position, under the canonical slug
    #[must_use]
    pub fn share_anchor(&self) -> ShareAnchor {
        let session = self.cache.session();
        ShareAnchor::new(session.canonical_id(), self.position()).with_version(session.version_id())
    }

    async fn scroll(&self, locator: &PageLocator, align: Align, record: bool) -> ScrollOutcome {
        let generation = {
            let mut state = self.lock();
            state.generation += 1;
            state.phase = ScrollPhase::Resolving;
            state.generation
        };

        let resolved = self.resolver.resolve(locator).await;

        let (command, origin, index) = {
            let mut state = self.lock();
            if state.generation != generation {
                debug!("Discarding superseded scroll to {locator:?}");
                return ScrollOutcome::Superseded;
            }

            let total = self.cache.session().total_render_count();
            let Some(index) = resolved.filter(|i| total == 0 || *i < total) else {
                debug!("Locator {locator:?} did not resolve, ignoring");
                state.phase = ScrollPhase::Idle;
                return ScrollOutcome::Unresolved;
            };

            state.phase = ScrollPhase::Scrolling;
            let origin = state.position;
            state.position = index;
            (self.command_for(index, align), origin, index)
        };

        if record && origin != index {
            let session = self.cache.session();
            self.lock().history.record(ReadingPosition::new(
                session.document_id(),
                session.version_id(),
                origin,
            ));
        }

        self.surface.execute(&command);

        let mut state = self.lock();
        if state.generation == generation {
            state.phase = ScrollPhase::Idle;
        }
        ScrollOutcome::Executed(command)
    }

    fn command_for(&self, index: usize, align: Align) -> ScrollCommand {
        match self.mode {
            ReadingMode::Scroll => ScrollCommand::ScrollToIndex { index, align },
            ReadingMode::SinglePage => {
                let session = self.cache.session();
                let anchor =
                    ShareAnchor::new(session.canonical_id(), index).with_version(session.version_id());
                ScrollCommand::Navigate {
                    url: self.codec.encode(&anchor),
                }
            }
        }
    }

    fn current_position(&self) -> ReadingPosition {
        let session = self.cache.session();
        ReadingPosition::new(session.document_id(), session.version_id(), self.position())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
