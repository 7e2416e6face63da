use std::sync::Arc;

use folio::backend::FetchError;
use folio::cache::PaginatedContentCache;
use folio::controller::{
    Align, PageSlot, ScrollCommand, ScrollOutcome, ScrollPhase, VirtualizedScrollController,
};
use folio::model::PageLocator;
use folio::resolver::LocatorIndexResolver;
use folio::session::DocumentSession;
use folio::settings::ReadingMode;
use folio::share::ShareAnchorCodec;
use folio::test_utils::test_helpers::{RecordingSurface, ScriptedBackend, rich_text_session};

struct Harness {
    backend: Arc<ScriptedBackend>,
    surface: Arc<RecordingSurface>,
    controller: VirtualizedScrollController<ScriptedBackend>,
}

fn harness(backend: ScriptedBackend, session: Arc<DocumentSession>, mode: ReadingMode, overscan: usize) -> Harness {
    let backend = Arc::new(backend);
    let surface = Arc::new(RecordingSurface::new());
    let cache = Arc::new(PaginatedContentCache::new(Arc::clone(&backend), Arc::clone(&session)));
    let resolver = Arc::new(LocatorIndexResolver::new(Arc::clone(&backend), session));
    let codec = ShareAnchorCodec::parse("https://reader.example", None).unwrap();
    let controller = VirtualizedScrollController::new(
        cache,
        resolver,
        codec,
        surface.clone(),
        mode,
        overscan,
        100,
    );
    Harness {
        backend,
        surface,
        controller,
    }
}

fn to_index(index: usize) -> ScrollCommand {
    ScrollCommand::ScrollToIndex {
        index,
        align: Align::Start,
    }
}

#[tokio::test]
async fn newer_scroll_supersedes_one_still_resolving() {
    let backend = ScriptedBackend::gated()
        .with_rich_text("kitab", 1000)
        .with_page_index("kitab", 50, Some("2"), Some(143));
    let h = harness(backend, rich_text_session("kitab", 1000, 10, 0), ReadingMode::Scroll, 3);

    let slow = PageLocator::page(50, Some("2"));
    let first = h.controller.scroll_to(&slow, Align::Start);
    let second = async {
        tokio::task::yield_now().await;
        assert_eq!(h.controller.phase(), ScrollPhase::Resolving);
        let outcome = h.controller.scroll_to(&PageLocator::render(7), Align::Start).await;
        h.backend.release();
        outcome
    };
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, ScrollOutcome::Superseded);
    assert_eq!(second, ScrollOutcome::Executed(to_index(7)));
    assert_eq!(h.surface.commands(), vec![to_index(7)]);
    assert_eq!(h.controller.position(), 7);
    assert_eq!(h.controller.phase(), ScrollPhase::Idle);
}

#[tokio::test]
async fn newer_page_lookup_supersedes_an_older_one() {
    let backend = ScriptedBackend::gated()
        .with_rich_text("kitab", 1000)
        .with_page_index("kitab", 50, Some("2"), Some(143))
        .with_page_index("kitab", 80, Some("3"), Some(412));
    let h = harness(backend, rich_text_session("kitab", 1000, 10, 0), ReadingMode::Scroll, 3);

    let older = PageLocator::page(50, Some("2"));
    let newer = PageLocator::page(80, Some("3"));
    let first = h.controller.scroll_to(&older, Align::Start);
    let second = async {
        tokio::task::yield_now().await;
        h.controller.scroll_to(&newer, Align::Start).await
    };
    let open_gate = async {
        // Both lookups are parked at the backend before either answers
        while h.backend.calls_started() < 2 {
            tokio::task::yield_now().await;
        }
        h.backend.release();
    };
    let (first, second, ()) = tokio::join!(first, second, open_gate);

    assert_eq!(first, ScrollOutcome::Superseded);
    assert_eq!(second, ScrollOutcome::Executed(to_index(412)));
    assert_eq!(h.backend.lookup_count(), 2);
    assert_eq!(h.surface.commands(), vec![to_index(412)]);
    assert_eq!(h.controller.position(), 412);
    assert_eq!(h.controller.phase(), ScrollPhase::Idle);
}

#[tokio::test]
async fn single_page_mode_navigates_to_the_page_url() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 1000);
    let h = harness(backend, rich_text_session("kitab", 1000, 10, 0), ReadingMode::SinglePage, 0);

    let outcome = h.controller.scroll_to(&PageLocator::render(219), Align::Center).await;
    let ScrollOutcome::Executed(ScrollCommand::Navigate { url }) = outcome else {
        panic!("expected navigation, got {outcome:?}");
    };
    assert_eq!(url.as_str(), "https://reader.example/t/kitab/220");
    assert_eq!(h.controller.share_anchor().render_index, 219);
}

#[tokio::test]
async fn unresolved_locators_do_nothing() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 1000);
    let h = harness(backend, rich_text_session("kitab", 1000, 10, 0), ReadingMode::Scroll, 3);

    assert_eq!(
        h.controller.scroll_to(&PageLocator::page(0, None), Align::Start).await,
        ScrollOutcome::Unresolved
    );
    assert_eq!(
        h.controller.scroll_to(&PageLocator::render(5000), Align::Start).await,
        ScrollOutcome::Unresolved
    );
    assert_eq!(
        h.controller.scroll_to(&PageLocator::page(12, None), Align::Start).await,
        ScrollOutcome::Unresolved
    );
    assert!(h.surface.commands().is_empty());
    assert_eq!(h.controller.phase(), ScrollPhase::Idle);
    assert_eq!(h.controller.position(), 0);
}

#[tokio::test]
async fn window_fetches_only_what_it_is_missing() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 1000);
    let h = harness(backend, rich_text_session("kitab", 1000, 10, 5), ReadingMode::Scroll, 2);

    let requested = h.controller.set_window(10, 5).await;
    assert_eq!(requested, (8..17).collect::<Vec<_>>());
    // Indices 8 and 9 come from chunk 0, the rest from chunk 10
    assert_eq!(h.backend.fetch_count(), 2);
    for index in 8..17 {
        assert!(matches!(h.controller.slot(index), Some(PageSlot::Ready(_))), "slot {index}");
    }

    assert!(h.controller.set_window(10, 5).await.is_empty());
    assert_eq!(h.backend.fetch_count(), 2);
    assert_eq!(h.controller.bundled_count(), 5);
}

#[tokio::test]
async fn moving_the_window_releases_pages_behind_it() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 2000);
    let h = harness(backend, rich_text_session("kitab", 2000, 10, 0), ReadingMode::Scroll, 2);

    for start in (0..2000).step_by(10) {
        h.controller.set_window(start, 10).await;
        assert!(h.controller.resident_slots() <= 14, "window at {start}");
    }

    assert_eq!(h.controller.slot(0), None);
    assert_eq!(h.controller.slot(1500), None);
    assert!(matches!(h.controller.slot(1995), Some(PageSlot::Ready(_))));
    assert_eq!(h.controller.resident_slots(), 12);
}

#[tokio::test]
async fn window_is_clipped_to_the_document() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 30);
    let h = harness(backend, rich_text_session("kitab", 30, 10, 0), ReadingMode::Scroll, 3);

    let requested = h.controller.set_window(27, 10).await;
    assert_eq!(requested, vec![24, 25, 26, 27, 28, 29]);
    assert_eq!(h.controller.slot(30), None);
}

#[tokio::test]
async fn failed_slots_are_retried_by_the_next_window() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 100);
    let h = harness(backend, rich_text_session("kitab", 100, 10, 0), ReadingMode::Scroll, 0);
    h.backend.fail_next_fetches(1, FetchError::transport("timeout"));

    assert_eq!(h.controller.set_window(21, 1).await, vec![21]);
    assert!(matches!(h.controller.slot(21), Some(PageSlot::Failed(FetchError::Transport { .. }))));

    assert_eq!(h.controller.set_window(21, 1).await, vec![21]);
    assert!(matches!(h.controller.slot(21), Some(PageSlot::Ready(_))));
    assert_eq!(h.backend.fetch_count(), 2);
}

#[tokio::test]
async fn single_page_mode_keeps_one_page_resident() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 100);
    let h = harness(backend, rich_text_session("kitab", 100, 10, 0), ReadingMode::SinglePage, 3);

    assert_eq!(h.controller.set_window(30, 10).await, vec![30]);
    assert_eq!(h.controller.set_window(31, 10).await, vec![31]);
    assert_eq!(h.controller.slot(30), None);
    assert!(matches!(h.controller.slot(31), Some(PageSlot::Ready(_))));
}

#[tokio::test]
async fn back_and_forward_retrace_jumps() {
    let backend = ScriptedBackend::new().with_rich_text("kitab", 100);
    let h = harness(backend, rich_text_session("kitab", 100, 10, 0), ReadingMode::Scroll, 0);

    h.controller.scroll_to(&PageLocator::render(10), Align::Start).await;
    h.controller.scroll_to(&PageLocator::render(20), Align::Start).await;

    assert_eq!(h.controller.go_back().await, Some(ScrollOutcome::Executed(to_index(10))));
    assert_eq!(h.controller.go_back().await, Some(ScrollOutcome::Executed(to_index(0))));
    assert_eq!(h.controller.go_back().await, None);
    assert_eq!(h.controller.position(), 0);

    assert_eq!(h.controller.go_forward().await, Some(ScrollOutcome::Executed(to_index(10))));
    assert_eq!(h.controller.go_forward().await, Some(ScrollOutcome::Executed(to_index(20))));
    assert_eq!(h.controller.go_forward().await, None);
    assert_eq!(h.controller.position(), 20);
}
