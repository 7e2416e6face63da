// Export modules for use in tests
pub mod backend;
pub mod cache;
pub mod chapters;
pub mod controller;
pub mod history;
pub mod inflight;
pub mod model;
pub mod normalizer;
pub mod reader;
pub mod resolver;
pub mod session;
pub mod settings;
pub mod share;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the reading components
pub use backend::{DocumentBackend, FetchError, JsonCorpusBackend};
pub use cache::PaginatedContentCache;
pub use controller::{Align, ScrollCommand, ScrollOutcome, ScrollSurface, VirtualizedScrollController};
pub use model::{Heading, Page, PageLocator};
pub use normalizer::DocumentKind;
pub use reader::{OpenDocument, Reader};
pub use resolver::LocatorIndexResolver;
pub use session::{DocumentSession, SlugRegistry};
pub use share::{ShareAnchor, ShareAnchorCodec, ShareBaseError};
