//! Incremental video and website search relay.
//!
//! A query fans out to one adapter per selected source type; results are
//! deduplicated per session and streamed to subscribers as they arrive.

pub mod adapters;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod cursor;
pub mod errors;
pub mod history;
pub mod local;
pub mod logging;
pub mod model;
pub mod server;
pub mod tags;

pub use adapters::{AdapterRegistry, PageItem, PageStream, SourceAdapter};
pub use channel::{ResultChannel, Subscription};
pub use config::AppConfig;
pub use coordinator::{CoordinatorOptions, SearchCoordinator, StartedSearch};
pub use cursor::{CursorPosition, PageEnd, PaginationCursor};
pub use errors::{AdapterFailure, ConfigError, LocalSearchError, SearchError};
pub use local::LocalSearch;
pub use model::{SearchEvent, SearchQuery, SearchResult, SearchSession, SourceType};
pub use tags::TagIndex;
