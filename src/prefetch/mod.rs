//! Area prefetching for offline use.
//!
//! - [`AreaPrefetchJob`]: descriptor resolution, tile enumeration and the
//!   bounded download pool
//! - [`PrefetchManager`]: one running job per area name, cancellation
//! - [`EventBus`]: progress, completion and error events for observers

mod events;
mod job;
mod manager;

pub use events::{percent, EventBus, PrefetchEvent, DEFAULT_EVENT_CAPACITY};
pub use job::{
    AreaPrefetchJob, PrefetchCommand, PrefetchSummary, DEFAULT_PREFETCH_CONCURRENCY,
    PROGRESS_INTERVAL,
};
pub use manager::{PrefetchHandle, PrefetchManager};
