//! Knowledge retrieval: planning, count-first fetching, map-reduce
//! summarization, rendering, and the per-turn result cache.
//!
//! ```text
//! tool call → RetrievalCoordinator (turn cache, fingerprint)
//!   └── miss → QueryPlanner → BatchedSummarizer
//!         ├── SearchBackend::count per scope
//!         ├── ranked fetch | recency batches → Summarize
//!         └── render_results → cards
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod memory;
pub mod planner;
pub mod render;
pub mod scope;
pub mod summarizer;

pub use backend::{
    BatchCursor, DateRange, FilterExpr, QueryText, RetrievalResult, SearchBackend, SearchRequest,
    SortOrder,
};
pub use cache::{Fingerprint, RetrievalCoordinator, TurnGuard};
pub use config::RetrievalConfig;
pub use memory::MemoryIndex;
pub use planner::{QueryPlanner, RetrievalQuery, SearchParams};
pub use render::{NO_RESULTS, SummaryBlock};
pub use scope::{ResolvedScopes, ScopeSource, resolve_scopes};
pub use summarizer::{BatchedSummarizer, ExtractiveSummarizer, RenderedResult, Summarize};
