//! Filter rendering: turns `SemanticQuery` filters (and time-dimension date
//! ranges) into bound SQL conditions, with a per-request cache so a filter
//! leaf referenced by both the main query and a propagating CTE predicate
//! renders — and binds its parameter — exactly once.

pub mod builder;
pub mod cache;
pub mod datetime;
pub mod tree;

pub use builder::FilterBuilder;
pub use cache::FilterCacheManager;
pub use datetime::DateTimeBuilder;
pub use tree::{render_filter, targets_cube, targets_measure};
