//! Specialized query builders: funnel, retention, and flow analyses compile
//! their own sequential-CTE SQL programs directly from a `SemanticQuery`'s
//! `specialized` field, bypassing `QueryPlanner`/`QueryBuilder`'s
//! cube-join-measure pipeline entirely.

pub mod comparison;
pub mod flow;
pub mod funnel;
pub mod retention;

pub use comparison::{expand_period_comparisons, PeriodExpansion};
pub use flow::FlowBuilder;
pub use funnel::FunnelBuilder;
pub use retention::RetentionBuilder;
