//! # cubeplan
//!
//! A multi-tenant semantic query engine: compiles abstract analytical
//! queries (`SemanticQuery`) over a registry of cubes into parameterized,
//! multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              CubeRegistry (model::)                      │
//! │   cubes, measures, dimensions, joins, security           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ SemanticQuery
//! ┌─────────────────────────────────────────────────────────┐
//! │                  QueryPlanner (planner::)                │
//! │   primary cube selection, join path resolution,          │
//! │   calculated-measure ordering, pre-aggregation CTEs       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ QueryPlan
//! ┌─────────────────────────────────────────────────────────┐
//! │      QueryBuilder / CTEBuilder / specialized builders     │
//! │         (builder::, specialized::, filter::)              │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ sql::Query (dialect-agnostic AST)
//! ┌─────────────────────────────────────────────────────────┐
//! │              DatabaseAdapter (adapter::)                  │
//! │        dialect-specific rendering + capability flags      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                 QueryExecutor (executor::)                │
//! │     validation, result cache, gap-filling, annotations    │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod builder;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod model;
pub mod planner;
pub mod specialized;
pub mod sql;

// Re-export SQL submodules at crate level for convenient use from builders.
pub use sql::dialect;
pub use sql::expr;
pub use sql::query;
pub use sql::token;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::adapter::{AdapterCapabilities, DatabaseAdapter, SqlDialectAdapter};
    pub use crate::config::EngineConfig;
    pub use crate::dialect::{Dialect, SqlDialect};
    pub use crate::error::{EngineError, ExecutionError, PlanningError, ValidationError};
    pub use crate::executor::QueryExecutor;
    pub use crate::filter::{DateTimeBuilder, FilterBuilder, FilterCacheManager};
    pub use crate::model::{
        Cube, CubeRegistry, Dimension, Filter, Join, Measure, SemanticQuery, SecurityContext,
    };
    pub use crate::planner::{QueryPlan, QueryPlanner};
}

pub use error::EngineError;
pub use model::{Cube, CubeRegistry, SemanticQuery};
pub use planner::{QueryPlan, QueryPlanner};
