//! Error taxonomy for the query engine.
//!
//! Every fallible operation returns `Result<T, EngineError>`. The three
//! variants correspond to the three phases a query passes through:
//! validating the request against the registry, planning it into a
//! `QueryPlan`, and executing the generated SQL. Cache lookups and writes
//! are deliberately excluded from this taxonomy: a cache failure never
//! fails a request, it is only logged (see [`crate::executor`]).

use thiserror::Error;

/// Top-level error returned by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Errors raised while checking a `SemanticQuery` against the cube registry,
/// before any planning is attempted.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown cube: {0}")]
    UnknownCube(String),

    #[error("unknown member {member} on cube {cube}")]
    UnknownMember { cube: String, member: String },

    #[error("filter targets {0}, which is not a measure or dimension reachable from the query")]
    IllegalFilterTarget(String),

    #[error("no join path exists from {from} to {to} for cross-cube filter on {member}")]
    MissingJoinPathForFilter {
        from: String,
        to: String,
        member: String,
    },

    #[error("malformed ISO-8601 duration: {0}")]
    MalformedDuration(String),

    #[error("retention periods must be between 1 and {max}, got {requested}")]
    RetentionPeriodsOutOfRange { requested: u32, max: u32 },

    #[error("funnel requires at least 2 steps, got {0}")]
    FunnelTooFewSteps(usize),

    #[error("funnel steps must not exceed {max}, got {requested}")]
    FunnelTooManySteps { requested: usize, max: usize },

    #[error("invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("query may declare at most one of funnel, flow, or retention")]
    MultipleSpecializedShapes,
}

/// Errors raised while compiling a validated query into a `QueryPlan`.
#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("no join path reaches cube {0} from the primary cube")]
    UnreachableJoin(String),

    #[error("circular dependency among calculated measures: {0}")]
    CircularCalculatedMeasure(String),

    #[error("ambiguous primary cube among candidates: {0:?}")]
    AmbiguousPrimaryCube(Vec<String>),

    #[error("dimension {dimension} on cube {cube} is consumed from a pre-aggregation CTE but was never projected into it")]
    UnprojectedCteDimension { cube: String, dimension: String },

    #[error("calculated measure {0} references unknown member {1}")]
    UnknownCalculatedMeasureRef(String, String),
}

/// Errors surfaced while executing generated SQL against a database adapter.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("query execution failed: {message}")]
    DatabaseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("result conversion failed: {0}")]
    ResultConversion(String),
}

impl ExecutionError {
    pub fn from_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ExecutionError::DatabaseError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_wraps_validation() {
        let err: EngineError = ValidationError::UnknownCube("orders".to_string()).into();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(err.to_string(), "unknown cube: orders");
    }

    #[test]
    fn funnel_too_many_steps_reports_both_counts() {
        let err = ValidationError::FunnelTooManySteps {
            requested: 12,
            max: 10,
        };
        assert_eq!(err.to_string(), "funnel steps must not exceed 10, got 12");
    }

    #[test]
    fn engine_error_wraps_planning() {
        let err: EngineError = PlanningError::UnreachableJoin("events".to_string()).into();
        assert!(matches!(err, EngineError::Planning(_)));
    }

    #[test]
    fn execution_error_prefixes_message() {
        let err = ExecutionError::DatabaseError {
            message: "syntax error near SELECT".to_string(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            "query execution failed: syntax error near SELECT"
        );
    }
}
