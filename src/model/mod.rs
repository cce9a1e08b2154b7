//! The semantic model: cubes, their measures/dimensions/joins, and the
//! abstract query shape planned against them.

pub mod cube;
pub mod cube_expr;
pub mod dimension;
pub mod join;
pub mod measure;
pub mod query;
pub mod registry;
pub mod types;

pub use cube::{Cube, CubeSql, SecurityContext};
pub use cube_expr::CubeExpr;
pub use dimension::{Dimension, DimensionType};
pub use join::{Join, JoinOn, JoinRelationship, Through};
pub use measure::{
    Measure, MeasureType, WindowConfig, WindowFrameSpec, WindowMeasureKind, WindowOperation,
};
pub use query::{
    DateRange, Filter, FilterOperator, FlowQuery, FunnelQuery, FunnelStep, OrderEntry,
    RetentionMode, RetentionQuery, SemanticQuery, SortDirSerde, SpecializedQuery,
    TimeDimensionRequest,
};
pub use registry::{split_member_ref, CubeRegistry, MemberKind, MemberRef};
pub use types::{AggregationType, DataType, Granularity};
