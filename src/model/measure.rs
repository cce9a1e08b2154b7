//! Measure definitions: simple aggregates, calculated measures, and window measures.

use super::cube_expr::CubeExpr;
use super::types::AggregationType;

/// A measure defined on a cube.
#[derive(Debug, Clone)]
pub struct Measure {
    pub name: String,
    pub measure_type: MeasureType,
    /// Optional query-time or definition-time filter producing a conditional
    /// aggregate (`SUM(CASE WHEN ... THEN expr END)`), independent of any
    /// filter the caller supplies in the `SemanticQuery`.
    pub filter: Option<CubeExpr>,
    /// Explicit dependencies for a `calculated` measure, as `member` or
    /// `Cube.member` strings. When absent, `CalculatedMeasureResolver`
    /// auto-populates this from the template during resolution.
    pub dependencies: Option<Vec<String>>,
}

impl Measure {
    pub fn simple(name: impl Into<String>, agg: AggregationType, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            measure_type: MeasureType::Aggregate { agg, expr },
            filter: None,
            dependencies: None,
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measure_type: MeasureType::Count,
            filter: None,
            dependencies: None,
        }
    }

    pub fn count_distinct(name: impl Into<String>, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            measure_type: MeasureType::CountDistinct { expr },
            filter: None,
            dependencies: None,
        }
    }

    pub fn number(name: impl Into<String>, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            measure_type: MeasureType::Number { expr },
            filter: None,
            dependencies: None,
        }
    }

    pub fn calculated(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            measure_type: MeasureType::Calculated {
                template: template.into(),
            },
            filter: None,
            dependencies: None,
        }
    }

    pub fn window(name: impl Into<String>, kind: WindowMeasureKind, config: WindowConfig) -> Self {
        Self {
            name: name.into(),
            measure_type: MeasureType::Window { kind, config },
            filter: None,
            dependencies: None,
        }
    }

    pub fn with_filter(mut self, filter: CubeExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn is_calculated(&self) -> bool {
        matches!(self.measure_type, MeasureType::Calculated { .. })
    }

    pub fn is_window(&self) -> bool {
        matches!(self.measure_type, MeasureType::Window { .. })
    }

    /// Whether this measure is additive (safe to re-aggregate with `SUM` when
    /// read back out of a pre-aggregation CTE): count-likes and `sum`/`number`.
    pub fn is_additive(&self) -> bool {
        matches!(
            self.measure_type,
            MeasureType::Count
                | MeasureType::CountDistinct { .. }
                | MeasureType::Aggregate {
                    agg: AggregationType::Sum | AggregationType::Count,
                    ..
                }
                | MeasureType::Number { .. }
        )
    }
}

/// The kind of a measure, per the specification's `type` enumeration.
#[derive(Debug, Clone)]
pub enum MeasureType {
    /// `count`: `COUNT(*)`.
    Count,
    /// `countDistinct`: `COUNT(DISTINCT expr)`.
    CountDistinct { expr: CubeExpr },
    /// `sum` / `avg` / `min` / `max`: a plain aggregate over `expr`.
    Aggregate { agg: AggregationType, expr: CubeExpr },
    /// `number`: a non-aggregated scalar expression (e.g. a precomputed column).
    Number { expr: CubeExpr },
    /// `calculated`: a `calculatedSql` template referencing other measures as
    /// `{name}` or `{Cube.name}`.
    Calculated { template: String },
    /// One of the window-measure variants (`runningTotal`, `lag`, `lead`,
    /// `rank`, `denseRank`, `percentRank`, `nTile`, `firstValue`, `lastValue`,
    /// `movingAverage`, `percentOfTotal`).
    Window {
        kind: WindowMeasureKind,
        config: WindowConfig,
    },
}

/// Window-measure variants from the specification's `type` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMeasureKind {
    RunningTotal,
    Lag,
    Lead,
    Rank,
    DenseRank,
    PercentRank,
    NTile,
    FirstValue,
    LastValue,
    MovingAverage,
    PercentOfTotal,
}

/// Configuration carried by a window measure.
#[derive(Debug, Clone, Default)]
pub struct WindowConfig {
    /// The base measure this window is computed over. Required for every
    /// kind except ones that are purely positional (`rank`/`denseRank`
    /// still partition/order without needing a base measure).
    pub measure: Option<String>,
    pub partition_by: Vec<String>,
    pub order_by: Vec<String>,
    pub frame: Option<WindowFrameSpec>,
    /// `lag`/`lead` offset, default 1.
    pub offset: Option<i64>,
    /// `lag`/`lead` default value when the offset row doesn't exist.
    pub default_value: Option<f64>,
    /// How the post-aggregation window result combines with the base value.
    pub operation: WindowOperation,
    /// Bucket count for `nTile`.
    pub n_tile_buckets: Option<u32>,
}

/// A frame specification for moving-average-style window measures.
#[derive(Debug, Clone, Copy)]
pub struct WindowFrameSpec {
    pub preceding: u32,
    pub following: u32,
}

/// How a window measure's raw window value combines with its base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowOperation {
    /// The window expression is returned as-is.
    #[default]
    Raw,
    /// `base - win`.
    Difference,
    /// `base / NULLIF(win, 0)`.
    Ratio,
    /// `((base - win) / NULLIF(win, 0)) * 100`.
    PercentChange,
}
