//! Dimension definitions: string, number, boolean, and time dimensions.

use super::cube_expr::CubeExpr;

/// A dimension defined on a cube.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub dimension_type: DimensionType,
}

impl Dimension {
    pub fn string(name: impl Into<String>, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            dimension_type: DimensionType::String(expr),
        }
    }

    pub fn number(name: impl Into<String>, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            dimension_type: DimensionType::Number(expr),
        }
    }

    pub fn boolean(name: impl Into<String>, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            dimension_type: DimensionType::Boolean(expr),
        }
    }

    pub fn time(name: impl Into<String>, expr: CubeExpr) -> Self {
        Self {
            name: name.into(),
            dimension_type: DimensionType::Time(expr),
        }
    }

    /// The underlying SQL fragment, independent of the dimension's declared type.
    pub fn expr(&self) -> &CubeExpr {
        match &self.dimension_type {
            DimensionType::String(e)
            | DimensionType::Number(e)
            | DimensionType::Boolean(e)
            | DimensionType::Time(e) => e,
        }
    }

    pub fn is_time(&self) -> bool {
        matches!(self.dimension_type, DimensionType::Time(_))
    }
}

/// The kind of a dimension, per the specification's `type` enumeration.
#[derive(Debug, Clone)]
pub enum DimensionType {
    String(CubeExpr),
    Number(CubeExpr),
    Boolean(CubeExpr),
    Time(CubeExpr),
}
