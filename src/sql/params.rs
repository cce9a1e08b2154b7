//! `ParamBinder`: collects bind-parameter values in emission order and hands
//! back the `Expr::Param` placeholder each value was assigned.
//!
//! Threaded through `FilterBuilder`, `MeasureBuilder`, and the CTE/funnel/
//! retention builders so that a value the filter cache reuses across the
//! main query and several CTEs still contributes exactly one bound
//! parameter, however many times its placeholder token is emitted.

use super::expr::Expr;

/// An ordered collection of bind-parameter values, indexed the way each
/// dialect expects (`$1`, `?`, `@p1`, ...) via `Expr::Param`'s 1-based index.
#[derive(Debug, Clone, Default)]
pub struct ParamBinder {
    values: Vec<String>,
}

impl ParamBinder {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Bind a new value, returning the placeholder expression for it.
    pub fn bind(&mut self, value: impl Into<String>) -> Expr {
        self.values.push(value.into());
        Expr::Param(self.values.len())
    }

    /// Bind every value in `values`, returning their placeholder expressions
    /// in the same order.
    pub fn bind_all(&mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Vec<Expr> {
        values.into_iter().map(|v| self.bind(v)).collect()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn into_values(self) -> Vec<String> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
