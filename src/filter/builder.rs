//! `FilterBuilder`: turns a single filter leaf into a SQL condition.
//!
//! Values are always bound through the `ParamBinder` rather than embedded
//! as literals, matching `Expr::Raw`'s own guidance to never splice
//! user-controlled input into a SQL string directly.

use crate::adapter::DatabaseAdapter;
use crate::error::ValidationError;
use crate::model::dimension::Dimension;
use crate::model::query::{DateRange, FilterOperator};
use crate::sql::expr::{raw_sql, Expr, ExprExt};
use crate::sql::params::ParamBinder;

use super::datetime::DateTimeBuilder;

/// Builds the SQL condition for one `Filter::Simple` leaf against a
/// resolved field expression.
pub struct FilterBuilder<'a> {
    adapter: &'a dyn DatabaseAdapter,
    datetime: &'a DateTimeBuilder,
}

impl<'a> FilterBuilder<'a> {
    pub fn new(adapter: &'a dyn DatabaseAdapter, datetime: &'a DateTimeBuilder) -> Self {
        Self { adapter, datetime }
    }

    /// Build the condition for `field_expr operator values`, given the
    /// resolved dimension (used only to recognize time dimensions for the
    /// date-range operators) and, for date-range operators, the requested
    /// range. Returns `Ok(None)` when the filter is a no-op (e.g. a
    /// comparative operator with no values supplied).
    pub fn build_filter_condition(
        &self,
        field_expr: Expr,
        operator: FilterOperator,
        values: &[String],
        _dimension: Option<&Dimension>,
        date_range: Option<&DateRange>,
        binder: &mut ParamBinder,
    ) -> Result<Option<Expr>, ValidationError> {
        use FilterOperator::*;

        let dialect = self.adapter.dialect();

        let condition = match operator {
            Equals | NotEquals => {
                if values.is_empty() {
                    return Ok(None);
                }
                let bound = binder.bind_all(values.to_vec());
                let positive = if bound.len() == 1 {
                    field_expr.clone().eq(bound.into_iter().next().unwrap())
                } else {
                    field_expr.clone().in_list(bound)
                };
                if matches!(operator, NotEquals) {
                    positive.not()
                } else {
                    positive
                }
            }
            Contains | NotContains | StartsWith | EndsWith => {
                if values.is_empty() {
                    return Ok(None);
                }
                let mut disjuncts = values.iter().map(|v| {
                    let pattern = match operator {
                        Contains | NotContains => format!("%{v}%"),
                        StartsWith => format!("{v}%"),
                        _ => format!("%{v}"),
                    };
                    let bound = binder.bind(pattern);
                    field_expr.clone().like(bound)
                });
                let first = disjuncts.next().expect("values non-empty");
                let combined = disjuncts.fold(first, |acc, next| acc.or(next));
                if matches!(operator, NotContains) {
                    combined.not()
                } else {
                    combined
                }
            }
            Gt | Gte | Lt | Lte => {
                let Some(value) = values.first() else {
                    return Ok(None);
                };
                let bound = binder.bind(value.clone());
                match operator {
                    Gt => field_expr.gt(bound),
                    Gte => field_expr.gte(bound),
                    Lt => field_expr.lt(bound),
                    _ => field_expr.lte(bound),
                }
            }
            Set => field_expr.is_not_null(),
            NotSet => field_expr.is_null(),
            BeforeDate | AfterDate => {
                let Some(value) = values.first() else {
                    return Ok(None);
                };
                let bound = binder.bind(value.clone());
                if matches!(operator, BeforeDate) {
                    field_expr.lt(bound)
                } else {
                    field_expr.gt(bound)
                }
            }
            InDateRange | NotInDateRange => {
                let Some(range) = date_range else {
                    return Ok(None);
                };
                let (from, to) = self.datetime.resolve(range)?;
                let from = binder.bind(from.format("%Y-%m-%d %H:%M:%S").to_string());
                let to = binder.bind(to.format("%Y-%m-%d %H:%M:%S").to_string());
                let in_range = field_expr.clone().gte(from).and(field_expr.lt(to));
                if matches!(operator, NotInDateRange) {
                    in_range.not()
                } else {
                    in_range
                }
            }
            ArrayContains => {
                if values.is_empty() {
                    return Ok(None);
                }
                let field_sql = field_expr.to_sql(dialect);
                let conjuncts: Vec<String> = values
                    .iter()
                    .map(|v| {
                        let bound = binder.bind(v.clone());
                        format!("{} = ANY({field_sql})", bound.to_sql(dialect))
                    })
                    .collect();
                raw_sql(format!("({})", conjuncts.join(" AND ")))
            }
            ArrayOverlaps | ArrayContained => {
                if values.is_empty() {
                    return Ok(None);
                }
                let field_sql = field_expr.to_sql(dialect);
                let literal = array_literal(values, binder, dialect);
                let op = if matches!(operator, ArrayOverlaps) { "&&" } else { "<@" };
                raw_sql(format!("{field_sql} {op} {literal}"))
            }
        };

        Ok(Some(condition))
    }
}

fn array_literal(
    values: &[String],
    binder: &mut ParamBinder,
    dialect: crate::sql::dialect::Dialect,
) -> String {
    let bound = binder.bind_all(values.to_vec());
    let rendered: Vec<String> = bound.iter().map(|e| e.to_sql(dialect)).collect();
    format!("ARRAY[{}]", rendered.join(", "))
}
