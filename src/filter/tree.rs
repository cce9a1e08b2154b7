//! Rendering a `Filter` tree (dimension/segment leaves only) into a single
//! `Expr`, shared between `CteBuilder`'s own-cube `WHERE` and
//! `QueryBuilder`'s outer `WHERE`. Measure-targeting filters are rendered
//! separately against an aggregate expression and combined into `HAVING`;
//! they never reach this function.

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, ValidationError};
use crate::model::query::{DateRange, Filter};
use crate::model::registry::{split_member_ref, MemberKind};
use crate::model::CubeRegistry;
use crate::sql::expr::{Expr, ExprExt};
use crate::sql::params::ParamBinder;

use super::builder::FilterBuilder;
use super::cache::FilterCacheManager;
use super::datetime::DateTimeBuilder;

/// A regular `Filter::Simple` carries its date range (if any) as plain
/// string values rather than a `DateRange`; this reconstructs the shape
/// `FilterBuilder`/`FilterCacheManager` expect for the date-range operators.
fn simple_filter_date_range(values: &[String]) -> Option<DateRange> {
    match values {
        [] => None,
        [single] => Some(DateRange::Relative(single.clone())),
        [from, to, ..] => Some(DateRange::Absolute {
            from: from.clone(),
            to: to.clone(),
        }),
    }
}

/// Whether every leaf of `filter` targets a measure (as opposed to a
/// dimension or segment) of its owning cube. Used to route a filter to
/// `WHERE` vs `HAVING`.
pub fn targets_measure(registry: &CubeRegistry, filter: &Filter) -> bool {
    filter.leaves().iter().all(|leaf| {
        let Filter::Simple { member, .. } = leaf else { return false };
        matches!(registry.resolve_member(member), Some(MemberKind::Measure(_)))
    })
}

/// Whether every leaf of `filter` references a member owned by `cube`.
pub fn targets_cube(filter: &Filter, cube: &str) -> bool {
    let refs = filter.member_refs();
    !refs.is_empty()
        && refs
            .iter()
            .all(|m| split_member_ref(m).map(|r| r.cube == cube).unwrap_or(false))
}

/// Render a dimension/segment filter tree into a single `Expr`, ANDing or
/// ORing leaves per the tree shape. Every leaf is resolved against its own
/// cube using the cube's own name as the table alias, per this crate's
/// convention that a cube's SQL alias (main query or inside its own CTE) is
/// always its registered name.
pub fn render_filter(
    registry: &CubeRegistry,
    adapter: &dyn DatabaseAdapter,
    datetime: &DateTimeBuilder,
    filter: &Filter,
    cache: &mut FilterCacheManager,
    binder: &mut ParamBinder,
) -> Result<Option<Expr>, EngineError> {
    match filter {
        Filter::Simple {
            member,
            operator,
            values,
        } => {
            let date_range = if operator.is_date_range_operator() {
                simple_filter_date_range(values)
            } else {
                None
            };

            if let Some(cached) = cache.get(member, *operator, values, date_range.as_ref()) {
                return Ok(Some(cached));
            }

            let r = split_member_ref(member)
                .ok_or_else(|| ValidationError::IllegalFilterTarget(member.clone()))?;
            let kind = registry
                .resolve_member(member)
                .ok_or_else(|| ValidationError::UnknownMember {
                    cube: r.cube.to_string(),
                    member: r.member.to_string(),
                })?;

            let (field_expr, dimension) = match kind {
                MemberKind::Dimension(d) => (d.expr().resolve(r.cube), Some(d)),
                MemberKind::Segment(name) => {
                    let expr = registry
                        .cube(r.cube)
                        .and_then(|c| c.segments.get(name))
                        .ok_or_else(|| ValidationError::IllegalFilterTarget(member.clone()))?
                        .resolve(r.cube);
                    (expr, None)
                }
                MemberKind::Measure(_) => {
                    return Err(ValidationError::IllegalFilterTarget(member.clone()).into());
                }
            };

            let fb = FilterBuilder::new(adapter, datetime);
            let condition = fb.build_filter_condition(
                field_expr,
                *operator,
                values,
                dimension,
                date_range.as_ref(),
                binder,
            )?;

            if let Some(c) = &condition {
                cache.insert(member, *operator, values, date_range.as_ref(), c.clone());
            }
            Ok(condition)
        }
        Filter::And { and } => {
            let mut acc: Option<Expr> = None;
            for f in and {
                if let Some(c) = render_filter(registry, adapter, datetime, f, cache, binder)? {
                    acc = Some(match acc {
                        Some(a) => a.and(c),
                        None => c,
                    });
                }
            }
            Ok(acc)
        }
        Filter::Or { or } => {
            let mut acc: Option<Expr> = None;
            for f in or {
                if let Some(c) = render_filter(registry, adapter, datetime, f, cache, binder)? {
                    acc = Some(match acc {
                        Some(a) => a.or(c),
                        None => c,
                    });
                }
            }
            Ok(acc)
        }
    }
}
