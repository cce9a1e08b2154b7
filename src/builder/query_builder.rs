//! `QueryBuilder`: assembles the outer `sql::Query` from a resolved
//! `QueryPlan` — the `WITH` clause (via `CteBuilder`), `FROM`/`JOIN`s,
//! `SELECT`, `WHERE`, `GROUP BY`, `HAVING`, and `ORDER BY`/`LIMIT`/`OFFSET`.

use std::collections::{HashMap, HashSet};

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, PlanningError, ValidationError};
use crate::filter::{render_filter, targets_cube, targets_measure, DateTimeBuilder, FilterBuilder, FilterCacheManager};
use crate::model::measure::{Measure, MeasureType};
use crate::model::query::Filter;
use crate::model::registry::split_member_ref;
use crate::model::{CubeRegistry, SecurityContext, SemanticQuery};
use crate::planner::QueryPlan;
use crate::sql::expr::{table_col, Expr, ExprExt};
use crate::sql::params::ParamBinder;
use crate::sql::query::{OrderByExpr, Query, SelectExpr, TableRef};

use super::cte_builder::CteBuilder;
use super::measure_builder::MeasureBuilder;

pub struct QueryBuilder<'a> {
    registry: &'a CubeRegistry,
    adapter: &'a dyn DatabaseAdapter,
    security: &'a SecurityContext,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(
        registry: &'a CubeRegistry,
        adapter: &'a dyn DatabaseAdapter,
        security: &'a SecurityContext,
    ) -> Self {
        Self {
            registry,
            adapter,
            security,
        }
    }

    /// Build the full outer query for `query`/`plan`.
    pub fn build(
        &self,
        query: &SemanticQuery,
        plan: &QueryPlan,
        datetime: &DateTimeBuilder,
        filter_cache: &mut FilterCacheManager,
        binder: &mut ParamBinder,
    ) -> Result<Query, EngineError> {
        let mut q = Query::new();

        let cte_builder = CteBuilder::new(self.registry, self.adapter, self.security);
        for cte in &plan.pre_aggregation_ctes {
            let built = cte_builder.build(cte, query, datetime, filter_cache, binder)?;
            q = q.with_cte(built);
        }

        let primary = self
            .registry
            .cube(&plan.primary_cube)
            .ok_or_else(|| ValidationError::UnknownCube(plan.primary_cube.clone()))?;
        let primary_sql = primary.sql(self.security);
        q = q.from(TableRef::new(primary_sql.from.source_sql()).with_alias(&plan.primary_cube));

        let mut where_expr = primary_sql.where_clause.as_ref().map(|w| w.resolve(&plan.primary_cube));

        for jc in &plan.join_cubes {
            let cube = self
                .registry
                .cube(&jc.cube)
                .ok_or_else(|| ValidationError::UnknownCube(jc.cube.clone()))?;
            let cube_sql = cube.sql(self.security);
            let table = TableRef::new(cube_sql.from.source_sql()).with_alias(&jc.cube);
            q = q.join(jc.join_type, table, jc.join_condition.clone());

            if let Some(predicate) = cube_sql.where_clause.as_ref().map(|w| w.resolve(&jc.cube)) {
                where_expr = Some(match where_expr {
                    Some(w) => w.and(predicate),
                    None => predicate,
                });
            }
        }

        for cte in &plan.pre_aggregation_ctes {
            let cte_table = TableRef::new(&cte.cte_alias).with_alias(&cte.cte_alias);
            q = q.left_join(cte_table, cte.join_condition.clone());
        }

        let cte_cubes: HashSet<&str> = plan.pre_aggregation_ctes.iter().map(|c| c.cube.as_str()).collect();
        for filter in &query.filters {
            if targets_measure(self.registry, filter) {
                continue;
            }
            if cte_cubes.iter().any(|c| targets_cube(filter, c)) {
                continue;
            }
            if let Some(cond) =
                render_filter(self.registry, self.adapter, datetime, filter, filter_cache, binder)?
            {
                where_expr = Some(match where_expr {
                    Some(w) => w.and(cond),
                    None => cond,
                });
            }
        }

        let mut select: Vec<SelectExpr> = Vec::new();
        let mut group_by: Vec<Expr> = Vec::new();
        let mut select_exprs: HashMap<String, Expr> = HashMap::new();

        for dim in &query.dimensions {
            let expr = self.resolve_dimension_expr(plan, dim)?;
            select.push(SelectExpr::new(expr.clone()).with_alias(dim));
            group_by.push(expr.clone());
            select_exprs.insert(dim.clone(), expr);
        }

        for td in &query.time_dimensions {
            let base = self.resolve_dimension_expr(plan, &td.dimension)?;
            let projected = match td.granularity {
                Some(g) => datetime.truncate(self.adapter, g, base.clone()),
                None => base.clone(),
            };
            select.push(SelectExpr::new(projected.clone()).with_alias(&td.dimension));
            group_by.push(projected.clone());
            select_exprs.insert(td.dimension.clone(), projected);

            if let Some(range) = &td.date_range {
                let (from, to) = datetime
                    .resolve(range)
                    .map_err(EngineError::Validation)?;
                let from_param = binder.bind(from.format("%Y-%m-%d %H:%M:%S").to_string());
                let to_param = binder.bind(to.format("%Y-%m-%d %H:%M:%S").to_string());
                let cond = base.clone().gte(from_param).and(base.lt(to_param));
                where_expr = Some(match where_expr {
                    Some(w) => w.and(cond),
                    None => cond,
                });
            }
        }

        let measure_builder = MeasureBuilder::new(self.adapter);
        let mut rendered: HashMap<String, Expr> = HashMap::new();
        for fqn in &plan.calculated_measure_order {
            let r = split_member_ref(fqn)
                .ok_or_else(|| ValidationError::UnknownMember { cube: fqn.clone(), member: fqn.clone() })?;
            let measure = self.registry.measure(r.cube, r.member).ok_or_else(|| {
                ValidationError::UnknownMember {
                    cube: r.cube.to_string(),
                    member: r.member.to_string(),
                }
            })?;

            let expr = if measure.is_calculated() {
                let template = match &measure.measure_type {
                    MeasureType::Calculated { template } => template.clone(),
                    _ => unreachable!(),
                };
                let rendered_sql: HashMap<String, String> = rendered
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_sql(self.adapter.dialect())))
                    .collect();
                measure_builder.build_calculated_expr(r.member, &template, r.cube, &rendered_sql)?
            } else if measure.is_window() {
                self.resolve_window_measure(plan, &measure_builder, r.cube, measure)?
            } else if let Some(cte) = plan.cte_for_cube(r.cube) {
                measure_builder.build_cte_reaggregation(measure, &cte.cte_alias)
            } else {
                measure_builder.build_measure_expr(measure, r.cube)
            };
            rendered.insert(fqn.clone(), expr);
        }

        for m in &query.measures {
            let expr = rendered.get(m).cloned().ok_or_else(|| {
                let r = split_member_ref(m);
                ValidationError::UnknownMember {
                    cube: r.map(|r| r.cube.to_string()).unwrap_or_default(),
                    member: r.map(|r| r.member.to_string()).unwrap_or_else(|| m.clone()),
                }
            })?;
            select.push(SelectExpr::new(expr.clone()).with_alias(m));
            select_exprs.insert(m.clone(), expr);
        }

        if select.is_empty() {
            select.push(SelectExpr::new(crate::sql::expr::star()));
        }
        q = q.select(select);

        if let Some(w) = where_expr {
            q = q.filter(w);
        }
        if !group_by.is_empty() && !query.measures.is_empty() {
            q = q.group_by(group_by);
        }

        let mut having: Option<Expr> = None;
        for filter in &query.filters {
            if !targets_measure(self.registry, filter) {
                continue;
            }
            if let Some(cond) =
                self.render_having(filter, &rendered, datetime, binder)?
            {
                having = Some(match having {
                    Some(h) => h.and(cond),
                    None => cond,
                });
            }
        }
        if let Some(h) = having {
            q = q.having(h);
        }

        let mut order_by = Vec::new();
        for entry in &query.order {
            let expr = select_exprs.get(&entry.member).cloned().ok_or_else(|| {
                ValidationError::UnknownMember {
                    cube: entry.member.clone(),
                    member: entry.member.clone(),
                }
            })?;
            let dir: crate::sql::query::SortDir = entry.direction.into();
            order_by.push(match dir {
                crate::sql::query::SortDir::Asc => OrderByExpr::asc(expr),
                crate::sql::query::SortDir::Desc => OrderByExpr::desc(expr),
            });
        }
        if !order_by.is_empty() {
            q = q.order_by(order_by);
        }

        if let Some(limit) = query.limit {
            q = q.limit(limit);
        }
        if let Some(offset) = query.offset {
            q = q.offset(offset);
        }

        Ok(q)
    }

    /// Resolve `Cube.member` to the column a dimension read should project:
    /// the cube's own column when queried directly, or the matching
    /// pre-aggregation CTE column when the cube is only reachable through
    /// one. Errors if the CTE never projected the column at all.
    fn resolve_dimension_expr(&self, plan: &QueryPlan, member: &str) -> Result<Expr, EngineError> {
        let r = split_member_ref(member)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(member.to_string()))?;
        let dim = self.registry.dimension(r.cube, r.member).ok_or_else(|| {
            ValidationError::UnknownMember {
                cube: r.cube.to_string(),
                member: r.member.to_string(),
            }
        })?;

        if let Some(cte) = plan.cte_for_cube(r.cube) {
            let col_name = dim.expr().source_sql();
            let projected = cte
                .join_keys
                .iter()
                .chain(cte.downstream_join_keys.iter())
                .any(|k| k == r.member || k == col_name);
            if !projected {
                return Err(PlanningError::UnprojectedCteDimension {
                    cube: r.cube.to_string(),
                    dimension: r.member.to_string(),
                }
                .into());
            }
            let key = if cte.join_keys.iter().chain(cte.downstream_join_keys.iter()).any(|k| k == r.member) {
                r.member
            } else {
                col_name
            };
            return Ok(table_col(&cte.cte_alias, key));
        }

        Ok(dim.expr().resolve(r.cube))
    }

    /// Render a window measure: resolve its base measure (if any) and its
    /// `partitionBy`/`orderBy` dimensions against `owner_cube`'s column
    /// space, then hand off to [`MeasureBuilder::build_window_measure`].
    /// Bare (unqualified) `partitionBy`/`orderBy`/`measure` entries are
    /// scoped to `owner_cube`, the same convention calculated-measure
    /// templates use for bare `{member}` refs.
    fn resolve_window_measure(
        &self,
        plan: &QueryPlan,
        measure_builder: &MeasureBuilder<'_>,
        owner_cube: &str,
        measure: &Measure,
    ) -> Result<Expr, EngineError> {
        let (kind, config) = match &measure.measure_type {
            MeasureType::Window { kind, config } => (*kind, config),
            _ => unreachable!("resolve_window_measure called on a non-window measure"),
        };

        let base = config
            .measure
            .as_ref()
            .map(|name| self.resolve_base_measure_expr(measure_builder, owner_cube, name))
            .transpose()?;

        let partition_by = config
            .partition_by
            .iter()
            .map(|d| self.resolve_dimension_expr(plan, &qualify(owner_cube, d)))
            .collect::<Result<Vec<_>, _>>()?;
        let order_by = config
            .order_by
            .iter()
            .map(|d| self.resolve_dimension_expr(plan, &qualify(owner_cube, d)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(measure_builder.build_window_measure(kind, config, base, partition_by, order_by))
    }

    fn resolve_base_measure_expr(
        &self,
        measure_builder: &MeasureBuilder<'_>,
        owner_cube: &str,
        name: &str,
    ) -> Result<Expr, EngineError> {
        let qualified = qualify(owner_cube, name);
        let r = split_member_ref(&qualified).ok_or_else(|| ValidationError::UnknownMember {
            cube: owner_cube.to_string(),
            member: name.to_string(),
        })?;
        let base_measure = self.registry.measure(r.cube, r.member).ok_or_else(|| {
            ValidationError::UnknownMember {
                cube: r.cube.to_string(),
                member: r.member.to_string(),
            }
        })?;
        Ok(measure_builder.build_measure_expr(base_measure, r.cube))
    }

    /// Render a measure-targeting filter tree against the already-built
    /// aggregate expressions, for `HAVING`.
    fn render_having(
        &self,
        filter: &Filter,
        rendered: &HashMap<String, Expr>,
        datetime: &DateTimeBuilder,
        binder: &mut ParamBinder,
    ) -> Result<Option<Expr>, EngineError> {
        match filter {
            Filter::Simple { member, operator, values } => {
                let expr = rendered.get(member).cloned().ok_or_else(|| {
                    let r = split_member_ref(member);
                    ValidationError::UnknownMember {
                        cube: r.map(|r| r.cube.to_string()).unwrap_or_default(),
                        member: r.map(|r| r.member.to_string()).unwrap_or_else(|| member.clone()),
                    }
                })?;
                let date_range = if operator.is_date_range_operator() {
                    match values {
                        [single] => Some(crate::model::query::DateRange::Relative(single.clone())),
                        [from, to, ..] => Some(crate::model::query::DateRange::Absolute {
                            from: from.clone(),
                            to: to.clone(),
                        }),
                        [] => None,
                    }
                } else {
                    None
                };
                let fb = FilterBuilder::new(self.adapter, datetime);
                fb.build_filter_condition(expr, *operator, values, None, date_range.as_ref(), binder)
                    .map_err(EngineError::from)
            }
            Filter::And { and } => {
                let mut acc: Option<Expr> = None;
                for f in and {
                    if let Some(c) = self.render_having(f, rendered, datetime, binder)? {
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
                    if let Some(c) = self.render_having(f, rendered, datetime, binder)? {
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
}

/// Normalize a bare (unqualified) member reference to `owner_cube.member`,
/// leaving an already-qualified `Cube.member` reference untouched.
fn qualify(owner_cube: &str, member: &str) -> String {
    if member.contains('.') {
        member.to_string()
    } else {
        format!("{owner_cube}.{member}")
    }
}
