//! `CteBuilder`: assembles one `PreAggregationCte` into a `sql::Cte`.
//!
//! Per the fan-out pre-aggregation strategy (`CteType::FanOutAggregate`),
//! each CTE groups its cube's own rows by the join key(s) (and any
//! downstream join keys a further cube needs) before the outer query joins
//! back in, so a `hasMany`/`belongsToMany` edge cannot double-count a
//! sibling aggregate.

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, ValidationError};
use crate::filter::{render_filter, targets_cube, targets_measure, DateTimeBuilder, FilterCacheManager};
use crate::model::query::Filter;
use crate::model::{CubeRegistry, SecurityContext, SemanticQuery};
use crate::planner::PreAggregationCte;
use crate::sql::expr::{table_col, Expr, ExprExt};
use crate::sql::params::ParamBinder;
use crate::sql::query::{Cte, Query, SelectExpr, TableRef};

use super::measure_builder::MeasureBuilder;

pub struct CteBuilder<'a> {
    registry: &'a CubeRegistry,
    adapter: &'a dyn DatabaseAdapter,
    security: &'a SecurityContext,
}

impl<'a> CteBuilder<'a> {
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

    /// Build the `WITH <cte_alias> AS (...)` entry for `cte`.
    pub fn build(
        &self,
        cte: &PreAggregationCte,
        query: &SemanticQuery,
        datetime: &DateTimeBuilder,
        filter_cache: &mut FilterCacheManager,
        binder: &mut ParamBinder,
    ) -> Result<Cte, EngineError> {
        let cube = self
            .registry
            .cube(&cte.cube)
            .ok_or_else(|| ValidationError::UnknownCube(cte.cube.clone()))?;
        let cube_sql = cube.sql(self.security);
        let table = TableRef::new(cube_sql.from.source_sql()).with_alias(&cte.cube);

        let measure_builder = MeasureBuilder::new(self.adapter);

        let mut select: Vec<SelectExpr> = Vec::new();
        let mut projected: Vec<&str> = Vec::new();
        for key in &cte.join_keys {
            select.push(SelectExpr::new(table_col(&cte.cube, key)).with_alias(key));
            projected.push(key.as_str());
        }
        for key in &cte.downstream_join_keys {
            if projected.contains(&key.as_str()) {
                continue;
            }
            select.push(SelectExpr::new(table_col(&cte.cube, key)).with_alias(key));
            projected.push(key.as_str());
        }
        for measure_name in &cte.measures {
            let measure = cube.measures.get(measure_name).ok_or_else(|| {
                ValidationError::UnknownMember {
                    cube: cte.cube.clone(),
                    member: measure_name.clone(),
                }
            })?;
            let expr = measure_builder.build_measure_expr(measure, &cte.cube);
            select.push(SelectExpr::new(expr).with_alias(measure_name));
        }

        let mut q = Query::new().select(select).from(table);

        let mut where_expr = cube_sql
            .where_clause
            .as_ref()
            .map(|w| w.resolve(&cte.cube));

        for filter in &query.filters {
            if !targets_cube(filter, &cte.cube) || targets_measure(self.registry, filter) {
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

        for filter in &cte.propagating_filters {
            let cond = self.propagating_condition(cte, filter, datetime, filter_cache, binder)?;
            where_expr = Some(match where_expr {
                Some(w) => w.and(cond),
                None => cond,
            });
        }

        if let Some(w) = where_expr {
            q = q.filter(w);
        }

        let group_by: Vec<Expr> = cte
            .join_keys
            .iter()
            .chain(cte.downstream_join_keys.iter().filter(|k| !cte.join_keys.contains(k)))
            .map(|key| table_col(&cte.cube, key))
            .collect();
        q = q.group_by(group_by);

        Ok(Cte::new(&cte.cte_alias, q))
    }

    /// Build `<cte join key> IN (SELECT <owner's matching column> FROM
    /// <owner> WHERE <owner's own filter>)` for a filter on a sibling cube
    /// whose `hasMany`/`belongsToMany` edge lands directly on `cte.cube`.
    fn propagating_condition(
        &self,
        cte: &PreAggregationCte,
        filter: &Filter,
        datetime: &DateTimeBuilder,
        filter_cache: &mut FilterCacheManager,
        binder: &mut ParamBinder,
    ) -> Result<Expr, EngineError> {
        let owner = filter
            .member_refs()
            .first()
            .and_then(|m| crate::model::split_member_ref(m))
            .map(|r| r.cube.to_string())
            .ok_or_else(|| ValidationError::IllegalFilterTarget(format!("{filter:?}")))?;

        let join = self
            .registry
            .cube(&owner)
            .and_then(|c| c.joins.get(&cte.cube))
            .ok_or_else(|| ValidationError::MissingJoinPathForFilter {
                from: owner.clone(),
                to: cte.cube.clone(),
                member: filter.member_refs().first().map(|s| s.to_string()).unwrap_or_default(),
            })?;

        let owner_cube = self
            .registry
            .cube(&owner)
            .ok_or_else(|| ValidationError::UnknownCube(owner.clone()))?;
        let owner_sql = owner_cube.sql(self.security);
        let owner_table = TableRef::new(owner_sql.from.source_sql()).with_alias(&owner);

        let owner_condition =
            render_filter(self.registry, self.adapter, datetime, filter, filter_cache, binder)?;

        let mut conjuncts: Vec<Expr> = Vec::new();
        for on in &join.on {
            let cte_col = on.right.source_sql().to_string();
            if !cte.join_keys.contains(&cte_col) {
                continue;
            }
            let owner_col_name = on.left.source_sql().to_string();

            let mut sub = Query::new()
                .select(vec![SelectExpr::new(table_col(&owner, &owner_col_name))])
                .from(owner_table.clone());
            let mut sub_where = owner_sql.where_clause.as_ref().map(|w| w.resolve(&owner));
            if let Some(cond) = owner_condition.clone() {
                sub_where = Some(match sub_where {
                    Some(w) => w.and(cond),
                    None => cond,
                });
            }
            if let Some(w) = sub_where {
                sub = sub.filter(w);
            }

            conjuncts.push(Expr::InSubquery {
                expr: Box::new(table_col(&cte.cube, &cte_col)),
                subquery: Box::new(sub),
                negated: false,
            });
        }

        conjuncts
            .into_iter()
            .reduce(|a, b| a.and(b))
            .ok_or_else(|| {
                ValidationError::MissingJoinPathForFilter {
                    from: owner,
                    to: cte.cube.clone(),
                    member: filter.member_refs().first().map(|s| s.to_string()).unwrap_or_default(),
                }
                .into()
            })
    }
}
