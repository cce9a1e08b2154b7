//! `FunnelBuilder`: compiles a `FunnelQuery` into a sequential-CTE SQL
//! program instead of going through the normal planner/`QueryBuilder` path.
//!
//! One CTE per step collapses each actor's earliest qualifying event to a
//! single row (`MIN(occurred_at)` grouped by binding key); `funnel_joined`
//! chains the steps with `LEFT JOIN`s enforcing step order (and, when
//! `time_to_convert` is set, the conversion window); `funnel_metrics`
//! aggregates per-step counts and, when consecutive steps both resolve a
//! time dimension, time-to-convert figures.

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, ValidationError};
use crate::filter::{render_filter, DateTimeBuilder, FilterCacheManager};
use crate::model::query::FunnelQuery;
use crate::model::registry::split_member_ref;
use crate::model::{CubeRegistry, SecurityContext};
use crate::sql::expr::{table_col, Expr, ExprExt};
use crate::sql::params::ParamBinder;
use crate::sql::query::{Cte, JoinType, Query, SelectExpr, TableRef};

pub struct FunnelBuilder<'a> {
    registry: &'a CubeRegistry,
    adapter: &'a dyn DatabaseAdapter,
    security: &'a SecurityContext,
    max_steps: usize,
}

impl<'a> FunnelBuilder<'a> {
    pub fn new(
        registry: &'a CubeRegistry,
        adapter: &'a dyn DatabaseAdapter,
        security: &'a SecurityContext,
        max_steps: usize,
    ) -> Self {
        Self {
            registry,
            adapter,
            security,
            max_steps,
        }
    }

    /// Step count bounds, cube/binding-key existence. Does not validate that
    /// a join path exists between every step cube and the binding key's
    /// owning cube beyond a single hop; see `binding_column`.
    pub fn validate(&self, funnel: &FunnelQuery) -> Result<(), EngineError> {
        if funnel.steps.len() < 2 {
            return Err(ValidationError::FunnelTooFewSteps(funnel.steps.len()).into());
        }
        if funnel.steps.len() > self.max_steps {
            return Err(ValidationError::FunnelTooManySteps {
                requested: funnel.steps.len(),
                max: self.max_steps,
            }
            .into());
        }
        split_member_ref(&funnel.binding_key)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(funnel.binding_key.clone()))?;
        for step in &funnel.steps {
            if !self.registry.contains(&step.cube) {
                return Err(ValidationError::UnknownCube(step.cube.clone()).into());
            }
        }
        Ok(())
    }

    /// Resolve `binding_key` against `step_cube`'s own column space: a
    /// direct dimension lookup when the step cube owns the binding key, or
    /// the single join hop's foreign-key column otherwise. Multi-hop
    /// binding-key resolution (the binding key living two joins away from a
    /// step's cube) is out of scope.
    fn binding_column(&self, step_cube: &str, binding_key: &str) -> Result<Expr, EngineError> {
        let r = split_member_ref(binding_key)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(binding_key.to_string()))?;

        if r.cube == step_cube {
            let dim = self
                .registry
                .dimension(step_cube, r.member)
                .ok_or_else(|| ValidationError::UnknownMember {
                    cube: step_cube.to_string(),
                    member: r.member.to_string(),
                })?;
            return Ok(dim.expr().resolve(step_cube));
        }

        if let Some(cube) = self.registry.cube(step_cube) {
            if let Some(join) = cube.joins.get(r.cube) {
                let pair = join.on.first().expect("join.on must have at least one pair");
                return Ok(pair.left.isolated().resolve(step_cube));
            }
        }
        if let Some(other) = self.registry.cube(r.cube) {
            if let Some(join) = other.joins.get(step_cube) {
                let pair = join.on.first().expect("join.on must have at least one pair");
                return Ok(pair.right.isolated().resolve(step_cube));
            }
        }

        Err(ValidationError::MissingJoinPathForFilter {
            from: step_cube.to_string(),
            to: r.cube.to_string(),
            member: binding_key.to_string(),
        }
        .into())
    }

    /// `step.time_dimension`, or the `<Cube>.createdAt` convention fallback.
    fn time_column(&self, step_cube: &str, time_dimension: &Option<String>) -> Result<Expr, EngineError> {
        let reference = time_dimension
            .clone()
            .unwrap_or_else(|| format!("{step_cube}.createdAt"));
        let r = split_member_ref(&reference)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(reference.clone()))?;
        let dim = self
            .registry
            .dimension(r.cube, r.member)
            .ok_or_else(|| ValidationError::UnknownMember {
                cube: r.cube.to_string(),
                member: r.member.to_string(),
            })?;
        Ok(dim.expr().resolve(r.cube))
    }

    fn step_alias(i: usize) -> String {
        format!("step_{i}")
    }

    fn step_time_column(i: usize) -> String {
        format!("step_{i}_time")
    }

    /// Build the full sequential-CTE program for `funnel`, returning the
    /// query plus the CTE aliases in step order (for `dryRunFunnel`/tests).
    pub fn build(
        &self,
        funnel: &FunnelQuery,
        datetime: &DateTimeBuilder,
        filter_cache: &mut FilterCacheManager,
        binder: &mut ParamBinder,
    ) -> Result<Query, EngineError> {
        self.validate(funnel)?;

        let mut step_ctes = Vec::with_capacity(funnel.steps.len());
        for (i, step) in funnel.steps.iter().enumerate() {
            let binding_expr = self.binding_column(&step.cube, &funnel.binding_key)?;
            let time_expr = self.time_column(&step.cube, &step.time_dimension)?;

            let cube = self
                .registry
                .cube(&step.cube)
                .ok_or_else(|| ValidationError::UnknownCube(step.cube.clone()))?;
            let cube_sql = cube.sql(self.security);
            let table = TableRef::new(cube_sql.from.source_sql()).with_alias(&step.cube);

            let mut where_expr = cube_sql.where_clause.as_ref().map(|w| w.resolve(&step.cube));
            for filter in &step.filters {
                if let Some(cond) = render_filter(
                    self.registry,
                    self.adapter,
                    datetime,
                    filter,
                    filter_cache,
                    binder,
                )? {
                    where_expr = Some(match where_expr {
                        Some(existing) => existing.and(cond),
                        None => cond,
                    });
                }
            }

            let mut q = Query::new()
                .select(vec![
                    SelectExpr::new(binding_expr.clone()).with_alias("binding_key"),
                    SelectExpr::new(self.adapter.build_min(time_expr)).with_alias("occurred_at"),
                ])
                .from(table)
                .group_by(vec![binding_expr]);
            if let Some(w) = where_expr {
                q = q.filter(w);
            }

            step_ctes.push(Cte::new(&Self::step_alias(i), q));
        }

        let mut joined = Query::new().select(
            (0..funnel.steps.len())
                .map(|i| {
                    SelectExpr::new(table_col(&Self::step_alias(i), "occurred_at"))
                        .with_alias(&Self::step_time_column(i))
                })
                .collect(),
        );
        joined = joined.from(TableRef::new("step_0").with_alias("step_0"));

        let step_0_time = table_col("step_0", "occurred_at");
        for i in 1..funnel.steps.len() {
            let this_alias = Self::step_alias(i);
            let prev_time = table_col(&Self::step_alias(i - 1), "occurred_at");
            let this_time = table_col(&this_alias, "occurred_at");
            let mut on = table_col(&this_alias, "binding_key")
                .eq(table_col("step_0", "binding_key"))
                .and(this_time.clone().gte(prev_time.clone()));

            if let Some(duration) = &funnel.time_to_convert {
                let deadline = self.adapter.build_date_add_interval(prev_time, duration)?;
                on = on.and(this_time.clone().lte(deadline));
            }
            if let Some(duration) = &funnel.global_time_window {
                let deadline = self.adapter.build_date_add_interval(step_0_time.clone(), duration)?;
                on = on.and(this_time.lte(deadline));
            }

            joined = joined.join(JoinType::Left, TableRef::new(&this_alias).with_alias(&this_alias), on);
        }

        let joined_cte = Cte::new("funnel_joined", joined);

        let mut metrics_select = Vec::new();
        for i in 0..funnel.steps.len() {
            let col = table_col("funnel_joined", &Self::step_time_column(i));
            metrics_select.push(
                SelectExpr::new(self.adapter.build_count(col)).with_alias(&format!("step_{i}_count")),
            );
        }
        if funnel.include_time_metrics {
            let supports_percentiles = self.adapter.capabilities().supports_percentile_subqueries;
            for i in 1..funnel.steps.len() {
                let a = table_col("funnel_joined", &Self::step_time_column(i - 1));
                let b = table_col("funnel_joined", &Self::step_time_column(i));
                let seconds = self.adapter.build_time_difference_seconds(a, b);

                metrics_select.push(
                    SelectExpr::new(self.adapter.build_avg(seconds.clone()))
                        .with_alias(&format!("step_{i}_avg_time_to_convert_seconds")),
                );
                metrics_select.push(
                    SelectExpr::new(self.adapter.build_min(seconds.clone()))
                        .with_alias(&format!("step_{i}_min_time_to_convert_seconds")),
                );
                metrics_select.push(
                    SelectExpr::new(self.adapter.build_max(seconds.clone()))
                        .with_alias(&format!("step_{i}_max_time_to_convert_seconds")),
                );

                if supports_percentiles {
                    if let Some(median) = self.adapter.build_percentile(seconds.clone(), 0.5) {
                        metrics_select.push(
                            SelectExpr::new(median)
                                .with_alias(&format!("step_{i}_median_time_to_convert_seconds")),
                        );
                    }
                    if let Some(p90) = self.adapter.build_percentile(seconds, 0.9) {
                        metrics_select.push(
                            SelectExpr::new(p90)
                                .with_alias(&format!("step_{i}_p90_time_to_convert_seconds")),
                        );
                    }
                }
            }
        }
        let metrics_query = Query::new()
            .select(metrics_select)
            .from(TableRef::new("funnel_joined").with_alias("funnel_joined"));
        let metrics_cte = Cte::new("funnel_metrics", metrics_query);

        let mut q = Query::new();
        for cte in step_ctes {
            q = q.with_cte(cte);
        }
        q = q.with_cte(joined_cte).with_cte(metrics_cte);
        q = q.select_star().from(TableRef::new("funnel_metrics").with_alias("funnel_metrics"));

        Ok(q)
    }
}
