//! `RetentionBuilder`: compiles a `RetentionQuery` into a sequential-CTE SQL
//! program cohorting actors by their first-activity period and measuring
//! return activity over subsequent periods.
//!
//! `cohort_base` pins each actor to the truncated period of their earliest
//! qualifying event; `actor_activity` re-derives, for every later event, how
//! many periods past the cohort period it falls; `cohort_sizes` and
//! `retention_counts` aggregate those into the per-period rates the final
//! query reports. Classic mode counts exact-period activity; rolling mode
//! additionally tracks each actor's last observed period against a
//! `0..periods` series via `DatabaseAdapter::build_period_series_subquery`.

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, ValidationError};
use crate::filter::{render_filter, DateTimeBuilder, FilterCacheManager};
use crate::model::query::{Filter, RetentionMode, RetentionQuery};
use crate::model::registry::split_member_ref;
use crate::model::{CubeRegistry, SecurityContext};
use crate::sql::expr::{func, lit_float, table_col, Expr, ExprExt};
use crate::sql::params::ParamBinder;
use crate::sql::query::{Cte, JoinType, Query, SelectExpr, TableRef};

pub struct RetentionBuilder<'a> {
    registry: &'a CubeRegistry,
    adapter: &'a dyn DatabaseAdapter,
    security: &'a SecurityContext,
    max_periods: u32,
}

impl<'a> RetentionBuilder<'a> {
    pub fn new(
        registry: &'a CubeRegistry,
        adapter: &'a dyn DatabaseAdapter,
        security: &'a SecurityContext,
        max_periods: u32,
    ) -> Self {
        Self {
            registry,
            adapter,
            security,
            max_periods,
        }
    }

    pub fn validate(&self, retention: &RetentionQuery) -> Result<(), EngineError> {
        if retention.periods == 0 || retention.periods > self.max_periods {
            return Err(ValidationError::RetentionPeriodsOutOfRange {
                requested: retention.periods,
                max: self.max_periods,
            }
            .into());
        }
        if !self.registry.contains(&retention.cube) {
            return Err(ValidationError::UnknownCube(retention.cube.clone()).into());
        }
        self.binding_column(retention)?;
        self.time_column(retention)?;
        if let Some(breakdown) = &retention.breakdown {
            self.breakdown_column(retention.cube.as_str(), breakdown)?;
        }
        Ok(())
    }

    /// The binding key resolved against `retention.cube`'s own column space.
    /// Cohort and activity rows share one cube, so no cross-cube join
    /// resolution is needed (unlike `FunnelBuilder::binding_column`).
    fn binding_column(&self, retention: &RetentionQuery) -> Result<Expr, EngineError> {
        let r = split_member_ref(&retention.binding_key)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(retention.binding_key.clone()))?;
        if r.cube != retention.cube {
            return Err(ValidationError::IllegalFilterTarget(retention.binding_key.clone()).into());
        }
        let dim = self
            .registry
            .dimension(&retention.cube, r.member)
            .ok_or_else(|| ValidationError::UnknownMember {
                cube: retention.cube.clone(),
                member: r.member.to_string(),
            })?;
        Ok(dim.expr().resolve(&retention.cube))
    }

    fn time_column(&self, retention: &RetentionQuery) -> Result<Expr, EngineError> {
        let r = split_member_ref(&retention.time_dimension)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(retention.time_dimension.clone()))?;
        let dim = self
            .registry
            .dimension(r.cube, r.member)
            .ok_or_else(|| ValidationError::UnknownMember {
                cube: r.cube.to_string(),
                member: r.member.to_string(),
            })?;
        Ok(dim.expr().resolve(r.cube))
    }

    fn breakdown_column(&self, cube: &str, breakdown: &str) -> Result<Expr, EngineError> {
        let r = split_member_ref(breakdown)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(breakdown.to_string()))?;
        let dim = self
            .registry
            .dimension(r.cube, r.member)
            .ok_or_else(|| ValidationError::UnknownMember {
                cube: r.cube.to_string(),
                member: r.member.to_string(),
            })?;
        let _ = cube;
        Ok(dim.expr().resolve(r.cube))
    }

    fn render_filters(
        &self,
        cube: &str,
        filters: &[Filter],
        datetime: &DateTimeBuilder,
        filter_cache: &mut FilterCacheManager,
        binder: &mut ParamBinder,
    ) -> Result<Option<Expr>, EngineError> {
        let mut acc: Option<Expr> = None;
        for filter in filters {
            if let Some(cond) = render_filter(self.registry, self.adapter, datetime, filter, filter_cache, binder)? {
                acc = Some(match acc {
                    Some(existing) => existing.and(cond),
                    None => cond,
                });
            }
        }
        let _ = cube;
        Ok(acc)
    }

    pub fn build(
        &self,
        retention: &RetentionQuery,
        datetime: &DateTimeBuilder,
        filter_cache: &mut FilterCacheManager,
        binder: &mut ParamBinder,
    ) -> Result<Query, EngineError> {
        self.validate(retention)?;

        let cube = self
            .registry
            .cube(&retention.cube)
            .ok_or_else(|| ValidationError::UnknownCube(retention.cube.clone()))?;
        let cube_sql = cube.sql(self.security);
        let base_table = || TableRef::new(cube_sql.from.source_sql()).with_alias(&retention.cube);

        let binding_expr = self.binding_column(retention)?;
        let time_expr = self.time_column(retention)?;
        let breakdown_expr = retention
            .breakdown
            .as_ref()
            .map(|b| self.breakdown_column(&retention.cube, b))
            .transpose()?;

        let (from, to) = datetime.resolve(&retention.date_range)?;
        let range_cond = time_expr
            .clone()
            .gte(crate::sql::expr::lit_str(&from.to_string()))
            .and(time_expr.clone().lt(crate::sql::expr::lit_str(&to.to_string())));

        // cohort_base: one row per actor, their earliest qualifying event
        // truncated to the requested granularity.
        let mut cohort_select = vec![
            SelectExpr::new(binding_expr.clone()).with_alias("binding_key"),
            SelectExpr::new(
                self.adapter
                    .build_time_dimension(retention.granularity, self.adapter.build_min(time_expr.clone())),
            )
            .with_alias("cohort_period"),
        ];
        let mut cohort_group = vec![binding_expr.clone()];
        if let Some(b) = &breakdown_expr {
            cohort_select.push(SelectExpr::new(b.clone()).with_alias("breakdown"));
            cohort_group.push(b.clone());
        }
        let mut cohort_where = cube_sql.where_clause.as_ref().map(|w| w.resolve(&retention.cube));
        cohort_where = and_opt(cohort_where, Some(range_cond.clone()));
        cohort_where = and_opt(
            cohort_where,
            self.render_filters(&retention.cube, &retention.cohort_filters, datetime, filter_cache, binder)?,
        );
        let mut cohort_query = Query::new()
            .select(cohort_select)
            .from(base_table())
            .group_by(cohort_group);
        if let Some(w) = cohort_where {
            cohort_query = cohort_query.filter(w);
        }
        let cohort_cte = Cte::new("cohort_base", cohort_query);

        // activity_events: every later event that might count as a return,
        // independent of the cohort it will be matched against.
        let mut activity_select = vec![
            SelectExpr::new(binding_expr.clone()).with_alias("binding_key"),
            SelectExpr::new(
                self.adapter
                    .build_time_dimension(retention.granularity, time_expr.clone()),
            )
            .with_alias("activity_period"),
        ];
        if let Some(b) = &breakdown_expr {
            activity_select.push(SelectExpr::new(b.clone()).with_alias("breakdown"));
        }
        let mut activity_where = cube_sql.where_clause.as_ref().map(|w| w.resolve(&retention.cube));
        activity_where = and_opt(
            activity_where,
            self.render_filters(&retention.cube, &retention.activity_filters, datetime, filter_cache, binder)?,
        );
        let mut activity_query = Query::new().select(activity_select).from(base_table());
        if let Some(w) = activity_where {
            activity_query = activity_query.filter(w);
        }
        let activity_cte = Cte::new("activity_events", activity_query);

        // actor_activity: DISTINCT (binding_key, cohort_period[, breakdown],
        // period_number) pairs, period_number computed relative to each
        // actor's own cohort period.
        let mut actor_activity_select = vec![
            SelectExpr::new(table_col("cohort_base", "binding_key")).with_alias("binding_key"),
            SelectExpr::new(table_col("cohort_base", "cohort_period")).with_alias("cohort_period"),
            SelectExpr::new(self.adapter.build_date_diff_periods(
                table_col("cohort_base", "cohort_period"),
                table_col("activity_events", "activity_period"),
                retention.granularity,
            ))
            .with_alias("period_number"),
        ];
        if breakdown_expr.is_some() {
            actor_activity_select
                .insert(2, SelectExpr::new(table_col("cohort_base", "breakdown")).with_alias("breakdown"));
        }
        let join_on = table_col("activity_events", "binding_key")
            .eq(table_col("cohort_base", "binding_key"))
            .and(table_col("activity_events", "activity_period").gte(table_col("cohort_base", "cohort_period")));
        let actor_activity_query = Query::new()
            .select(actor_activity_select)
            .distinct()
            .from(TableRef::new("cohort_base").with_alias("cohort_base"))
            .join(JoinType::Inner, TableRef::new("activity_events").with_alias("activity_events"), join_on);
        let actor_activity_cte = Cte::new("actor_activity", actor_activity_query);

        // cohort_sizes: distinct actor count per cohort (and breakdown).
        let mut cohort_size_select = vec![
            SelectExpr::new(table_col("cohort_base", "cohort_period")).with_alias("cohort_period"),
            SelectExpr::new(self.adapter.build_count_distinct(table_col("cohort_base", "binding_key")))
                .with_alias("cohort_size"),
        ];
        let mut cohort_size_group = vec![table_col("cohort_base", "cohort_period")];
        if breakdown_expr.is_some() {
            cohort_size_select
                .insert(1, SelectExpr::new(table_col("cohort_base", "breakdown")).with_alias("breakdown"));
            cohort_size_group.push(table_col("cohort_base", "breakdown"));
        }
        let cohort_sizes_query = Query::new()
            .select(cohort_size_select)
            .from(TableRef::new("cohort_base").with_alias("cohort_base"))
            .group_by(cohort_size_group);
        let cohort_sizes_cte = Cte::new("cohort_sizes", cohort_sizes_query);

        let retention_counts_cte = match retention.mode {
            RetentionMode::Classic => self.classic_retention_counts(breakdown_expr.is_some()),
            RetentionMode::Rolling => self.rolling_retention_counts(breakdown_expr.is_some(), retention.periods),
        };

        let mut q = Query::new()
            .with_cte(cohort_cte)
            .with_cte(activity_cte)
            .with_cte(actor_activity_cte)
            .with_cte(cohort_sizes_cte)
            .with_cte(retention_counts_cte);

        let mut series_select = vec![SelectExpr::new(table_col("series", "period")).with_alias("period_number")];
        let mut final_select = vec![
            SelectExpr::new(table_col("cohort_sizes", "cohort_period")).with_alias("cohort_period"),
            SelectExpr::new(table_col("series", "period")).with_alias("period_number"),
            SelectExpr::new(table_col("cohort_sizes", "cohort_size")).with_alias("cohort_size"),
        ];
        let _ = &series_select;
        series_select.clear();
        if breakdown_expr.is_some() {
            final_select.insert(1, SelectExpr::new(table_col("cohort_sizes", "breakdown")).with_alias("breakdown"));
        }
        let retained = func("COALESCE", vec![table_col("retention_counts", "retained_users"), crate::sql::expr::lit_int(0)]);
        final_select.push(SelectExpr::new(retained.clone()).with_alias("retained_users"));
        let rate = retained.div(func(
            "NULLIF",
            vec![table_col("cohort_sizes", "cohort_size"), crate::sql::expr::lit_int(0)],
        ));
        final_select.push(SelectExpr::new(rate).with_alias("retention_rate"));

        let mut join_on = table_col("retention_counts", "cohort_period")
            .eq(table_col("cohort_sizes", "cohort_period"))
            .and(table_col("retention_counts", "period_number").eq(table_col("series", "period")));
        if breakdown_expr.is_some() {
            join_on = join_on.and(table_col("retention_counts", "breakdown").eq(table_col("cohort_sizes", "breakdown")));
        }

        let series_subquery_sql = self.adapter.build_period_series_subquery(retention.periods).to_sql(self.adapter.dialect());
        q = q
            .select(final_select)
            .from(TableRef::new("cohort_sizes").with_alias("cohort_sizes"))
            .cross_join(TableRef::new(&format!("({series_subquery_sql})")).with_alias("series"))
            .left_join(TableRef::new("retention_counts").with_alias("retention_counts"), join_on)
            .order_by(vec![
                crate::sql::query::OrderByExpr::asc(table_col("cohort_sizes", "cohort_period")),
                crate::sql::query::OrderByExpr::asc(table_col("series", "period")),
            ]);

        let _ = lit_float(0.0);
        Ok(q)
    }

    fn classic_retention_counts(&self, with_breakdown: bool) -> Cte {
        let mut select = vec![
            SelectExpr::new(table_col("actor_activity", "cohort_period")).with_alias("cohort_period"),
            SelectExpr::new(table_col("actor_activity", "period_number")).with_alias("period_number"),
            SelectExpr::new(self.adapter.build_count_distinct(table_col("actor_activity", "binding_key")))
                .with_alias("retained_users"),
        ];
        let mut group = vec![
            table_col("actor_activity", "cohort_period"),
            table_col("actor_activity", "period_number"),
        ];
        if with_breakdown {
            select.insert(1, SelectExpr::new(table_col("actor_activity", "breakdown")).with_alias("breakdown"));
            group.push(table_col("actor_activity", "breakdown"));
        }
        let query = Query::new()
            .select(select)
            .from(TableRef::new("actor_activity").with_alias("actor_activity"))
            .group_by(group);
        Cte::new("retention_counts", query)
    }

    fn rolling_retention_counts(&self, with_breakdown: bool, periods: u32) -> Cte {
        let mut actor_max_select = vec![
            SelectExpr::new(table_col("actor_activity", "binding_key")).with_alias("binding_key"),
            SelectExpr::new(table_col("actor_activity", "cohort_period")).with_alias("cohort_period"),
            SelectExpr::new(self.adapter.build_max(table_col("actor_activity", "period_number")))
                .with_alias("max_period"),
        ];
        let mut actor_max_group = vec![
            table_col("actor_activity", "binding_key"),
            table_col("actor_activity", "cohort_period"),
        ];
        if with_breakdown {
            actor_max_select.insert(2, SelectExpr::new(table_col("actor_activity", "breakdown")).with_alias("breakdown"));
            actor_max_group.push(table_col("actor_activity", "breakdown"));
        }
        let actor_max_query = Query::new()
            .select(actor_max_select)
            .from(TableRef::new("actor_activity").with_alias("actor_activity"))
            .group_by(actor_max_group);

        let series_sql = self.adapter.build_period_series_subquery(periods).to_sql(self.adapter.dialect());
        let retained_case = Expr::Case {
            operand: None,
            when_clauses: vec![(
                table_col("actor_max", "max_period").gte(table_col("series", "period")),
                table_col("actor_max", "binding_key"),
            )],
            else_clause: None,
        };
        let mut select = vec![
            SelectExpr::new(table_col("actor_max", "cohort_period")).with_alias("cohort_period"),
            SelectExpr::new(table_col("series", "period")).with_alias("period_number"),
            SelectExpr::new(self.adapter.build_count_distinct(retained_case)).with_alias("retained_users"),
        ];
        let mut group = vec![table_col("actor_max", "cohort_period"), table_col("series", "period")];
        if with_breakdown {
            select.insert(1, SelectExpr::new(table_col("actor_max", "breakdown")).with_alias("breakdown"));
            group.push(table_col("actor_max", "breakdown"));
        }

        let query = Query::new()
            .with_cte(Cte::new("actor_max", actor_max_query))
            .select(select)
            .from(TableRef::new("actor_max").with_alias("actor_max"))
            .cross_join(TableRef::new(&format!("({series_sql})")).with_alias("series"))
            .group_by(group);
        Cte::new("retention_counts", query)
    }
}

fn and_opt(a: Option<Expr>, b: Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.and(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
