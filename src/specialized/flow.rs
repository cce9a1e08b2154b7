//! `FlowBuilder`: compiles a `FlowQuery` into a source/target/value edge
//! list — the links half of a Sankey diagram — via `LAG` over each actor's
//! step-dimension history ordered by time.
//!
//! Node sizing and a combined `{nodes, links}` payload are left to the
//! caller: the edge list alone is enough to derive both, and folding that
//! derivation into SQL would just be the same aggregation run twice.

use crate::adapter::DatabaseAdapter;
use crate::error::{EngineError, ValidationError};
use crate::model::registry::split_member_ref;
use crate::model::{CubeRegistry, SecurityContext};
use crate::model::query::FlowQuery;
use crate::sql::expr::{lag, table_col, Expr, ExprExt, WindowExt, WindowOrderBy};
use crate::sql::query::{Query, SelectExpr, TableRef};

pub struct FlowBuilder<'a> {
    registry: &'a CubeRegistry,
    adapter: &'a dyn DatabaseAdapter,
    security: &'a SecurityContext,
}

impl<'a> FlowBuilder<'a> {
    pub fn new(registry: &'a CubeRegistry, adapter: &'a dyn DatabaseAdapter, security: &'a SecurityContext) -> Self {
        Self {
            registry,
            adapter,
            security,
        }
    }

    pub fn validate(&self, flow: &FlowQuery) -> Result<(), EngineError> {
        if !self.registry.contains(&flow.cube) {
            return Err(ValidationError::UnknownCube(flow.cube.clone()).into());
        }
        self.member_column(&flow.cube, &flow.binding_key)?;
        self.member_column(&flow.cube, &flow.step_dimension)?;
        self.member_column(&flow.cube, &flow.time_dimension)?;
        Ok(())
    }

    fn member_column(&self, cube: &str, reference: &str) -> Result<Expr, EngineError> {
        let r = split_member_ref(reference)
            .ok_or_else(|| ValidationError::IllegalFilterTarget(reference.to_string()))?;
        if r.cube != cube {
            return Err(ValidationError::IllegalFilterTarget(reference.to_string()).into());
        }
        let dim = self
            .registry
            .dimension(cube, r.member)
            .ok_or_else(|| ValidationError::UnknownMember {
                cube: cube.to_string(),
                member: r.member.to_string(),
            })?;
        Ok(dim.expr().resolve(cube))
    }

    /// Build the edge-list query: one `source_step -> target_step` row per
    /// transition, with `value` the number of actors who made it.
    pub fn build(&self, flow: &FlowQuery) -> Result<Query, EngineError> {
        self.validate(flow)?;

        let cube = self
            .registry
            .cube(&flow.cube)
            .ok_or_else(|| ValidationError::UnknownCube(flow.cube.clone()))?;
        let cube_sql = cube.sql(self.security);
        let table = TableRef::new(cube_sql.from.source_sql()).with_alias(&flow.cube);

        let binding_expr = self.member_column(&flow.cube, &flow.binding_key)?;
        let step_expr = self.member_column(&flow.cube, &flow.step_dimension)?;
        let time_expr = self.member_column(&flow.cube, &flow.time_dimension)?;

        let source_expr = lag(step_expr.clone())
            .over()
            .partition_by(vec![binding_expr])
            .order_by(vec![WindowOrderBy::asc(time_expr)])
            .build();

        let mut transitions = Query::new()
            .select(vec![
                SelectExpr::new(source_expr).with_alias("source_step"),
                SelectExpr::new(step_expr).with_alias("target_step"),
            ])
            .from(table);
        if let Some(w) = cube_sql.where_clause.as_ref().map(|w| w.resolve(&flow.cube)) {
            transitions = transitions.filter(w);
        }

        let edges = Query::new()
            .select(vec![
                SelectExpr::new(table_col("transitions", "source_step")).with_alias("source"),
                SelectExpr::new(table_col("transitions", "target_step")).with_alias("target"),
                SelectExpr::new(self.adapter.build_count(table_col("transitions", "target_step")))
                    .with_alias("value"),
            ])
            .from(TableRef::new("transitions").with_alias("transitions"))
            .filter(table_col("transitions", "source_step").is_not_null())
            .group_by(vec![
                table_col("transitions", "source_step"),
                table_col("transitions", "target_step"),
            ]);

        Ok(Query::new()
            .with_cte(crate::sql::query::Cte::new("transitions", transitions))
            .select(vec![
                SelectExpr::new(table_col("edges", "source")).with_alias("source"),
                SelectExpr::new(table_col("edges", "target")).with_alias("target"),
                SelectExpr::new(table_col("edges", "value")).with_alias("value"),
            ])
            .with_cte(crate::sql::query::Cte::new("edges", edges))
            .from(TableRef::new("edges").with_alias("edges")))
    }
}
