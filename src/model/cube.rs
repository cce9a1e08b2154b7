//! Cube definitions: the unit of registration in a `CubeRegistry`.

use std::collections::HashMap;
use std::sync::Arc;

use super::cube_expr::CubeExpr;
use super::dimension::Dimension;
use super::join::Join;
use super::measure::Measure;

/// Per-request security context threaded into a cube's `sql()` function,
/// e.g. `{"tenant_id": "42"}`. Carried opaquely; cubes interpret their own keys.
pub type SecurityContext = HashMap<String, String>;

/// The base SQL a cube resolves to for a given security context: the `FROM`
/// source and an optional security predicate ANDed into every query that
/// touches this cube.
#[derive(Debug, Clone)]
pub struct CubeSql {
    pub from: CubeExpr,
    pub where_clause: Option<CubeExpr>,
}

impl CubeSql {
    pub fn new(from: CubeExpr) -> Self {
        Self {
            from,
            where_clause: None,
        }
    }

    pub fn with_security(from: CubeExpr, where_clause: CubeExpr) -> Self {
        Self {
            from,
            where_clause: Some(where_clause),
        }
    }
}

/// A cube: a named table-or-subquery source plus the measures, dimensions,
/// and joins defined against it.
#[derive(Clone)]
pub struct Cube {
    pub name: String,
    /// Resolves this cube's base SQL for a given security context. Boxed so
    /// that a cube whose security predicate depends on tenant identity (a
    /// row-level `tenant_id = ${ctx.tenant_id}` filter, say) can close over
    /// that logic; constant cubes just ignore the context argument.
    sql_fn: Arc<dyn Fn(&SecurityContext) -> CubeSql + Send + Sync>,
    pub measures: HashMap<String, Measure>,
    pub dimensions: HashMap<String, Dimension>,
    pub joins: HashMap<String, Join>,
    /// Named boolean filter shortcuts (`segments[]` in a `SemanticQuery`).
    pub segments: HashMap<String, CubeExpr>,
    /// Whether this cube is safe to query without an explicit security
    /// predicate. Non-public cubes missing a `where` from `sql()` trigger a
    /// dev-mode warning at plan time.
    pub is_public: bool,
}

impl std::fmt::Debug for Cube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cube")
            .field("name", &self.name)
            .field("measures", &self.measures.keys().collect::<Vec<_>>())
            .field("dimensions", &self.dimensions.keys().collect::<Vec<_>>())
            .field("joins", &self.joins.keys().collect::<Vec<_>>())
            .field("is_public", &self.is_public)
            .finish()
    }
}

impl Cube {
    /// A cube whose `FROM` source never changes with the security context.
    pub fn new(name: impl Into<String>, from: CubeExpr) -> Self {
        let from = from;
        Self {
            name: name.into(),
            sql_fn: Arc::new(move |_ctx: &SecurityContext| CubeSql::new(from.isolated())),
            measures: HashMap::new(),
            dimensions: HashMap::new(),
            joins: HashMap::new(),
            segments: HashMap::new(),
            is_public: false,
        }
    }

    /// A cube whose base SQL is computed per security context, e.g. to embed
    /// a tenant-scoping predicate.
    pub fn with_sql_fn(
        name: impl Into<String>,
        sql_fn: impl Fn(&SecurityContext) -> CubeSql + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            sql_fn: Arc::new(sql_fn),
            measures: HashMap::new(),
            dimensions: HashMap::new(),
            joins: HashMap::new(),
            segments: HashMap::new(),
            is_public: false,
        }
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measures.insert(measure.name.clone(), measure);
        self
    }

    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.insert(dimension.name.clone(), dimension);
        self
    }

    pub fn with_join(mut self, join: Join) -> Self {
        self.joins.insert(join.target_cube.clone(), join);
        self
    }

    pub fn with_segment(mut self, name: impl Into<String>, expr: CubeExpr) -> Self {
        self.segments.insert(name.into(), expr);
        self
    }

    /// Resolve this cube's `sql()` for the given security context.
    pub fn sql(&self, ctx: &SecurityContext) -> CubeSql {
        (self.sql_fn)(ctx)
    }

    /// Whether `sql(ctx)` produces a security predicate for every context,
    /// used for the single-pass "security predicate present once" check.
    /// Callers pass an empty context; cubes whose predicate depends on
    /// context contents should still always return `Some`.
    pub fn has_security_predicate(&self, ctx: &SecurityContext) -> bool {
        self.sql(ctx).where_clause.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::AggregationType;

    #[test]
    fn constant_cube_ignores_context() {
        let cube = Cube::new("orders", CubeExpr::raw("orders"));
        let ctx = SecurityContext::new();
        assert!(cube.sql(&ctx).where_clause.is_none());
    }

    #[test]
    fn sql_fn_cube_can_read_context() {
        let cube = Cube::with_sql_fn("orders", |ctx: &SecurityContext| {
            let tenant = ctx.get("tenant_id").cloned().unwrap_or_default();
            CubeSql::with_security(
                CubeExpr::raw("orders"),
                CubeExpr::raw(format!("tenant_id = '{tenant}'")),
            )
        });
        let mut ctx = SecurityContext::new();
        ctx.insert("tenant_id".to_string(), "42".to_string());
        let sql = cube.sql(&ctx);
        assert!(sql.where_clause.is_some());
        assert!(cube.has_security_predicate(&ctx));
    }

    #[test]
    fn builder_accumulates_members() {
        let cube = Cube::new("orders", CubeExpr::raw("orders"))
            .with_measure(Measure::count("count"))
            .with_measure(Measure::simple(
                "revenue",
                AggregationType::Sum,
                CubeExpr::column("amount"),
            ))
            .with_dimension(Dimension::string("status", CubeExpr::column("status")));

        assert_eq!(cube.measures.len(), 2);
        assert_eq!(cube.dimensions.len(), 1);
    }
}
