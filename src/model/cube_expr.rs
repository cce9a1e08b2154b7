//! SqlExpression utilities: isolate, clone, and resolve cube-defined SQL fragments.
//!
//! Measures, dimensions, and join predicates are defined against a cube's own
//! aliasless column space (`"amount"`, `"${CUBE}.customer_id"`-style templates are
//! not modeled here; callers author either a bare column name or a raw fragment).
//! [`CubeExpr::resolve`] binds that fragment to a concrete table alias chosen by
//! the planner, producing an owned [`crate::sql::Expr`].

use crate::sql::dialect::Dialect;
use crate::sql::expr::{raw_sql, table_col, Expr};

/// A cube-defined SQL fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum CubeExpr {
    /// A bare column reference, qualified with the alias at resolution time.
    Column(String),
    /// A raw SQL fragment (already fully formed, e.g. `"status = 'completed'"`).
    ///
    /// Raw fragments are never alias-qualified automatically; authors are
    /// responsible for embedding the correct table reference.
    Raw(String),
}

impl CubeExpr {
    pub fn column(name: impl Into<String>) -> Self {
        CubeExpr::Column(name.into())
    }

    pub fn raw(sql: impl Into<String>) -> Self {
        CubeExpr::Raw(sql.into())
    }

    /// Bind this fragment to a table alias, producing a fresh, owned `Expr`.
    ///
    /// Every call returns an independent clone of the underlying data so that
    /// downstream builders (CTE rewriting, calculated-measure substitution)
    /// can mutate their copy without leaking changes back into the cube
    /// definition, which is process-wide and shared across requests.
    pub fn resolve(&self, alias: &str) -> Expr {
        match self {
            CubeExpr::Column(name) => table_col(alias, name),
            CubeExpr::Raw(sql) => raw_sql(sql),
        }
    }

    /// An explicit isolation clone, used where the call site wants to make the
    /// "this is a fresh, independently-owned copy" intent visible rather than
    /// relying on an implicit `Clone::clone()`.
    pub fn isolated(&self) -> Self {
        self.clone()
    }

    /// The underlying text, for call sites (`QueryBuilder`'s `FROM` clause)
    /// that need a bare source name rather than a resolved, alias-qualified
    /// `Expr`. A cube's `sql().from` is conventionally a table name either
    /// way it's constructed; this is not meant for a `Raw` fragment holding
    /// an arbitrary subquery.
    pub fn source_sql(&self) -> &str {
        match self {
            CubeExpr::Column(name) => name,
            CubeExpr::Raw(sql) => sql,
        }
    }
}

impl From<&str> for CubeExpr {
    fn from(s: &str) -> Self {
        CubeExpr::Column(s.to_string())
    }
}
