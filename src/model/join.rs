//! Join definitions between cubes.
//!
//! A cube declares its joins as edges in a directed graph (`JoinPathResolver`
//! treats it as undirected for path-finding, but direction still determines
//! fan-out semantics: `hasMany` on the declaring side is a fan-out that may
//! require a pre-aggregation CTE).

use super::cube_expr::CubeExpr;
use crate::sql::expr::BinaryOperator;
use crate::sql::query::JoinType as SqlJoinType;

/// The relationship a join declares from the owning cube to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRelationship {
    BelongsTo,
    HasOne,
    HasMany,
    BelongsToMany,
}

impl JoinRelationship {
    /// Whether rows from the target cube can fan out rows from the owning
    /// cube, requiring aggregate measures on the target to be pre-aggregated
    /// in a CTE before joining.
    pub fn is_fan_out(&self) -> bool {
        matches!(self, JoinRelationship::HasMany | JoinRelationship::BelongsToMany)
    }

    /// The default SQL join type for this relationship, used when the join
    /// does not declare an explicit `sql_join_type` override.
    pub fn default_sql_join_type(&self) -> SqlJoinType {
        match self {
            JoinRelationship::BelongsTo | JoinRelationship::HasOne => SqlJoinType::Left,
            JoinRelationship::HasMany | JoinRelationship::BelongsToMany => SqlJoinType::Left,
        }
    }
}

/// A single equality (or custom-comparator) pair in a join's `on[]` list.
#[derive(Debug, Clone)]
pub struct JoinOn {
    pub left: CubeExpr,
    pub right: CubeExpr,
}

impl JoinOn {
    pub fn new(left: CubeExpr, right: CubeExpr) -> Self {
        Self { left, right }
    }
}

/// The junction descriptor for a `belongsToMany` join: the bridge cube and
/// the `on[]` pairs connecting it to the ultimate target.
#[derive(Debug, Clone)]
pub struct Through {
    pub junction_cube: String,
    pub on: Vec<JoinOn>,
    /// Security predicate scoped to the junction table itself (e.g. a
    /// tenant column living on the join table rather than either side),
    /// ANDed into the join condition when the junction is materialized.
    pub security: Option<CubeExpr>,
}

/// A join declared on a cube, pointing at another cube in the registry.
#[derive(Debug, Clone)]
pub struct Join {
    /// Name of the cube this join connects to. For `belongsToMany`, this is
    /// the ultimate target; the bridge is named in `through`.
    pub target_cube: String,
    pub relationship: JoinRelationship,
    /// Equality pairs ANDed together to form the join condition. For
    /// `belongsToMany`, these pairs connect the owning cube to the junction
    /// cube named in `through`.
    pub on: Vec<JoinOn>,
    /// Override the default `=` comparator used to fold `on[]` pairs, e.g.
    /// a range join using `<=`.
    pub comparator: Option<BinaryOperator>,
    /// Override the relationship-implied default SQL join type.
    pub sql_join_type: Option<SqlJoinType>,
    /// Cubes that `JoinPathResolver::find_path_preferring` should favor this
    /// join's first hop for, when multiple shortest paths exist.
    pub preferred_for: Vec<String>,
    pub through: Option<Through>,
}

impl Join {
    pub fn new(
        target_cube: impl Into<String>,
        relationship: JoinRelationship,
        on: Vec<JoinOn>,
    ) -> Self {
        Self {
            target_cube: target_cube.into(),
            relationship,
            on,
            comparator: None,
            sql_join_type: None,
            preferred_for: Vec::new(),
            through: None,
        }
    }

    pub fn with_comparator(mut self, comparator: BinaryOperator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn with_sql_join_type(mut self, join_type: SqlJoinType) -> Self {
        self.sql_join_type = Some(join_type);
        self
    }

    pub fn preferred_for(mut self, cubes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.preferred_for = cubes.into_iter().map(Into::into).collect();
        self
    }

    pub fn through(mut self, junction_cube: impl Into<String>, on: Vec<JoinOn>) -> Self {
        self.through = Some(Through {
            junction_cube: junction_cube.into(),
            on,
            security: None,
        });
        self
    }

    /// Attach a security predicate to an already-declared `through` junction.
    /// Panics if called before `.through(...)`, since a junction's security
    /// predicate has nowhere to live without one.
    pub fn with_through_security(mut self, predicate: CubeExpr) -> Self {
        let through = self.through.as_mut().expect("through(...) must be called first");
        through.security = Some(predicate);
        self
    }

    pub fn effective_sql_join_type(&self) -> SqlJoinType {
        self.sql_join_type
            .unwrap_or_else(|| self.relationship.default_sql_join_type())
    }
}
