//! `QueryPlanner`: compiles a validated `SemanticQuery` into a `QueryPlan`.

use std::collections::{BTreeSet, HashSet};

use super::analysis::QueryAnalysis;
use super::calculated_measure::CalculatedMeasureResolver;
use super::join_resolver::JoinPathResolver;
use super::plan::{CteType, JoinCubePlan, PreAggregationCte, QueryPlan};
use crate::error::{EngineError, PlanningError, ValidationError};
use crate::model::{split_member_ref, CubeExpr, CubeRegistry, Filter, SemanticQuery};

/// Compiles `SemanticQuery` requests against a `CubeRegistry` into
/// `QueryPlan`s. Holds no per-request state itself; a fresh
/// `JoinPathResolver` (and its path cache) is created per `plan()` call,
/// since exclusion sets vary per query.
pub struct QueryPlanner<'r> {
    registry: &'r CubeRegistry,
}

impl<'r> QueryPlanner<'r> {
    pub fn new(registry: &'r CubeRegistry) -> Self {
        Self { registry }
    }

    /// Compile `query` into an executable plan.
    pub fn plan(&self, query: &SemanticQuery) -> Result<QueryPlan, EngineError> {
        let mut used_cubes = self.extract_cube_usage(query)?;

        let calculated_measure_order = CalculatedMeasureResolver::new(self.registry)
            .resolve_order(&query.measures)
            .map_err(EngineError::from)?;
        for reference in &calculated_measure_order {
            if let Some(r) = split_member_ref(reference) {
                used_cubes.insert(r.cube.to_string());
            }
        }

        if used_cubes.is_empty() {
            return Err(ValidationError::IllegalFilterTarget(
                "query references no members".to_string(),
            )
            .into());
        }

        let primary_cube = self.choose_primary_cube(&used_cubes, query)?;
        tracing::debug!(cube = %primary_cube, "selected primary cube");

        let resolver = JoinPathResolver::new(self.registry);
        let cte_cubes = self.cubes_needing_cte(&primary_cube, &used_cubes, query, &resolver)?;

        let mut processed: HashSet<String> = HashSet::new();
        processed.insert(primary_cube.clone());

        let mut join_cubes: Vec<JoinCubePlan> = Vec::new();
        let mut pre_aggregation_ctes: Vec<PreAggregationCte> = Vec::new();

        // Future-CTE cubes are excluded from the "already processed" set
        // used for path-reuse scoring: they won't exist in the main FROM
        // chain, so a later join can't piggyback on having already joined
        // them directly.
        for cube in &used_cubes {
            if cube == &primary_cube || cte_cubes.contains(cube) {
                continue;
            }
            let excluded: HashSet<String> = cte_cubes.iter().cloned().collect();
            let path = match resolver.find_path_preferring(
                &primary_cube,
                cube,
                &excluded,
                &used_cubes_as_preferred(&used_cubes),
                &processed,
            ) {
                Some(path) => path,
                None => {
                    // Unreachable while treating every CTE cube as a forbidden
                    // intermediate hop. If `cube` sits exactly one hop off a
                    // CTE cube, the CTE carries it as a downstream join key
                    // (§4.5 step 4) and the outer query joins it through the
                    // CTE alias instead of a separate path; no `join_cubes`
                    // entry is needed here.
                    if cte_cubes.iter().any(|c| self.has_direct_join(c, cube)) {
                        tracing::debug!(
                            cube = %cube,
                            "join path excludes CTE cubes as hops; reached as a CTE downstream join key instead"
                        );
                        continue;
                    }
                    return Err(PlanningError::UnreachableJoin(cube.clone()).into());
                }
            };

            for hop in &path {
                if processed.contains(&hop.to_cube) {
                    continue;
                }
                if let Some(through) = &hop.join.through {
                    let (declaring_alias, _target_alias) = if hop.declared_by_from {
                        (hop.from_cube.as_str(), hop.to_cube.as_str())
                    } else {
                        (hop.to_cube.as_str(), hop.from_cube.as_str())
                    };
                    let junction_cube = through.junction_cube.clone();
                    let mut junction_condition = super::join_resolver::build_join_condition(
                        hop.join,
                        declaring_alias,
                        &junction_cube,
                    );
                    if let Some(security) = &through.security {
                        use crate::sql::expr::ExprExt;
                        junction_condition =
                            junction_condition.and(security.isolated().resolve(&junction_cube));
                    }
                    join_cubes.push(JoinCubePlan {
                        cube: junction_cube.clone(),
                        join_type: hop.join.effective_sql_join_type(),
                        join_condition: junction_condition,
                        junction_table: None,
                    });
                    processed.insert(junction_cube.clone());

                    let target_condition = through_condition(through, &junction_cube, &hop.to_cube);
                    join_cubes.push(JoinCubePlan {
                        cube: hop.to_cube.clone(),
                        join_type: hop.join.effective_sql_join_type(),
                        join_condition: target_condition,
                        junction_table: Some(junction_cube),
                    });
                } else {
                    let condition = hop.build_condition(&hop.from_cube, &hop.to_cube);
                    join_cubes.push(JoinCubePlan {
                        cube: hop.to_cube.clone(),
                        join_type: hop.join.effective_sql_join_type(),
                        join_condition: condition,
                        junction_table: None,
                    });
                }
                processed.insert(hop.to_cube.clone());
            }
        }

        for cube in &cte_cubes {
            let path = resolver
                .find_path(&primary_cube, cube, &HashSet::new())
                .ok_or_else(|| PlanningError::UnreachableJoin(cube.clone()))?;
            let last_hop = path
                .last()
                .expect("cte cube must be at least one hop from primary");
            pre_aggregation_ctes.push(self.build_cte(cube, query, last_hop, &used_cubes));
        }

        Ok(QueryPlan {
            primary_cube,
            join_cubes,
            pre_aggregation_ctes,
            calculated_measure_order,
        })
    }

    /// Plan `query` and project the result into a read-only `QueryAnalysis`.
    /// Never generates or executes SQL; building one is side-effect free
    /// with respect to any planner-level cache.
    pub fn analyze_query_plan(&self, query: &SemanticQuery) -> Result<QueryAnalysis, EngineError> {
        let plan = self.plan(query)?;
        Ok(QueryAnalysis::from(&plan))
    }

    fn extract_cube_usage(&self, query: &SemanticQuery) -> Result<BTreeSet<String>, EngineError> {
        let mut cubes = BTreeSet::new();
        for reference in query.all_member_refs() {
            let parsed = split_member_ref(reference).ok_or_else(|| {
                ValidationError::IllegalFilterTarget(reference.to_string())
            })?;
            if !self.registry.contains(parsed.cube) {
                return Err(ValidationError::UnknownCube(parsed.cube.to_string()).into());
            }
            if self.registry.resolve_member(reference).is_none() {
                return Err(ValidationError::UnknownMember {
                    cube: parsed.cube.to_string(),
                    member: parsed.member.to_string(),
                }
                .into());
            }
            cubes.insert(parsed.cube.to_string());
        }
        Ok(cubes)
    }

    /// Choose the primary (`FROM`-anchoring) cube among the cubes a query
    /// touches:
    ///
    /// 1. If any dimensions are requested, the cube with the most requested
    ///    dimensions, among cubes that can reach every other used cube.
    /// 2. Otherwise, the reach-all cube with the highest join out-degree.
    /// 3. Failing that, the alphabetically first reach-all cube (or, if none
    ///    can reach all, the alphabetically first used cube).
    ///
    /// Every tier breaks ties alphabetically.
    fn choose_primary_cube(
        &self,
        used_cubes: &BTreeSet<String>,
        query: &SemanticQuery,
    ) -> Result<String, EngineError> {
        let resolver = JoinPathResolver::new(self.registry);

        let can_reach_all = |candidate: &str| {
            let targets: Vec<&str> = used_cubes
                .iter()
                .filter(|c| c.as_str() != candidate)
                .map(String::as_str)
                .collect();
            resolver.can_reach_all(candidate, &targets, &HashSet::new())
        };

        let reach_all: Vec<&String> = used_cubes.iter().filter(|c| can_reach_all(c)).collect();

        if reach_all.is_empty() {
            return used_cubes.iter().next().cloned().ok_or_else(|| {
                PlanningError::AmbiguousPrimaryCube(used_cubes.iter().cloned().collect()).into()
            });
        }

        if !query.dimensions.is_empty() {
            let dimension_count = |cube: &str| -> usize {
                query
                    .dimensions
                    .iter()
                    .filter(|d| {
                        split_member_ref(d).map(|r| r.cube == cube).unwrap_or(false)
                    })
                    .count()
            };
            let mut by_dimensions: Vec<(usize, &String)> = reach_all
                .iter()
                .map(|c| (dimension_count(c), *c))
                .collect();
            by_dimensions.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
            if by_dimensions[0].0 > 0 {
                return Ok(by_dimensions[0].1.clone());
            }
        }

        let mut by_degree: Vec<(usize, &String)> = reach_all
            .iter()
            .map(|c| (self.registry.cube(c).map(|cc| cc.joins.len()).unwrap_or(0), *c))
            .collect();
        by_degree.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        Ok(by_degree[0].1.clone())
    }

    fn cubes_needing_cte(
        &self,
        primary: &str,
        used_cubes: &BTreeSet<String>,
        query: &SemanticQuery,
        resolver: &JoinPathResolver<'_>,
    ) -> Result<BTreeSet<String>, EngineError> {
        let mut cte_cubes = BTreeSet::new();
        for cube in used_cubes {
            if cube == primary {
                continue;
            }
            // A cube contributes an aggregate measure via SELECT or (when a
            // filter targets one of its measures) HAVING; either requires a
            // CTE to avoid fan-out double counting.
            let contributes_measure = |member: &str| {
                split_member_ref(member)
                    .map(|r| r.cube == cube.as_str())
                    .unwrap_or(false)
            };
            let has_measure = query.measures.iter().any(|m| contributes_measure(m))
                || query
                    .filters
                    .iter()
                    .flat_map(Filter::member_refs)
                    .any(|m| {
                        contributes_measure(m)
                            && self
                                .registry
                                .resolve_member(m)
                                .map(|k| matches!(k, crate::model::MemberKind::Measure(_)))
                                .unwrap_or(false)
                    });
            if !has_measure {
                continue;
            }
            let path = resolver
                .find_path(primary, cube, &HashSet::new())
                .ok_or_else(|| PlanningError::UnreachableJoin(cube.clone()))?;
            if let Some(fan_out_hop) = path.iter().find(|hop| hop.join.relationship.is_fan_out()) {
                tracing::debug!(
                    cube = %cube,
                    via_cube = %fan_out_hop.from_cube,
                    "creating pre-aggregation CTE to avoid fan-out double counting"
                );
                cte_cubes.insert(cube.clone());
            }
        }
        Ok(cte_cubes)
    }

    /// Whether `declaring_or_target` and `other` are connected by a join
    /// declared on either side, independent of direction. Used to decide
    /// whether a cube unreachable without routing through a CTE is at least
    /// a direct (one-hop) neighbor of it, which the CTE's downstream join
    /// keys can carry.
    fn has_direct_join(&self, a: &str, b: &str) -> bool {
        self.registry.cube(a).map(|c| c.joins.contains_key(b)).unwrap_or(false)
            || self.registry.cube(b).map(|c| c.joins.contains_key(a)).unwrap_or(false)
    }

    /// The join connecting `cube` directly to `other`, if one is declared on
    /// either side, along with whether `cube` is the declaring side.
    fn direct_join<'a>(&'a self, cube: &str, other: &str) -> Option<(bool, &'a crate::model::Join)> {
        if let Some(j) = self.registry.cube(cube).and_then(|c| c.joins.get(other)) {
            return Some((true, j));
        }
        if let Some(j) = self.registry.cube(other).and_then(|c| c.joins.get(cube)) {
            return Some((false, j));
        }
        None
    }

    fn build_cte(
        &self,
        cube: &str,
        query: &SemanticQuery,
        last_hop: &super::join_resolver::JoinHop<'_>,
        used_cubes: &BTreeSet<String>,
    ) -> PreAggregationCte {
        let join_keys: Vec<String> = last_hop
            .join
            .on
            .iter()
            .map(|on| {
                let cube_side = if last_hop.declared_by_from {
                    &on.right
                } else {
                    &on.left
                };
                cube_expr_name(cube_side)
            })
            .collect();

        let mut measures: Vec<String> = query
            .measures
            .iter()
            .filter_map(|m| {
                split_member_ref(m).and_then(|r| {
                    if r.cube == cube {
                        Some(r.member.to_string())
                    } else {
                        None
                    }
                })
            })
            .collect();

        // Base measures required by post-aggregation window functions on
        // this cube's own measures must also be pre-aggregated in the CTE,
        // even when not directly requested.
        if let Some(cc) = self.registry.cube(cube) {
            let mut extra = Vec::new();
            for name in &measures {
                if let Some(m) = cc.measures.get(name) {
                    if let crate::model::MeasureType::Window { config, .. } = &m.measure_type {
                        if let Some(base) = &config.measure {
                            if !measures.contains(base) && !extra.contains(base) {
                                extra.push(base.clone());
                            }
                        }
                    }
                }
            }
            measures.extend(extra);
        }

        // Propagating filters: simple (or same-cube-only logical) filters
        // declared on a sibling cube S with a hasMany edge onto this CTE's
        // cube. Filters on the CTE's own cube are rendered directly into
        // the CTE's WHERE by `CTEBuilder`, not tracked here.
        let propagating_filters: Vec<Filter> = query
            .filters
            .iter()
            .filter(|f| self.is_propagating_filter(f, cube))
            .cloned()
            .collect();

        // Downstream join keys: FK columns kept so a cube `d` whose
        // dimensions appear in the query, and which is directly joined from
        // this CTE's cube, can be joined through the CTE alias rather than
        // requiring its own separate join path.
        let mut downstream_join_keys: Vec<String> = Vec::new();
        for d in used_cubes {
            if d == cube {
                continue;
            }
            let has_dimension = query.dimensions.iter().any(|dim| {
                split_member_ref(dim).map(|r| r.cube == d.as_str()).unwrap_or(false)
            });
            if !has_dimension {
                continue;
            }
            if let Some((cube_is_declaring, join)) = self.direct_join(cube, d) {
                for on in &join.on {
                    let cube_side = if cube_is_declaring { &on.left } else { &on.right };
                    let key = cube_expr_name(cube_side);
                    if !downstream_join_keys.contains(&key) {
                        downstream_join_keys.push(key);
                    }
                }
            }
        }

        let cte_alias = format!("{}_cte", to_snake(cube));
        let join_condition = last_hop.build_condition(&last_hop.from_cube, &cte_alias);

        PreAggregationCte {
            cube: cube.to_string(),
            anchor_cube: last_hop.from_cube.clone(),
            join_condition,
            cte_alias,
            join_keys,
            measures,
            propagating_filters,
            downstream_join_keys,
            cte_type: CteType::FanOutAggregate,
        }
    }

    /// A filter propagates onto `cte_cube` when every leaf it touches
    /// belongs to the same sibling cube `S`, `S != cte_cube`, and `S` has a
    /// `hasMany`/`belongsToMany` edge directly onto `cte_cube`. Per §3, an OR
    /// filter whose branches span multiple cubes is never decomposed this
    /// way.
    fn is_propagating_filter(&self, filter: &Filter, cte_cube: &str) -> bool {
        let refs = filter.member_refs();
        let Some(first) = refs.first() else { return false };
        let Some(owner) = split_member_ref(first).map(|r| r.cube.to_string()) else {
            return false;
        };
        if owner == cte_cube {
            return false;
        }
        let same_owner = refs.iter().all(|m| {
            split_member_ref(m).map(|r| r.cube == owner).unwrap_or(false)
        });
        if !same_owner {
            return false;
        }
        self.registry
            .cube(&owner)
            .and_then(|c| c.joins.get(cte_cube))
            .map(|j| j.relationship.is_fan_out())
            .unwrap_or(false)
    }
}

fn used_cubes_as_preferred(used_cubes: &BTreeSet<String>) -> HashSet<String> {
    used_cubes.iter().cloned().collect()
}

fn cube_expr_name(expr: &CubeExpr) -> String {
    match expr {
        CubeExpr::Column(name) => name.clone(),
        CubeExpr::Raw(sql) => sql.clone(),
    }
}

fn through_condition(
    through: &crate::model::Through,
    junction_alias: &str,
    target_alias: &str,
) -> crate::sql::expr::Expr {
    use crate::sql::expr::ExprExt;
    let mut conjuncts = through.on.iter().map(|on| {
        on.left
            .isolated()
            .resolve(junction_alias)
            .eq(on.right.isolated().resolve(target_alias))
    });
    let first = conjuncts.next().expect("through.on must have at least one pair");
    conjuncts.fold(first, |acc, next| acc.and(next))
}

fn to_snake(name: &str) -> String {
    let mut out = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
