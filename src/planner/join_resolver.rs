//! `JoinPathResolver`: shortest-path resolution over the graph implied by
//! cube `joins` declarations, with a preference-aware variant used when
//! several equally-short paths exist.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;

use crate::error::PlanningError;
use crate::model::{CubeRegistry, Join};
use crate::sql::expr::{Expr, ExprExt};

/// One hop in a resolved join path: the cube being joined in, the join
/// definition that connects it to its neighbor on the path, and which side
/// of that join's `on[]` pairs the neighbor occupies.
#[derive(Debug, Clone)]
pub struct JoinHop<'r> {
    pub from_cube: String,
    pub to_cube: String,
    pub join: &'r Join,
    /// True when `from_cube` is the cube that declared `join` (so `on[].left`
    /// resolves against `from_cube` and `on[].right` against `to_cube`).
    /// False when the path traverses the edge in the opposite direction.
    pub declared_by_from: bool,
}

impl<'r> JoinHop<'r> {
    /// The join condition for this hop, given the SQL aliases chosen for
    /// each side (normally the cube name itself, or a CTE alias).
    pub fn build_condition(&self, from_alias: &str, to_alias: &str) -> Expr {
        let (declaring_alias, target_alias) = if self.declared_by_from {
            (from_alias, to_alias)
        } else {
            (to_alias, from_alias)
        };
        build_join_condition(self.join, declaring_alias, target_alias)
    }
}

/// Fold a join's `on[]` equalities (or custom comparator) into a single
/// AND-ed condition, resolved against the given declaring-side and
/// target-side aliases.
pub fn build_join_condition(join: &Join, declaring_alias: &str, target_alias: &str) -> Expr {
    let mut conjuncts = join.on.iter().map(|on| {
        let left = on.left.isolated().resolve(declaring_alias);
        let right = on.right.isolated().resolve(target_alias);
        match join.comparator {
            Some(op) => Expr::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            },
            None => left.eq(right),
        }
    });
    let first = conjuncts
        .next()
        .expect("join.on must have at least one pair");
    conjuncts.fold(first, |acc, next| acc.and(next))
}

type PathCacheKey = (String, String, Vec<String>);

/// Resolves shortest join paths between cubes, caching results for the
/// lifetime of the resolver (normally the lifetime of a single request,
/// since exclusion sets vary per-query).
pub struct JoinPathResolver<'r> {
    registry: &'r CubeRegistry,
    cache: DashMap<PathCacheKey, Option<Vec<JoinHopKey>>>,
}

/// A hop recorded in the cache: cube names only, re-resolved against the
/// registry (and thus against a live `&Join` borrow) on lookup.
#[derive(Debug, Clone)]
struct JoinHopKey {
    from_cube: String,
    to_cube: String,
    declared_by_from: bool,
}

impl<'r> JoinPathResolver<'r> {
    pub fn new(registry: &'r CubeRegistry) -> Self {
        Self {
            registry,
            cache: DashMap::new(),
        }
    }

    fn cache_key(from: &str, to: &str, excluded: &HashSet<String>) -> PathCacheKey {
        let mut excluded: Vec<String> = excluded.iter().cloned().collect();
        excluded.sort();
        (from.to_string(), to.to_string(), excluded)
    }

    /// Neighbors of `cube` reachable via a declared join, in either
    /// direction: cubes declare joins as directed edges, but the join graph
    /// is traversed as undirected.
    fn neighbors(&self, cube: &str) -> Vec<JoinHopKey> {
        let mut hops = Vec::new();
        if let Some(c) = self.registry.cube(cube) {
            for join in c.joins.values() {
                hops.push(JoinHopKey {
                    from_cube: cube.to_string(),
                    to_cube: join.target_cube.clone(),
                    declared_by_from: true,
                });
            }
        }
        for other in self.registry.cubes() {
            if other.name == cube {
                continue;
            }
            if other.joins.contains_key(cube) {
                hops.push(JoinHopKey {
                    from_cube: cube.to_string(),
                    to_cube: other.name.clone(),
                    declared_by_from: false,
                });
            }
        }
        hops
    }

    /// BFS shortest path from `from` to `to`, skipping any cube in `excluded`
    /// (which may include `from`/`to` themselves if the caller asks for it,
    /// though that degenerates to "no path").
    pub fn find_path(
        &self,
        from: &str,
        to: &str,
        excluded: &HashSet<String>,
    ) -> Option<Vec<JoinHop<'r>>> {
        if from == to {
            return Some(Vec::new());
        }

        let key = Self::cache_key(from, to, excluded);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone().map(|keys| self.materialize(keys));
        }

        let paths = self.all_shortest_path_keys(from, to, excluded);
        let result = paths.into_iter().next();

        self.cache.insert(key, result.clone());
        result.map(|keys| self.materialize(keys))
    }

    /// BFS over the join graph tracking every predecessor that lies on a
    /// shortest path to each cube, then reconstructs every shortest
    /// `from -> to` path. `find_path` just takes the first.
    fn all_shortest_path_keys(
        &self,
        from: &str,
        to: &str,
        excluded: &HashSet<String>,
    ) -> Vec<Vec<JoinHopKey>> {
        let mut distance: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut predecessors: std::collections::HashMap<String, Vec<JoinHopKey>> =
            std::collections::HashMap::new();
        distance.insert(from.to_string(), 0);
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            let current_dist = distance[&current];
            for hop in self.neighbors(&current) {
                if excluded.contains(&hop.to_cube) {
                    continue;
                }
                match distance.get(&hop.to_cube) {
                    None => {
                        distance.insert(hop.to_cube.clone(), current_dist + 1);
                        predecessors.insert(hop.to_cube.clone(), vec![hop.clone()]);
                        queue.push_back(hop.to_cube.clone());
                    }
                    Some(&d) if d == current_dist + 1 => {
                        predecessors.entry(hop.to_cube.clone()).or_default().push(hop.clone());
                    }
                    _ => {}
                }
            }
        }

        if !distance.contains_key(to) {
            return Vec::new();
        }

        let mut paths = Vec::new();
        // Recursive backtrack: build every path from `to` back to `from` by
        // branching over each predecessor; reverse once complete.
        fn backtrack(
            cursor: &str,
            from: &str,
            predecessors: &std::collections::HashMap<String, Vec<JoinHopKey>>,
            acc: &mut Vec<JoinHopKey>,
            out: &mut Vec<Vec<JoinHopKey>>,
        ) {
            if cursor == from {
                let mut path = acc.clone();
                path.reverse();
                out.push(path);
                return;
            }
            let Some(hops) = predecessors.get(cursor) else {
                return;
            };
            for hop in hops {
                acc.push(hop.clone());
                backtrack(&hop.from_cube.clone(), from, predecessors, acc, out);
                acc.pop();
            }
        }
        let mut acc = Vec::new();
        backtrack(to, from, &predecessors, &mut acc, &mut paths);
        paths
    }

    /// DFS enumeration of every simple (no repeated cube) path from `from`
    /// to `to` with at most `max_depth` hops, skipping `excluded`. Used by
    /// `find_path_preferring` instead of `all_shortest_path_keys` so a
    /// longer path that routes through a cube whose measures appear in the
    /// query can still outscore the shortest one.
    fn all_simple_path_keys(
        &self,
        from: &str,
        to: &str,
        excluded: &HashSet<String>,
        max_depth: usize,
    ) -> Vec<Vec<JoinHopKey>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from.to_string());
        let mut acc = Vec::new();
        let mut out = Vec::new();
        self.dfs_simple_paths(from, to, excluded, max_depth, &mut visited, &mut acc, &mut out);
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_simple_paths(
        &self,
        current: &str,
        to: &str,
        excluded: &HashSet<String>,
        max_depth: usize,
        visited: &mut HashSet<String>,
        acc: &mut Vec<JoinHopKey>,
        out: &mut Vec<Vec<JoinHopKey>>,
    ) {
        if current == to {
            out.push(acc.clone());
            return;
        }
        if acc.len() >= max_depth {
            return;
        }
        for hop in self.neighbors(current) {
            if excluded.contains(&hop.to_cube) || visited.contains(&hop.to_cube) {
                continue;
            }
            visited.insert(hop.to_cube.clone());
            acc.push(hop.clone());
            let next = hop.to_cube.clone();
            self.dfs_simple_paths(&next, to, excluded, max_depth, visited, acc, out);
            acc.pop();
            visited.remove(&next);
        }
    }

    fn materialize(&self, keys: Vec<JoinHopKey>) -> Vec<JoinHop<'r>> {
        keys.into_iter()
            .map(|k| {
                let declaring = if k.declared_by_from {
                    &k.from_cube
                } else {
                    &k.to_cube
                };
                let target = if k.declared_by_from {
                    &k.to_cube
                } else {
                    &k.from_cube
                };
                let join = self
                    .registry
                    .cube(declaring)
                    .and_then(|c| c.joins.get(target))
                    .expect("cached path hop must resolve against a live join");
                JoinHop {
                    from_cube: k.from_cube,
                    to_cube: k.to_cube,
                    join,
                    declared_by_from: k.declared_by_from,
                }
            })
            .collect()
    }

    /// Whether every cube in `targets` is reachable from `from`, skipping
    /// `excluded`.
    pub fn can_reach_all(&self, from: &str, targets: &[&str], excluded: &HashSet<String>) -> bool {
        targets
            .iter()
            .all(|t| self.find_path(from, t, excluded).is_some())
    }

    /// Maximum hop count `find_path_preferring` explores when enumerating
    /// candidate paths. A longer path can still outscore a shorter one when
    /// it routes through more `preferred` cubes, so the search isn't
    /// bounded to shortest paths the way `find_path` is.
    const PREFERRING_MAX_DEPTH: usize = 4;

    /// Like `find_path`, but enumerates every simple path up to
    /// `PREFERRING_MAX_DEPTH` hops (not just the shortest ones) and scores
    /// each, returning the path to the highest-scoring candidate. This lets
    /// a longer path that routes through a cube whose measures appear in
    /// the query outscore a shorter path that doesn't.
    ///
    /// Score = `10 * first_hop_preferred_for` (1 if the first hop's join
    /// lists `to` in `preferred_for`, else 0) `+ |path_cubes ∩ preferred|
    /// - (path_length - 1)`. Ties break first by whether the path reuses
    /// already-processed cubes (preferred, since it avoids adding a new join
    /// to the plan), then by shorter path length.
    pub fn find_path_preferring(
        &self,
        from: &str,
        to: &str,
        excluded: &HashSet<String>,
        preferred: &HashSet<String>,
        already_processed: &HashSet<String>,
    ) -> Option<Vec<JoinHop<'r>>> {
        let candidate_keys = self.all_simple_path_keys(from, to, excluded, Self::PREFERRING_MAX_DEPTH);
        if candidate_keys.is_empty() {
            return None;
        }

        let mut best: Option<(i64, bool, usize, Vec<JoinHop<'r>>)> = None;
        for keys in candidate_keys {
            let path = self.materialize(keys);
            let (score, reuses, len) =
                Self::score_path(&path, to, preferred, already_processed);
            let better = match &best {
                None => true,
                Some((b_score, b_reuses, b_len, _)) => {
                    score > *b_score
                        || (score == *b_score && reuses && !*b_reuses)
                        || (score == *b_score && reuses == *b_reuses && len < *b_len)
                }
            };
            if better {
                best = Some((score, reuses, len, path));
            }
        }
        best.map(|(_, _, _, path)| path)
    }

    /// Score a resolved path per the preference formula. Exposed separately
    /// so callers comparing several candidate paths (e.g. several possible
    /// primary cubes) can rank without re-running BFS.
    pub fn score_path(
        path: &[JoinHop<'_>],
        to: &str,
        preferred: &HashSet<String>,
        already_processed: &HashSet<String>,
    ) -> (i64, bool, usize) {
        let first_hop_preferred = path
            .first()
            .map(|h| h.join.preferred_for.iter().any(|c| c == to))
            .unwrap_or(false);
        let path_cubes: HashSet<&str> = path
            .iter()
            .flat_map(|h| [h.from_cube.as_str(), h.to_cube.as_str()])
            .collect();
        let overlap = path_cubes.iter().filter(|c| preferred.contains(**c)).count();
        let score = 10 * (first_hop_preferred as i64) + overlap as i64 - (path.len() as i64 - 1);
        let reuses_processed = path
            .iter()
            .any(|h| already_processed.contains(&h.to_cube));
        (score, reuses_processed, path.len())
    }

    pub fn resolve_unreachable(&self, to: &str) -> PlanningError {
        PlanningError::UnreachableJoin(to.to_string())
    }
}
