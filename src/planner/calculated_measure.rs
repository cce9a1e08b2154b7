//! `CalculatedMeasureResolver`: dependency extraction and topological
//! ordering for `calculated` measures (`calculatedSql` templates referencing
//! other measures as `{name}` or `{Cube.name}`).

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::PlanningError;
use crate::model::{CubeRegistry, MeasureType};

static TEMPLATE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)?)\}").unwrap());

/// Extract every `{x}`/`{Cube.x}` reference from a `calculatedSql` template,
/// normalizing bare `{x}` refs to `Cube.x` using `owner_cube`.
pub fn extract_template_refs(template: &str, owner_cube: &str) -> Vec<String> {
    TEMPLATE_REF
        .captures_iter(template)
        .map(|cap| {
            let raw = cap.get(1).unwrap().as_str();
            if raw.contains('.') {
                raw.to_string()
            } else {
                format!("{owner_cube}.{raw}")
            }
        })
        .collect()
}

/// Resolves calculated-measure dependency order for a requested set of
/// measures, failing on unknown references or circular dependencies.
pub struct CalculatedMeasureResolver<'r> {
    registry: &'r CubeRegistry,
}

impl<'r> CalculatedMeasureResolver<'r> {
    pub fn new(registry: &'r CubeRegistry) -> Self {
        Self { registry }
    }

    /// The direct dependencies of `Cube.measure`: `measure.dependencies` if
    /// explicitly declared, otherwise extracted from the `calculatedSql`
    /// template (non-calculated measures have none).
    fn direct_dependencies(&self, reference: &str) -> Result<Vec<String>, PlanningError> {
        let (cube, name) = reference
            .split_once('.')
            .ok_or_else(|| PlanningError::UnknownCalculatedMeasureRef(reference.to_string(), reference.to_string()))?;
        let measure = self
            .registry
            .measure(cube, name)
            .ok_or_else(|| PlanningError::UnknownCalculatedMeasureRef(reference.to_string(), reference.to_string()))?;

        if let Some(deps) = &measure.dependencies {
            return Ok(deps
                .iter()
                .map(|d| {
                    if d.contains('.') {
                        d.clone()
                    } else {
                        format!("{cube}.{d}")
                    }
                })
                .collect());
        }

        match &measure.measure_type {
            MeasureType::Calculated { template } => Ok(extract_template_refs(template, cube)),
            _ => Ok(Vec::new()),
        }
    }

    /// Build the dependency subgraph induced by `requested` (every
    /// transitively-reachable calculated measure), validating every edge
    /// points at a real member, then return a topological order with
    /// dependencies before dependents. Errors on unknown references or
    /// cycles, reporting the offending cycle path.
    pub fn resolve_order(&self, requested: &[String]) -> Result<Vec<String>, PlanningError> {
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        let mut stack: Vec<String> = requested.to_vec();
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(node) = stack.pop() {
            if graph.contains_key(&node) {
                continue;
            }
            let deps = self.direct_dependencies(&node)?;
            for dep in &deps {
                if dep == &node {
                    return Err(PlanningError::CircularCalculatedMeasure(format!(
                        "{node} -> {node}"
                    )));
                }
                if !seen.contains(dep) {
                    seen.insert(dep.clone());
                    stack.push(dep.clone());
                }
            }
            graph.insert(node.clone(), deps);
        }

        self.topological_sort(&graph, requested)
    }

    /// Kahn's algorithm: a node becomes ready once every dependency it
    /// names has already been emitted.
    fn topological_sort(
        &self,
        graph: &HashMap<String, Vec<String>>,
        requested: &[String],
    ) -> Result<Vec<String>, PlanningError> {
        let mut remaining_deps: HashMap<&str, usize> = graph
            .iter()
            .map(|(k, deps)| (k.as_str(), deps.len()))
            .collect();

        let mut queue: std::collections::VecDeque<&str> = remaining_deps
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(k, _)| *k)
            .collect();

        let mut order: Vec<String> = Vec::new();
        let mut emitted: HashSet<&str> = HashSet::new();

        while let Some(node) = queue.pop_front() {
            if emitted.contains(node) {
                continue;
            }
            emitted.insert(node);
            order.push(node.to_string());

            for (candidate, deps) in graph {
                if emitted.contains(candidate.as_str()) {
                    continue;
                }
                if deps.iter().any(|d| d == node) {
                    let count = remaining_deps.entry(candidate.as_str()).or_insert(0);
                    if *count > 0 {
                        *count -= 1;
                    }
                    if *count == 0 {
                        queue.push_back(candidate.as_str());
                    }
                }
            }
        }

        if order.len() < graph.len() {
            let cycle = self.find_cycle(graph, requested);
            return Err(PlanningError::CircularCalculatedMeasure(cycle));
        }

        Ok(order)
    }

    /// DFS-based cycle detection, used only to build a human-readable
    /// offending path once Kahn's algorithm has already determined a cycle
    /// exists.
    fn find_cycle(&self, graph: &HashMap<String, Vec<String>>, requested: &[String]) -> String {
        let mut visiting: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut path: Vec<String> = Vec::new();

        fn dfs(
            node: &str,
            graph: &HashMap<String, Vec<String>>,
            visiting: &mut HashSet<String>,
            visited: &mut HashSet<String>,
            path: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            if visiting.contains(node) {
                let start = path.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].to_vec();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            if visited.contains(node) {
                return None;
            }
            visiting.insert(node.to_string());
            path.push(node.to_string());
            if let Some(deps) = graph.get(node) {
                for dep in deps {
                    if let Some(cycle) = dfs(dep, graph, visiting, visited, path) {
                        return Some(cycle);
                    }
                }
            }
            path.pop();
            visiting.remove(node);
            visited.insert(node.to_string());
            None
        }

        for root in requested {
            if let Some(cycle) = dfs(root, graph, &mut visiting, &mut visited, &mut path) {
                return cycle.join(" -> ");
            }
        }
        "unknown cycle".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AggregationType, Cube, CubeExpr, CubeRegistry, Measure};

    fn registry_with_calculated() -> CubeRegistry {
        let mut reg = CubeRegistry::new();
        reg.register(
            Cube::new("Orders", CubeExpr::raw("orders"))
                .with_measure(Measure::simple(
                    "revenue",
                    AggregationType::Sum,
                    CubeExpr::column("amount"),
                ))
                .with_measure(Measure::count("count"))
                .with_measure(Measure::calculated(
                    "aov",
                    "{revenue} / NULLIF({count}, 0)",
                ))
                .with_measure(Measure::calculated(
                    "aov_pct",
                    "{aov} * 100",
                )),
        );
        reg
    }

    #[test]
    fn extracts_bare_and_qualified_refs() {
        let refs = extract_template_refs("{revenue} / NULLIF({Orders.count}, 0)", "Orders");
        assert_eq!(refs, vec!["Orders.revenue", "Orders.count"]);
    }

    #[test]
    fn orders_dependencies_before_dependents() {
        let reg = registry_with_calculated();
        let resolver = CalculatedMeasureResolver::new(&reg);
        let order = resolver
            .resolve_order(&["Orders.aov_pct".to_string()])
            .unwrap();
        let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(pos("Orders.revenue") < pos("Orders.aov"));
        assert!(pos("Orders.count") < pos("Orders.aov"));
        assert!(pos("Orders.aov") < pos("Orders.aov_pct"));
    }

    #[test]
    fn unknown_ref_rejected() {
        let mut reg = CubeRegistry::new();
        reg.register(
            Cube::new("Orders", CubeExpr::raw("orders"))
                .with_measure(Measure::calculated("bad", "{Orders.missing}")),
        );
        let resolver = CalculatedMeasureResolver::new(&reg);
        let err = resolver
            .resolve_order(&["Orders.bad".to_string()])
            .unwrap_err();
        assert!(matches!(err, PlanningError::UnknownCalculatedMeasureRef(..)));
    }

    #[test]
    fn self_reference_rejected() {
        let mut reg = CubeRegistry::new();
        reg.register(
            Cube::new("Orders", CubeExpr::raw("orders"))
                .with_measure(Measure::calculated("loopy", "{Orders.loopy} + 1")),
        );
        let resolver = CalculatedMeasureResolver::new(&reg);
        let err = resolver
            .resolve_order(&["Orders.loopy".to_string()])
            .unwrap_err();
        assert!(matches!(err, PlanningError::CircularCalculatedMeasure(_)));
    }

    #[test]
    fn mutual_cycle_rejected_with_path() {
        let mut reg = CubeRegistry::new();
        reg.register(
            Cube::new("Orders", CubeExpr::raw("orders"))
                .with_measure(Measure::calculated("a", "{Orders.b} + 1"))
                .with_measure(Measure::calculated("b", "{Orders.a} + 1")),
        );
        let resolver = CalculatedMeasureResolver::new(&reg);
        let err = resolver
            .resolve_order(&["Orders.a".to_string()])
            .unwrap_err();
        match err {
            PlanningError::CircularCalculatedMeasure(path) => {
                assert!(path.contains("Orders.a"));
                assert!(path.contains("Orders.b"));
            }
            other => panic!("expected circular dependency error, got {other:?}"),
        }
    }
}
