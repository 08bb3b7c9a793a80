//! Dependency ordering for plugin startup
//!
//! Edges point from a dependency to its dependents. A dependency that names a
//! plugin outside the manifest set is optional: it is logged and dropped.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;

/// Topologically sort manifests so every dependency precedes its dependents.
///
/// The ready queue is kept in ID order, so the result is identical across runs
/// for the same input. Any IDs left over after the sort form (or depend on) a
/// cycle and are reported together.
pub fn build_startup_order(manifests: &[PluginManifest]) -> PluginResult<Vec<String>> {
    let known: HashSet<&str> = manifests.iter().map(|m| m.id.as_str()).collect();

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for manifest in manifests {
        in_degree.entry(manifest.id.as_str()).or_insert(0);
    }

    for manifest in manifests {
        for dep in unique_deps(manifest) {
            if !known.contains(dep) {
                tracing::warn!(
                    target: "plugin_graph",
                    plugin_id = %manifest.id,
                    missing_dependency = %dep,
                    "Plugin has missing dependency, treating as optional"
                );
                continue;
            }
            dependents.entry(dep).or_default().push(manifest.id.as_str());
            *in_degree.entry(manifest.id.as_str()).or_insert(0) += 1;
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.to_string());

        if let Some(children) = dependents.get(id) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
    }

    if order.len() != in_degree.len() {
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut plugins: Vec<String> = in_degree
            .keys()
            .filter(|id| !ordered.contains(*id))
            .map(|id| id.to_string())
            .collect();
        plugins.sort();
        return Err(PluginError::CircularDependency { plugins });
    }

    Ok(order)
}

/// Group a startup order into levels that can be launched concurrently.
///
/// Level `k` holds every remaining plugin whose known dependencies are all in
/// levels `0..k`. If nothing can make progress the remainder becomes one final
/// level. IDs within a level are sorted.
pub fn group_by_dependency_level(
    order: &[String],
    manifests: &[PluginManifest],
) -> Vec<Vec<String>> {
    let by_id: HashMap<&str, &PluginManifest> =
        manifests.iter().map(|m| (m.id.as_str(), m)).collect();

    let mut levels = Vec::new();
    let mut started: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|id| by_id.contains_key(id))
        .collect();

    while !remaining.is_empty() {
        let (mut level, rest): (Vec<&str>, Vec<&str>) = remaining.into_iter().partition(|id| {
            by_id[*id]
                .dependencies
                .iter()
                .filter(|dep| dep.as_str() != *id && by_id.contains_key(dep.as_str()))
                .all(|dep| started.contains(dep.as_str()))
        });

        let rest = if level.is_empty() {
            // No progress possible; force the remainder into a final level
            level = rest;
            Vec::new()
        } else {
            rest
        };

        level.sort_unstable();
        level.dedup();
        started.extend(level.iter().copied());
        levels.push(level.into_iter().map(String::from).collect());
        remaining = rest;
    }

    levels
}

fn unique_deps(manifest: &PluginManifest) -> BTreeSet<&str> {
    manifest
        .dependencies
        .iter()
        .map(String::as_str)
        .filter(|dep| *dep != manifest.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, deps: &[&str]) -> PluginManifest {
        deps.iter()
            .fold(PluginManifest::new(id, "1.0.0"), |m, dep| m.with_dependency(*dep))
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let manifests = vec![
            manifest("recording", &["core-events", "streaming"]),
            manifest("streaming", &["core-api"]),
            manifest("core-events", &[]),
            manifest("core-api", &["core-events"]),
            manifest("detection", &["streaming"]),
        ];

        let order = build_startup_order(&manifests).unwrap();
        assert_eq!(order.len(), manifests.len());
        for m in &manifests {
            for dep in &m.dependencies {
                assert!(position(&order, dep) < position(&order, &m.id));
            }
        }
    }

    #[test]
    fn test_order_is_deterministic() {
        let forward = vec![
            manifest("c", &[]),
            manifest("a", &[]),
            manifest("b", &["a"]),
            manifest("d", &[]),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let first = build_startup_order(&forward).unwrap();
        assert_eq!(first, vec!["a", "b", "c", "d"]);
        for _ in 0..10 {
            assert_eq!(build_startup_order(&forward).unwrap(), first);
            assert_eq!(build_startup_order(&reversed).unwrap(), first);
        }
    }

    #[test]
    fn test_cycle_names_every_unresolved_id() {
        let manifests = vec![
            manifest("a", &["c"]),
            manifest("b", &["a"]),
            manifest("c", &["b"]),
            manifest("d", &["c"]),
            manifest("free", &[]),
        ];

        match build_startup_order(&manifests) {
            Err(PluginError::CircularDependency { plugins }) => {
                assert_eq!(plugins, vec!["a", "b", "c", "d"]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_dependency_is_optional() {
        let manifests = vec![manifest("a", &["not-installed"]), manifest("b", &["a"])];
        let order = build_startup_order(&manifests).unwrap();
        assert_eq!(order, vec!["a", "b"]);

        let levels = group_by_dependency_level(&order, &manifests);
        assert_eq!(levels, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_self_and_duplicate_dependencies_ignored() {
        let manifests = vec![manifest("a", &["a"]), manifest("b", &["a", "a"])];
        let order = build_startup_order(&manifests).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_diamond_levels() {
        let manifests = vec![
            manifest("D", &["B", "C"]),
            manifest("C", &["A"]),
            manifest("B", &["A"]),
            manifest("A", &[]),
        ];
        let order = build_startup_order(&manifests).unwrap();
        let levels = group_by_dependency_level(&order, &manifests);
        assert_eq!(levels, vec![vec!["A"], vec!["B", "C"], vec!["D"]]);
    }

    #[test]
    fn test_every_id_in_exactly_one_level() {
        let manifests = vec![
            manifest("api", &["events"]),
            manifest("events", &[]),
            manifest("config", &[]),
            manifest("ui", &["api", "config"]),
            manifest("camera", &["events"]),
        ];
        let order = build_startup_order(&manifests).unwrap();
        let levels = group_by_dependency_level(&order, &manifests);

        let mut flattened: Vec<String> = levels.iter().flatten().cloned().collect();
        flattened.sort();
        let mut expected: Vec<String> = manifests.iter().map(|m| m.id.clone()).collect();
        expected.sort();
        assert_eq!(flattened, expected);
        assert_eq!(levels[0], vec!["config", "events"]);
    }

    #[test]
    fn test_stalled_levels_fall_back_to_final_level() {
        // Levels are computed directly from an order that still contains a cycle
        let manifests = vec![manifest("root", &[]), manifest("x", &["y"]), manifest("y", &["x"])];
        let order: Vec<String> = vec!["root".into(), "y".into(), "x".into()];

        let levels = group_by_dependency_level(&order, &manifests);
        assert_eq!(levels, vec![vec!["root"], vec!["x", "y"]]);
    }
}
