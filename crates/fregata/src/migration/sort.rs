//! Stable topological ordering of migrators.
//!
//! Kahn's algorithm with the ready set ordered by insertion index: among all
//! migrators whose dependencies are done, the earliest added runs first.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::{MigrateError, Result};
use crate::migrator::MigratorId;

/// Order `nodes` so every node comes after its dependencies.
///
/// `nodes[i]` is `(id, dependencies)`; the result holds indexes into `nodes`.
pub(crate) fn topological_order(nodes: &[(MigratorId, Vec<MigratorId>)]) -> Result<Vec<usize>> {
    let index: HashMap<&MigratorId, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (id, _))| (id, i))
        .collect();

    // dependencies[i]: indexes node i waits for; dependents[j]: nodes waiting for j
    let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(nodes.len());
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for (i, (id, deps)) in nodes.iter().enumerate() {
        let mut resolved = Vec::with_capacity(deps.len());
        for dep in deps {
            let &j = index
                .get(dep)
                .ok_or_else(|| MigrateError::UnknownDependency {
                    migrator: id.to_string(),
                    dependency: dep.to_string(),
                })?;
            if !resolved.contains(&j) {
                resolved.push(j);
                dependents[j].push(i);
            }
        }
        dependencies.push(resolved);
    }

    let mut waiting: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BinaryHeap<Reverse<usize>> = waiting
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &k in &dependents[i] {
            waiting[k] -= 1;
            if waiting[k] == 0 {
                ready.push(Reverse(k));
            }
        }
    }

    if order.len() < nodes.len() {
        return Err(MigrateError::CircularDependency {
            cycle: find_cycle(nodes, &dependencies, &waiting),
        });
    }

    Ok(order)
}

/// Walk unresolved dependencies from the first blocked node until a node
/// repeats. Every blocked node has at least one blocked dependency.
fn find_cycle(
    nodes: &[(MigratorId, Vec<MigratorId>)],
    dependencies: &[Vec<usize>],
    waiting: &[usize],
) -> Vec<String> {
    let Some(start) = waiting.iter().position(|&n| n > 0) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = dependencies[current].iter().find(|&&j| waiting[j] > 0) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..]
                .iter()
                .map(|&p| nodes[p].0.to_string())
                .collect();
            cycle.push(nodes[next].0.to_string());
            return cycle;
        }
        path.push(next);
        current = next;
    }

    path.iter().map(|&p| nodes[p].0.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &'static str, deps: &[&'static str]) -> (MigratorId, Vec<MigratorId>) {
        (
            MigratorId::from(id),
            deps.iter().map(|d| MigratorId::from(*d)).collect(),
        )
    }

    fn ids(nodes: &[(MigratorId, Vec<MigratorId>)], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| nodes[i].0.to_string()).collect()
    }

    #[test]
    fn test_independent_nodes_keep_insertion_order() {
        let nodes = vec![node("c", &[]), node("a", &[]), node("b", &[])];
        let order = topological_order(&nodes).unwrap();
        assert_eq!(ids(&nodes, &order), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let nodes = vec![
            node("order_lines", &["orders", "products"]),
            node("orders", &["customers"]),
            node("products", &[]),
            node("customers", &[]),
        ];
        let order = topological_order(&nodes).unwrap();
        assert_eq!(
            ids(&nodes, &order),
            vec!["products", "customers", "orders", "order_lines"]
        );
    }

    #[test]
    fn test_every_node_after_its_dependencies() {
        let nodes = vec![
            node("e", &["d", "b"]),
            node("d", &["a"]),
            node("c", &[]),
            node("b", &["a", "c"]),
            node("a", &[]),
            node("f", &["e", "e"]),
        ];
        let order = topological_order(&nodes).unwrap();
        assert_eq!(order.len(), nodes.len());

        let position: HashMap<usize, usize> =
            order.iter().enumerate().map(|(pos, &i)| (i, pos)).collect();
        for (i, (_, deps)) in nodes.iter().enumerate() {
            for dep in deps {
                let j = nodes.iter().position(|(id, _)| id == dep).unwrap();
                assert!(position[&j] < position[&i]);
            }
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let nodes = vec![node("x", &[]), node("a", &["b"]), node("b", &["a"])];
        match topological_order(&nodes) {
            Err(MigrateError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let nodes = vec![node("a", &["a"])];
        assert!(matches!(
            topological_order(&nodes),
            Err(MigrateError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_unknown_dependency() {
        let nodes = vec![node("a", &["ghost"])];
        match topological_order(&nodes) {
            Err(MigrateError::UnknownDependency {
                migrator,
                dependency,
            }) => {
                assert_eq!(migrator, "a");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected unknown dependency, got {:?}", other),
        }
    }
}
