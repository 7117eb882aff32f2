//! Structural checks run once over the whole graph before anything builds:
//! no cycles, and every edge respects visibility.
//!
//! Validation fails fast on the first problem, since the build cannot proceed
//! regardless.

use crate::densemap::Index;
use crate::error::{CycleDomain, CycleError, StructuralError, VisibilityError, VisibilityRule};
use crate::graph::{Graph, NodeId, PackageId, Visibility};
use rustc_hash::FxHashSet;

/// Dependency order of a validated graph: everything appears after the things
/// it depends on, with ties broken by declaration order.
#[derive(Debug)]
pub struct Order {
    pub packages: Vec<PackageId>,
    pub nodes: Vec<NodeId>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Postorder DFS over `adj`, starting from each vertex in index order and
/// following edges in list order.  Iterative, so deep graphs can't overflow
/// the stack.
fn topo_sort(
    adj: &[Vec<usize>],
    what: CycleDomain,
    name: impl Fn(usize) -> String,
) -> Result<Vec<usize>, CycleError> {
    let mut marks = vec![Mark::Unvisited; adj.len()];
    let mut order = Vec::with_capacity(adj.len());
    // Each entry is a vertex and the index of the next edge to follow.
    let mut stack: Vec<(usize, usize)> = Vec::new();
    for start in 0..adj.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        marks[start] = Mark::OnStack;
        stack.push((start, 0));
        while let Some(top) = stack.last_mut() {
            let (v, next) = *top;
            let w = match adj[v].get(next) {
                Some(&w) => w,
                None => {
                    marks[v] = Mark::Done;
                    order.push(v);
                    stack.pop();
                    continue;
                }
            };
            top.1 += 1;
            match marks[w] {
                Mark::Done => {}
                Mark::Unvisited => {
                    marks[w] = Mark::OnStack;
                    stack.push((w, 0));
                }
                Mark::OnStack => {
                    let mut path: Vec<String> = stack
                        .iter()
                        .skip_while(|&&(u, _)| u != w)
                        .map(|&(u, _)| name(u))
                        .collect();
                    path.push(name(w));
                    return Err(CycleError { what, path });
                }
            }
        }
    }
    Ok(order)
}

fn package_order(graph: &Graph) -> Result<Vec<PackageId>, CycleError> {
    let adj: Vec<Vec<usize>> = graph
        .packages()
        .map(|(_, pkg)| {
            pkg.contains
                .iter()
                .chain(pkg.refers.iter())
                .map(|p| p.index())
                .collect()
        })
        .collect();
    let order = topo_sort(&adj, CycleDomain::Package, |i| {
        graph.package(PackageId::from(i)).display_name().to_string()
    })?;
    Ok(order.into_iter().map(PackageId::from).collect())
}

fn node_order(graph: &Graph) -> Result<Vec<NodeId>, CycleError> {
    let adj: Vec<Vec<usize>> = graph
        .nodes()
        .map(|(_, node)| node.deps().map(|n| n.index()).collect())
        .collect();
    let order = topo_sort(&adj, CycleDomain::Node, |i| {
        graph.identity(NodeId::from(i))
    })?;
    Ok(order.into_iter().map(NodeId::from).collect())
}

/// Whether `pkg` is inside the scope a protected `level` is visible in: the
/// subtree of one of its siblings (itself included), not the parent itself.
fn within_siblings(graph: &Graph, pkg: PackageId, level: PackageId) -> bool {
    match graph.package(level).parent {
        None => true,
        Some(parent) => pkg != parent && graph.is_within(pkg, parent),
    }
}

fn check_protected(graph: &Graph, from: PackageId, to: NodeId) -> Result<(), VisibilityRule> {
    let node = graph.node(to);
    if node.visibility == Visibility::Protected && !within_siblings(graph, from, node.package) {
        return Err(VisibilityRule::Protected {
            scope: graph.identity(to),
        });
    }
    for level in graph.ancestors(node.package) {
        let pkg = graph.package(level);
        if pkg.visibility == Visibility::Protected && !within_siblings(graph, from, level) {
            return Err(VisibilityRule::Protected {
                scope: pkg.display_name().to_string(),
            });
        }
    }
    Ok(())
}

/// Whether some ancestor-or-self of `from` can see package `to`: through its
/// own subtree, through an earlier-declared sibling's subtree, or through
/// packages it transitively refers to.
fn reaches(graph: &Graph, from: PackageId, to: PackageId) -> bool {
    if graph.is_within(to, from) {
        return true;
    }
    let mut referred: FxHashSet<PackageId> = FxHashSet::default();
    let mut path_child: Option<PackageId> = None;
    for level in graph.ancestors(from) {
        let pkg = graph.package(level);
        if let Some(child) = path_child {
            let earlier = &pkg.contains[..graph.package(child).order];
            if earlier.iter().any(|&sib| graph.is_within(to, sib)) {
                return true;
            }
        }

        let mut pending: Vec<PackageId> = pkg.refers.clone();
        while let Some(r) = pending.pop() {
            if !referred.insert(r) {
                continue;
            }
            if graph.is_within(to, r) {
                return true;
            }
            pending.extend(graph.package(r).refers.iter().copied());
        }
        path_child = Some(level);
    }
    false
}

fn check_edge(graph: &Graph, from: NodeId, to: NodeId) -> Result<(), VisibilityError> {
    let from_pkg = graph.node(from).package;
    let to_pkg = graph.node(to).package;
    let rule = match check_protected(graph, from_pkg, to) {
        Err(rule) => Some(rule),
        Ok(()) if !reaches(graph, from_pkg, to_pkg) => Some(VisibilityRule::Unreachable {
            package: graph.package(to_pkg).display_name().to_string(),
        }),
        Ok(()) => None,
    };
    match rule {
        None => Ok(()),
        Some(rule) => Err(VisibilityError {
            from: graph.identity(from),
            to: graph.identity(to),
            rule,
        }),
    }
}

/// Check the whole graph, returning its dependency order.
pub fn validate(graph: &Graph) -> Result<Order, StructuralError> {
    let packages = package_order(graph)?;
    let nodes = node_order(graph)?;
    for (id, node) in graph.nodes() {
        for dep in node.deps() {
            check_edge(graph, id, dep)?;
        }
    }
    Ok(Order { packages, nodes })
}
