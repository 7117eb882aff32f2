//! The build graph: packages, the nodes they own, and the edges between them.

use crate::densemap::{dense_id, DenseMap};
use crate::error::{DuplicateUseError, GraphError};
use crate::layout;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

dense_id!(
    /// Id for a Package within a Graph.
    PackageId
);
dense_id!(
    /// Id for a Node within a Graph.
    NodeId
);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
}

/// Where a script or data file ends up: the public `dist/` tree, or the
/// package's private `priv/` directory.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Placement {
    Dist,
    Priv,
}

/// The closed set of things a node can be.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    SourceFile,
    StaticLibrary,
    DynamicLibrary,
    DistExecutable,
    UtilExecutable,
    TestExecutable,
    Script(Placement),
    Data(Placement),
    Doc,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::SourceFile => "source",
            NodeKind::StaticLibrary => "static-lib",
            NodeKind::DynamicLibrary => "dynamic-lib",
            NodeKind::DistExecutable => "dist-exe",
            NodeKind::UtilExecutable => "util-exe",
            NodeKind::TestExecutable => "test-exe",
            NodeKind::Script(Placement::Dist) => "dist-script",
            NodeKind::Script(Placement::Priv) => "priv-script",
            NodeKind::Data(Placement::Dist) => "dist-data",
            NodeKind::Data(Placement::Priv) => "priv-data",
            NodeKind::Doc => "doc",
        }
    }

    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            NodeKind::DistExecutable | NodeKind::UtilExecutable | NodeKind::TestExecutable
        )
    }

    /// Whether the node's own file under src/ feeds into its signature.
    pub fn has_content(&self) -> bool {
        match self {
            NodeKind::SourceFile | NodeKind::Script(_) | NodeKind::Data(_) | NodeKind::Doc => true,
            NodeKind::StaticLibrary
            | NodeKind::DynamicLibrary
            | NodeKind::DistExecutable
            | NodeKind::UtilExecutable
            | NodeKind::TestExecutable => false,
        }
    }

    /// Whether nodes of this kind consume object files via use edges.
    fn consumes_objects(&self) -> bool {
        matches!(self, NodeKind::StaticLibrary) || self.is_executable()
    }
}

#[derive(Debug)]
pub struct Package {
    /// Path relative to the source root, "" for the root package.
    pub path: String,
    pub parent: Option<PackageId>,
    pub visibility: Visibility,
    /// Position within the parent's contains list.
    pub order: usize,
    /// Contained packages, in declared (dependency) order.
    pub contains: Vec<PackageId>,
    pub refers: Vec<PackageId>,
    pub nodes: Vec<NodeId>,
}

impl Package {
    /// Name for display; the root package has an empty path.
    pub fn display_name(&self) -> &str {
        if self.path.is_empty() {
            "."
        } else {
            &self.path
        }
    }
}

#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub package: PackageId,
    pub kind: NodeKind,
    /// Global declaration index, the deterministic tie-break for scheduling.
    pub order: usize,
    pub visibility: Visibility,
    /// Required external libraries, in declared order.
    pub syslibs: Vec<String>,
    /// Reference edges, "depends on".
    pub refs: Vec<NodeId>,
    /// Use edges, object files (or for dynamic libraries, static libraries)
    /// this node consumes.
    pub uses: Vec<NodeId>,
    /// Reverse of refs and uses.
    pub dependents: Vec<NodeId>,
    /// The build artifact, relative to the build directory.
    pub output: Option<PathBuf>,
    /// The library or executable consuming this object file.
    consumer: Option<NodeId>,
    /// The dynamic library packaging this static library.
    packager: Option<NodeId>,
}

impl Node {
    /// All edges needed before this node builds: uses first, then references.
    pub fn deps(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.uses.iter().chain(self.refs.iter()).copied()
    }
}

pub struct Graph {
    packages: DenseMap<PackageId, Package>,
    nodes: DenseMap<NodeId, Node>,
    package_by_path: FxHashMap<String, PackageId>,
    node_by_identity: FxHashMap<String, NodeId>,
    outputs: FxHashMap<PathBuf, NodeId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn join(pkg: &str, name: &str) -> String {
    if pkg.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", pkg, name)
    }
}

impl Graph {
    /// A graph holding only the root package.
    pub fn new() -> Graph {
        let mut graph = Graph {
            packages: DenseMap::default(),
            nodes: DenseMap::default(),
            package_by_path: FxHashMap::default(),
            node_by_identity: FxHashMap::default(),
            outputs: FxHashMap::default(),
        };
        let root = graph.packages.push(Package {
            path: String::new(),
            parent: None,
            visibility: Visibility::Public,
            order: 0,
            contains: Vec::new(),
            refers: Vec::new(),
            nodes: Vec::new(),
        });
        graph.package_by_path.insert(String::new(), root);
        graph
    }

    pub fn root(&self) -> PackageId {
        PackageId::from(0)
    }

    /// Add a package contained by `parent`.  Order of calls for the same parent
    /// is the declared dependency order.
    pub fn add_package(
        &mut self,
        parent: PackageId,
        name: &str,
        visibility: Visibility,
    ) -> Result<PackageId, GraphError> {
        let path = join(&self.packages[parent].path, name);
        if self.package_by_path.contains_key(&path) {
            return Err(GraphError::Duplicate {
                what: "package",
                name: path,
            });
        }
        let order = self.packages[parent].contains.len();
        let id = self.packages.push(Package {
            path: path.clone(),
            parent: Some(parent),
            visibility,
            order,
            contains: Vec::new(),
            refers: Vec::new(),
            nodes: Vec::new(),
        });
        self.packages[parent].contains.push(id);
        self.package_by_path.insert(path, id);
        Ok(id)
    }

    pub fn add_refer(&mut self, from: PackageId, to: PackageId) {
        let refers = &mut self.packages[from].refers;
        if !refers.contains(&to) {
            refers.push(to);
        }
    }

    /// Add a node owned by `package`.  Nodes start out public, with the
    /// protection of their package applying on top.
    pub fn add_node(
        &mut self,
        package: PackageId,
        name: &str,
        kind: NodeKind,
    ) -> Result<NodeId, GraphError> {
        let identity = join(&self.packages[package].path, name);
        if self.node_by_identity.contains_key(&identity) {
            return Err(GraphError::Duplicate {
                what: "node",
                name: identity,
            });
        }
        let output = layout::output_path(&self.packages[package].path, name, &kind);
        let id = self.nodes.next_id();
        if let Some(out) = &output {
            if let Some(&other) = self.outputs.get(out) {
                return Err(GraphError::OutputClash {
                    a: self.identity(other),
                    b: identity,
                    path: out.display().to_string(),
                });
            }
            self.outputs.insert(out.clone(), id);
        }
        self.nodes.push(Node {
            name: name.to_string(),
            package,
            kind,
            order: id.0,
            visibility: Visibility::Public,
            syslibs: Vec::new(),
            refs: Vec::new(),
            uses: Vec::new(),
            dependents: Vec::new(),
            output,
            consumer: None,
            packager: None,
        });
        self.packages[package].nodes.push(id);
        self.node_by_identity.insert(identity, id);
        Ok(id)
    }

    pub fn set_visibility(&mut self, id: NodeId, visibility: Visibility) {
        self.nodes[id].visibility = visibility;
    }

    pub fn add_syslibs<'a>(&mut self, id: NodeId, libs: impl IntoIterator<Item = &'a str>) {
        let syslibs = &mut self.nodes[id].syslibs;
        for lib in libs {
            if !syslibs.iter().any(|l| l == lib) {
                syslibs.push(lib.to_string());
            }
        }
    }

    /// Record that `from` depends on `to`.
    pub fn add_reference(&mut self, from: NodeId, to: NodeId) {
        if self.nodes[from].refs.contains(&to) {
            return;
        }
        self.nodes[from].refs.push(to);
        self.nodes[to].dependents.push(from);
    }

    /// Record that `from` consumes `to`.  Enforces that an object file has a
    /// single consumer and a static library a single dynamic library.
    pub fn add_use(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        if self.nodes[from].uses.contains(&to) {
            return Ok(());
        }
        let from_kind = &self.nodes[from].kind;
        let to_kind = &self.nodes[to].kind;
        let slot_is_packager = match (from_kind, to_kind) {
            (k, NodeKind::SourceFile) if k.consumes_objects() => false,
            (NodeKind::DynamicLibrary, NodeKind::StaticLibrary) => true,
            _ => {
                return Err(GraphError::InvalidUse {
                    from: self.identity(from),
                    from_kind: from_kind.name(),
                    to: self.identity(to),
                    to_kind: to_kind.name(),
                })
            }
        };
        let target = &mut self.nodes[to];
        let slot = if slot_is_packager {
            &mut target.packager
        } else {
            &mut target.consumer
        };
        if let Some(first) = *slot {
            return Err(DuplicateUseError {
                target: self.identity(to),
                first: self.identity(first),
                second: self.identity(from),
            }
            .into());
        }
        *slot = Some(from);
        target.dependents.push(from);
        self.nodes[from].uses.push(to);
        Ok(())
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn lookup_package(&self, path: &str) -> Option<PackageId> {
        self.package_by_path.get(path).copied()
    }

    /// Look up a node by identity, `<package path>/<name>`.
    pub fn lookup_node(&self, identity: &str) -> Option<NodeId> {
        self.node_by_identity.get(identity).copied()
    }

    /// The stable name of a node, used as its key in the signature store.
    pub fn identity(&self, id: NodeId) -> String {
        let node = &self.nodes[id];
        join(&self.packages[node.package].path, &node.name)
    }

    /// `id` followed by each of its ancestors up to the root.
    pub fn ancestors(&self, id: PackageId) -> impl Iterator<Item = PackageId> + '_ {
        std::iter::successors(Some(id), move |&p| self.packages[p].parent)
    }

    /// Whether `id` is `ancestor` or lies in its subtree.
    pub fn is_within(&self, id: PackageId, ancestor: PackageId) -> bool {
        self.ancestors(id).any(|p| p == ancestor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let util = graph.add_package(graph.root(), "util", Visibility::Public)?;
        let io = graph.add_package(util, "io", Visibility::Protected)?;
        let lib = graph.add_node(io, "io", NodeKind::StaticLibrary)?;
        let top = graph.add_node(graph.root(), "main.c", NodeKind::SourceFile)?;
        assert_eq!(graph.identity(lib), "util/io/io");
        assert_eq!(graph.identity(top), "main.c");
        assert_eq!(graph.lookup_node("util/io/io"), Some(lib));
        assert_eq!(graph.lookup_package("util/io"), Some(io));
        assert_eq!(graph.package(io).display_name(), "util/io");
        assert_eq!(graph.package(graph.root()).display_name(), ".");
        assert!(graph.is_within(io, util));
        assert!(!graph.is_within(util, io));
        Ok(())
    }

    #[test]
    fn duplicate_names() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        graph.add_package(graph.root(), "a", Visibility::Public)?;
        assert!(matches!(
            graph.add_package(graph.root(), "a", Visibility::Public),
            Err(GraphError::Duplicate { what: "package", .. })
        ));
        graph.add_node(graph.root(), "x", NodeKind::Doc)?;
        assert!(graph.add_node(graph.root(), "x", NodeKind::Doc).is_err());
        Ok(())
    }

    #[test]
    fn object_has_one_consumer() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let root = graph.root();
        let src = graph.add_node(root, "a.c", NodeKind::SourceFile)?;
        let lib = graph.add_node(root, "a", NodeKind::StaticLibrary)?;
        let exe = graph.add_node(root, "app", NodeKind::DistExecutable)?;
        graph.add_use(lib, src)?;
        // Repeating the same use is harmless.
        graph.add_use(lib, src)?;
        match graph.add_use(exe, src) {
            Err(GraphError::DuplicateUse(err)) => {
                assert_eq!(err.target, "a.c");
                assert_eq!(err.first, "a");
                assert_eq!(err.second, "app");
            }
            other => panic!("expected duplicate use, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn static_lib_in_one_dynamic_lib() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let root = graph.root();
        let lib = graph.add_node(root, "core", NodeKind::StaticLibrary)?;
        let so1 = graph.add_node(root, "one", NodeKind::DynamicLibrary)?;
        let so2 = graph.add_node(root, "two", NodeKind::DynamicLibrary)?;
        graph.add_use(so1, lib)?;
        assert!(matches!(
            graph.add_use(so2, lib),
            Err(GraphError::DuplicateUse(_))
        ));
        Ok(())
    }

    #[test]
    fn use_kinds_are_checked() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let root = graph.root();
        let src = graph.add_node(root, "a.c", NodeKind::SourceFile)?;
        let so = graph.add_node(root, "so", NodeKind::DynamicLibrary)?;
        let data = graph.add_node(root, "table", NodeKind::Data(Placement::Dist))?;
        assert!(matches!(
            graph.add_use(so, src),
            Err(GraphError::InvalidUse { .. })
        ));
        assert!(matches!(
            graph.add_use(data, src),
            Err(GraphError::InvalidUse { .. })
        ));
        Ok(())
    }

    #[test]
    fn outputs_do_not_clash() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let a = graph.add_package(graph.root(), "a", Visibility::Public)?;
        let b = graph.add_package(graph.root(), "b", Visibility::Public)?;
        graph.add_node(a, "tool", NodeKind::DistExecutable)?;
        // Private executables land in per-package directories.
        graph.add_node(a, "check", NodeKind::TestExecutable)?;
        graph.add_node(b, "check", NodeKind::TestExecutable)?;
        assert!(matches!(
            graph.add_node(b, "tool", NodeKind::DistExecutable),
            Err(GraphError::OutputClash { .. })
        ));
        Ok(())
    }
}
