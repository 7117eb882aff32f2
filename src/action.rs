//! What running a node means: the commands and installs each node kind turns
//! into.  Commands themselves come from the Toolchain; this module only
//! decides which tool runs on which files.

use crate::graph::{Graph, NodeId, NodeKind};
use crate::layout;
use crate::toolchain::{Tool, Toolchain};
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};

/// Name of the environment variable holding a test run's scratch directory.
pub const SCRATCH_ENV: &str = "TEST_TMPDIR";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// A shell command line, run in the build directory.
    Command(String),
    /// Copy a file into place, optionally marking it executable.
    Install {
        from: PathBuf,
        to: PathBuf,
        executable: bool,
    },
}

/// The work behind one build or test-run step.  Paths are relative to the
/// build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Message shown while the action runs.
    pub desc: String,
    pub steps: Vec<Step>,
    /// Directories that must exist before the steps run.
    pub dirs: Vec<PathBuf>,
    /// Directory recreated empty before the steps run and exposed to them as
    /// SCRATCH_ENV.
    pub scratch: Option<PathBuf>,
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn parent_dir(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

/// Accumulates steps and the directories they write into.
struct Builder {
    steps: Vec<Step>,
    dirs: Vec<PathBuf>,
}

impl Builder {
    fn new() -> Self {
        Builder {
            steps: Vec::new(),
            dirs: Vec::new(),
        }
    }

    fn writes(&mut self, out: &Path) {
        if let Some(dir) = parent_dir(out) {
            if !self.dirs.contains(&dir) {
                self.dirs.push(dir);
            }
        }
    }

    fn command(&mut self, cmd: String, out: &Path) {
        self.writes(out);
        self.steps.push(Step::Command(cmd));
    }

    /// Compile each source this node uses, returning the object files.
    fn compile(&mut self, graph: &Graph, toolchain: &Toolchain, id: NodeId) -> Vec<String> {
        let mut objects = Vec::new();
        for &src in &graph.node(id).uses {
            let node = graph.node(src);
            let pkg = &graph.package(node.package).path;
            let Some(obj) = layout::object_path(pkg, &node.name) else {
                continue;
            };
            let input = path_str(&layout::source_path(pkg, &node.name));
            let cmd = toolchain.command(Tool::Compile, &[input], &path_str(&obj), &[]);
            self.command(cmd, &obj);
            objects.push(path_str(&obj));
        }
        objects
    }

    fn finish(self, desc: String, scratch: Option<PathBuf>) -> Action {
        Action {
            desc,
            steps: self.steps,
            dirs: self.dirs,
            scratch,
        }
    }
}

/// Libraries an executable links against, in link order: everything reachable
/// over reference edges, each library before the libraries it depends on.
pub fn link_libraries(graph: &Graph, id: NodeId) -> Vec<NodeId> {
    let mut visited: FxHashSet<NodeId> = FxHashSet::default();
    let mut post = Vec::new();
    let mut stack: Vec<(NodeId, usize)> = vec![(id, 0)];
    visited.insert(id);
    while let Some(top) = stack.last_mut() {
        let (cur, next) = *top;
        match graph.node(cur).refs.get(next) {
            Some(&dep) => {
                top.1 += 1;
                if visited.insert(dep) {
                    stack.push((dep, 0));
                }
            }
            None => {
                stack.pop();
                if cur != id {
                    post.push(cur);
                }
            }
        }
    }
    post.reverse();
    post.retain(|&lib| {
        matches!(
            graph.node(lib).kind,
            NodeKind::StaticLibrary | NodeKind::DynamicLibrary
        )
    });
    post
}

/// System libraries of a node and the libraries it links, deduplicated.
fn gather_syslibs(graph: &Graph, nodes: impl Iterator<Item = NodeId>) -> Vec<String> {
    let mut syslibs: Vec<String> = Vec::new();
    for id in nodes {
        for lib in &graph.node(id).syslibs {
            if !syslibs.contains(lib) {
                syslibs.push(lib.clone());
            }
        }
    }
    syslibs
}

fn output_of(graph: &Graph, id: NodeId) -> Option<&Path> {
    graph.node(id).output.as_deref()
}

/// The build action of a node, or None for nodes that only carry content.
pub fn build_action(graph: &Graph, toolchain: &Toolchain, id: NodeId) -> Option<Action> {
    let node = graph.node(id);
    let pkg = &graph.package(node.package).path;
    let identity = graph.identity(id);
    let mut b = Builder::new();
    let verb = match &node.kind {
        NodeKind::SourceFile | NodeKind::Doc => return None,
        NodeKind::StaticLibrary => {
            let out = output_of(graph, id)?;
            let objects = b.compile(graph, toolchain, id);
            let cmd = toolchain.command(Tool::Archive, &objects, &path_str(out), &[]);
            b.command(cmd, out);
            "archive"
        }
        NodeKind::DynamicLibrary => {
            let out = output_of(graph, id)?;
            let archives: Vec<String> = node
                .uses
                .iter()
                .filter_map(|&lib| output_of(graph, lib).map(path_str))
                .collect();
            let syslibs = gather_syslibs(graph, std::iter::once(id).chain(node.uses.iter().copied()));
            let cmd = toolchain.command(Tool::LinkDynamic, &archives, &path_str(out), &syslibs);
            b.command(cmd, out);
            "link"
        }
        NodeKind::DistExecutable | NodeKind::UtilExecutable | NodeKind::TestExecutable => {
            let out = output_of(graph, id)?;
            let mut ins = b.compile(graph, toolchain, id);
            let libs = link_libraries(graph, id);
            ins.extend(libs.iter().filter_map(|&lib| output_of(graph, lib).map(path_str)));
            let syslibs = gather_syslibs(graph, std::iter::once(id).chain(libs.iter().copied()));
            let cmd = toolchain.command(Tool::LinkExe, &ins, &path_str(out), &syslibs);
            b.command(cmd, out);
            "link"
        }
        NodeKind::Script(_) | NodeKind::Data(_) => {
            let out = output_of(graph, id)?;
            b.writes(out);
            b.steps.push(Step::Install {
                from: layout::source_path(pkg, &node.name),
                to: out.to_path_buf(),
                executable: matches!(node.kind, NodeKind::Script(_)),
            });
            "install"
        }
    };
    Some(b.finish(format!("{} {}", verb, identity), None))
}

/// The run action of a test executable.
pub fn run_action(graph: &Graph, id: NodeId) -> Option<Action> {
    let node = graph.node(id);
    if node.kind != NodeKind::TestExecutable {
        return None;
    }
    let exe = output_of(graph, id)?;
    let pkg = &graph.package(node.package).path;
    let scratch = layout::scratch_path(pkg, &node.name);
    let mut b = Builder::new();
    b.steps.push(Step::Command(path_str(exe)));
    Some(b.finish(format!("test {}", graph.identity(id)), Some(scratch)))
}
