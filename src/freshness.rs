//! Decides which nodes need work, by comparing freshly computed signatures
//! and on-disk outputs against what the database recorded.

use crate::action::{self, Action};
use crate::db::Records;
use crate::densemap::DenseMap;
use crate::fs::{FileSystem, MTime};
use crate::graph::{Graph, NodeId, NodeKind};
use crate::layout::{self, Layout};
use crate::signature::{content_hash, node_signature, Inputs, Signature};
use crate::toolchain::Toolchain;
use crate::trace;
use crate::validate::Order;
use anyhow::{anyhow, bail};
use dashmap::DashMap;
use rayon::prelude::*;
use rustc_hash::FxHasher;
use std::hash::BuildHasherDefault;

/// Why a step must run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// A dependency is itself being rebuilt.
    Dependency(NodeId),
    /// Nothing recorded from a previous run.
    NoRecord,
    SignatureChanged,
    OutputMissing,
    /// The output changed on disk since it was built.
    OutputModified,
    /// The test executable is being rebuilt.
    Rebuilt,
}

impl StaleReason {
    pub fn describe(&self, graph: &Graph) -> String {
        match self {
            StaleReason::Dependency(id) => format!("dependency {} is stale", graph.identity(*id)),
            StaleReason::NoRecord => "no previous record".to_string(),
            StaleReason::SignatureChanged => "inputs changed".to_string(),
            StaleReason::OutputMissing => "output missing".to_string(),
            StaleReason::OutputModified => "output modified".to_string(),
            StaleReason::Rebuilt => "executable rebuilt".to_string(),
        }
    }
}

/// Per-node verdicts for one run.
pub struct Freshness {
    signatures: DenseMap<NodeId, Signature>,
    builds: DenseMap<NodeId, Option<Action>>,
    runs: DenseMap<NodeId, Option<Action>>,
    build_stale: DenseMap<NodeId, Option<StaleReason>>,
    run_stale: DenseMap<NodeId, Option<StaleReason>>,
    /// Stale nodes whose recorded signature still matches.
    forget: Vec<NodeId>,
}

impl Freshness {
    pub fn signature(&self, id: NodeId) -> Signature {
        self.signatures[id]
    }

    pub fn build_action(&self, id: NodeId) -> Option<&Action> {
        self.builds[id].as_ref()
    }

    pub fn run_action(&self, id: NodeId) -> Option<&Action> {
        self.runs[id].as_ref()
    }

    /// Why the node's build must run, or None if it is up to date.
    pub fn build_stale(&self, id: NodeId) -> Option<StaleReason> {
        self.build_stale[id]
    }

    /// Why a test executable's run must happen, or None if it last passed with
    /// the current executable.
    pub fn run_stale(&self, id: NodeId) -> Option<StaleReason> {
        self.run_stale[id]
    }

    pub fn is_stale(&self, id: NodeId) -> bool {
        self.build_stale[id].is_some()
    }

    /// Records that must be dropped before rebuilding, so an interrupted run
    /// cannot leave them looking fresh.
    pub fn to_forget(&self) -> &[NodeId] {
        &self.forget
    }
}

type ContentMap = DashMap<NodeId, Signature, BuildHasherDefault<FxHasher>>;

/// Hash the files of every content-bearing node, in parallel.
fn hash_contents(graph: &Graph, layout: &Layout, fs: &dyn FileSystem) -> anyhow::Result<ContentMap> {
    let content = ContentMap::default();
    let ids: Vec<NodeId> = graph
        .nodes()
        .filter(|(_, node)| node.kind.has_content())
        .map(|(id, _)| id)
        .collect();
    ids.par_iter().try_for_each(|&id| -> anyhow::Result<()> {
        let node = graph.node(id);
        let rel = layout::source_path(&graph.package(node.package).path, &node.name);
        let bytes = match fs.read(&layout.on_disk(&rel)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!("{}: missing source file {}", graph.identity(id), rel.display())
            }
            Err(err) => bail!("read {}: {}", rel.display(), err),
        };
        content.insert(id, content_hash(&bytes));
        Ok(())
    })?;
    Ok(content)
}

fn output_stale(
    graph: &Graph,
    layout: &Layout,
    fs: &dyn FileSystem,
    id: NodeId,
    recorded: MTime,
) -> anyhow::Result<Option<StaleReason>> {
    let Some(out) = &graph.node(id).output else {
        return Ok(None);
    };
    let mtime = fs
        .stat(&layout.on_disk(out))
        .map_err(|err| anyhow!("stat {}: {}", out.display(), err))?;
    Ok(match mtime {
        MTime::Missing => Some(StaleReason::OutputMissing),
        mtime if mtime != recorded => Some(StaleReason::OutputModified),
        _ => None,
    })
}

/// Compute signatures bottom-up and decide what is stale.
/// Prerequisite: `order` came from validating `graph`.
pub fn evaluate(
    graph: &Graph,
    order: &Order,
    layout: &Layout,
    toolchain: &Toolchain,
    records: &Records,
    fs: &dyn FileSystem,
) -> anyhow::Result<Freshness> {
    let content = trace::scope("hash contents", || hash_contents(graph, layout, fs))?;

    let n = graph.node_count();
    let mut f = Freshness {
        signatures: DenseMap::filled(n, Signature(0)),
        builds: DenseMap::filled(n, None),
        runs: DenseMap::filled(n, None),
        build_stale: DenseMap::filled(n, None),
        run_stale: DenseMap::filled(n, None),
        forget: Vec::new(),
    };

    // Whether anything at or below a node is being rebuilt; carried through
    // nodes without an action of their own.
    let mut dirty: DenseMap<NodeId, bool> = DenseMap::filled(n, false);

    for &id in &order.nodes {
        let node = graph.node(id);
        let identity = graph.identity(id);
        let build = action::build_action(graph, toolchain, id);
        let deps: Vec<Signature> = node.deps().map(|dep| f.signatures[dep]).collect();
        let sig = node_signature(&Inputs {
            identity: &identity,
            node,
            content: content.get(&id).map(|c| *c),
            action: build.as_ref(),
            deps: &deps,
        });
        f.signatures[id] = sig;

        if build.is_some() {
            let recorded = records.build(&identity);
            let reason = if let Some(dep) = node.deps().find(|&dep| dirty[dep]) {
                Some(StaleReason::Dependency(dep))
            } else {
                match recorded {
                    None => Some(StaleReason::NoRecord),
                    Some(rec) if rec.signature != sig => Some(StaleReason::SignatureChanged),
                    Some(rec) => output_stale(graph, layout, fs, id, rec.mtime)?,
                }
            };
            if reason.is_some() && recorded.map(|rec| rec.signature) == Some(sig) {
                f.forget.push(id);
            }
            dirty[id] = reason.is_some();
            f.build_stale[id] = reason;
        } else {
            dirty[id] = node.deps().any(|dep| dirty[dep]);
        }
        f.builds[id] = build;

        if node.kind == NodeKind::TestExecutable {
            f.run_stale[id] = if f.build_stale[id].is_some() {
                Some(StaleReason::Rebuilt)
            } else {
                match records.run(&identity) {
                    None => Some(StaleReason::NoRecord),
                    Some(passed) if passed != sig => Some(StaleReason::SignatureChanged),
                    Some(_) => None,
                }
            };
            f.runs[id] = action::run_action(graph, id);
        }
    }
    Ok(f)
}
