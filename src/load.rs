//! Graph loading: reads the Arborfile of every package and constructs the
//! build graph from it.

use crate::graph::{Graph, NodeId, NodeKind, PackageId, Visibility};
use crate::parse::{ExeKind, Parser, Statement};
use crate::toolchain::{Template, Tool, Toolchain};
use crate::{layout, trace};
use anyhow::{anyhow, bail, Context as _};
use std::path::{Path, PathBuf};

/// Where a statement came from, for error messages.
#[derive(Debug, Clone)]
struct FileLoc {
    filename: PathBuf,
    line: usize,
}

impl FileLoc {
    fn err(&self, msg: impl std::fmt::Display) -> anyhow::Error {
        anyhow!("{}:{}: {}", self.filename.display(), self.line, msg)
    }
}

/// Statements that name things possibly declared later, resolved once every
/// package is loaded.
enum Deferred {
    Refer(Vec<String>),
    Depend { node: String, deps: Vec<String> },
    Package { lib: NodeId, libs: Vec<String> },
}

/// Internal state used while loading.
struct Loader<'a> {
    root: &'a Path,
    graph: Graph,
    toolchain: Toolchain,
    deferred: Vec<(PackageId, FileLoc, Deferred)>,
}

pub struct State {
    pub graph: Graph,
    pub toolchain: Toolchain,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// Package directories and node names are single path components.
fn check_name(loc: &FileLoc, name: &str) -> anyhow::Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(loc.err(format!("bad name {:?}", name)));
    }
    Ok(())
}

impl<'a> Loader<'a> {
    fn new(root: &'a Path) -> Self {
        Loader {
            root,
            graph: Graph::new(),
            toolchain: Toolchain::default(),
            deferred: Vec::new(),
        }
    }

    /// Resolve a node path: `name` within `pkg`, `/name` in the root
    /// package, or a full `pkg/path/name` identity.
    fn resolve(&self, pkg: PackageId, path: &str) -> Option<NodeId> {
        if let Some(name) = path.strip_prefix('/') {
            return self.graph.lookup_node(name);
        }
        if path.contains('/') {
            return self.graph.lookup_node(path);
        }
        let pkg_path = &self.graph.package(pkg).path;
        if pkg_path.is_empty() {
            self.graph.lookup_node(path)
        } else {
            self.graph.lookup_node(&format!("{}/{}", pkg_path, path))
        }
    }

    fn add_node(
        &mut self,
        loc: &FileLoc,
        pkg: PackageId,
        name: &str,
        kind: NodeKind,
    ) -> anyhow::Result<NodeId> {
        check_name(loc, name)?;
        self.graph
            .add_node(pkg, name, kind)
            .map_err(|err| loc.err(err))
    }

    /// A source file of the package, created on first mention.
    fn source(&mut self, loc: &FileLoc, pkg: PackageId, name: &str) -> anyhow::Result<NodeId> {
        check_name(loc, name)?;
        if let Some(id) = self.resolve(pkg, name) {
            let node = self.graph.node(id);
            if node.kind != NodeKind::SourceFile {
                return Err(loc.err(format!("{} is a {}, not a source", name, node.kind.name())));
            }
            return Ok(id);
        }
        self.add_node(loc, pkg, name, NodeKind::SourceFile)
    }

    fn use_sources(
        &mut self,
        loc: &FileLoc,
        pkg: PackageId,
        consumer: NodeId,
        names: &[&str],
        visibility: Visibility,
    ) -> anyhow::Result<()> {
        for name in names {
            let src = self.source(loc, pkg, name)?;
            self.graph.set_visibility(src, visibility);
            self.graph.add_use(consumer, src).map_err(|err| loc.err(err))?;
        }
        Ok(())
    }

    fn read_package(&mut self, pkg: PackageId) -> anyhow::Result<()> {
        let rel = layout::package_build_file(&self.graph.package(pkg).path);
        let path = self.root.join(&rel);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", rel.display()))?;
        let mut parser = Parser::new(&text);
        loop {
            let (line, stmt) = match parser.read() {
                Ok(Some(s)) => s,
                Ok(None) => break,
                Err(err) => bail!(err.format(&rel)),
            };
            let loc = FileLoc {
                filename: rel.clone(),
                line,
            };
            self.add_statement(pkg, &loc, stmt)?;
        }
        Ok(())
    }

    fn add_statement(
        &mut self,
        pkg: PackageId,
        loc: &FileLoc,
        stmt: Statement,
    ) -> anyhow::Result<()> {
        match stmt {
            Statement::Contain { dirs, protected } => {
                let visibility = if protected {
                    Visibility::Protected
                } else {
                    Visibility::Public
                };
                for dir in dirs {
                    check_name(loc, dir)?;
                    let child = self
                        .graph
                        .add_package(pkg, dir, visibility)
                        .map_err(|err| loc.err(err))?;
                    // Children load in place so their nodes take declaration
                    // order ahead of the rest of this package.
                    self.read_package(child)?;
                }
            }
            Statement::Refer(paths) => {
                self.deferred
                    .push((pkg, loc.clone(), Deferred::Refer(owned(&paths))));
            }
            Statement::StaticLib {
                name,
                public,
                private,
                syslibs,
            } => {
                let lib = self.add_node(loc, pkg, name, NodeKind::StaticLibrary)?;
                self.use_sources(loc, pkg, lib, &public, Visibility::Public)?;
                self.use_sources(loc, pkg, lib, &private, Visibility::Protected)?;
                self.graph.add_syslibs(lib, syslibs);
            }
            Statement::DynamicLib { name, libs } => {
                let lib = self.add_node(loc, pkg, name, NodeKind::DynamicLibrary)?;
                self.deferred.push((
                    pkg,
                    loc.clone(),
                    Deferred::Package {
                        lib,
                        libs: owned(&libs),
                    },
                ));
            }
            Statement::Exe {
                kind,
                name,
                sources,
                syslibs,
            } => {
                let kind = match kind {
                    ExeKind::Dist => NodeKind::DistExecutable,
                    ExeKind::Util => NodeKind::UtilExecutable,
                    ExeKind::Test => NodeKind::TestExecutable,
                };
                let exe = self.add_node(loc, pkg, name, kind)?;
                self.use_sources(loc, pkg, exe, &sources, Visibility::Public)?;
                self.graph.add_syslibs(exe, syslibs);
            }
            Statement::Scripts(placement, names) => {
                for name in names {
                    self.add_node(loc, pkg, name, NodeKind::Script(placement))?;
                }
            }
            Statement::Data(placement, names) => {
                for name in names {
                    self.add_node(loc, pkg, name, NodeKind::Data(placement))?;
                }
            }
            Statement::Docs(names) => {
                for name in names {
                    self.add_node(loc, pkg, name, NodeKind::Doc)?;
                }
            }
            Statement::Depend { node, deps } => {
                self.deferred.push((
                    pkg,
                    loc.clone(),
                    Deferred::Depend {
                        node: node.to_string(),
                        deps: owned(&deps),
                    },
                ));
            }
            Statement::Command { tool, template } => {
                if pkg != self.graph.root() {
                    return Err(loc.err("command is only allowed in the root Arborfile"));
                }
                let tool = Tool::from_name(tool)
                    .ok_or_else(|| loc.err(format!("unknown command {:?}", tool)))?;
                let template = Template::parse(&template).map_err(|err| loc.err(err))?;
                self.toolchain.set(tool, template);
            }
        }
        Ok(())
    }

    fn lookup(&self, loc: &FileLoc, pkg: PackageId, path: &str) -> anyhow::Result<NodeId> {
        self.resolve(pkg, path)
            .ok_or_else(|| loc.err(format!("unknown node {:?}", path)))
    }

    fn resolve_deferred(&mut self) -> anyhow::Result<()> {
        for (pkg, loc, deferred) in std::mem::take(&mut self.deferred) {
            match deferred {
                Deferred::Refer(paths) => {
                    for path in paths {
                        let to = self
                            .graph
                            .lookup_package(&path)
                            .ok_or_else(|| loc.err(format!("unknown package {:?}", path)))?;
                        self.graph.add_refer(pkg, to);
                    }
                }
                Deferred::Depend { node, deps } => {
                    let from = self.lookup(&loc, pkg, &node)?;
                    for dep in deps {
                        let to = self.lookup(&loc, pkg, &dep)?;
                        if to == from {
                            return Err(loc.err(format!("{} cannot depend on itself", node)));
                        }
                        self.graph.add_reference(from, to);
                    }
                }
                Deferred::Package { lib, libs } => {
                    for path in libs {
                        let to = self.lookup(&loc, pkg, &path)?;
                        self.graph.add_use(lib, to).map_err(|err| loc.err(err))?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Load the whole source tree under `root`/src.
pub fn read(root: &Path) -> anyhow::Result<State> {
    let mut loader = Loader::new(root);
    trace::scope("load", || -> anyhow::Result<()> {
        let top = loader.graph.root();
        loader.read_package(top)?;
        loader.resolve_deferred()
    })?;
    Ok(State {
        graph: loader.graph,
        toolchain: loader.toolchain,
    })
}
