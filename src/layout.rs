//! Placement of sources and build outputs within the build directory.
//!
//! ```text
//! src/<pkg>/           package sources (the root package is src/ itself)
//! obj/<pkg>/           object files and static archives
//! priv/<pkg>/          util and test executables, private scripts and data
//! dist/{lib,bin,data}  dynamic libraries, dist executables and scripts, data
//! ```
//!
//! Paths produced here are relative to the build directory; commands run with
//! the build directory as their working directory.

use crate::graph::{NodeKind, Placement};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX, EXE_SUFFIX};
use std::path::{Path, PathBuf};

/// Name of the per-package build description file.
pub const BUILD_FILE: &str = "Arborfile";

/// Name of the signature store within the build directory.
pub const DB_FILE: &str = ".arbor_db";

/// Source extensions that compile to an object file.  Everything else (headers
/// in particular) only contributes content.
const COMPILED_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx"];

fn pkg_dir(top: &str, pkg: &str) -> PathBuf {
    let mut dir = PathBuf::from(top);
    if !pkg.is_empty() {
        dir.push(pkg);
    }
    dir
}

pub fn source_path(pkg: &str, name: &str) -> PathBuf {
    pkg_dir("src", pkg).join(name)
}

pub fn package_build_file(pkg: &str) -> PathBuf {
    pkg_dir("src", pkg).join(BUILD_FILE)
}

pub fn is_compiled(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| COMPILED_EXTENSIONS.contains(&ext))
}

/// The object file a source compiles to, if it compiles at all.
pub fn object_path(pkg: &str, name: &str) -> Option<PathBuf> {
    if !is_compiled(name) {
        return None;
    }
    Some(pkg_dir("obj", pkg).join(format!("{}.o", name)))
}

/// The artifact a node produces.  Sources and docs produce nothing of their own.
pub fn output_path(pkg: &str, name: &str, kind: &NodeKind) -> Option<PathBuf> {
    Some(match kind {
        NodeKind::SourceFile | NodeKind::Doc => return None,
        NodeKind::StaticLibrary => pkg_dir("obj", pkg).join(format!("lib{}.a", name)),
        NodeKind::DynamicLibrary => {
            PathBuf::from("dist/lib").join(format!("{}{}{}", DLL_PREFIX, name, DLL_SUFFIX))
        }
        NodeKind::DistExecutable => PathBuf::from("dist/bin").join(format!("{}{}", name, EXE_SUFFIX)),
        NodeKind::UtilExecutable | NodeKind::TestExecutable => {
            pkg_dir("priv", pkg).join(format!("{}{}", name, EXE_SUFFIX))
        }
        NodeKind::Script(Placement::Dist) => PathBuf::from("dist/bin").join(name),
        NodeKind::Data(Placement::Dist) => PathBuf::from("dist/data").join(name),
        NodeKind::Script(Placement::Priv) | NodeKind::Data(Placement::Priv) => {
            pkg_dir("priv", pkg).join(name)
        }
    })
}

/// Scratch directory handed to a test executable's run.
pub fn scratch_path(pkg: &str, name: &str) -> PathBuf {
    pkg_dir("priv", pkg).join(format!("{}-tmp", name))
}

/// Resolves layout-relative paths against a concrete build directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Layout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn on_disk(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement() {
        assert_eq!(source_path("", "main.c"), Path::new("src/main.c"));
        assert_eq!(source_path("util/io", "io.h"), Path::new("src/util/io/io.h"));
        assert_eq!(object_path("util", "a.c"), Some(PathBuf::from("obj/util/a.c.o")));
        assert_eq!(object_path("util", "a.h"), None);
        assert_eq!(
            output_path("util", "core", &NodeKind::StaticLibrary),
            Some(PathBuf::from("obj/util/libcore.a"))
        );
        assert_eq!(
            output_path("tools", "gen", &NodeKind::Script(Placement::Priv)),
            Some(PathBuf::from("priv/tools/gen"))
        );
        assert_eq!(
            output_path("tools", "table", &NodeKind::Data(Placement::Dist)),
            Some(PathBuf::from("dist/data/table"))
        );
        assert_eq!(output_path("", "README", &NodeKind::Doc), None);
        assert_eq!(scratch_path("a", "t"), Path::new("priv/a/t-tmp"));
    }

    #[cfg(unix)]
    #[test]
    fn executables_and_libraries() {
        assert_eq!(
            output_path("a", "app", &NodeKind::DistExecutable),
            Some(PathBuf::from("dist/bin/app"))
        );
        assert_eq!(
            output_path("a", "t", &NodeKind::TestExecutable),
            Some(PathBuf::from("priv/a/t"))
        );
        assert_eq!(
            output_path("a", "core", &NodeKind::DynamicLibrary),
            Some(PathBuf::from(format!("dist/lib/libcore{}", DLL_SUFFIX)))
        );
    }
}
