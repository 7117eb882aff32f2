//! Errors describing an illegal build graph.
//!
//! These are the closed set of graph problems a caller may want to tell apart;
//! everything else (I/O, loading, commands) flows through anyhow.

use std::fmt;

/// A dependency cycle, as the list of identities along it.  The first entry is
/// repeated at the end, e.g. `a -> b -> c -> a`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("dependency cycle among {what}s: {}", .path.join(" -> "))]
pub struct CycleError {
    pub what: CycleDomain,
    pub path: Vec<String>,
}

impl CycleError {
    /// The distinct members of the cycle, in cycle order.
    pub fn members(&self) -> &[String] {
        &self.path[..self.path.len().saturating_sub(1)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDomain {
    Package,
    Node,
}

impl fmt::Display for CycleDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CycleDomain::Package => "package",
            CycleDomain::Node => "node",
        })
    }
}

/// Which visibility rule an edge broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisibilityRule {
    /// The target is protected at the level of `scope` (a package path, or the
    /// target node's own package), and the referrer is outside that scope's
    /// parent.
    Protected { scope: String },
    /// No ancestor of the referrer contains or refers to the target's package.
    Unreachable { package: String },
}

impl fmt::Display for VisibilityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisibilityRule::Protected { scope } => write!(
                f,
                "{:?} is protected and only visible within its parent package",
                scope
            ),
            VisibilityRule::Unreachable { package } => write!(
                f,
                "package {:?} is neither contained by an earlier sibling nor referred to",
                package
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{from} may not refer to {to}: {rule}")]
pub struct VisibilityError {
    pub from: String,
    pub to: String,
    pub rule: VisibilityRule,
}

/// Found by the validator; always fatal, always before any building.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    Visibility(#[from] VisibilityError),
}

/// An object consumed twice, or a static library packaged into two dynamic
/// libraries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{target} is already used by {first}, cannot also be used by {second}")]
pub struct DuplicateUseError {
    pub target: String,
    pub first: String,
    pub second: String,
}

/// Errors raised while constructing the graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    DuplicateUse(#[from] DuplicateUseError),
    #[error("{from} ({from_kind}) cannot use {to} ({to_kind})")]
    InvalidUse {
        from: String,
        from_kind: &'static str,
        to: String,
        to_kind: &'static str,
    },
    #[error("duplicate {what} {name:?}")]
    Duplicate { what: &'static str, name: String },
    #[error("{a} and {b} both write {path}")]
    OutputClash { a: String, b: String, path: String },
}
