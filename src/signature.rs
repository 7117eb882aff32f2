//! A single hash over everything that goes into a node's build is recorded
//! and used to determine when any of it changes.

use crate::action::{Action, Step};
use crate::graph::Node;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash identifying one particular set of build inputs for a node; compared
/// against the recorded one to verify whether the node is up to date.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Signature(pub u64);

const UNIT_SEPARATOR: u8 = 0x1F;

/// Hasher designed to not serialize too much; separators keep adjacent fields
/// from running into each other.
#[derive(Default)]
struct TerseHash(DefaultHasher);

impl TerseHash {
    fn write_string(&mut self, string: &str) {
        string.hash(&mut self.0);
    }

    fn write_separator(&mut self) {
        self.0.write_u8(UNIT_SEPARATOR);
    }

    fn write_signature(&mut self, sig: Signature) {
        self.0.write_u64(sig.0);
    }

    fn write_action(&mut self, action: &Action) {
        for step in &action.steps {
            match step {
                Step::Command(cmd) => self.write_string(cmd),
                Step::Install {
                    from,
                    to,
                    executable,
                } => {
                    from.hash(&mut self.0);
                    to.hash(&mut self.0);
                    executable.hash(&mut self.0);
                }
            }
        }
        self.write_separator();
    }

    fn finish(&self) -> Signature {
        Signature(self.0.finish())
    }
}

/// Hash of a file's bytes.
pub fn content_hash(bytes: &[u8]) -> Signature {
    let mut hasher = TerseHash::default();
    hasher.0.write(bytes);
    hasher.finish()
}

/// Everything a node's signature is computed from.
pub struct Inputs<'a> {
    pub identity: &'a str,
    pub node: &'a Node,
    /// Hash of the node's own file, for kinds that have one.
    pub content: Option<Signature>,
    pub action: Option<&'a Action>,
    /// Signatures of the node's dependencies, in deps() order.
    pub deps: &'a [Signature],
}

/// Combine a node's inputs into its signature.
/// Prerequisite: all dependency signatures have already been computed.
pub fn node_signature(inputs: &Inputs) -> Signature {
    let mut hasher = TerseHash::default();
    hasher.write_string(inputs.node.kind.name());
    hasher.write_string(inputs.identity);
    hasher.write_separator();
    if let Some(content) = inputs.content {
        hasher.write_signature(content);
    }
    hasher.write_separator();
    if let Some(action) = inputs.action {
        hasher.write_action(action);
    }
    for lib in &inputs.node.syslibs {
        hasher.write_string(lib);
    }
    hasher.write_separator();
    for &dep in inputs.deps {
        hasher.write_signature(dep);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, NodeKind};

    #[test]
    fn inputs_change_signature() -> anyhow::Result<()> {
        let mut graph = Graph::new();
        let id = graph.add_node(graph.root(), "lib", NodeKind::StaticLibrary)?;
        let identity = graph.identity(id);
        let action = Action {
            desc: "archive lib".into(),
            steps: vec![Step::Command("ar rcs out in".into())],
            dirs: vec![],
            scratch: None,
        };
        let base = Inputs {
            identity: &identity,
            node: graph.node(id),
            content: None,
            action: Some(&action),
            deps: &[Signature(1), Signature(2)],
        };
        let sig = node_signature(&base);
        assert_eq!(sig, node_signature(&base));

        let reordered = Inputs {
            deps: &[Signature(2), Signature(1)],
            ..base
        };
        assert_ne!(sig, node_signature(&reordered));

        let other_action = Action {
            steps: vec![Step::Command("ar rcsD out in".into())],
            ..action.clone()
        };
        let changed_cmd = Inputs {
            identity: &identity,
            node: graph.node(id),
            content: None,
            action: Some(&other_action),
            deps: &[Signature(1), Signature(2)],
        };
        assert_ne!(sig, node_signature(&changed_cmd));

        assert_ne!(content_hash(b"int x;"), content_hash(b"int y;"));
        Ok(())
    }
}
