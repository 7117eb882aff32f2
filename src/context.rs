//! Everything one invocation works against, passed around by reference.

use crate::db::{self, Records};
use crate::freshness::{self, Freshness};
use crate::fs::FileSystem;
use crate::graph::Graph;
use crate::layout::Layout;
use crate::toolchain::Toolchain;
use crate::validate::Order;

pub struct Context {
    pub graph: Graph,
    pub layout: Layout,
    pub toolchain: Toolchain,
    /// What previous runs recorded; read-only during a run.
    pub records: Records,
    /// Appends this run's results.  The scheduler is its only user.
    pub db: db::Writer,
}

impl Context {
    pub fn new(graph: Graph, layout: Layout, toolchain: Toolchain, db: db::Db) -> Self {
        Context {
            graph,
            layout,
            toolchain,
            records: db.records,
            db: db.writer,
        }
    }

    pub fn evaluate(&self, order: &Order, fs: &dyn FileSystem) -> anyhow::Result<Freshness> {
        freshness::evaluate(
            &self.graph,
            order,
            &self.layout,
            &self.toolchain,
            &self.records,
            fs,
        )
    }
}
