use arbor::db::Records;
use arbor::fs::RealFileSystem;
use arbor::graph::{Graph, NodeKind, Visibility};
use arbor::layout::{self, Layout};
use arbor::toolchain::Toolchain;
use criterion::{criterion_group, criterion_main, Criterion};
use std::io::Write;

const PACKAGES: usize = 100;
const SOURCES: usize = 20;

/// A chain of packages, each holding a library that depends on the previous
/// package's library, and a test of it.
fn synthetic() -> anyhow::Result<Graph> {
    let mut graph = Graph::new();
    let mut prev = None;
    for p in 0..PACKAGES {
        let pkg = graph.add_package(graph.root(), &format!("p{}", p), Visibility::Public)?;
        let lib = graph.add_node(pkg, "lib", NodeKind::StaticLibrary)?;
        for s in 0..SOURCES {
            let src = graph.add_node(pkg, &format!("s{}.c", s), NodeKind::SourceFile)?;
            graph.add_use(lib, src)?;
        }
        if let Some(prev) = prev {
            graph.add_reference(lib, prev);
        }
        let test = graph.add_node(pkg, "test", NodeKind::TestExecutable)?;
        let main = graph.add_node(pkg, "test.c", NodeKind::SourceFile)?;
        graph.add_use(test, main)?;
        graph.add_reference(test, lib);
        prev = Some(lib);
    }
    Ok(graph)
}

pub fn bench_validate(c: &mut Criterion) {
    let graph = synthetic().unwrap();
    c.bench_function("validate", |b| {
        b.iter(|| arbor::validate::validate(&graph).unwrap())
    });
}

pub fn bench_freshness(c: &mut Criterion) {
    let graph = synthetic().unwrap();
    let order = arbor::validate::validate(&graph).unwrap();
    let dir = tempfile::tempdir().unwrap();
    for (_, node) in graph.nodes() {
        if node.kind != NodeKind::SourceFile {
            continue;
        }
        let pkg = &graph.package(node.package).path;
        let path = dir.path().join(layout::source_path(pkg, &node.name));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        for i in 0..100 {
            writeln!(f, "int f{}(void) {{ return {}; }}", i, i).unwrap();
        }
    }

    let layout = Layout::new(dir.path());
    let toolchain = Toolchain::default();
    let records = Records::default();
    let fs = RealFileSystem::new();
    c.bench_function("freshness", |b| {
        b.iter(|| {
            arbor::freshness::evaluate(&graph, &order, &layout, &toolchain, &records, &fs)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_validate, bench_freshness);
criterion_main!(benches);
