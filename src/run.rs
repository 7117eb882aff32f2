use crate::context::Context;
use crate::fs::RealFileSystem;
use crate::layout::{Layout, DB_FILE};
use crate::task::CommandRunner;
use crate::validate::validate;
use crate::work::{Options, Outcome, Work};
use crate::{db, load, progress, signal, trace};
use anyhow::{anyhow, bail};
use argh::FromArgs;
use std::path::Path;

/// Build the whole project under src/, rebuilding only what changed.
#[derive(FromArgs)]
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// parallelism [default: number of processors]
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// print executed command lines
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// debugging tools, "-d list" to list
    #[argh(option, short = 'd')]
    debug: Vec<String>,
}

fn run_impl() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    let mut explain = false;
    for debug in &args.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  explain  print why each step runs");
                println!("  trace    generate json performance trace");
                return Ok(1);
            }
            "explain" => explain = true,
            "trace" => trace::open("trace.json")?,
            _ => bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(dir) = &args.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let parallelism = match args.jobs {
        Some(0) => bail!("invalid -j 0"),
        Some(n) => n,
        None => usize::from(std::thread::available_parallelism()?),
    };

    signal::register_sigint();

    let root = Path::new(".");
    let load::State { graph, toolchain } = trace::scope("load::read", || load::read(root))?;
    let order = trace::scope("validate", || validate(&graph))?;
    let db = trace::scope("db::open", || db::open(&root.join(DB_FILE)))?;

    let mut progress = progress::console(args.verbose);
    if let Some(problem) = &db.problem {
        progress.log(&format!("arbor: {}: {}, rebuilding what it lost", DB_FILE, problem));
    }

    let mut ctx = Context::new(graph, Layout::new(root), toolchain, db);
    let fs = RealFileSystem::new();
    let freshness = trace::scope("freshness", || ctx.evaluate(&order, &fs))?;
    let runner = CommandRunner::new(root);
    let outcome = {
        let mut work = Work::new(
            &mut ctx,
            &fs,
            &freshness,
            progress.as_mut(),
            Options {
                parallelism,
                explain,
            },
        );
        trace::scope("work.run", || work.run(&runner))?
    };
    // Clear any status display before the summary.
    drop(progress);

    Ok(match outcome {
        Outcome::Success(0) => {
            println!("arbor: no work to do");
            0
        }
        Outcome::Success(n) => {
            println!("arbor: ran {} tasks, now up to date", n);
            0
        }
        Outcome::Failed(failure) => {
            println!(
                "arbor: {} of {} failed, build stopped",
                failure.stage, failure.identity
            );
            1
        }
        Outcome::Interrupted => {
            println!("arbor: interrupted");
            1
        }
    })
}

pub fn run() -> anyhow::Result<i32> {
    let res = run_impl();
    // A trace that fails to flush doesn't change the build's result.
    let _ = trace::close();
    res
}
