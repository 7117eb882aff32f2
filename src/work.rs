//! Build runner, choosing and executing tasks as determined by out of date
//! nodes.

use crate::context::Context;
use crate::db::BuildRecord;
use crate::densemap::{dense_id, DenseMap};
use crate::freshness::Freshness;
use crate::fs::{FileSystem, MTime};
use crate::graph::NodeId;
use crate::layout::DB_FILE;
use crate::process::Termination;
use crate::progress::Progress;
use crate::task::{scoped_pool, FinishedTask, Pool, Runner, Task};
use crate::{signal, trace};
use anyhow::{anyhow, bail};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

dense_id!(
    /// A step within one run: a node's build, or a test executable's run.
    StepId
);

/// What a step does to its node.  A test's Run follows its Build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Build,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Build => "build",
            Stage::Run => "run",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    /// Waiting on steps it depends on.
    Blocked,
    /// Dependencies are done; waiting for a free worker.
    Ready,
    /// Handed to a worker.
    Dispatched,
    Done,
    Failed,
}

/// Counts of steps in each state, for progress display.
#[derive(Clone, Default, Debug)]
pub struct StateCounts([usize; 5]);

impl StateCounts {
    pub fn add(&mut self, state: BuildState, delta: isize) {
        let count = &mut self.0[state as usize];
        *count = (*count as isize + delta) as usize;
    }

    pub fn get(&self, state: BuildState) -> usize {
        self.0[state as usize]
    }

    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

struct Step {
    node: NodeId,
    stage: Stage,
    state: BuildState,
    /// Steps this one still waits on.
    pending: usize,
    dependents: Vec<StepId>,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub parallelism: usize,
    /// Log why each step runs.
    pub explain: bool,
}

/// The step a failed run is reported against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub identity: String,
    pub stage: Stage,
    pub desc: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Everything is up to date; the number is the count of executed steps.
    Success(usize),
    /// The first step that failed.  Later failures are not reported here.
    Failed(Failure),
    /// Stopped by SIGINT before finishing.
    Interrupted,
}

pub struct Work<'a> {
    ctx: &'a mut Context,
    fs: &'a dyn FileSystem,
    freshness: &'a Freshness,
    progress: &'a mut dyn Progress,
    options: Options,

    steps: DenseMap<StepId, Step>,
    by_node: FxHashMap<(NodeId, Stage), StepId>,
    /// Ready steps, ordered by declaration so dispatch is deterministic.
    ready: BTreeSet<(usize, Stage, StepId)>,
    counts: StateCounts,
    failure: Option<Failure>,
    /// A task was interrupted or SIGINT arrived.
    interrupted: bool,
    executed: usize,
}

impl<'a> Work<'a> {
    pub fn new(
        ctx: &'a mut Context,
        fs: &'a dyn FileSystem,
        freshness: &'a Freshness,
        progress: &'a mut dyn Progress,
        options: Options,
    ) -> Self {
        let mut work = Work {
            ctx,
            fs,
            freshness,
            progress,
            options,
            steps: DenseMap::default(),
            by_node: FxHashMap::default(),
            ready: BTreeSet::new(),
            counts: StateCounts::default(),
            failure: None,
            interrupted: false,
            executed: 0,
        };
        work.plan();
        work
    }

    fn add_step(&mut self, node: NodeId, stage: Stage) {
        let id = self.steps.push(Step {
            node,
            stage,
            state: BuildState::Blocked,
            pending: 0,
            dependents: Vec::new(),
        });
        self.by_node.insert((node, stage), id);
        self.counts.add(BuildState::Blocked, 1);
    }

    /// Build steps a node's build waits on.  Nodes without an action of their
    /// own (sources, docs) are looked through.
    fn build_deps(&self, node: NodeId) -> Vec<StepId> {
        let graph = &self.ctx.graph;
        let mut found = Vec::new();
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        let mut stack: Vec<NodeId> = graph.node(node).deps().collect();
        while let Some(dep) = stack.pop() {
            if !visited.insert(dep) {
                continue;
            }
            if let Some(&step) = self.by_node.get(&(dep, Stage::Build)) {
                found.push(step);
            } else if self.freshness.build_action(dep).is_none() {
                stack.extend(graph.node(dep).deps());
            }
        }
        found
    }

    fn plan(&mut self) {
        let nodes: Vec<NodeId> = self.ctx.graph.nodes().map(|(id, _)| id).collect();
        for &node in &nodes {
            if self.freshness.build_stale(node).is_some() {
                self.add_step(node, Stage::Build);
            }
            if self.freshness.run_stale(node).is_some() && self.freshness.run_action(node).is_some()
            {
                self.add_step(node, Stage::Run);
            }
        }

        for id in self.steps.ids().collect::<Vec<_>>() {
            let step = &self.steps[id];
            let deps = match step.stage {
                Stage::Build => self.build_deps(step.node),
                Stage::Run => self
                    .by_node
                    .get(&(step.node, Stage::Build))
                    .copied()
                    .into_iter()
                    .collect(),
            };
            self.steps[id].pending = deps.len();
            for dep in deps {
                self.steps[dep].dependents.push(id);
            }
        }

        for id in self.steps.ids().collect::<Vec<_>>() {
            if self.steps[id].pending == 0 {
                self.make_ready(id);
            }
        }
    }

    fn set_state(&mut self, id: StepId, state: BuildState) {
        let step = &mut self.steps[id];
        self.counts.add(step.state, -1);
        self.counts.add(state, 1);
        step.state = state;
    }

    fn make_ready(&mut self, id: StepId) {
        self.set_state(id, BuildState::Ready);
        let step = &self.steps[id];
        let order = self.ctx.graph.node(step.node).order;
        self.ready.insert((order, step.stage, id));
    }

    fn explain(&mut self) {
        for (_, step) in self.steps.iter() {
            let reason = match step.stage {
                Stage::Build => self.freshness.build_stale(step.node),
                Stage::Run => self.freshness.run_stale(step.node),
            };
            let Some(reason) = reason else { continue };
            let graph = &self.ctx.graph;
            self.progress.log(&format!(
                "explain: {} {}: {}",
                step.stage,
                graph.identity(step.node),
                reason.describe(graph)
            ));
        }
    }

    fn dispatch(&mut self, pool: &mut Pool, id: StepId) -> anyhow::Result<()> {
        let step = &self.steps[id];
        let action = match step.stage {
            Stage::Build => self.freshness.build_action(step.node),
            Stage::Run => self.freshness.run_action(step.node),
        };
        let Some(action) = action else {
            bail!("no {} action for {}", step.stage, self.ctx.graph.identity(step.node));
        };
        let task = Task::new(id, action);
        self.progress.task_started(id, &task);
        self.set_state(id, BuildState::Dispatched);
        pool.start(task)
    }

    /// Write a successful step to the database.  Returns the output path if
    /// the build claimed success without producing it.
    fn record(&mut self, id: StepId) -> anyhow::Result<Option<PathBuf>> {
        let step = &self.steps[id];
        let (node, stage) = (step.node, step.stage);
        let identity = self.ctx.graph.identity(node);
        let signature = self.freshness.signature(node);
        let written = match stage {
            Stage::Build => {
                let mtime = match &self.ctx.graph.node(node).output {
                    None => MTime::Missing,
                    Some(out) => {
                        let mtime = self
                            .fs
                            .stat(&self.ctx.layout.on_disk(out))
                            .map_err(|err| anyhow!("stat {}: {}", out.display(), err))?;
                        if mtime == MTime::Missing {
                            return Ok(Some(out.clone()));
                        }
                        mtime
                    }
                };
                self.ctx
                    .db
                    .record_build(&identity, &BuildRecord { signature, mtime })
            }
            Stage::Run => self.ctx.db.record_run(&identity, signature),
        };
        written.map_err(|err| anyhow!("write {}: {}", DB_FILE, err))?;
        Ok(None)
    }

    fn finish(&mut self, finished: FinishedTask) -> anyhow::Result<()> {
        let FinishedTask {
            tid,
            task,
            span,
            mut result,
        } = finished;
        trace::task(&task.desc, tid, span);
        let id = task.id;

        if result.termination == Termination::Success {
            if let Some(out) = self.record(id)? {
                result.termination = Termination::Failure;
                result
                    .output
                    .extend_from_slice(format!("{} was not created", out.display()).as_bytes());
            }
        }
        self.progress.task_finished(id, &task, &result);

        if result.termination == Termination::Success {
            self.set_state(id, BuildState::Done);
            self.executed += 1;
            for dependent in self.steps[id].dependents.clone() {
                let step = &mut self.steps[dependent];
                step.pending -= 1;
                if step.pending == 0 && step.state == BuildState::Blocked {
                    self.make_ready(dependent);
                }
            }
        } else {
            self.set_state(id, BuildState::Failed);
            if result.termination == Termination::Interrupted {
                self.interrupted = true;
            } else if self.failure.is_none() && !self.interrupted {
                let step = &self.steps[id];
                self.failure = Some(Failure {
                    identity: self.ctx.graph.identity(step.node),
                    stage: step.stage,
                    desc: task.desc,
                });
            }
        }
        self.progress.update(&self.counts);
        Ok(())
    }

    fn run_pool(&mut self, pool: &mut Pool) -> anyhow::Result<()> {
        loop {
            // After a failure or an interrupt nothing new starts; in-flight
            // tasks still drain.
            if signal::was_interrupted() {
                self.interrupted = true;
            }
            while self.failure.is_none() && !self.interrupted && pool.can_start_more() {
                let Some((_, _, id)) = self.ready.pop_first() else {
                    break;
                };
                self.dispatch(pool, id)?;
            }
            self.progress.update(&self.counts);
            if !pool.is_running() {
                break;
            }
            let finished = pool.wait()?;
            self.finish(finished)?;
        }
        Ok(())
    }

    /// Run every stale step.
    pub fn run(&mut self, runner: &dyn Runner) -> anyhow::Result<Outcome> {
        for &node in self.freshness.to_forget() {
            let identity = self.ctx.graph.identity(node);
            self.ctx
                .db
                .forget(&identity)
                .map_err(|err| anyhow!("write {}: {}", DB_FILE, err))?;
        }
        if self.options.explain {
            self.explain();
        }

        let parallelism = self.options.parallelism;
        scoped_pool(parallelism, runner, |pool| self.run_pool(pool))?;

        if let Some(failure) = self.failure.take() {
            return Ok(Outcome::Failed(failure));
        }
        if self.counts.get(BuildState::Done) < self.steps.len() {
            if self.interrupted {
                return Ok(Outcome::Interrupted);
            }
            bail!("build stalled with {} steps left", self.steps.len() - self.counts.get(BuildState::Done));
        }
        Ok(Outcome::Success(self.executed))
    }
}
