//! Runs build tasks, potentially in parallel.
//! Unaware of the build graph; workers only see the steps of each task and
//! report back over a channel.

use crate::action::{Action, Step, SCRATCH_ENV};
use crate::process::{self, Termination};
use crate::work::StepId;
use anyhow::anyhow;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

/// One unit of work handed to the pool.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: StepId,
    pub desc: String,
    pub steps: Vec<Step>,
    pub dirs: Vec<PathBuf>,
    pub scratch: Option<PathBuf>,
}

impl Task {
    pub fn new(id: StepId, action: &Action) -> Self {
        Task {
            id,
            desc: action.desc.clone(),
            steps: action.steps.clone(),
            dirs: action.dirs.clone(),
            scratch: action.scratch.clone(),
        }
    }

    /// The steps as a command line, for verbose output.
    pub fn cmdline(&self) -> String {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Command(cmd) => cmd.clone(),
                Step::Install { from, to, .. } => {
                    format!("install {} {}", from.display(), to.display())
                }
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

/// The result of executing a task.
#[derive(Debug)]
pub struct TaskResult {
    pub termination: Termination,
    /// Console output.
    pub output: Vec<u8>,
}

impl TaskResult {
    fn failed(msg: String) -> Self {
        TaskResult {
            termination: Termination::Failure,
            output: msg.into_bytes(),
        }
    }
}

pub struct FinishedTask {
    /// A (faked) "thread id", used to put different finished tasks in different
    /// tracks in a performance trace.
    pub tid: usize,
    pub task: Task,
    pub span: (Instant, Instant),
    pub result: TaskResult,
}

/// Executes tasks.  Shared by all workers.
pub trait Runner: Sync {
    fn run(&self, task: &Task) -> TaskResult;
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Runs tasks for real, within a build directory.
pub struct CommandRunner {
    root: PathBuf,
}

impl CommandRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CommandRunner { root: root.into() }
    }

    fn prepare(&self, task: &Task) -> anyhow::Result<()> {
        for dir in &task.dirs {
            let dir = self.root.join(dir);
            std::fs::create_dir_all(&dir)
                .map_err(|err| anyhow!("mkdir {}: {}", dir.display(), err))?;
        }
        if let Some(scratch) = &task.scratch {
            let scratch = self.root.join(scratch);
            if scratch.exists() {
                std::fs::remove_dir_all(&scratch)
                    .map_err(|err| anyhow!("clear {}: {}", scratch.display(), err))?;
            }
            std::fs::create_dir_all(&scratch)
                .map_err(|err| anyhow!("mkdir {}: {}", scratch.display(), err))?;
        }
        Ok(())
    }

    fn install(&self, from: &Path, to: &Path, executable: bool) -> anyhow::Result<()> {
        let (src, dst) = (self.root.join(from), self.root.join(to));
        std::fs::copy(&src, &dst)
            .map_err(|err| anyhow!("install {} to {}: {}", from.display(), to.display(), err))?;
        if executable {
            set_executable(&dst)
                .map_err(|err| anyhow!("chmod {}: {}", to.display(), err))?;
        }
        Ok(())
    }

    fn run_steps(&self, task: &Task) -> anyhow::Result<TaskResult> {
        self.prepare(task)?;
        let scratch = task.scratch.as_ref().map(|dir| self.root.join(dir));
        let mut env = Vec::new();
        if let Some(dir) = &scratch {
            env.push((SCRATCH_ENV, dir.as_os_str()));
        }
        let mut output = Vec::new();
        for step in &task.steps {
            match step {
                Step::Command(cmdline) => {
                    let (termination, mut out) = process::run_command(cmdline, &self.root, &env)?;
                    output.append(&mut out);
                    if termination != Termination::Success {
                        return Ok(TaskResult {
                            termination,
                            output,
                        });
                    }
                }
                Step::Install {
                    from,
                    to,
                    executable,
                } => self.install(from, to, *executable)?,
            }
        }
        Ok(TaskResult {
            termination: Termination::Success,
            output,
        })
    }
}

impl Runner for CommandRunner {
    fn run(&self, task: &Task) -> TaskResult {
        self.run_steps(task)
            .unwrap_or_else(|err| TaskResult::failed(err.to_string()))
    }
}

/// Tracks faked "thread ids" -- integers assigned to tasks to track
/// parallelism in perf trace output.
struct ThreadIds {
    /// An entry is true when claimed, false or nonexistent otherwise.
    slots: Vec<bool>,
}

impl ThreadIds {
    fn new() -> Self {
        ThreadIds { slots: Vec::new() }
    }

    fn claim(&mut self) -> usize {
        match self.slots.iter().position(|&used| !used) {
            Some(idx) => {
                self.slots[idx] = true;
                idx
            }
            None => {
                let idx = self.slots.len();
                self.slots.push(true);
                idx
            }
        }
    }

    fn release(&mut self, slot: usize) {
        self.slots[slot] = false;
    }
}

/// The scheduler's handle on the workers.
pub struct Pool {
    jobs: mpsc::Sender<(usize, Task)>,
    finished: mpsc::Receiver<FinishedTask>,
    running: usize,
    tids: ThreadIds,
    parallelism: usize,
}

impl Pool {
    pub fn can_start_more(&self) -> bool {
        self.running < self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.running > 0
    }

    pub fn start(&mut self, task: Task) -> anyhow::Result<()> {
        let tid = self.tids.claim();
        self.jobs
            .send((tid, task))
            .map_err(|_| anyhow!("worker pool shut down"))?;
        self.running += 1;
        Ok(())
    }

    /// Wait for a task to complete.
    pub fn wait(&mut self) -> anyhow::Result<FinishedTask> {
        let task = self
            .finished
            .recv()
            .map_err(|_| anyhow!("worker pool shut down"))?;
        self.tids.release(task.tid);
        self.running -= 1;
        Ok(task)
    }
}

/// Run `scope` with a pool of `parallelism` workers executing tasks through
/// `runner`.  Workers exit once `scope` returns.
pub fn scoped_pool<T>(
    parallelism: usize,
    runner: &dyn Runner,
    scope: impl FnOnce(&mut Pool) -> T,
) -> T {
    let parallelism = parallelism.max(1);
    std::thread::scope(|s| {
        let (job_send, job_recv) = mpsc::channel::<(usize, Task)>();
        let job_recv = Arc::new(Mutex::new(job_recv));
        let (finished_send, finished_recv) = mpsc::channel();

        for _ in 0..parallelism {
            let job_recv = job_recv.clone();
            let finished_send = finished_send.clone();
            s.spawn(move || loop {
                let job = match job_recv.lock() {
                    Ok(recv) => recv.recv(),
                    Err(_) => break,
                };
                let Ok((tid, task)) = job else {
                    break;
                };
                let start = Instant::now();
                let result = runner.run(&task);
                let finished = FinishedTask {
                    tid,
                    task,
                    span: (start, Instant::now()),
                    result,
                };
                // The send only fails if the scheduler has gone away.
                let _ = finished_send.send(finished);
            });
        }

        drop(finished_send);

        let mut pool = Pool {
            jobs: job_send,
            finished: finished_recv,
            running: 0,
            tids: ThreadIds::new(),
            parallelism,
        };
        let result = scope(&mut pool);
        // Dropping the job sender lets idle workers exit.
        drop(pool);
        result
    })
}
