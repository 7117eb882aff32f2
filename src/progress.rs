//! Build progress tracking and reporting, for the purpose of display to the
//! user.

use crate::process::Termination;
use crate::task::{Task, TaskResult};
use crate::terminal;
use crate::work::{BuildState, StateCounts, StepId};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Trait for build progress notifications.
pub trait Progress {
    /// Called as steps move through build states.
    fn update(&mut self, counts: &StateCounts);

    /// Called when a task is handed to a worker.
    fn task_started(&mut self, id: StepId, task: &Task);

    /// Called when a task completes.
    fn task_finished(&mut self, id: StepId, task: &Task, result: &TaskResult);

    /// Log a line of output without corrupting the progress display.
    /// This line is persisted beyond further progress updates.  For example,
    /// used when a task fails; we want the final output to show that failed
    /// task's output even if more work finishes after it.
    fn log(&mut self, msg: &str);
}

/// Create the progress display suited to stdout.
pub fn console(verbose: bool) -> Box<dyn Progress> {
    if terminal::use_fancy() {
        Box::new(FancyConsoleProgress::new(verbose))
    } else {
        Box::new(DumbConsoleProgress::new(verbose))
    }
}

/// The line logged for a finished task, if any.
fn finish_message(task: &Task, result: &TaskResult) -> Option<String> {
    match result.termination {
        Termination::Success if result.output.is_empty() => None,
        Termination::Success => Some(task.desc.clone()),
        Termination::Interrupted => Some(format!("interrupted: {}", task.desc)),
        Termination::Failure => Some(format!("failed: {}", task.desc)),
    }
}

fn write_output(output: &[u8]) {
    if output.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    // Console write errors are not worth failing the build over.
    let _ = stdout.write_all(output);
    if !output.ends_with(b"\n") {
        let _ = stdout.write_all(b"\n");
    }
}

/// Progress implementation for "dumb" console, without any overprinting.
#[derive(Default)]
pub struct DumbConsoleProgress {
    /// Whether to print command lines of started programs.
    verbose: bool,

    /// The id of the last task printed, used to avoid printing it twice
    /// when we have two updates from the same task in a row.
    last_started: Option<StepId>,
}

impl DumbConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            last_started: None,
        }
    }
}

impl Progress for DumbConsoleProgress {
    fn update(&mut self, _counts: &StateCounts) {
        // ignore
    }

    fn task_started(&mut self, id: StepId, task: &Task) {
        if self.verbose {
            self.log(&task.cmdline());
        } else {
            self.log(&task.desc);
        }
        self.last_started = Some(id);
    }

    fn task_finished(&mut self, id: StepId, task: &Task, result: &TaskResult) {
        if let Some(msg) = finish_message(task, result) {
            // Skip repeating a success line we just printed at start.
            if result.termination != Termination::Success || self.last_started != Some(id) {
                self.log(&msg);
            }
        }
        write_output(&result.output);
    }

    fn log(&mut self, msg: &str) {
        println!("{}", msg);
    }
}

/// Progress implementation for "fancy" console, with progress bar etc.
/// Each time it prints, it clears from the cursor to the end of the console,
/// prints the status text, and then moves the cursor back up to the start
/// position.  This means on errors etc. we can clear any status by clearing
/// the console too.
pub struct FancyConsoleProgress {
    state: Arc<Mutex<FancyState>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

/// Screen updates happen after this duration passes, to reduce the amount
/// of printing in the case of rapid updates.  This helps with terminal flicker.
const UPDATE_DELAY: Duration = Duration::from_millis(50);

impl FancyConsoleProgress {
    pub fn new(verbose: bool) -> Self {
        let dirty_cond = Arc::new(Condvar::new());
        let state = Arc::new(Mutex::new(FancyState {
            done: false,
            dirty: false,
            dirty_cond: dirty_cond.clone(),
            counts: StateCounts::default(),
            tasks: VecDeque::new(),
            verbose,
        }));

        // Thread to debounce status updates -- waits a bit, then prints after
        // any dirty state.
        let thread = std::thread::spawn({
            let state = state.clone();
            move || loop {
                // Wait to be notified of a display update, or time out at
                // 500ms so long-running tasks show their elapsed time.
                {
                    let Ok(guard) = state.lock() else { break };
                    let Ok((guard, _)) = dirty_cond.wait_timeout_while(
                        guard,
                        Duration::from_millis(500),
                        |state| !state.dirty,
                    ) else {
                        break;
                    };
                    if guard.done {
                        break;
                    }
                }

                // Delay a little bit in case more display updates come in.
                std::thread::sleep(UPDATE_DELAY);

                // Update regardless of whether we timed out or not.
                match state.lock() {
                    Ok(state) if state.done => break,
                    Ok(mut state) => state.print_progress(),
                    Err(_) => break,
                }
            }
        });

        FancyConsoleProgress {
            state,
            thread: Some(thread),
        }
    }

    fn with_state(&self, f: impl FnOnce(&mut FancyState)) {
        if let Ok(mut state) = self.state.lock() {
            f(&mut state);
        }
    }
}

impl Progress for FancyConsoleProgress {
    fn update(&mut self, counts: &StateCounts) {
        self.with_state(|state| state.update(counts));
    }

    fn task_started(&mut self, id: StepId, task: &Task) {
        self.with_state(|state| state.task_started(id, task));
    }

    fn task_finished(&mut self, id: StepId, task: &Task, result: &TaskResult) {
        self.with_state(|state| state.task_finished(id, task, result));
    }

    fn log(&mut self, msg: &str) {
        self.with_state(|state| state.log(msg));
    }
}

impl Drop for FancyConsoleProgress {
    fn drop(&mut self) {
        self.with_state(|state| state.cleanup());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Currently running task, as tracked for progress updates.
struct RunningTask {
    id: StepId,
    /// When the task started running.
    start: Instant,
    /// Status message for the task.
    message: String,
}

struct FancyState {
    done: bool,
    dirty: bool,
    dirty_cond: Arc<Condvar>,

    /// Counts of steps in each state.
    counts: StateCounts,
    /// Tasks that are currently executing.
    /// Pushed to as tasks are started, so it's always in order of age.
    tasks: VecDeque<RunningTask>,
    /// Whether to print command lines of started programs.
    verbose: bool,
}

impl FancyState {
    fn dirty(&mut self) {
        self.dirty = true;
        self.dirty_cond.notify_one();
    }

    fn update(&mut self, counts: &StateCounts) {
        self.counts = counts.clone();
        self.dirty();
    }

    fn task_started(&mut self, id: StepId, task: &Task) {
        if self.verbose {
            self.log(&task.cmdline());
        }
        self.tasks.push_back(RunningTask {
            id,
            start: Instant::now(),
            message: task.desc.clone(),
        });
        self.dirty();
    }

    fn task_finished(&mut self, id: StepId, task: &Task, result: &TaskResult) {
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            self.tasks.remove(pos);
        }
        if let Some(msg) = finish_message(task, result) {
            self.log(&msg);
        }
        write_output(&result.output);
        self.dirty();
    }

    fn log(&mut self, msg: &str) {
        self.clear_progress();
        println!("{}", msg);
        self.dirty();
    }

    fn cleanup(&mut self) {
        self.clear_progress();
        self.done = true;
        self.dirty(); // let thread quit
    }

    fn clear_progress(&self) {
        // If the user hit ctl-c, it may have printed something on the line.
        // So \r to go to first column first, then clear anything below.
        let _ = std::io::stdout().write_all(b"\r\x1b[J");
    }

    fn print_progress(&mut self) {
        self.clear_progress();
        let failed = self.counts.get(BuildState::Failed);
        let mut progress_line = format!(
            "[{}] {}/{} done, ",
            progress_bar(&self.counts, 40),
            self.counts.get(BuildState::Done) + failed,
            self.counts.total()
        );
        if failed > 0 {
            progress_line.push_str(&format!("{} failed, ", failed));
        }
        progress_line.push_str(&format!(
            "{}/{} running",
            self.tasks.len(),
            self.counts.get(BuildState::Dispatched) + self.counts.get(BuildState::Ready),
        ));
        println!("{}", progress_line);
        let mut lines = 1;

        let max_cols = terminal::get_cols().unwrap_or(80);
        let max_tasks = 8;
        let now = Instant::now();
        for task in self.tasks.iter().take(max_tasks) {
            let delta = now.duration_since(task.start).as_secs() as usize;
            println!("{}", task_message(&task.message, delta, max_cols));
            lines += 1;
        }

        if self.tasks.len() > max_tasks {
            let remaining = self.tasks.len() - max_tasks;
            println!("...and {} more", remaining);
            lines += 1;
        }

        // Move cursor up to the first printed line, for overprinting.
        print!("\x1b[{}A", lines);
        let _ = std::io::stdout().flush();
        self.dirty = false;
    }
}

/// Format a task's status message to optionally include how long it has been
/// running and also to fit within a maximum number of terminal columns.
fn task_message(message: &str, seconds: usize, max_cols: usize) -> String {
    let time_note = if seconds > 2 {
        format!(" ({}s)", seconds)
    } else {
        "".into()
    };
    let mut out = message.to_owned();
    if out.len() + time_note.len() >= max_cols {
        out = truncate(message, max_cols.saturating_sub(time_note.len() + 3)).to_owned();
        out.push_str("...");
    }
    out.push_str(&time_note);
    out
}

/// Cut a string to at most `max` bytes without splitting a character.
fn truncate(s: &str, mut max: usize) -> &str {
    if max >= s.len() {
        return s;
    }
    while !s.is_char_boundary(max) {
        max -= 1;
    }
    &s[..max]
}

/// Render a StateCounts as an ASCII progress bar.
fn progress_bar(counts: &StateCounts, bar_size: usize) -> String {
    let mut bar = String::with_capacity(bar_size);
    let mut sum: usize = 0;
    let total = counts.total();
    if total == 0 {
        return " ".repeat(bar_size);
    }
    for (count, ch) in [
        (
            counts.get(BuildState::Done) + counts.get(BuildState::Failed),
            '=',
        ),
        (
            counts.get(BuildState::Dispatched) + counts.get(BuildState::Ready),
            '-',
        ),
        (counts.get(BuildState::Blocked), ' '),
    ] {
        sum += count;
        let mut target_size = sum * bar_size / total;
        if count > 0 && target_size == bar.len() && target_size < bar_size {
            // Special case: for non-zero count, ensure we always get at least
            // one tick.
            target_size += 1;
        }
        while bar.len() < target_size {
            bar.push(ch);
        }
    }
    bar
}
