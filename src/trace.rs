//! Chrome trace output, viewable in chrome://tracing or Perfetto.
//!
//! Phases of a run show up as complete events on track 0; each executed task
//! shows up on the track of the worker slot that ran it.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(
        &mut self,
        name: &str,
        tid: usize,
        start: Instant,
        end: Instant,
    ) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"tid\": {}, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            tid,
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros(),
        )
    }

    fn write(&mut self, name: &str, tid: usize, start: Instant, end: Instant) -> std::io::Result<()> {
        self.write_complete(name, tid, start, end)?;
        writeln!(self.w, ",")
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        self.write_complete("main", 0, start, Instant::now())?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

fn with_trace(f: impl FnOnce(&mut Trace) -> std::io::Result<()>) {
    if let Ok(mut trace) = TRACE.lock() {
        if let Some(t) = trace.as_mut() {
            // A broken trace file is not worth failing the build over.
            if f(t).is_err() {
                *trace = None;
            }
        }
    }
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    if let Ok(mut slot) = TRACE.lock() {
        *slot = Some(trace);
    }
    Ok(())
}

fn enabled() -> bool {
    TRACE.lock().map_or(false, |trace| trace.is_some())
}

/// Run `f`, recording it as a phase of the run.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    if !enabled() {
        return f();
    }
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    with_trace(|t| t.write(name, 0, start, end));
    result
}

/// Record a finished task on its worker's track.
pub fn task(name: &str, tid: usize, span: (Instant, Instant)) {
    with_trace(|t| t.write(name, tid + 1, span.0, span.1));
}

pub fn close() -> std::io::Result<()> {
    let trace = TRACE.lock().ok().and_then(|mut trace| trace.take());
    match trace {
        Some(mut t) => t.close(),
        None => Ok(()),
    }
}
