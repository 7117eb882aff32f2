//! The arbor database stores signatures from previous builds for determining
//! which nodes are up to date.
//!
//! The file is an append-only log, after a short header:
//!
//! ```text
//! path   0x00 len:u16 bytes        assigns the next id to a node identity
//! build  0x01 id:u32 sig:u64 mtime:u64
//! run    0x02 id:u32 sig:u64       test passed with this executable signature
//! forget 0x03 id:u32               drop everything recorded for id
//! ```
//!
//! All integers are little-endian.  Anything unreadable ends the log at that
//! point: the entries before it are kept and the file is rewritten.

use crate::fs::MTime;
use crate::signature::Signature;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const MAGIC: &[u8; 8] = b"arbordb\n";
const VERSION: u32 = 1;

const TAG_PATH: u8 = 0;
const TAG_BUILD: u8 = 1;
const TAG_RUN: u8 = 2;
const TAG_FORGET: u8 = 3;

/// What the last successful build of a node left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildRecord {
    pub signature: Signature,
    /// Modification time of the output just after it was built.
    pub mtime: MTime,
}

#[derive(Debug, Default, Clone)]
struct Entry {
    build: Option<BuildRecord>,
    run: Option<Signature>,
}

/// Records loaded from a previous run, keyed by node identity.
#[derive(Debug, Default)]
pub struct Records {
    entries: FxHashMap<String, Entry>,
}

impl Records {
    pub fn build(&self, identity: &str) -> Option<&BuildRecord> {
        self.entries.get(identity).and_then(|e| e.build.as_ref())
    }

    pub fn run(&self, identity: &str) -> Option<Signature> {
        self.entries.get(identity).and_then(|e| e.run)
    }

    #[cfg(test)]
    pub fn insert_build(&mut self, identity: &str, record: BuildRecord) {
        self.entries.entry(identity.to_string()).or_default().build = Some(record);
    }

    #[cfg(test)]
    pub fn insert_run(&mut self, identity: &str, sig: Signature) {
        self.entries.entry(identity.to_string()).or_default().run = Some(sig);
    }

    fn live_records(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.build.is_some() as usize + e.run.is_some() as usize)
            .sum()
    }
}

/// Appends records for the current run.  Owned by the scheduler, which is the
/// only writer.
pub struct Writer {
    ids: FxHashMap<String, u32>,
    w: BufWriter<File>,
}

impl Writer {
    fn new(file: File) -> Self {
        Writer {
            ids: FxHashMap::default(),
            w: BufWriter::new(file),
        }
    }

    fn write_header(&mut self) -> std::io::Result<()> {
        self.w.write_all(MAGIC)?;
        self.w.write_all(&VERSION.to_le_bytes())
    }

    fn ensure_id(&mut self, identity: &str) -> std::io::Result<u32> {
        if let Some(&id) = self.ids.get(identity) {
            return Ok(id);
        }
        let len = u16::try_from(identity.len()).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("node name too long: {:?}", identity),
            )
        })?;
        let id = self.ids.len() as u32;
        self.w.write_all(&[TAG_PATH])?;
        self.w.write_all(&len.to_le_bytes())?;
        self.w.write_all(identity.as_bytes())?;
        self.ids.insert(identity.to_string(), id);
        Ok(id)
    }

    fn write_build(&mut self, identity: &str, record: &BuildRecord) -> std::io::Result<()> {
        let id = self.ensure_id(identity)?;
        self.w.write_all(&[TAG_BUILD])?;
        self.w.write_all(&id.to_le_bytes())?;
        self.w.write_all(&record.signature.0.to_le_bytes())?;
        self.w.write_all(&record.mtime.to_nanos().to_le_bytes())
    }

    fn write_run(&mut self, identity: &str, sig: Signature) -> std::io::Result<()> {
        let id = self.ensure_id(identity)?;
        self.w.write_all(&[TAG_RUN])?;
        self.w.write_all(&id.to_le_bytes())?;
        self.w.write_all(&sig.0.to_le_bytes())
    }

    pub fn record_build(&mut self, identity: &str, record: &BuildRecord) -> std::io::Result<()> {
        self.write_build(identity, record)?;
        self.w.flush()
    }

    pub fn record_run(&mut self, identity: &str, sig: Signature) -> std::io::Result<()> {
        self.write_run(identity, sig)?;
        self.w.flush()
    }

    /// Drop what is recorded for a node, so it reads as never built.
    pub fn forget(&mut self, identity: &str) -> std::io::Result<()> {
        let id = self.ensure_id(identity)?;
        self.w.write_all(&[TAG_FORGET])?;
        self.w.write_all(&id.to_le_bytes())?;
        self.w.flush()
    }
}

/// Cursor over the raw file contents.  Every read returns None at end of input.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Option<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Some(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Option<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Some(u64::from_le_bytes(buf))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

/// Result of parsing the log: the records, the id assignments, how many
/// records the log held, and why parsing stopped early if it did.
struct Parsed {
    records: Records,
    names: Vec<String>,
    count: usize,
    problem: Option<String>,
}

fn parse(buf: &[u8]) -> Parsed {
    let mut parsed = Parsed {
        records: Records::default(),
        names: Vec::new(),
        count: 0,
        problem: None,
    };
    let mut r = Reader { buf, pos: 0 };
    if r.take(MAGIC.len()) != Some(&MAGIC[..]) || r.read_u32() != Some(VERSION) {
        parsed.problem = Some("unrecognized header".to_string());
        return parsed;
    }
    while !r.at_end() {
        let start = r.pos;
        let ok = parse_record(&mut r, &mut parsed);
        if ok.is_none() {
            parsed.problem = Some(format!("bad record at offset {}", start));
            break;
        }
        parsed.count += 1;
    }
    parsed
}

fn parse_record(r: &mut Reader, parsed: &mut Parsed) -> Option<()> {
    let tag = r.read_u8()?;
    if tag == TAG_PATH {
        let len = r.read_u16()? as usize;
        let name = std::str::from_utf8(r.take(len)?).ok()?;
        parsed.names.push(name.to_string());
        return Some(());
    }
    let id = r.read_u32()? as usize;
    let name = parsed.names.get(id)?.clone();
    let entries = &mut parsed.records.entries;
    match tag {
        TAG_BUILD => {
            let signature = Signature(r.read_u64()?);
            let mtime = MTime::from_nanos(r.read_u64()?);
            entries.entry(name).or_default().build = Some(BuildRecord { signature, mtime });
        }
        TAG_RUN => {
            let sig = Signature(r.read_u64()?);
            entries.entry(name).or_default().run = Some(sig);
        }
        TAG_FORGET => {
            entries.remove(&name);
        }
        _ => return None,
    }
    Some(())
}

/// An opened database.
pub struct Db {
    pub writer: Writer,
    /// What previous runs recorded.
    pub records: Records,
    /// Set when the file could not be fully read; the affected nodes will
    /// simply rebuild.
    pub problem: Option<String>,
}

/// Write a fresh log holding only `records`, replacing the file at `path`.
fn rewrite(path: &Path, records: &Records) -> std::io::Result<Writer> {
    let tmp = path.with_extension("tmp");
    let mut w = Writer::new(File::create(&tmp)?);
    w.write_header()?;
    let mut names: Vec<&String> = records.entries.keys().collect();
    names.sort();
    for name in names {
        let entry = &records.entries[name];
        if let Some(build) = &entry.build {
            w.write_build(name, build)?;
        }
        if let Some(run) = entry.run {
            w.write_run(name, run)?;
        }
    }
    w.w.flush()?;
    std::fs::rename(&tmp, path)?;
    // Keep appending to the renamed file.
    let file = std::fs::OpenOptions::new().append(true).open(path)?;
    Ok(Writer {
        ids: w.ids,
        w: BufWriter::new(file),
    })
}

/// Open or create the database at `path`.
pub fn open(path: &Path) -> anyhow::Result<Db> {
    let (parsed, missing) = match std::fs::read(path) {
        Ok(bytes) => (parse(&bytes), false),
        Err(err) => {
            let mut parsed = parse(&[]);
            parsed.problem = match err.kind() {
                std::io::ErrorKind::NotFound => None,
                _ => Some(format!("read: {}", err)),
            };
            (parsed, err.kind() == std::io::ErrorKind::NotFound)
        }
    };
    let Parsed {
        records,
        names,
        count,
        problem,
    } = parsed;

    let compact = problem.is_some() || missing || count > 4 * records.live_records() + 256;
    let writer = if compact {
        rewrite(path, &records).map_err(|err| anyhow::anyhow!("write {}: {}", path.display(), err))?
    } else {
        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|err| anyhow::anyhow!("open {}: {}", path.display(), err))?;
        let mut writer = Writer::new(file);
        for (id, name) in names.into_iter().enumerate() {
            writer.ids.insert(name, id as u32);
        }
        writer
    };
    Ok(Db {
        writer,
        records,
        problem,
    })
}
