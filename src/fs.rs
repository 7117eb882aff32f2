//! File system access used for freshness checks, indirected so tests can
//! substitute an in-memory tree.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(SystemTime),
}

impl MTime {
    /// Nanoseconds since the epoch, as stored in the signature db.
    /// Zero stands for Missing.
    pub fn to_nanos(self) -> u64 {
        match self {
            MTime::Missing => 0,
            MTime::Stamp(t) => t
                .duration_since(UNIX_EPOCH)
                .map_or(1, |d| d.as_nanos().max(1) as u64),
        }
    }

    pub fn from_nanos(nanos: u64) -> MTime {
        match nanos {
            0 => MTime::Missing,
            n => MTime::Stamp(UNIX_EPOCH + Duration::from_nanos(n)),
        }
    }
}

pub trait FileSystem: Sync {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    /// stat() an on-disk path, producing its MTime.
    fn stat(&self, path: &Path) -> std::io::Result<MTime>;
}

#[derive(Default)]
pub struct RealFileSystem {}

impl RealFileSystem {
    pub fn new() -> Self {
        RealFileSystem {}
    }
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn stat(&self, path: &Path) -> std::io::Result<MTime> {
        match std::fs::metadata(path) {
            Ok(meta) => Ok(MTime::Stamp(meta.modified()?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MTime::Missing),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! An in-memory FileSystem for tests.

    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryFileSystem {
        files: Mutex<HashMap<PathBuf, (Vec<u8>, MTime)>>,
        clock: Mutex<u64>,
    }

    impl MemoryFileSystem {
        pub fn new() -> Self {
            Self::default()
        }

        /// Write a file, giving it a fresh mtime.
        pub fn write(&self, path: impl Into<PathBuf>, content: &str) {
            let mut clock = self.clock.lock().unwrap();
            *clock += 1;
            let mtime = MTime::Stamp(UNIX_EPOCH + Duration::from_secs(*clock));
            self.files
                .lock()
                .unwrap()
                .insert(path.into(), (content.as_bytes().to_vec(), mtime));
        }

        pub fn remove(&self, path: impl AsRef<Path>) {
            self.files.lock().unwrap().remove(path.as_ref());
        }
    }

    impl FileSystem for MemoryFileSystem {
        fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
            match self.files.lock().unwrap().get(path) {
                Some((content, _)) => Ok(content.clone()),
                None => Err(std::io::Error::from(std::io::ErrorKind::NotFound)),
            }
        }

        fn stat(&self, path: &Path) -> std::io::Result<MTime> {
            Ok(match self.files.lock().unwrap().get(path) {
                Some((_, mtime)) => *mtime,
                None => MTime::Missing,
            })
        }
    }
}
