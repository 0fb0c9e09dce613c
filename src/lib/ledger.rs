//! JSON-lines ledger (spec §4.7): `work_id -> WorkItem`, used to reconstruct
//! header bytes and targets when an old hit is replayed after restart.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;
use crate::registry::WorkItem;

pub struct Ledger {
    path: PathBuf,
    max_bytes: u64,
    rotate_interval_sec: Option<u64>,
    entries: HashMap<u64, WorkItem>,
    file: File,
}

impl Ledger {
    pub fn open(
        path: impl AsRef<Path>,
        max_bytes: u64,
        rotate_interval_sec: Option<u64>,
    ) -> Result<Ledger, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let mut entries = HashMap::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let parsed: WorkItem = serde_json::from_str(&line)?;
                entries.insert(parsed.work_id, parsed);
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Ledger {
            path,
            max_bytes,
            rotate_interval_sec,
            entries,
            file,
        })
    }

    pub fn record(&mut self, item: &WorkItem) -> Result<(), PersistenceError> {
        self.entries.insert(item.work_id, item.clone());
        let mut json = serde_json::to_string(item)?;
        json.push('\n');
        self.file.write_all(json.as_bytes())?;
        self.file.flush()?;
        self.maybe_rotate()?;
        Ok(())
    }

    pub fn get(&self, work_id: u64) -> Option<&WorkItem> {
        self.entries.get(&work_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rotate_interval_sec(&self) -> Option<u64> {
        self.rotate_interval_sec
    }

    /// Rotate the file if it has grown past `max_bytes` (spec §4.7).
    pub fn maybe_rotate(&mut self) -> Result<(), PersistenceError> {
        let size = self.file.metadata()?.len();
        if size > self.max_bytes {
            let stamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos();
            let sibling = self.path.with_extension(format!("{stamp}.rotated"));
            std::fs::rename(&self.path, sibling)?;
            self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        }
        Ok(())
    }
}
