//! Append-only outbox of pending submissions (spec §4.7), fixed 92-byte
//! records: `[work_id u64 LE][nonce u32 LE][header 80 bytes]`. Crash-safe
//! resubmission: on restart the file is replayed (bounded) back into the
//! in-memory FIFO + dedupe set.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::PersistenceError;

pub const RECORD_LEN: usize = 8 + 4 + 80;

/// An entry awaiting acknowledgement from the upstream source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSubmit {
    pub work_id: u64,
    pub nonce: u32,
    pub header80: [u8; 80],
}

impl PendingSubmit {
    fn to_record(self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0..8].copy_from_slice(&self.work_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.nonce.to_le_bytes());
        buf[12..92].copy_from_slice(&self.header80);
        buf
    }

    fn from_record(buf: &[u8; RECORD_LEN]) -> PendingSubmit {
        let mut reader = &buf[..];
        let work_id = reader.read_u64::<LittleEndian>().unwrap();
        let nonce = reader.read_u32::<LittleEndian>().unwrap();
        let mut header80 = [0u8; 80];
        header80.copy_from_slice(&buf[12..92]);
        PendingSubmit {
            work_id,
            nonce,
            header80,
        }
    }
}

/// Bound on how many records are replayed from disk on startup (spec §4.7).
pub const REPLAY_LIMIT: usize = 128;

pub struct Outbox {
    path: PathBuf,
    max_bytes: u64,
    rotate_interval_sec: Option<u64>,
    queue: Vec<PendingSubmit>,
    seen: HashSet<(u64, u32)>,
    file: File,
}

impl Outbox {
    pub fn open(
        path: impl AsRef<Path>,
        max_bytes: u64,
        rotate_on_start: bool,
        rotate_interval_sec: Option<u64>,
    ) -> Result<Outbox, PersistenceError> {
        let path = path.as_ref().to_path_buf();

        if rotate_on_start && path.exists() {
            rotate_to_sibling(&path)?;
        }

        let mut queue = Vec::new();
        let mut seen = HashSet::new();
        if path.exists() {
            let mut raw = Vec::new();
            File::open(&path)?.read_to_end(&mut raw)?;
            for (i, chunk) in raw.chunks_exact(RECORD_LEN).enumerate() {
                if i >= REPLAY_LIMIT {
                    break;
                }
                let record: [u8; RECORD_LEN] = chunk
                    .try_into()
                    .map_err(|_| PersistenceError::CorruptRecord((i * RECORD_LEN) as u64))?;
                let entry = PendingSubmit::from_record(&record);
                if seen.insert((entry.work_id, entry.nonce)) {
                    queue.push(entry);
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Outbox {
            path,
            max_bytes,
            rotate_interval_sec,
            queue,
            seen,
            file,
        })
    }

    /// Append `entry` unless `(work_id, nonce)` was already enqueued.
    /// Returns whether it was newly added.
    pub fn enqueue(&mut self, entry: PendingSubmit) -> Result<bool, PersistenceError> {
        if !self.seen.insert((entry.work_id, entry.nonce)) {
            return Ok(false);
        }
        self.file.write_all(&entry.to_record())?;
        self.file.flush()?;
        self.queue.push(entry);
        self.maybe_rotate()?;
        Ok(true)
    }

    /// Remove the first queued entry matching `(work_id, nonce)`, if any.
    pub fn drop_entry(&mut self, work_id: u64, nonce: u32) -> bool {
        let key = (work_id, nonce);
        if !self.seen.remove(&key) {
            return false;
        }
        if let Some(idx) = self.queue.iter().position(|e| (e.work_id, e.nonce) == key) {
            self.queue.remove(idx);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, work_id: u64, nonce: u32) -> bool {
        self.seen.contains(&(work_id, nonce))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingSubmit> {
        self.queue.iter()
    }

    /// Re-emit the current in-memory queue as the file's entire contents,
    /// trimming whatever was dropped or rotated out.
    pub fn rewrite_file(&mut self) -> Result<(), PersistenceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        for entry in &self.queue {
            file.write_all(&entry.to_record())?;
        }
        file.flush()?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(())
    }

    /// Rotate the file if it has grown past `max_bytes` (spec §4.7). Called
    /// after every write and also exposed for the orchestrator's periodic
    /// time-based rotation check (§4.8 step 8).
    pub fn maybe_rotate(&mut self) -> Result<(), PersistenceError> {
        let size = self.file.metadata()?.len();
        if size > self.max_bytes {
            rotate_to_sibling(&self.path)?;
            self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        }
        Ok(())
    }

    pub fn rotate_interval_sec(&self) -> Option<u64> {
        self.rotate_interval_sec
    }
}

fn rotate_to_sibling(path: &Path) -> Result<(), PersistenceError> {
    if !path.exists() {
        return Ok(());
    }
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let sibling = path.with_extension(format!("{stamp}.rotated"));
    std::fs::rename(path, sibling)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_path(tag: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("work_coordinator_outbox_{tag}_{}_{}.bin", std::process::id(), n))
    }

    #[test]
    fn scenario_s4_outbox_persistence_round_trip() {
        let path = scratch_path("s4");
        let mut header = [0u8; 80];
        for (i, b) in header.iter_mut().enumerate() {
            *b = i as u8;
        }
        let entry = PendingSubmit {
            work_id: 55,
            nonce: 0xDEAD_BEEF,
            header80: header,
        };

        {
            let mut outbox = Outbox::open(&path, 1 << 20, false, None).unwrap();
            assert!(outbox.enqueue(entry).unwrap());
        }

        let outbox2 = Outbox::open(&path, 1 << 20, false, None).unwrap();
        assert_eq!(outbox2.len(), 1);
        let reloaded = *outbox2.iter().next().unwrap();
        assert_eq!(reloaded, entry);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn scenario_s8_outbox_dedupe() {
        let path = scratch_path("dedupe");
        let mut outbox = Outbox::open(&path, 1 << 20, false, None).unwrap();
        let entry = PendingSubmit {
            work_id: 1,
            nonce: 1,
            header80: [0u8; 80],
        };
        assert!(outbox.enqueue(entry).unwrap());
        assert!(!outbox.enqueue(entry).unwrap());
        assert_eq!(outbox.len(), 1);

        assert!(outbox.drop_entry(1, 1));
        assert_eq!(outbox.len(), 0);
        assert!(!outbox.drop_entry(1, 1));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn rewrite_file_trims_dropped_entries() {
        let path = scratch_path("rewrite");
        let mut outbox = Outbox::open(&path, 1 << 20, false, None).unwrap();
        for i in 0..3u32 {
            outbox
                .enqueue(PendingSubmit {
                    work_id: i as u64,
                    nonce: i,
                    header80: [0u8; 80],
                })
                .unwrap();
        }
        outbox.drop_entry(1, 1);
        outbox.rewrite_file().unwrap();

        let reopened = Outbox::open(&path, 1 << 20, false, None).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(!reopened.contains(1, 1));

        std::fs::remove_file(&path).ok();
    }
}
