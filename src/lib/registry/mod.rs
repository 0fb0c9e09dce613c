//! The work-source registry: a fixed-size array of versioned slots (spec
//! §4.3). Single writer per slot, lock-free snapshot reads via a generation
//! counter with acquire/release ordering — a seqlock without the odd/even
//! retry dance, since the whole slot is behind one atomic-guarded copy
//! rather than published field-by-field.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Companion immutable data: the SHA-256 midstate after the first 64 header
/// bytes, plus whether that midstate is meaningful or only diagnostic
/// (spec §4.2 step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuJobConst {
    pub midstate_le: [u32; 8],
    pub midstate_is_diagnostic: bool,
}

/// The unit of work the engine and router consume (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub work_id: u64,
    pub source_id: u32,
    pub version: u32,
    pub ntime: u32,
    pub nbits: u32,
    pub nonce_start: u32,
    pub prevhash_le: [u32; 8],
    pub merkle_root_le: [u32; 8],
    pub share_target_le: [u32; 8],
    pub block_target_le: [u32; 8],
    pub vmask: u32,
    pub ntime_min: u32,
    pub ntime_max: u32,
    pub extranonce2_size: u8,
    pub clean_jobs: bool,
    pub active: bool,
    pub found_submitted: bool,
}

/// A by-value copy of a slot, with the generation observed at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSlotSnapshot {
    pub gen: u64,
    pub item: WorkItem,
    pub job_const: GpuJobConst,
}

struct WorkSlot {
    gen: AtomicU64,
    // Single-writer-per-slot in practice (one adapter owns a slot), but we
    // still serialize the two-field update under a mutex so `set` can never
    // be observed torn even if that invariant is ever violated by a caller
    // bug; `gen`'s acquire/release pair is what readers actually rely on.
    payload: Mutex<Option<(WorkItem, GpuJobConst)>>,
}

/// Fixed-size array of [`WorkSlot`]s; one slot per configured source.
pub struct WorkSourceRegistry {
    slots: Vec<WorkSlot>,
}

impl WorkSourceRegistry {
    pub fn new(num_slots: usize) -> Self {
        let slots = (0..num_slots)
            .map(|_| WorkSlot {
                gen: AtomicU64::new(0),
                payload: Mutex::new(None),
            })
            .collect();
        WorkSourceRegistry { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Overwrite the slot's payload, then bump `gen` with release ordering.
    /// `gen == 0` means never-written; the first publish moves it to 1.
    pub fn set(&self, slot_index: usize, item: WorkItem, job_const: GpuJobConst) {
        let slot = &self.slots[slot_index];
        {
            let mut payload = slot.payload.lock().expect("registry mutex poisoned");
            *payload = Some((item, job_const));
        }
        slot.gen.fetch_add(1, Ordering::Release);
    }

    /// Acquire-load `gen`, copy the payload, return a self-consistent
    /// snapshot. Returns `None` if out of range or never written.
    pub fn get(&self, slot_index: usize) -> Option<WorkSlotSnapshot> {
        let slot = self.slots.get(slot_index)?;
        let gen = slot.gen.load(Ordering::Acquire);
        if gen == 0 {
            return None;
        }
        let payload = slot.payload.lock().expect("registry mutex poisoned");
        let (item, job_const) = payload.clone()?;
        Some(WorkSlotSnapshot {
            gen,
            item,
            job_const,
        })
    }

    /// Snapshot every slot whose item is currently active, as
    /// `(slot_index, snapshot)` pairs.
    pub fn snapshot_active(&self) -> Vec<(usize, WorkSlotSnapshot)> {
        (0..self.slots.len())
            .filter_map(|i| self.get(i).map(|s| (i, s)))
            .filter(|(_, s)| s.item.active)
            .collect()
    }
}
