//! The search engine collaborator (spec §1 "explicitly out of scope": the
//! on-device search kernel). We specify only the seam — an opaque batch
//! hasher consuming a job table plus a nonce plan and returning candidate
//! hits — as a trait, with a CPU reference implementation standing in for
//! the real GPU kernel.

use crate::error::EngineError;
use crate::primitives::target::le_words_to_be32;
use crate::primitives::{finish_midstate, sha256, sha256d};

/// One job's worth of data copied out of a registry snapshot for the engine
/// (spec §4.8 step 3).
#[derive(Debug, Clone)]
pub struct EngineJob {
    pub work_id: u64,
    pub version: u32,
    pub ntime: u32,
    pub nbits: u32,
    pub vmask: u32,
    pub ntime_min: u32,
    pub ntime_max: u32,
    pub extranonce2_size: u8,
    pub prevhash_le: [u32; 8],
    pub merkle_root_le: [u32; 8],
    pub share_target_be: [u8; 32],
    pub block_target_le: [u32; 8],
    pub midstate_le: [u32; 8],
    pub midstate_is_diagnostic: bool,
}

/// Launch parameters (spec §4.8 step 5).
#[derive(Debug, Clone, Copy)]
pub struct LaunchPlan {
    pub num_jobs: u32,
    pub blocks_per_job: u32,
    pub threads_per_block: u32,
    pub nonce_base: u32,
    pub nonces_per_thread: u32,
}

/// A candidate nonce the engine believes meets some job's share target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineHit {
    pub work_id: u64,
    pub nonce: u32,
}

/// Choose `threads_per_block` (power of two, clamped to `[64, 1024]`) and
/// the resulting `blocks_per_job` to cover `desired_threads` (spec §4.8
/// step 5).
pub fn plan_threads(desired_threads: u32, threads_per_block_hint: u32) -> (u32, u32) {
    let threads_per_block = threads_per_block_hint.next_power_of_two().clamp(64, 1024);
    let blocks_per_job = desired_threads.div_ceil(threads_per_block).max(1);
    (threads_per_block, blocks_per_job)
}

/// The engine seam: consume a job table and a launch plan, return whatever
/// candidate hits it found. Real implementations hand this off to on-device
/// compute; [`CpuReferenceEngine`] does the same search on the host.
pub trait SearchEngine {
    fn launch(&mut self, jobs: &[EngineJob], plan: LaunchPlan) -> Result<Vec<EngineHit>, EngineError>;
}

/// Reassemble the 80-byte big-endian block header for one job at one nonce
/// (spec §4.8 step 7: `version ∥ prevhash_be ∥ merkle_root_be ∥ ntime ∥ nbits ∥ nonce`).
pub fn header80_be(job: &EngineJob, nonce: u32) -> [u8; 80] {
    let prevhash_be = le_words_to_be32(&job.prevhash_le);
    let merkle_root_be = le_words_to_be32(&job.merkle_root_le);

    let mut header = [0u8; 80];
    header[0..4].copy_from_slice(&job.version.to_be_bytes());
    header[4..36].copy_from_slice(&prevhash_be);
    header[36..68].copy_from_slice(&merkle_root_be);
    header[68..72].copy_from_slice(&job.ntime.to_be_bytes());
    header[72..76].copy_from_slice(&job.nbits.to_be_bytes());
    header[76..80].copy_from_slice(&nonce.to_be_bytes());
    header
}

fn hash_header(job: &EngineJob, nonce: u32) -> [u8; 32] {
    if job.midstate_is_diagnostic {
        let header = header80_be(job, nonce);
        sha256(&sha256(&header))
    } else {
        let header = header80_be(job, nonce);
        let round1 = finish_midstate(job.midstate_le, &header[64..80], 80);
        sha256(&round1)
    }
}

/// A host-side stand-in for the real GPU kernel: brute-forces the nonce
/// range given by the launch plan and checks each hash against the job's
/// share target. Slow, but byte-for-byte faithful — useful for tests and as
/// a functioning fallback when no device is available.
#[derive(Debug, Default)]
pub struct CpuReferenceEngine;

impl CpuReferenceEngine {
    pub fn new() -> Self {
        CpuReferenceEngine
    }
}

impl SearchEngine for CpuReferenceEngine {
    fn launch(&mut self, jobs: &[EngineJob], plan: LaunchPlan) -> Result<Vec<EngineHit>, EngineError> {
        let total_nonces = (plan.blocks_per_job as u64)
            .saturating_mul(plan.threads_per_block as u64)
            .saturating_mul(plan.nonces_per_thread as u64);

        let mut hits = Vec::new();
        for job in jobs {
            for offset in 0..total_nonces {
                let nonce = plan.nonce_base.wrapping_add(offset as u32);
                let hash = hash_header(job, nonce);
                if hash.iter().cmp(job.share_target_be.iter()) != std::cmp::Ordering::Greater {
                    hits.push(EngineHit {
                        work_id: job.work_id,
                        nonce,
                    });
                }
            }
        }
        Ok(hits)
    }
}
