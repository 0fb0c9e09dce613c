//! Stratum V1 source adapter (spec §4.4.1): session state machine, policy
//! application, and the async session runner.

pub mod protocol;
pub mod session;

use std::collections::{HashMap, VecDeque};

use crate::error::StratumError;
use crate::normalize::RawJobInputs;

use protocol::{next_state, ServerMessage, StratumState};

/// A `mining.submit` the session runner still needs to send over the wire
/// (spec §4.4.1 "Submission").
#[derive(Debug, Clone)]
pub struct OutgoingSubmit {
    pub worker: String,
    pub job_id: String,
    pub extranonce2: Vec<u8>,
    pub ntime: u32,
    pub nonce: u32,
}

/// Per-source policy knobs (spec §6.4 `pools[].policy`).
#[derive(Debug, Clone, Default)]
pub struct StratumPolicy {
    pub force_clean_jobs: bool,
    pub clean_jobs_default: bool,
    pub version_mask: Option<u32>,
    pub ntime_min: Option<u32>,
    pub ntime_max: Option<u32>,
}

/// Session-local state the runner mutates as it reads the line protocol
/// (spec §5 "Session runner state": mutex-guarded, only the runner writes).
pub struct StratumSession {
    pub source_id: u32,
    pub state: StratumState,
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: u8,
    pub vmask: u32,
    pub share_nbits: u32,
    pub policy: StratumPolicy,
    pub accepted: u64,
    pub rejected: u64,
    /// Worker name sent with every `mining.submit` (spec §6.4 `pools[].worker`).
    pub worker: String,
    next_work_id: u64,
    pub queue: VecDeque<RawJobInputs>,
    // (job_id, work_id, nonce) recorded at submit time, matched against the
    // reply that follows (spec §4.4.1 "Submit reply id=3").
    pending_submits: VecDeque<(String, u64, u32)>,
    job_ids: HashMap<u64, String>,
    pub outgoing_submits: VecDeque<OutgoingSubmit>,
}

impl StratumSession {
    pub fn new(source_id: u32, policy: StratumPolicy) -> Self {
        StratumSession {
            source_id,
            state: StratumState::Disconnected,
            extranonce1: Vec::new(),
            extranonce2_size: 0,
            vmask: 0,
            share_nbits: 0,
            policy,
            accepted: 0,
            rejected: 0,
            worker: String::new(),
            next_work_id: 0,
            queue: VecDeque::new(),
            pending_submits: VecDeque::new(),
            job_ids: HashMap::new(),
            outgoing_submits: VecDeque::new(),
        }
    }

    /// Work IDs are namespaced by source to stay globally unique across
    /// reconnects (spec §4.4.1, Open Question resolution: fold `source_id`
    /// into the domain rather than hashing `job_id` alone).
    fn allocate_work_id(&mut self) -> u64 {
        let id = ((self.source_id as u64) << 32) | self.next_work_id;
        self.next_work_id = self.next_work_id.wrapping_add(1);
        id
    }

    /// Drive the session's state machine and side effects from one parsed
    /// server message (spec §4.4.1's transition table).
    pub fn handle_message(&mut self, msg: ServerMessage) -> Result<(), StratumError> {
        self.state = next_state(self.state, &msg);

        match msg {
            ServerMessage::SubscribeReply {
                extranonce1,
                extranonce2_size,
            } => {
                self.extranonce1 = extranonce1;
                self.extranonce2_size = extranonce2_size;
            }
            ServerMessage::AuthorizeReply { .. } => {}
            ServerMessage::ConfigureReply { version_rolling, mask } => {
                if version_rolling {
                    if let Some(mask) = mask {
                        self.vmask = mask;
                    }
                }
            }
            ServerMessage::SetDifficulty { diff } => {
                self.share_nbits = protocol::difficulty_to_compact(diff);
            }
            ServerMessage::Notify {
                job_id,
                prevhash_be,
                coinb1,
                coinb2,
                merkle_branch,
                version,
                nbits,
                ntime,
                clean_jobs,
            } => {
                let raw = self.build_raw_job(job_id, prevhash_be, coinb1, coinb2, merkle_branch, version, nbits, ntime, clean_jobs)?;
                self.queue.push_back(raw);
            }
            ServerMessage::SubmitReply { accepted } => {
                if accepted {
                    self.accepted += 1;
                } else {
                    self.rejected += 1;
                }
                self.pending_submits.pop_front();
            }
            ServerMessage::Unknown => {}
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build_raw_job(
        &mut self,
        job_id: String,
        prevhash_be: [u8; 32],
        coinb1: Vec<u8>,
        coinb2: Vec<u8>,
        merkle_branch: Vec<[u8; 32]>,
        version: u32,
        nbits: u32,
        ntime: u32,
        clean_jobs: bool,
    ) -> Result<RawJobInputs, StratumError> {
        use crate::normalize::coinbase::{assemble_coinbase, CoinbaseParts};
        use crate::normalize::merkle::merkle_root_be;

        // extranonce2 is zero-filled here; the real miner-chosen value is
        // substituted per attempt by the engine/submission path, not at
        // normalize time (spec glossary "Extranonce1/2").
        let extranonce2 = vec![0u8; self.extranonce2_size as usize];
        let parts = CoinbaseParts {
            prefix: coinb1,
            suffix: coinb2,
            witness_commitment: None,
        };
        let coinbase = assemble_coinbase(&parts, &self.extranonce1, &extranonce2);
        let coinbase_txid = crate::primitives::sha256d(&coinbase);

        let mut leaves = vec![coinbase_txid];
        leaves.extend(merkle_branch);
        let merkle_root = merkle_root_be(&leaves);

        let clean_jobs = if self.policy.force_clean_jobs {
            true
        } else if clean_jobs {
            true
        } else {
            self.policy.clean_jobs_default
        };

        let work_id = self.allocate_work_id();
        self.job_ids.insert(work_id, job_id);

        Ok(RawJobInputs {
            source_id: self.source_id,
            work_id,
            version,
            nbits,
            ntime,
            prevhash_be,
            merkle_root_be: merkle_root,
            header_first64: None,
            share_nbits: self.share_nbits,
            extranonce2_size: self.extranonce2_size,
            clean_jobs,
            ntime_min: self.policy.ntime_min.unwrap_or(0),
            ntime_max: self.policy.ntime_max.unwrap_or(u32::MAX),
            vmask: self.policy.version_mask.unwrap_or(self.vmask),
        })
    }

    /// Drain all normalized jobs built since the last drain (the adapter
    /// side of spec §9's `poll_normalized_full()`).
    pub fn drain_queue(&mut self) -> Vec<RawJobInputs> {
        self.queue.drain(..).collect()
    }

    /// Record a submission in flight, to be matched against the next
    /// `SubmitReply` (spec §4.4.1 "Submit reply id=3").
    pub fn record_submit(&mut self, job_id: String, work_id: u64, nonce: u32) {
        self.pending_submits.push_back((job_id, work_id, nonce));
    }

    /// Queue a `mining.submit` for a hit found against `work_id` (the
    /// adapter side of spec §9's `submit(header, work_id, nonce)`). `ntime`
    /// is pulled back out of the 80-byte header rather than threaded
    /// separately, since that's the value the miner actually searched with.
    pub fn submit(&mut self, work_id: u64, header80_be: &[u8; 80], nonce: u32) -> Result<(), StratumError> {
        let job_id = self
            .job_ids
            .get(&work_id)
            .cloned()
            .ok_or(StratumError::UnknownWorkId(work_id))?;
        let ntime = u32::from_be_bytes(header80_be[68..72].try_into().expect("4 bytes"));
        let extranonce2 = vec![0u8; self.extranonce2_size as usize];

        self.outgoing_submits.push_back(OutgoingSubmit {
            worker: self.worker.clone(),
            job_id: job_id.clone(),
            extranonce2,
            ntime,
            nonce,
        });
        self.record_submit(job_id, work_id, nonce);
        Ok(())
    }

    /// Drain queued outgoing submissions for the session runner to send
    /// over the wire (spec §4.4.1 "Submission").
    pub fn drain_outgoing_submits(&mut self) -> Vec<OutgoingSubmit> {
        self.outgoing_submits.drain(..).collect()
    }
}
