//! Source adapters (spec §4.4), re-architected per spec §9 "Polymorphic
//! adapters" as a tagged variant with a small interface instead of virtual
//! dispatch, keeping the orchestrator's hot path monomorphic.

pub mod gbt;
pub mod pool_router;
pub mod stratum;

use std::sync::{Arc, Mutex};

use crate::normalize::{normalize, RawJobInputs};
use crate::registry::{GpuJobConst, WorkItem};

/// `Adapter ∈ { Stratum(…), Gbt(…) }` (spec §9). Both variants share their
/// state with an async/background worker (spec §5 "Session runner
/// state... mutex-guarded; only the runner writes; the submitter reads
/// under the lock") — the orchestrator is that submitter/reader.
pub enum Adapter {
    Stratum(Arc<Mutex<stratum::StratumSession>>),
    Gbt(Arc<Mutex<gbt::GbtAdapter>>),
}

impl Adapter {
    pub fn new_stratum(session: stratum::StratumSession) -> Self {
        Adapter::Stratum(Arc::new(Mutex::new(session)))
    }

    pub fn new_gbt(adapter: gbt::GbtAdapter) -> Self {
        Adapter::Gbt(Arc::new(Mutex::new(adapter)))
    }

    /// Drain whatever normalized jobs have accumulated since the last call,
    /// fully normalized into `(WorkItem, GpuJobConst)` pairs ready for
    /// registry publication. Per-raw-job normalize failures are dropped
    /// (spec §4.2 "Failure": never partially publishes) rather than
    /// aborting the whole drain.
    pub fn poll_normalized_full(&mut self) -> Vec<(WorkItem, GpuJobConst)> {
        let raw_jobs: Vec<RawJobInputs> = match self {
            Adapter::Stratum(session) => session.lock().expect("session mutex poisoned").drain_queue(),
            Adapter::Gbt(adapter) => adapter.lock().expect("gbt adapter mutex poisoned").drain_queue(),
        };
        raw_jobs.iter().filter_map(|raw| normalize(raw).ok()).collect()
    }

    pub fn source_id(&self) -> u32 {
        match self {
            Adapter::Stratum(session) => session.lock().expect("session mutex poisoned").source_id,
            Adapter::Gbt(adapter) => adapter.lock().expect("gbt adapter mutex poisoned").source_id,
        }
    }

    /// Cumulative `(accepted, rejected)` share counts (spec §4.5 scheduler
    /// inputs). GBT has no share concept, so it always reports `(0, 0)`.
    pub fn accepted_rejected(&self) -> (u64, u64) {
        match self {
            Adapter::Stratum(session) => {
                let guard = session.lock().expect("session mutex poisoned");
                (guard.accepted, guard.rejected)
            }
            Adapter::Gbt(_) => (0, 0),
        }
    }

    /// Route a hit found against `work_id` back to its source (spec §9
    /// `submit(header, work_id, nonce)`). GBT block candidates are routed
    /// through `submit_block_if_gbt` instead, since `submitblock` needs the
    /// full transaction set rather than just the header.
    pub fn submit(&mut self, work_id: u64, header80_be: &[u8; 80], nonce: u32) -> Result<(), crate::error::StratumError> {
        match self {
            Adapter::Stratum(session) => session.lock().expect("session mutex poisoned").submit(work_id, header80_be, nonce),
            Adapter::Gbt(_) => Ok(()),
        }
    }

    /// Assemble and submit the full block for `work_id` if this adapter is
    /// a GBT source with an RPC client attached (spec §4.6 "classification").
    /// A no-op for Stratum and for GBT adapters with no RPC client.
    pub fn submit_block_if_gbt(&mut self, work_id: u64, header80_be: &[u8; 80]) -> Result<(), crate::error::GbtError> {
        match self {
            Adapter::Gbt(adapter) => {
                let mut guard = adapter.lock().expect("gbt adapter mutex poisoned");
                let Some(rpc) = guard.rpc_client() else {
                    return Ok(());
                };
                guard.submit_block(rpc.as_ref(), work_id, header80_be)
            }
            Adapter::Stratum(_) => Ok(()),
        }
    }
}
