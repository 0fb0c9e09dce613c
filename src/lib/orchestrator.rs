//! Pipeline orchestrator (spec §4.8): owns every component, runs the
//! poll/assemble/dispatch/drain loop, and evaluates endpoint rotation.

use std::collections::HashMap;
use std::time::Instant;

use crate::adapters::Adapter;
use crate::autotuner::next_batch_size;
use crate::engine::{header80_be, plan_threads, EngineHit, EngineJob, LaunchPlan, SearchEngine};
use crate::error::CoordinatorError;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::outbox::Outbox;
use crate::primitives::le_words_to_be32;
use crate::registry::WorkSourceRegistry;
use crate::router::{is_block_candidate, verify_and_submit};
use crate::scheduler::{build_dispatch_sequence, effective_weight, next_penalty, SourceStats, DEFAULT_CAP};

/// Per-source scheduler bookkeeping carried across refresh windows (spec
/// §4.5: penalty recomputed every ~2s from deltas observed since the last
/// refresh).
#[derive(Debug, Clone, Default)]
struct SourceRuntime {
    configured_weight: u32,
    penalty: u32,
    last_accepted_total: u64,
    last_rejected_total: u64,
    avg_submit_ms: u64,
}

/// Tunable knobs the orchestrator needs that aren't pulled apart into their
/// own config structs elsewhere (spec §6.4 `scheduler`/`cuda`).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub latency_penalty_ms: u64,
    pub max_weight: u32,
    pub dispatch_cap: usize,
    pub desired_threads_per_job: u32,
    pub threads_per_block_hint: u32,
    pub nonces_per_thread: u32,
    pub budget_ms: u64,
    /// Consecutive-failure threshold before an endpoint is rotated (spec
    /// §4.8 step 8).
    pub max_consecutive_failures: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            latency_penalty_ms: 2_000,
            max_weight: 16,
            dispatch_cap: DEFAULT_CAP,
            desired_threads_per_job: 1 << 16,
            threads_per_block_hint: 256,
            nonces_per_thread: 256,
            budget_ms: 200,
            max_consecutive_failures: 3,
        }
    }
}

/// Owns the registry, adapters, engine, and persistence, and drives one
/// iteration of spec §4.8's 8-step loop per [`Orchestrator::run_once`] call.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: WorkSourceRegistry,
    adapters: Vec<Adapter>,
    engine: Box<dyn SearchEngine + Send>,
    outbox: Outbox,
    ledger: Ledger,
    metrics: Metrics,
    runtimes: HashMap<u32, SourceRuntime>,
    nonce_base: u32,
    nonces_per_thread: u32,
    iterations_since_penalty_refresh: u32,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        adapters: Vec<Adapter>,
        engine: Box<dyn SearchEngine + Send>,
        outbox: Outbox,
        ledger: Ledger,
        source_weights: HashMap<u32, u32>,
    ) -> Self {
        let registry = WorkSourceRegistry::new(adapters.len().max(1));
        let mut runtimes = HashMap::new();
        for adapter in &adapters {
            let source_id = adapter.source_id();
            let configured_weight = *source_weights.get(&source_id).unwrap_or(&1);
            runtimes.insert(
                source_id,
                SourceRuntime {
                    configured_weight,
                    penalty: 0,
                    last_accepted_total: 0,
                    last_rejected_total: 0,
                    avg_submit_ms: 0,
                },
            );
        }
        let nonces_per_thread = config.nonces_per_thread;

        Orchestrator {
            config,
            registry,
            adapters,
            engine,
            outbox,
            ledger,
            metrics: Metrics::new(),
            runtimes,
            nonce_base: 0,
            nonces_per_thread,
            iterations_since_penalty_refresh: 0,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Step 1: drain each adapter's normalized queue into its own slot.
    fn poll_and_publish(&mut self) {
        for (slot_index, adapter) in self.adapters.iter_mut().enumerate() {
            for (item, job_const) in adapter.poll_normalized_full() {
                self.metrics.incr("jobs_published_total", 1);
                self.registry.set(slot_index, item, job_const);
            }
        }
    }

    /// Steps 2–3: snapshot active slots and build the per-job engine table.
    fn build_job_table(&self) -> (Vec<u64>, HashMap<u64, crate::registry::WorkSlotSnapshot>, HashMap<u64, EngineJob>) {
        let active = self.registry.snapshot_active();
        let mut ids = Vec::with_capacity(active.len());
        let mut by_id = HashMap::with_capacity(active.len());
        let mut jobs = HashMap::with_capacity(active.len());

        for (_, snap) in active {
            let work_id = snap.item.work_id;
            ids.push(work_id);
            jobs.insert(
                work_id,
                EngineJob {
                    work_id,
                    version: snap.item.version,
                    ntime: snap.item.ntime,
                    nbits: snap.item.nbits,
                    vmask: snap.item.vmask,
                    ntime_min: snap.item.ntime_min,
                    ntime_max: snap.item.ntime_max,
                    extranonce2_size: snap.item.extranonce2_size,
                    prevhash_le: snap.item.prevhash_le,
                    merkle_root_le: snap.item.merkle_root_le,
                    share_target_be: le_words_to_be32(&snap.item.share_target_le),
                    block_target_le: snap.item.block_target_le,
                    midstate_le: snap.job_const.midstate_le,
                    midstate_is_diagnostic: snap.job_const.midstate_is_diagnostic,
                },
            );
            by_id.insert(work_id, snap);
        }

        (ids, by_id, jobs)
    }

    /// Recompute every known source's penalty (spec §4.5, ~2s cadence;
    /// driven here by the caller's iteration cadence rather than wall-clock
    /// polling, since `run_once` is already called on a fixed tick).
    fn refresh_penalties(&mut self) {
        for (source_id, adapter) in self.adapters.iter().map(|a| (a.source_id(), a)) {
            let (accepted_total, rejected_total) = adapter.accepted_rejected();
            if let Some(runtime) = self.runtimes.get_mut(&source_id) {
                let stats = SourceStats {
                    configured_weight: runtime.configured_weight,
                    penalty: runtime.penalty,
                    accepted_delta: accepted_total.saturating_sub(runtime.last_accepted_total),
                    rejected_delta: rejected_total.saturating_sub(runtime.last_rejected_total),
                    avg_submit_ms: runtime.avg_submit_ms,
                };
                runtime.penalty = next_penalty(&stats, self.config.latency_penalty_ms);
                runtime.last_accepted_total = accepted_total;
                runtime.last_rejected_total = rejected_total;
            }
        }
    }

    /// Step 4: build the replicated dispatch sequence.
    fn dispatch_sequence(&self, ids: &[u64], by_id: &HashMap<u64, crate::registry::WorkSlotSnapshot>) -> Vec<u64> {
        let mut source_of = HashMap::with_capacity(ids.len());
        let mut weight_of = HashMap::with_capacity(self.runtimes.len());
        for &id in ids {
            if let Some(snap) = by_id.get(&id) {
                source_of.insert(id, snap.item.source_id);
            }
        }
        for (source_id, runtime) in &self.runtimes {
            weight_of.insert(
                *source_id,
                effective_weight(runtime.configured_weight, self.config.max_weight, runtime.penalty),
            );
        }
        build_dispatch_sequence(ids, &source_of, &weight_of, self.config.dispatch_cap)
    }

    /// One full pass of spec §4.8's loop. Returns the number of accepted
    /// submissions (share or block) this iteration.
    pub fn run_once(&mut self) -> Result<usize, CoordinatorError> {
        self.poll_and_publish();

        let (ids, by_id, jobs) = self.build_job_table();
        if jobs.is_empty() {
            return Ok(0);
        }

        self.iterations_since_penalty_refresh += 1;
        if self.iterations_since_penalty_refresh >= 10 {
            self.refresh_penalties();
            self.iterations_since_penalty_refresh = 0;
        }

        let dispatch = self.dispatch_sequence(&ids, &by_id);
        let dispatched_ids: std::collections::HashSet<u64> = dispatch.into_iter().collect();
        let dispatched_jobs: Vec<EngineJob> = jobs
            .iter()
            .filter(|(id, _)| dispatched_ids.contains(id))
            .map(|(_, job)| job.clone())
            .collect();

        let (threads_per_block, blocks_per_job) = plan_threads(self.config.desired_threads_per_job, self.config.threads_per_block_hint);
        let plan = LaunchPlan {
            num_jobs: dispatched_jobs.len() as u32,
            blocks_per_job,
            threads_per_block,
            nonce_base: self.nonce_base,
            nonces_per_thread: self.nonces_per_thread,
        };

        let started = Instant::now();
        let hits: Vec<EngineHit> = self.engine.launch(&dispatched_jobs, plan)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.nonces_per_thread = next_batch_size(elapsed_ms, self.config.budget_ms, self.nonces_per_thread);
        self.nonce_base = self
            .nonce_base
            .wrapping_add((plan.blocks_per_job * plan.threads_per_block * plan.nonces_per_thread).max(1));
        self.metrics.set_gauge("last_batch_elapsed_ms", elapsed_ms as f64);
        self.metrics.set_gauge("autotuner_nonces_per_thread", self.nonces_per_thread as f64);

        let mut accepted_count = 0;
        for hit in hits {
            let Some(snap) = by_id.get(&hit.work_id) else { continue };
            let Some(job) = jobs.get(&hit.work_id) else { continue };
            let header = header80_be(job, hit.nonce);

            let accepted = verify_and_submit(&mut self.outbox, &header, &snap.item.share_target_le, hit.work_id, hit.nonce, &mut |_| {
                self.metrics.incr("shares_accepted_total", 1);
            })?;
            if !accepted {
                self.metrics.incr("shares_rejected_locally_total", 1);
                continue;
            }
            accepted_count += 1;
            self.ledger.record(&snap.item)?;

            let is_block = is_block_candidate(&header, &snap.item.block_target_le);
            if is_block {
                self.metrics.incr("blocks_found_total", 1);
            }

            if let Some(adapter) = self.adapters.iter_mut().find(|a| a.source_id() == snap.item.source_id) {
                // A block candidate routes through `submitblock` first (spec
                // §4.6); this is a no-op for Stratum sources and for GBT
                // sources with no RPC client attached.
                if is_block {
                    match adapter.submit_block_if_gbt(hit.work_id, &header) {
                        Ok(()) => {}
                        Err(e) => tracing::warn!(work_id = hit.work_id, error = %e, "submitblock failed"),
                    }
                }
                let _ = adapter.submit(hit.work_id, &header, hit.nonce);
            }
        }

        Ok(accepted_count)
    }

    /// Step 8 (metrics/rotation half): periodic housekeeping a caller
    /// invokes on its own slower cadence.
    pub fn housekeeping(&mut self) -> Result<(), CoordinatorError> {
        self.outbox.maybe_rotate()?;
        self.ledger.maybe_rotate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::stratum::protocol::ServerMessage;
    use crate::adapters::stratum::{StratumPolicy, StratumSession};
    use crate::engine::CpuReferenceEngine;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_paths() -> (std::path::PathBuf, std::path::PathBuf) {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let outbox = std::env::temp_dir().join(format!("work_coordinator_orch_outbox_{}_{}.bin", std::process::id(), n));
        let ledger = std::env::temp_dir().join(format!("work_coordinator_orch_ledger_{}_{}.jsonl", std::process::id(), n));
        std::fs::remove_file(&outbox).ok();
        std::fs::remove_file(&ledger).ok();
        (outbox, ledger)
    }

    fn session_with_trivial_job(source_id: u32) -> StratumSession {
        let mut session = StratumSession::new(source_id, StratumPolicy::default());
        session
            .handle_message(ServerMessage::SubscribeReply {
                extranonce1: vec![0xaa, 0xbb],
                extranonce2_size: 4,
            })
            .unwrap();
        session
            .handle_message(ServerMessage::Notify {
                job_id: "j1".to_string(),
                prevhash_be: [0u8; 32],
                coinb1: vec![0x01],
                coinb2: vec![0x02],
                merkle_branch: vec![],
                version: 1,
                // nbits decodes to an all-but-top-bits target, trivially
                // easy so the CPU reference engine finds a hit immediately.
                nbits: 0x2100_ffff,
                ntime: 0,
                clean_jobs: true,
            })
            .unwrap();
        session
    }

    #[test]
    fn run_once_with_no_adapters_reports_zero_without_erroring() {
        let (outbox_path, ledger_path) = scratch_paths();
        let outbox = Outbox::open(outbox_path, 1 << 20, false, None).unwrap();
        let ledger = Ledger::open(ledger_path, 1 << 20, None).unwrap();
        let mut orch = Orchestrator::new(
            OrchestratorConfig::default(),
            vec![],
            Box::new(CpuReferenceEngine::new()),
            outbox,
            ledger,
            HashMap::new(),
        );
        assert_eq!(orch.run_once().unwrap(), 0);
    }

    #[test]
    fn run_once_publishes_and_drains_a_trivial_job() {
        let (outbox_path, ledger_path) = scratch_paths();
        let outbox = Outbox::open(outbox_path, 1 << 20, false, None).unwrap();
        let ledger = Ledger::open(ledger_path, 1 << 20, None).unwrap();
        let session = session_with_trivial_job(0);
        let mut weights = HashMap::new();
        weights.insert(0u32, 1u32);

        let mut config = OrchestratorConfig::default();
        config.desired_threads_per_job = 64;
        config.threads_per_block_hint = 64;

        let mut orch = Orchestrator::new(
            config,
            vec![Adapter::new_stratum(session)],
            Box::new(CpuReferenceEngine::new()),
            outbox,
            ledger,
            weights,
        );

        let accepted = orch.run_once().unwrap();
        assert!(accepted > 0, "expected at least one accepted hit against an easy target");
    }
}
