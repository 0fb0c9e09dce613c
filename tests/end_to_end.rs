//! Black-box pipeline tests: drive `Orchestrator` through only the crate's
//! public API, the way a binary embedding this library would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use work_coordinator::adapters::stratum::protocol::ServerMessage;
use work_coordinator::adapters::stratum::{StratumPolicy, StratumSession};
use work_coordinator::adapters::Adapter;
use work_coordinator::engine::CpuReferenceEngine;
use work_coordinator::ledger::Ledger;
use work_coordinator::orchestrator::{Orchestrator, OrchestratorConfig};
use work_coordinator::outbox::Outbox;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_paths(tag: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    let outbox = std::env::temp_dir().join(format!("work_coordinator_e2e_{tag}_outbox_{pid}_{n}.bin"));
    let ledger = std::env::temp_dir().join(format!("work_coordinator_e2e_{tag}_ledger_{pid}_{n}.jsonl"));
    std::fs::remove_file(&outbox).ok();
    std::fs::remove_file(&ledger).ok();
    (outbox, ledger)
}

fn easy_session(source_id: u32) -> StratumSession {
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
            nbits: 0x2100_ffff,
            ntime: 0,
            clean_jobs: true,
        })
        .unwrap();
    session
}

/// A full pass from a raw Stratum notify through normalization, scheduling,
/// the CPU engine, host-side verification, and persistence into both the
/// outbox and the ledger.
#[test]
fn a_trivial_job_flows_through_to_an_accepted_share_in_both_stores() {
    let (outbox_path, ledger_path) = scratch_paths("accept");
    let outbox = Outbox::open(outbox_path.clone(), 1 << 20, false, None).unwrap();
    let ledger = Ledger::open(ledger_path.clone(), 1 << 20, None).unwrap();

    let mut config = OrchestratorConfig::default();
    config.desired_threads_per_job = 64;
    config.threads_per_block_hint = 64;

    let mut weights = HashMap::new();
    weights.insert(0u32, 1u32);

    let mut orch = Orchestrator::new(
        config,
        vec![Adapter::new_stratum(easy_session(0))],
        Box::new(CpuReferenceEngine::new()),
        outbox,
        ledger,
        weights,
    );

    let accepted = orch.run_once().unwrap();
    assert!(accepted > 0, "expected the easy target to yield at least one accepted share");

    orch.housekeeping().unwrap();

    let outbox_bytes = std::fs::read(&outbox_path).unwrap();
    assert!(!outbox_bytes.is_empty(), "accepted share should have been persisted to the outbox");

    let ledger_contents = std::fs::read_to_string(&ledger_path).unwrap();
    assert!(!ledger_contents.trim().is_empty(), "accepted share should have produced a ledger record");
    assert!(ledger_contents.contains("\"source_id\":0"), "ledger record should carry the originating source id");

    std::fs::remove_file(&outbox_path).ok();
    std::fs::remove_file(&ledger_path).ok();
}

/// Two distinct sources each publish one job; both get scheduled and
/// produce independent outbox/ledger entries in the same pass.
#[test]
fn two_sources_both_contribute_accepted_shares_in_one_pass() {
    let (outbox_path, ledger_path) = scratch_paths("multi");
    let outbox = Outbox::open(outbox_path.clone(), 1 << 20, false, None).unwrap();
    let ledger = Ledger::open(ledger_path.clone(), 1 << 20, None).unwrap();

    let mut config = OrchestratorConfig::default();
    config.desired_threads_per_job = 64;
    config.threads_per_block_hint = 64;

    let mut weights = HashMap::new();
    weights.insert(0u32, 1u32);
    weights.insert(1u32, 1u32);

    let mut orch = Orchestrator::new(
        config,
        vec![Adapter::new_stratum(easy_session(0)), Adapter::new_stratum(easy_session(1))],
        Box::new(CpuReferenceEngine::new()),
        outbox,
        ledger,
        weights,
    );

    let accepted = orch.run_once().unwrap();
    assert!(accepted >= 1, "expected at least one of the two easy sources to yield a hit");

    let ledger_contents = std::fs::read_to_string(&ledger_path).unwrap();
    assert!(!ledger_contents.trim().is_empty());

    std::fs::remove_file(&outbox_path).ok();
    std::fs::remove_file(&ledger_path).ok();
}

/// With no adapters registered, a pass is a well-defined no-op rather than
/// an error or a panic.
#[test]
fn an_idle_orchestrator_with_no_adapters_is_a_quiet_no_op() {
    let (outbox_path, ledger_path) = scratch_paths("idle");
    let outbox = Outbox::open(outbox_path.clone(), 1 << 20, false, None).unwrap();
    let ledger = Ledger::open(ledger_path.clone(), 1 << 20, None).unwrap();

    let mut orch = Orchestrator::new(
        OrchestratorConfig::default(),
        vec![],
        Box::new(CpuReferenceEngine::new()),
        outbox,
        ledger,
        HashMap::new(),
    );

    assert_eq!(orch.run_once().unwrap(), 0);
    orch.housekeeping().unwrap();

    std::fs::remove_file(&outbox_path).ok();
    std::fs::remove_file(&ledger_path).ok();
}
