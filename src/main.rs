//! `work_coordinator` binary entry point: loads the config document, wires
//! up adapters/engine/persistence, and drives the orchestrator loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;

use work_coordinator::adapters::gbt::protocol::{BitcoinRpcClient, RpcAuth as GbtRpcAuth, ReqwestRpcClient};
use work_coordinator::adapters::gbt::{GbtAdapter, GbtAdapterConfig};
use work_coordinator::adapters::stratum::session::run_session;
use work_coordinator::adapters::stratum::{StratumPolicy, StratumSession};
use work_coordinator::adapters::Adapter;
use work_coordinator::config::{self, Config, PoolProfile};
use work_coordinator::engine::CpuReferenceEngine;
use work_coordinator::ledger::Ledger;
use work_coordinator::orchestrator::{Orchestrator, OrchestratorConfig};
use work_coordinator::outbox::Outbox;

fn init_tracing(log_level: u8) {
    let directive = match log_level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .init();
}

struct StratumLaunch {
    endpoint: (String, u16),
    pool_name: String,
    session: Arc<Mutex<StratumSession>>,
}

struct GbtLaunch {
    pool_name: String,
    poll_ms: u64,
    adapter: Arc<Mutex<GbtAdapter>>,
}

fn rpc_client_for(pool: &config::PoolConfig) -> Option<Arc<dyn BitcoinRpcClient + Send + Sync>> {
    let rpc_cfg = pool.rpc.as_ref()?;
    let auth = match rpc_cfg.auth {
        config::RpcAuth::Cookie => GbtRpcAuth::CookieFile {
            path: rpc_cfg.cookie_path.clone().unwrap_or_default(),
        },
        config::RpcAuth::Userpass => GbtRpcAuth::Userpass {
            username: rpc_cfg.username.clone().unwrap_or_default(),
            password: rpc_cfg.password.clone().unwrap_or_default(),
        },
    };
    Some(Arc::new(ReqwestRpcClient::new(rpc_cfg.url.clone(), auth)))
}

fn build_adapters(config: &Config) -> (Vec<Adapter>, HashMap<u32, u32>, Vec<StratumLaunch>, Vec<GbtLaunch>) {
    let mut adapters = Vec::new();
    let mut weights = HashMap::new();
    let mut stratum_launches = Vec::new();
    let mut gbt_launches = Vec::new();

    for (idx, pool) in config.pools.iter().enumerate() {
        let source_id = idx as u32;
        weights.insert(source_id, pool.weight);

        match pool.profile {
            PoolProfile::Gbt => {
                let Some(gbt_cfg) = &pool.gbt else {
                    tracing::warn!(pool = %pool.name, "gbt profile configured without a gbt block, skipping");
                    continue;
                };
                let Some(rpc) = rpc_client_for(pool) else {
                    tracing::warn!(pool = %pool.name, "gbt profile configured without an rpc block, skipping");
                    continue;
                };
                let adapter = GbtAdapter::new(
                    source_id,
                    GbtAdapterConfig {
                        poll_ms: gbt_cfg.poll_ms,
                        rules: gbt_cfg.rules.clone(),
                        cb_tag: gbt_cfg.cb_tag.as_bytes().to_vec(),
                        allow_synth_coinbase: gbt_cfg.allow_synth_coinbase,
                        payout_script: gbt_cfg.payout_script_hex.as_ref().and_then(|h| hex::decode(h).ok()),
                    },
                )
                .with_rpc_client(rpc);
                let handle = Arc::new(Mutex::new(adapter));

                gbt_launches.push(GbtLaunch {
                    pool_name: pool.name.clone(),
                    poll_ms: gbt_cfg.poll_ms,
                    adapter: handle.clone(),
                });
                adapters.push(Adapter::Gbt(handle));
            }
            PoolProfile::Stratum | PoolProfile::Viabtc | PoolProfile::F2pool => {
                let mut policy = StratumPolicy {
                    force_clean_jobs: pool.policy.force_clean_jobs,
                    clean_jobs_default: pool.policy.clean_jobs_default,
                    version_mask: pool.policy.version_mask,
                    ntime_min: pool.policy.ntime_min,
                    ntime_max: pool.policy.ntime_max,
                };
                if policy.ntime_min.is_none() {
                    policy.ntime_min = Some(0);
                }
                if policy.ntime_max.is_none() {
                    policy.ntime_max = Some(u32::MAX);
                }

                let Some(endpoint) = pool.endpoints.first() else {
                    tracing::warn!(pool = %pool.name, "stratum pool has no endpoints, skipping");
                    continue;
                };

                let mut session = StratumSession::new(source_id, policy);
                session.worker = match pool.cred_mode {
                    config::CredMode::WalletAsUser => pool.name.clone(),
                    config::CredMode::AccountWorker => format!("{}.worker", pool.name),
                };
                let handle = Arc::new(Mutex::new(session));

                stratum_launches.push(StratumLaunch {
                    endpoint: (endpoint.host.clone(), endpoint.port),
                    pool_name: pool.name.clone(),
                    session: handle.clone(),
                });
                adapters.push(Adapter::Stratum(handle));
            }
        }
    }

    (adapters, weights, stratum_launches, gbt_launches)
}

/// Poll a GBT pool on its own blocking thread (`reqwest::blocking` under the
/// hood) and feed normalized templates into the same `Arc<Mutex<GbtAdapter>>`
/// the orchestrator drains from (spec §4.4.2).
fn spawn_gbt_poller(launch: GbtLaunch, stop: Arc<AtomicBool>) {
    tokio::task::spawn_blocking(move || {
        while !stop.load(Ordering::Relaxed) {
            let rpc = launch.adapter.lock().expect("gbt adapter mutex poisoned").rpc_client();
            if let Some(rpc) = rpc {
                let mut guard = launch.adapter.lock().expect("gbt adapter mutex poisoned");
                match guard.poll(rpc.as_ref()) {
                    Ok(true) => tracing::debug!(pool = %launch.pool_name, "gbt tip advanced"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(pool = %launch.pool_name, error = %e, "gbt poll failed"),
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(launch.poll_ms));
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.json".to_string());
    let config = Config::load(&config_path)?;
    init_tracing(config.log_level);

    tracing::info!(pools = config.pools.len(), "starting work_coordinator");

    let outbox = Outbox::open(
        &config.outbox.path,
        config.outbox.max_bytes,
        config.outbox.rotate_on_start,
        config.outbox.rotate_interval_sec,
    )?;
    let ledger = Ledger::open(&config.ledger.path, config.ledger.max_bytes, config.ledger.rotate_interval_sec)?;

    let (adapters, weights, stratum_launches, gbt_launches) = build_adapters(&config);

    let stop = Arc::new(AtomicBool::new(false));

    // Each Stratum adapter's session is shared between the orchestrator's
    // poll/submit path (via the `Adapter::Stratum` handle already moved into
    // `adapters`) and its socket runner task here (spec §5: the runner
    // writes under the lock, the submitter reads/writes the outgoing queue
    // under the same lock) — both sides hold the same `Arc<Mutex<...>>`.
    let mut runner_handles = Vec::new();
    for launch in stratum_launches {
        let stop = stop.clone();
        let worker = launch.session.lock().expect("session mutex poisoned").worker.clone();
        tracing::info!(pool = %launch.pool_name, %worker, endpoint = ?launch.endpoint, "starting stratum session runner");
        let handle = tokio::spawn(run_session(
            launch.session,
            launch.endpoint,
            "work_coordinator/0.1".to_string(),
            worker,
            String::new(),
            stop,
        ));
        runner_handles.push(handle);
    }

    // Same sharing discipline for GBT: the poller writes queued templates
    // under the lock, the orchestrator drains and later submits blocks
    // through the same handle (spec §4.4.2 / §4.6).
    for launch in gbt_launches {
        tracing::info!(pool = %launch.pool_name, poll_ms = launch.poll_ms, "starting gbt poller");
        spawn_gbt_poller(launch, stop.clone());
    }

    let orch_config = OrchestratorConfig {
        latency_penalty_ms: config.scheduler.latency_penalty_ms,
        max_weight: config.scheduler.max_weight,
        dispatch_cap: work_coordinator::scheduler::DEFAULT_CAP,
        desired_threads_per_job: config.cuda.desired_threads_per_job,
        threads_per_block_hint: 256,
        nonces_per_thread: config.cuda.nonces_per_thread,
        budget_ms: config.cuda.budget_ms,
        max_consecutive_failures: 3,
    };

    let mut orchestrator = Orchestrator::new(orch_config, adapters, Box::new(CpuReferenceEngine::new()), outbox, ledger, weights);

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(200));
    let mut housekeeping_ticks = 0u32;
    loop {
        ticker.tick().await;
        if stop.load(Ordering::Relaxed) {
            break;
        }

        match orchestrator.run_once() {
            Ok(accepted) if accepted > 0 => tracing::info!(accepted, "submitted shares this iteration"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "orchestrator iteration failed"),
        }

        housekeeping_ticks += 1;
        if housekeeping_ticks >= 25 {
            if let Err(e) = orchestrator.housekeeping() {
                tracing::warn!(error = %e, "housekeeping failed");
            }
            if config.metrics.enable_file {
                if let Some(path) = &config.metrics.file_path {
                    if let Err(e) = orchestrator.metrics().dump_to_file(path) {
                        tracing::warn!(error = %e, "metrics dump failed");
                    }
                }
            }
            if config.metrics.enable_http {
                tracing::warn!("metrics.enable_http is set but no HTTP exporter is built into this binary");
            }
            housekeeping_ticks = 0;
        }
    }

    Ok(())
}
