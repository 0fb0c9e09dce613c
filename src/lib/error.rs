//! Error kinds grouped by recovery policy (spec §7). Every fallible
//! operation returns a `Result` carrying one of these — no panics on the
//! hot path.

use thiserror::Error;

/// Top-level error type the orchestrator and CLI surface.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("normalizer rejected job: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("stratum session error: {0}")]
    Stratum(#[from] StratumError),

    #[error("gbt adapter error: {0}")]
    Gbt(#[from] GbtError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Malformed or incomplete raw job input (spec §4.2 "Failure").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("ntime_min ({ntime_min}) is greater than ntime_max ({ntime_max})")]
    InvalidNtimeCaps { ntime_min: u32, ntime_max: u32 },
}

/// Transient/malformed conditions on a Stratum session (spec §7).
#[derive(Debug, Error)]
pub enum StratumError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("read timed out")]
    ReadTimeout,
    #[error("connection closed")]
    Closed,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unexpected state for this event: {0}")]
    UnexpectedState(String),
    #[error("no job_id recorded for work_id {0}")]
    UnknownWorkId(u64),
}

/// GBT/RPC conditions (spec §7 "Config/template inconsistency").
#[derive(Debug, Error)]
pub enum GbtError {
    #[error("rpc call failed: {0}")]
    Rpc(String),
    #[error("template has neither coinbasetxn nor a synthesizable witness commitment")]
    NoCoinbaseAvailable,
    #[error("malformed template field: {0}")]
    MalformedTemplate(String),
}

/// Outbox/ledger I/O conditions (spec §7 "Persistence I/O failure").
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record at offset {0}")]
    CorruptRecord(u64),
}

/// Config document is missing or malformed (spec §6.4).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// The opaque search-engine collaborator failed to launch or drain a batch.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine launch failed: {0}")]
    Launch(String),
}
