//! Single-JSON-document configuration (spec §6.4). Loading and CLI parsing
//! are out of scope; this module owns only the schema and its defaults.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: u8,
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cuda: CudaConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_log_level() -> u8 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default)]
    pub profile: PoolProfile,
    #[serde(default)]
    pub cred_mode: CredMode,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    pub rpc: Option<RpcConfig>,
    pub gbt: Option<GbtConfig>,
    #[serde(default)]
    pub policy: PolicyConfig,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolProfile {
    #[default]
    Stratum,
    Gbt,
    Viabtc,
    F2pool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredMode {
    #[default]
    WalletAsUser,
    AccountWorker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcAuth {
    Cookie,
    Userpass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,
    pub auth: RpcAuth,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbtConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_rules")]
    pub rules: Vec<String>,
    #[serde(default)]
    pub cb_tag: String,
    #[serde(default)]
    pub allow_synth_coinbase: bool,
    pub payout_script_hex: Option<String>,
}

fn default_poll_ms() -> u64 {
    500
}

fn default_rules() -> Vec<String> {
    vec!["segwit".to_string()]
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub force_clean_jobs: bool,
    #[serde(default)]
    pub clean_jobs_default: bool,
    pub version_mask: Option<u32>,
    pub ntime_min: Option<u32>,
    pub ntime_max: Option<u32>,
    pub share_nbits: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_latency_penalty_ms")]
    pub latency_penalty_ms: u64,
    #[serde(default = "default_max_weight")]
    pub max_weight: u32,
}

fn default_latency_penalty_ms() -> u64 {
    2_000
}

fn default_max_weight() -> u32 {
    16
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            latency_penalty_ms: default_latency_penalty_ms(),
            max_weight: default_max_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CudaConfig {
    #[serde(default = "default_hit_ring_capacity")]
    pub hit_ring_capacity: usize,
    #[serde(default = "default_desired_threads")]
    pub desired_threads_per_job: u32,
    #[serde(default = "default_nonces_per_thread")]
    pub nonces_per_thread: u32,
    #[serde(default = "default_budget_ms")]
    pub budget_ms: u64,
}

fn default_hit_ring_capacity() -> usize {
    1024
}
fn default_desired_threads() -> u32 {
    1 << 16
}
fn default_nonces_per_thread() -> u32 {
    256
}
fn default_budget_ms() -> u64 {
    200
}

impl Default for CudaConfig {
    fn default() -> Self {
        CudaConfig {
            hit_ring_capacity: default_hit_ring_capacity(),
            desired_threads_per_job: default_desired_threads(),
            nonces_per_thread: default_nonces_per_thread(),
            budget_ms: default_budget_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboxConfig {
    #[serde(default = "default_outbox_path")]
    pub path: String,
    #[serde(default = "default_outbox_max_bytes")]
    pub max_bytes: u64,
    #[serde(default)]
    pub rotate_on_start: bool,
    pub rotate_interval_sec: Option<u64>,
}

fn default_outbox_path() -> String {
    "outbox.bin".to_string()
}
fn default_outbox_max_bytes() -> u64 {
    16 * 1024 * 1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
    #[serde(default = "default_outbox_max_bytes")]
    pub max_bytes: u64,
    pub rotate_interval_sec: Option<u64>,
}

fn default_ledger_path() -> String {
    "ledger.jsonl".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enable_file: bool,
    pub file_path: Option<String>,
    pub dump_interval_ms: Option<u64>,
    #[serde(default)]
    pub enable_http: bool,
    pub http_host: Option<String>,
    pub http_port: Option<u16>,
    pub file_max_bytes: Option<u64>,
    pub file_rotate_interval_sec: Option<u64>,
}

impl Config {
    pub fn from_json(s: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Config::from_json(&raw)
    }
}
