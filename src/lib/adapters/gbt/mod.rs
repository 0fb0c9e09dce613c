//! GBT source adapter (spec §4.4.2): periodic polling, tip-change
//! detection, coinbase synthesis, and `submitblock` assembly.

pub mod protocol;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::GbtError;
use crate::normalize::coinbase::synthesize_coinbase;
use crate::normalize::merkle::merkle_root_be;
use crate::normalize::RawJobInputs;
use crate::primitives::varint::encode_varint;

use protocol::{BitcoinRpcClient, BlockTemplate};

/// Config this adapter needs per pool (spec §6.4 `pools[].gbt`).
#[derive(Debug, Clone)]
pub struct GbtAdapterConfig {
    pub poll_ms: u64,
    pub rules: Vec<String>,
    pub cb_tag: Vec<u8>,
    pub allow_synth_coinbase: bool,
    pub payout_script: Option<Vec<u8>>,
}

/// The coinbase and remaining transactions needed to reassemble a full
/// block once a hit is found against one of this adapter's work items
/// (spec §4.4.2 "submitblock assembly").
struct PendingBlock {
    coinbase: Vec<u8>,
    other_txs: Vec<Vec<u8>>,
}

pub struct GbtAdapter {
    pub source_id: u32,
    pub config: GbtAdapterConfig,
    last_previousblockhash: Option<String>,
    next_work_id: u64,
    queue: VecDeque<RawJobInputs>,
    pending: HashMap<u64, PendingBlock>,
    rpc: Option<Arc<dyn BitcoinRpcClient + Send + Sync>>,
}

impl GbtAdapter {
    pub fn new(source_id: u32, config: GbtAdapterConfig) -> Self {
        GbtAdapter {
            source_id,
            config,
            last_previousblockhash: None,
            next_work_id: 0,
            queue: VecDeque::new(),
            pending: HashMap::new(),
            rpc: None,
        }
    }

    /// Attach the RPC client this adapter polls and submits blocks through.
    /// Kept separate from `new` so tests can exercise `ingest_template`
    /// without a client.
    pub fn with_rpc_client(mut self, rpc: Arc<dyn BitcoinRpcClient + Send + Sync>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn rpc_client(&self) -> Option<Arc<dyn BitcoinRpcClient + Send + Sync>> {
        self.rpc.clone()
    }

    /// Poll `rpc` once: fetch the current template and, if its tip differs
    /// from the last observed one, normalize it into a queued `RawJobInputs`
    /// and remember its transactions for a later `submit_block` (spec §4.4.2
    /// "periodic poll, tip-change detection"). A no-op (`Ok(false)`) when the
    /// tip hasn't moved.
    pub fn poll(&mut self, rpc: &dyn BitcoinRpcClient) -> Result<bool, GbtError> {
        let tmpl = rpc.get_block_template(&self.config.rules)?;
        if !self.is_tip_change(&tmpl) {
            return Ok(false);
        }

        let mut tx_bytes: Vec<Vec<u8>> = Vec::with_capacity(tmpl.transactions.len());
        for tx in &tmpl.transactions {
            tx_bytes.push(hex::decode(&tx.data).map_err(|e| GbtError::MalformedTemplate(e.to_string()))?);
        }
        let coinbase = self.resolve_coinbase(&tmpl)?;

        let raw = self.ingest_template(&tmpl)?;
        let work_id = raw.work_id;
        self.queue.push_back(raw);
        self.pending.insert(work_id, PendingBlock { coinbase, other_txs: tx_bytes });
        Ok(true)
    }

    /// Drain whatever templates `poll` queued since the last call.
    pub fn drain_queue(&mut self) -> Vec<RawJobInputs> {
        self.queue.drain(..).collect()
    }

    /// Assemble and submit the full block for `work_id` via `submitblock`
    /// (spec §4.6 "classification": a block candidate routes to
    /// `submitblock` before the pool-share path, when a GBT submitter is
    /// configured).
    pub fn submit_block(&mut self, rpc: &dyn BitcoinRpcClient, work_id: u64, header80_be: &[u8; 80]) -> Result<(), GbtError> {
        let pending = self.pending.get(&work_id).ok_or(GbtError::NoCoinbaseAvailable)?;
        let hex_block = assemble_submitblock_hex(header80_be, Some(&pending.coinbase), &pending.other_txs)?;
        rpc.submit_block(&hex_block)
    }

    fn allocate_work_id(&mut self) -> u64 {
        let id = ((self.source_id as u64) << 32) | self.next_work_id;
        self.next_work_id = self.next_work_id.wrapping_add(1);
        id
    }

    /// `true` iff `tmpl.previousblockhash` differs from the last one this
    /// adapter observed (spec §4.4.2 "tip change").
    pub fn is_tip_change(&self, tmpl: &BlockTemplate) -> bool {
        self.last_previousblockhash.as_deref() != Some(tmpl.previousblockhash.as_str())
    }

    /// Build a `RawJobInputs` from a newly observed template, synthesizing
    /// a coinbase when the node didn't supply one (spec §4.4.2). Also
    /// records the template's `previousblockhash` as the new baseline for
    /// [`is_tip_change`].
    pub fn ingest_template(&mut self, tmpl: &BlockTemplate) -> Result<RawJobInputs, GbtError> {
        self.last_previousblockhash = Some(tmpl.previousblockhash.clone());

        let prevhash_be = hex_to_32(&tmpl.previousblockhash)?;
        let nbits = hex_to_u32_be(&tmpl.bits)?;

        let mut tx_bytes: Vec<Vec<u8>> = Vec::with_capacity(tmpl.transactions.len());
        for tx in &tmpl.transactions {
            tx_bytes.push(hex::decode(&tx.data).map_err(|e| GbtError::MalformedTemplate(e.to_string()))?);
        }

        let coinbase = self.resolve_coinbase(tmpl)?;

        let merkle_root_be_bytes = if let Some(root_hex) = &tmpl.merkleroot {
            hex_to_32(root_hex)?
        } else {
            let coinbase_txid = crate::primitives::sha256d(&coinbase);
            let mut leaves = vec![coinbase_txid];
            for tx in &tx_bytes {
                leaves.push(crate::primitives::sha256d(tx));
            }
            merkle_root_be(&leaves)
        };

        let work_id = self.allocate_work_id();

        Ok(RawJobInputs {
            source_id: self.source_id,
            work_id,
            version: tmpl.version as u32,
            nbits,
            ntime: tmpl.curtime as u32,
            prevhash_be,
            merkle_root_be: merkle_root_be_bytes,
            header_first64: None,
            share_nbits: 0,
            extranonce2_size: 0,
            clean_jobs: true,
            ntime_min: tmpl.curtime as u32,
            ntime_max: u32::MAX,
            vmask: 0,
        })
    }

    fn resolve_coinbase(&self, tmpl: &BlockTemplate) -> Result<Vec<u8>, GbtError> {
        if let Some(coinbasetxn) = &tmpl.coinbasetxn {
            return hex::decode(&coinbasetxn.data).map_err(|e| GbtError::MalformedTemplate(e.to_string()));
        }

        if self.config.allow_synth_coinbase {
            if let Some(commitment_hex) = &tmpl.default_witness_commitment {
                let commitment = extract_commitment(commitment_hex)?;
                let fees: i64 = tmpl.transactions.iter().map(|t| t.fee).sum();
                return Ok(synthesize_coinbase(
                    tmpl.height as u64,
                    fees.max(0) as u64,
                    &commitment,
                    self.config.payout_script.as_deref(),
                    &self.config.cb_tag,
                ));
            }
        }

        Err(GbtError::NoCoinbaseAvailable)
    }
}

/// `default_witness_commitment` is `aa21a9ed` followed by the 32-byte
/// commitment (possibly with leading script-framing bytes from some
/// nodes); take the trailing 32 bytes.
fn extract_commitment(hex_str: &str) -> Result<[u8; 32], GbtError> {
    let bytes = hex::decode(hex_str).map_err(|e| GbtError::MalformedTemplate(e.to_string()))?;
    if bytes.len() < 32 {
        return Err(GbtError::MalformedTemplate("witness commitment too short".to_string()));
    }
    let tail = &bytes[bytes.len() - 32..];
    Ok(tail.try_into().expect("exactly 32 bytes"))
}

fn hex_to_32(s: &str) -> Result<[u8; 32], GbtError> {
    let bytes = hex::decode(s).map_err(|e| GbtError::MalformedTemplate(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| GbtError::MalformedTemplate("expected 32 bytes".to_string()))
}

fn hex_to_u32_be(s: &str) -> Result<u32, GbtError> {
    let bytes = hex::decode(s).map_err(|e| GbtError::MalformedTemplate(e.to_string()))?;
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| GbtError::MalformedTemplate("expected 4 bytes".to_string()))?;
    Ok(u32::from_be_bytes(arr))
}

/// Assemble `header80 ∥ varint(tx_count) ∥ coinbase ∥ tx1 ∥ … ∥ txn` as hex
/// for `submitblock` (spec §4.4.2). Fails fast if no coinbase was given.
pub fn assemble_submitblock_hex(
    header80_be: &[u8; 80],
    coinbase: Option<&[u8]>,
    other_txs: &[Vec<u8>],
) -> Result<String, GbtError> {
    let coinbase = coinbase.ok_or(GbtError::NoCoinbaseAvailable)?;

    let tx_count = 1 + other_txs.len() as u64;
    let mut out = Vec::with_capacity(80 + 9 + coinbase.len() + other_txs.iter().map(Vec::len).sum::<usize>());
    out.extend_from_slice(header80_be);
    out.extend_from_slice(&encode_varint(tx_count));
    out.extend_from_slice(coinbase);
    for tx in other_txs {
        out.extend_from_slice(tx);
    }
    Ok(hex::encode(out))
}
