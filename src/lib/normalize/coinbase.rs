//! Coinbase assembly: pool-template assembly (prefix/extranonce/suffix) and
//! GBT-driven synthesis when the node gives us raw transactions instead of
//! a ready-made coinbase (spec §4.4.2, grounded in
//! `original_source/src/normalize/coinbase.cc`).

use crate::primitives::varint::{encode_varint, minimal_le_bytes};

/// The two byte runs either side of the extranonce insertion point, plus an
/// optional witness commitment carried along for bookkeeping (spec §3).
#[derive(Debug, Clone, Default)]
pub struct CoinbaseParts {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
    pub witness_commitment: Option<[u8; 32]>,
}

/// Assemble `prefix ∥ extranonce1 ∥ extranonce2 ∥ suffix`.
pub fn assemble_coinbase(parts: &CoinbaseParts, extranonce1: &[u8], extranonce2: &[u8]) -> Vec<u8> {
    let mut tx =
        Vec::with_capacity(parts.prefix.len() + extranonce1.len() + extranonce2.len() + parts.suffix.len());
    tx.extend_from_slice(&parts.prefix);
    tx.extend_from_slice(extranonce1);
    tx.extend_from_slice(extranonce2);
    tx.extend_from_slice(&parts.suffix);
    tx
}

/// Block subsidy at `height`: `50e8` satoshis, halved every 210,000 blocks,
/// zero after 64 halvings (spec §4.4.2).
pub fn subsidy(height: u64) -> u64 {
    let halvings = height / 210_000;
    if halvings >= 64 {
        return 0;
    }
    (50 * 100_000_000u64) >> halvings
}

/// BIP34 height encoding: the minimal little-endian byte run for `height`,
/// prefixed by its own length (spec §4.4.2).
pub fn bip34_height_script(height: u64) -> Vec<u8> {
    let bytes = minimal_le_bytes(height);
    let mut out = Vec::with_capacity(bytes.len() + 1);
    out.push(bytes.len() as u8);
    out.extend_from_slice(&bytes);
    out
}

/// Witness commitment output script: `OP_RETURN` (`0x6a`) + the length byte
/// `0x26` these synthesized coinbases use + the `0xaa21a9ed` marker +
/// the 32-byte commitment. See `DESIGN.md` for why the length byte is
/// `0x26` (38) rather than BIP141's `0x24` (36) — this coinbase path is
/// explicitly diagnostic/non-consensus, and the worked example (scenario
/// S5) fixes this exact byte.
pub fn witness_commitment_script(commitment: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + 32);
    out.push(0x6a);
    out.push(0x26);
    out.extend_from_slice(&[0xaa, 0x21, 0xa9, 0xed]);
    out.extend_from_slice(commitment);
    out
}

fn txout(value: u64, script: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + 9 + script.len());
    out.extend_from_slice(&value.to_le_bytes());
    out.extend_from_slice(&encode_varint(script.len() as u64));
    out.extend_from_slice(script);
    out
}

fn coinbase_txin(script_sig: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + 4 + 9 + script_sig.len() + 4);
    out.extend_from_slice(&[0u8; 32]); // null prevout txid
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // null prevout index
    out.extend_from_slice(&encode_varint(script_sig.len() as u64));
    out.extend_from_slice(script_sig);
    out.extend_from_slice(&0xffff_ffffu32.to_le_bytes()); // sequence
    out
}

/// Synthesize a coinbase transaction when the template gives us no
/// `coinbasetxn` but does carry a `default_witness_commitment` (spec
/// §4.4.2). With `payout_script` set, a spendable payout output is added
/// alongside the commitment output; without it, a minimal one-output
/// OP_RETURN-only coinbase is produced (diagnostic, not spendable).
pub fn synthesize_coinbase(
    height: u64,
    fees: u64,
    commitment: &[u8; 32],
    payout_script: Option<&[u8]>,
    cb_tag: &[u8],
) -> Vec<u8> {
    let mut script_sig = bip34_height_script(height);
    script_sig.extend_from_slice(cb_tag);

    let txin = coinbase_txin(&script_sig);
    let commitment_out = txout(0, &witness_commitment_script(commitment));

    let mut tx = Vec::new();
    tx.extend_from_slice(&1u32.to_le_bytes()); // version
    tx.extend_from_slice(&encode_varint(1)); // txin count
    tx.extend_from_slice(&txin);

    match payout_script {
        Some(script) => {
            let payout_value = subsidy(height).saturating_add(fees);
            let payout_out = txout(payout_value, script);
            tx.extend_from_slice(&encode_varint(2)); // txout count
            tx.extend_from_slice(&payout_out);
            tx.extend_from_slice(&commitment_out);
        }
        None => {
            tx.extend_from_slice(&encode_varint(1)); // txout count
            tx.extend_from_slice(&commitment_out);
        }
    }

    tx.extend_from_slice(&0u32.to_le_bytes()); // locktime
    tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_joins_four_parts_in_order() {
        let parts = CoinbaseParts {
            prefix: vec![1, 2],
            suffix: vec![9, 9],
            witness_commitment: None,
        };
        let out = assemble_coinbase(&parts, &[3, 4], &[5, 6, 7, 8]);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 9]);
    }

    #[test]
    fn subsidy_at_genesis_is_50_btc() {
        assert_eq!(subsidy(0), 50 * 100_000_000);
    }

    #[test]
    fn subsidy_halves_every_210000_blocks() {
        assert_eq!(subsidy(210_000), 25 * 100_000_000);
        assert_eq!(subsidy(420_000), 12_500_000_000 / 2);
    }

    #[test]
    fn subsidy_is_zero_after_64_halvings() {
        assert_eq!(subsidy(210_000 * 64), 0);
    }

    #[test]
    fn bip34_height_zero_is_empty_push() {
        assert_eq!(bip34_height_script(0), vec![0u8]);
    }

    #[test]
    fn bip34_height_encodes_minimal_le_bytes_with_length_prefix() {
        assert_eq!(bip34_height_script(0x0102), vec![2, 0x02, 0x01]);
    }

    #[test]
    fn minimal_coinbase_matches_scenario_s5() {
        let commitment = [0u8; 32];
        let tx = synthesize_coinbase(0, 0, &commitment, None, &[]);
        let hex = hex::encode(&tx);

        assert!(hex.starts_with("01000000"));
        assert!(hex.contains("6a26aa21a9ed"));
        assert!(hex.contains(&"00".repeat(64).chars().take(64).collect::<String>()));
        assert!(hex.ends_with("00000000"));

        // prevout txid is 32 zero bytes right after version + txin-count varint.
        assert_eq!(&tx[5..37], &[0u8; 32]);
    }

    #[test]
    fn payout_variant_has_two_outputs_and_correct_payout_value() {
        let commitment = [7u8; 32];
        let payout_script = vec![0x76, 0xa9]; // stand-in scriptPubKey bytes
        let tx = synthesize_coinbase(0, 1_000, &commitment, Some(&payout_script), b"tag");
        let hex = hex::encode(&tx);
        assert!(hex.contains("07070707070707070707070707070707070707070707070707070707070707"));
        // txout count byte should be 2 right before the first txout.
        // (structural check kept loose: full parse is exercised at a higher layer)
        assert!(tx.len() > 32 + 4 + 9 + 4); // sanity: bigger than minimal variant skeleton
        let expected_value = subsidy(0) + 1_000;
        assert!(hex.contains(&hex::encode(expected_value.to_le_bytes())));
    }
}
