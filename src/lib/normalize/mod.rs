//! Normalizer: turns one upstream event (a Stratum `mining.notify` or a GBT
//! tip change) into a `WorkItem` + `GpuJobConst` pair (spec §4.2).

pub mod coinbase;
pub mod merkle;

use crate::error::NormalizeError;
use crate::primitives::{be32_to_le_words, compact_to_target_le, midstate_after_64};
use crate::registry::{GpuJobConst, WorkItem};

/// Everything the normalizer needs, already assembled by an adapter. Fields
/// that an adapter may not have on hand (full-header midstate input) are
/// `Option`; everything else is required by construction.
#[derive(Debug, Clone)]
pub struct RawJobInputs {
    pub source_id: u32,
    pub work_id: u64,
    pub version: u32,
    pub nbits: u32,
    pub ntime: u32,
    pub prevhash_be: [u8; 32],
    pub merkle_root_be: [u8; 32],
    /// `version ∥ prevhash_be ∥ merkle_root_be`, truncated to the first 64
    /// bytes the midstate actually consumes. `None` when the adapter didn't
    /// build it, in which case the resulting midstate is diagnostic-only.
    pub header_first64: Option<[u8; 64]>,
    /// Compact share target; `0` means "no varDiff issued yet" — share
    /// target falls back to the block target.
    pub share_nbits: u32,
    pub extranonce2_size: u8,
    pub clean_jobs: bool,
    pub ntime_min: u32,
    pub ntime_max: u32,
    pub vmask: u32,
}

fn build_header_first64(version: u32, prevhash_be: &[u8; 32], merkle_root_be: &[u8; 32]) -> [u8; 64] {
    let mut buf = [0u8; 64];
    buf[0..4].copy_from_slice(&version.to_be_bytes());
    buf[4..36].copy_from_slice(prevhash_be);
    buf[36..64].copy_from_slice(&merkle_root_be[0..28]);
    buf
}

/// `normalize(raw) -> (WorkItem, GpuJobConst)` (spec §4.2). Never partially
/// publishes: either a complete, policy-applied pair comes back, or an
/// error describing exactly what's wrong with `raw`.
pub fn normalize(raw: &RawJobInputs) -> Result<(WorkItem, GpuJobConst), NormalizeError> {
    if raw.ntime_min > raw.ntime_max {
        return Err(NormalizeError::InvalidNtimeCaps {
            ntime_min: raw.ntime_min,
            ntime_max: raw.ntime_max,
        });
    }

    let prevhash_le = be32_to_le_words(&raw.prevhash_be);
    let merkle_root_le = be32_to_le_words(&raw.merkle_root_be);

    let block_target_le = compact_to_target_le(raw.nbits);
    let share_target_le = if raw.share_nbits == 0 {
        block_target_le
    } else {
        compact_to_target_le(raw.share_nbits)
    };

    let ntime = raw.ntime.clamp(raw.ntime_min, raw.ntime_max);

    let (header64, midstate_is_diagnostic) = match raw.header_first64 {
        Some(h) => (h, false),
        None => (
            build_header_first64(raw.version, &raw.prevhash_be, &raw.merkle_root_be),
            true,
        ),
    };
    // The working-register values themselves carry no byte-order ambiguity;
    // `midstate_le` just keeps the naming convention of the other WorkItem
    // word arrays that do come from big-endian byte buffers.
    let midstate_le = midstate_after_64(&header64);

    let item = WorkItem {
        work_id: raw.work_id,
        source_id: raw.source_id,
        version: raw.version,
        ntime,
        nbits: raw.nbits,
        nonce_start: 0,
        prevhash_le,
        merkle_root_le,
        share_target_le,
        block_target_le,
        vmask: raw.vmask,
        ntime_min: raw.ntime_min,
        ntime_max: raw.ntime_max,
        extranonce2_size: raw.extranonce2_size,
        clean_jobs: raw.clean_jobs,
        active: true,
        found_submitted: false,
    };
    let job_const = GpuJobConst {
        midstate_le,
        midstate_is_diagnostic,
    };

    Ok((item, job_const))
}

/// `clamp_version(v, mask) = (base & !mask) | (v & mask)` (spec §4.1): only
/// bits set in `mask` may vary from `base`.
pub fn clamp_version(base: u32, v: u32, mask: u32) -> u32 {
    (base & !mask) | (v & mask)
}

/// `clamp_ntime(t, lo, hi) = min(max(t, lo), hi)` (spec §4.1).
pub fn clamp_ntime(t: u32, lo: u32, hi: u32) -> u32 {
    t.clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawJobInputs {
        RawJobInputs {
            source_id: 0,
            work_id: 1001,
            version: 0x2000_0000,
            nbits: 0x1d00_ffff,
            ntime: 0x05f5_e100,
            prevhash_be: [0u8; 32],
            merkle_root_be: [0u8; 32],
            header_first64: None,
            share_nbits: 0x1e00_ffff,
            extranonce2_size: 4,
            clean_jobs: true,
            ntime_min: 0,
            ntime_max: u32::MAX,
            vmask: 0,
        }
    }

    #[test]
    fn scenario_s1_adapter_registry_integration() {
        let raw = sample_raw();
        let (item, _job_const) = normalize(&raw).unwrap();

        assert_eq!(item.work_id, 1001);
        assert_eq!(item.source_id, 0);
        assert_eq!(item.extranonce2_size, 4);
        assert!(item.clean_jobs);

        let expected_share = compact_to_target_le(0x1e00_ffff);
        let expected_block = compact_to_target_le(0x1d00_ffff);
        assert_eq!(item.share_target_le, expected_share);
        assert_eq!(item.block_target_le, expected_block);
        assert_ne!(item.share_target_le, item.block_target_le);
    }

    #[test]
    fn zero_share_nbits_falls_back_to_block_target() {
        let mut raw = sample_raw();
        raw.share_nbits = 0;
        let (item, _) = normalize(&raw).unwrap();
        assert_eq!(item.share_target_le, item.block_target_le);
    }

    #[test]
    fn invalid_ntime_caps_is_rejected() {
        let mut raw = sample_raw();
        raw.ntime_min = 100;
        raw.ntime_max = 50;
        let err = normalize(&raw).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidNtimeCaps {
                ntime_min: 100,
                ntime_max: 50
            }
        );
    }

    #[test]
    fn ntime_is_clamped_into_caps() {
        let mut raw = sample_raw();
        raw.ntime = 10;
        raw.ntime_min = 20;
        raw.ntime_max = 30;
        let (item, _) = normalize(&raw).unwrap();
        assert_eq!(item.ntime, 20);
    }

    #[test]
    fn missing_header_first64_marks_midstate_diagnostic() {
        let raw = sample_raw();
        let (_, job_const) = normalize(&raw).unwrap();
        assert!(job_const.midstate_is_diagnostic);
    }

    #[test]
    fn present_header_first64_marks_midstate_non_diagnostic() {
        let mut raw = sample_raw();
        raw.header_first64 = Some([0u8; 64]);
        let (_, job_const) = normalize(&raw).unwrap();
        assert!(!job_const.midstate_is_diagnostic);
    }

    #[test]
    fn clamp_version_only_lets_masked_bits_vary() {
        let base = 0x2000_0000;
        let mask = 0x1fff_e000;
        let rolled = clamp_version(base, 0xffff_ffff, mask);
        assert_eq!(rolled & !mask, base & !mask);
        assert_eq!(rolled & mask, mask);
    }

    #[test]
    fn clamp_ntime_bounds_both_directions() {
        assert_eq!(clamp_ntime(5, 10, 20), 10);
        assert_eq!(clamp_ntime(25, 10, 20), 20);
        assert_eq!(clamp_ntime(15, 10, 20), 15);
    }
}
