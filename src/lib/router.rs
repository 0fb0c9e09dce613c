//! Submit router (spec §4.6): re-verify a candidate on the host, dedupe and
//! persist it, then hand it to the injected back-channel.

use crate::outbox::{Outbox, PendingSubmit};
use crate::primitives::sha256d;
use crate::primitives::target::{hash_be_leq_target_le, le_words_to_be32};

/// `verify_and_submit(header80_be, target_le, work_id, nonce) -> accepted?`
/// (spec §4.6). `on_accept` is the injected back-channel callback, invoked
/// once iff the hash clears `target_le` and the entry is newly enqueued.
pub fn verify_and_submit(
    outbox: &mut Outbox,
    header80_be: &[u8; 80],
    target_le: &[u32; 8],
    work_id: u64,
    nonce: u32,
    on_accept: &mut dyn FnMut(&PendingSubmit),
) -> Result<bool, crate::error::PersistenceError> {
    let hash = sha256d(header80_be);
    if !hash_be_leq_target_le(&hash, target_le) {
        return Ok(false);
    }

    let entry = PendingSubmit {
        work_id,
        nonce,
        header80: *header80_be,
    };
    let newly_enqueued = outbox.enqueue(entry)?;
    if newly_enqueued {
        on_accept(&entry);
    }
    Ok(true)
}

/// Whether a verified hit also clears the network's block target (spec
/// §4.6 "Classification").
pub fn is_block_candidate(header80_be: &[u8; 80], block_target_le: &[u32; 8]) -> bool {
    let hash = sha256d(header80_be);
    hash_be_leq_target_le(&hash, block_target_le)
}

/// Render a target as big-endian bytes, for device-side comparisons that
/// want a flat byte buffer rather than LE words (spec §4.8 step 3).
pub fn target_be(target_le: &[u32; 8]) -> [u8; 32] {
    le_words_to_be32(target_le)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::Outbox;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn scratch_outbox() -> Outbox {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "work_coordinator_router_{}_{}.bin",
            std::process::id(),
            n
        ));
        std::fs::remove_file(&path).ok();
        Outbox::open(path, 1 << 20, false, None).unwrap()
    }

    #[test]
    fn scenario_s3_submit_router_accept() {
        let mut outbox = scratch_outbox();
        let header = [0u8; 80];
        let target_le = [0xffff_ffffu32; 8];

        let mut calls = Vec::new();
        let accepted = verify_and_submit(&mut outbox, &header, &target_le, 7, 0, &mut |entry| {
            calls.push(*entry);
        })
        .unwrap();

        assert!(accepted);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].work_id, 7);
        assert_eq!(calls[0].nonce, 0);
        assert_eq!(calls[0].header80, header);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn rejects_when_hash_exceeds_target() {
        let mut outbox = scratch_outbox();
        let header = [0xffu8; 80];
        let target_le = [0u32; 8]; // impossible to clear

        let mut calls = 0;
        let accepted = verify_and_submit(&mut outbox, &header, &target_le, 1, 1, &mut |_| calls += 1).unwrap();
        assert!(!accepted);
        assert_eq!(calls, 0);
        assert!(outbox.is_empty());
    }

    #[test]
    fn duplicate_submission_does_not_invoke_callback_twice() {
        let mut outbox = scratch_outbox();
        let header = [0u8; 80];
        let target_le = [0xffff_ffffu32; 8];

        let mut calls = 0;
        verify_and_submit(&mut outbox, &header, &target_le, 9, 1, &mut |_| calls += 1).unwrap();
        verify_and_submit(&mut outbox, &header, &target_le, 9, 1, &mut |_| calls += 1).unwrap();
        assert_eq!(calls, 1);
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn is_block_candidate_checks_against_block_target() {
        let header = [0u8; 80];
        assert!(is_block_candidate(&header, &[0xffff_ffffu32; 8]));
        assert!(!is_block_candidate(&header, &[0u32; 8]));
    }
}
