/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crybb_core::ledger::{id_cmp, ProcessedLedger};
use std::cmp::Ordering;
use tempfile::tempdir;

/// Every id at or below the watermark must be in the ledger, across a
/// partial batch, advancement, and a restart.
#[test]
fn watermark_ids_are_all_processed() {
    let dir = tempdir().unwrap();
    let batch: Vec<String> = ["50", "51", "52", "53"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    {
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        // 52 fails to post this round and stays out of the ledger.
        ledger.mark_processed("50").unwrap();
        ledger.mark_processed("51").unwrap();
        ledger.mark_processed("53").unwrap();

        let moved = ledger.advance_watermark(&batch).unwrap();
        assert_eq!(moved, Some("51".to_string()));
    }

    let ledger = ProcessedLedger::open(dir.path()).unwrap();
    let watermark = ledger.since_id().unwrap();
    assert_eq!(watermark, "51");
    for id in &batch {
        if id_cmp(id, &watermark) != Ordering::Greater {
            assert!(ledger.is_processed(id), "gap below watermark at {id}");
        }
    }
}

/// The retried mention completes in a later batch and the watermark
/// catches up over ids processed in earlier runs.
#[test]
fn watermark_catches_up_after_retry() {
    let dir = tempdir().unwrap();
    let ledger = ProcessedLedger::open(dir.path()).unwrap();
    for id in ["50", "51", "53"] {
        ledger.mark_processed(id).unwrap();
    }
    let batch: Vec<String> = ["50", "51", "52", "53"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(
        ledger.advance_watermark(&batch).unwrap(),
        Some("51".to_string())
    );

    // Next poll re-delivers 52 and it succeeds.
    ledger.mark_processed("52").unwrap();
    assert_eq!(
        ledger.advance_watermark(&batch).unwrap(),
        Some("53".to_string())
    );
}

/// A batch whose members are all already processed advances straight to
/// the max id without any reply work.
#[test]
fn fully_processed_batch_advances_to_max() {
    let dir = tempdir().unwrap();
    let ledger = ProcessedLedger::open(dir.path()).unwrap();
    let batch: Vec<String> = ["7", "8", "10"].iter().map(|s| s.to_string()).collect();
    for id in &batch {
        ledger.mark_processed(id).unwrap();
    }
    assert_eq!(
        ledger.advance_watermark(&batch).unwrap(),
        Some("10".to_string())
    );
    // Re-running the same batch is a no-op.
    assert_eq!(ledger.advance_watermark(&batch).unwrap(), None);
}

/// Ids compare as big integers, not strings.
#[test]
fn id_order_is_numeric() {
    let mut ids: Vec<&str> = vec!["100", "99", "9", "10"];
    ids.sort_by(|a, b| id_cmp(a, b));
    assert_eq!(ids, vec!["9", "10", "99", "100"]);
}
