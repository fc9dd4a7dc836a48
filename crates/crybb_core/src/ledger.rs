/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - CRYBB Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

const PROCESSED_FILE: &str = "processed_ids.json";
const SINCE_ID_FILE: &str = "since_id.json";

/// Compare two mention ids as big integers. Ids are decimal strings; a
/// shorter string is a smaller number, equal lengths compare bytewise.
pub fn id_cmp(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Durable set of terminally-handled mention ids plus the since-id
/// high-watermark. Both files are rewritten atomically; all access is
/// serialized behind one mutex.
pub struct ProcessedLedger {
    inner: Mutex<LedgerInner>,
}

struct LedgerInner {
    dir: PathBuf,
    ids: HashSet<String>,
    since_id: Option<String>,
}

impl ProcessedLedger {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create outbox dir: {}", dir.display()))?;

        let ids = read_processed(&dir.join(PROCESSED_FILE))?;
        let since_id = read_since_id(&dir.join(SINCE_ID_FILE))?;
        info!(
            "ledger opened: {} processed ids, since_id={:?}",
            ids.len(),
            since_id
        );
        Ok(Self {
            inner: Mutex::new(LedgerInner { dir, ids, since_id }),
        })
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.inner.lock().unwrap().ids.contains(id)
    }

    /// Add `id` to the ledger, durable on return. Re-marking is a no-op.
    pub fn mark_processed(&self, id: &str) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        if !g.ids.insert(id.to_string()) {
            return Ok(());
        }
        let mut sorted: Vec<&String> = g.ids.iter().collect();
        sorted.sort_by(|a, b| id_cmp(a, b));
        let json = serde_json::to_vec_pretty(&sorted).context("encode processed ids")?;
        write_atomic(&g.dir.join(PROCESSED_FILE), &json)
    }

    pub fn since_id(&self) -> Option<String> {
        self.inner.lock().unwrap().since_id.clone()
    }

    /// Persist a new high-watermark. Regressions are ignored.
    pub fn write_since_id(&self, id: &str) -> Result<()> {
        let mut g = self.inner.lock().unwrap();
        if let Some(current) = &g.since_id {
            if id_cmp(id, current) != Ordering::Greater {
                return Ok(());
            }
        }
        let json = serde_json::to_vec_pretty(&serde_json::json!({ "since_id": id }))
            .context("encode since_id")?;
        write_atomic(&g.dir.join(SINCE_ID_FILE), &json)?;
        g.since_id = Some(id.to_string());
        Ok(())
    }

    /// Advance the watermark to the last id of the longest ascending
    /// prefix of `batch_ids` whose members are all processed. Returns the
    /// new watermark when it moved.
    pub fn advance_watermark(&self, batch_ids: &[String]) -> Result<Option<String>> {
        let mut last_contiguous: Option<&String> = None;
        {
            let g = self.inner.lock().unwrap();
            for id in batch_ids {
                if g.ids.contains(id) {
                    last_contiguous = Some(id);
                } else {
                    break;
                }
            }
        }
        let Some(id) = last_contiguous else {
            return Ok(None);
        };
        let before = self.since_id();
        self.write_since_id(id)?;
        let after = self.since_id();
        Ok(if before != after { after } else { None })
    }
}

fn read_processed(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let bytes =
        fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let ids: Vec<String> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(ids.into_iter().collect())
}

fn read_since_id(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes =
        fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let v: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    Ok(v.get("since_id")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string()))
}

/// Write-temp-then-rename with an fsync before the rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut f = fs::File::create(&tmp)
            .with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(bytes)
            .with_context(|| format!("write {}", tmp.display()))?;
        f.sync_all()
            .with_context(|| format!("fsync {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn id_cmp_orders_numerically() {
        assert_eq!(id_cmp("9", "10"), Ordering::Less);
        assert_eq!(id_cmp("100", "99"), Ordering::Greater);
        assert_eq!(id_cmp("100", "100"), Ordering::Equal);
        assert_eq!(id_cmp("0100", "100"), Ordering::Equal);
    }

    #[test]
    fn mark_is_idempotent_and_durable() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        ledger.mark_processed("100").unwrap();
        ledger.mark_processed("100").unwrap();
        assert!(ledger.is_processed("100"));
        assert!(!ledger.is_processed("101"));

        // A fresh open sees the same state.
        drop(ledger);
        let reopened = ProcessedLedger::open(dir.path()).unwrap();
        assert!(reopened.is_processed("100"));
    }

    #[test]
    fn since_id_round_trips() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        assert_eq!(ledger.since_id(), None);
        ledger.write_since_id("42").unwrap();
        assert_eq!(ledger.since_id(), Some("42".to_string()));

        drop(ledger);
        let reopened = ProcessedLedger::open(dir.path()).unwrap();
        assert_eq!(reopened.since_id(), Some("42".to_string()));
    }

    #[test]
    fn since_id_never_regresses() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        ledger.write_since_id("100").unwrap();
        ledger.write_since_id("99").unwrap();
        assert_eq!(ledger.since_id(), Some("100".to_string()));
    }

    #[test]
    fn watermark_stops_at_the_first_gap() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        ledger.mark_processed("50").unwrap();
        ledger.mark_processed("52").unwrap();

        let batch = vec!["50".to_string(), "51".to_string(), "52".to_string()];
        let moved = ledger.advance_watermark(&batch).unwrap();
        assert_eq!(moved, Some("50".to_string()));
        assert_eq!(ledger.since_id(), Some("50".to_string()));
    }

    #[test]
    fn watermark_advances_over_a_fully_processed_batch() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        for id in ["50", "51", "52"] {
            ledger.mark_processed(id).unwrap();
        }
        let batch = vec!["50".to_string(), "51".to_string(), "52".to_string()];
        assert_eq!(
            ledger.advance_watermark(&batch).unwrap(),
            Some("52".to_string())
        );
    }

    #[test]
    fn watermark_unchanged_when_first_id_is_a_gap() {
        let dir = tempdir().unwrap();
        let ledger = ProcessedLedger::open(dir.path()).unwrap();
        ledger.mark_processed("51").unwrap();
        let batch = vec!["50".to_string(), "51".to_string()];
        assert_eq!(ledger.advance_watermark(&batch).unwrap(), None);
        assert_eq!(ledger.since_id(), None);
    }
}
