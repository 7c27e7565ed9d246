use serde::Serialize;
use std::sync::Arc;

use crate::phase::Timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteRecord {
    pub time: Timestamp,
    pub document_reference: String,
    pub proof_hash: String,
    pub transaction_reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoteLedger {
    records: Arc<Vec<VoteRecord>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // Copies only while an older snapshot is still shared.
    pub fn append(&mut self, record: VoteRecord) {
        Arc::make_mut(&mut self.records).push(record);
    }

    pub fn clear(&mut self) {
        if !self.records.is_empty() {
            self.records = Arc::default();
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[VoteRecord] {
        &self.records
    }

    pub fn shared(&self) -> Arc<Vec<VoteRecord>> {
        Arc::clone(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u64) -> VoteRecord {
        VoteRecord {
            time: Timestamp::from_secs(n),
            document_reference: format!("http://127.0.0.1:5000/pdf/{n}"),
            proof_hash: format!("0x{n:04x}"),
            transaction_reference: format!("https://subscan.io/extrinsic/{n}"),
        }
    }

    #[test]
    fn keeps_arrival_order() {
        let mut ledger = VoteLedger::new();
        ledger.append(record(3));
        ledger.append(record(1));
        ledger.append(record(2));

        let times: Vec<u64> = ledger.records().iter().map(|r| r.time.as_secs()).collect();
        assert_eq!(times, vec![3, 1, 2]);
    }

    #[test]
    fn clear_empties_everything() {
        let mut ledger = VoteLedger::new();
        ledger.append(record(1));
        ledger.append(record(2));
        ledger.clear();

        assert!(ledger.is_empty());
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn snapshots_are_shared_until_the_ledger_changes() {
        let mut ledger = VoteLedger::new();
        ledger.append(record(1));

        let before = ledger.shared();
        assert!(Arc::ptr_eq(&before, &ledger.shared()));

        ledger.append(record(2));
        assert_eq!(before.len(), 1);
        assert_eq!(ledger.len(), 2);
        assert!(!Arc::ptr_eq(&before, &ledger.shared()));

        let full = ledger.shared();
        ledger.clear();
        assert_eq!(full.len(), 2);
        assert!(ledger.shared().is_empty());
    }

    #[test]
    fn serializes_for_presentation() {
        let value = serde_json::to_value(record(5)).expect("serialize record");
        assert_eq!(value["time"], 5);
        assert_eq!(value["proof_hash"], "0x0005");
    }
}
