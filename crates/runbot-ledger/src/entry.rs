//! Ledger entry types.

use runbot_core::{ContractRecord, RunId};
use serde::{Deserialize, Serialize};

/// One stored ledger row: a contract, or the boundary where a new run
/// starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEntry {
    Contract(ContractRecord),
    Divider { run_id: RunId, date_start: u64 },
}

impl LedgerEntry {
    pub fn as_contract(&self) -> Option<&ContractRecord> {
        match self {
            Self::Contract(record) => Some(record),
            Self::Divider { .. } => None,
        }
    }

    pub fn is_divider(&self) -> bool {
        matches!(self, Self::Divider { .. })
    }

    pub fn run_id(&self) -> Option<&RunId> {
        match self {
            Self::Contract(record) => record.run_id.as_ref(),
            Self::Divider { run_id, .. } => Some(run_id),
        }
    }
}

/// Whether `record_contract_event` created or updated a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Updated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divider_serializes_with_kind_tag() {
        let divider = LedgerEntry::Divider {
            run_id: RunId::from_string("run-1"),
            date_start: 10,
        };
        let json = serde_json::to_string(&divider).unwrap();
        assert_eq!(json, r#"{"kind":"divider","run_id":"run-1","date_start":10}"#);
        assert_eq!(serde_json::from_str::<LedgerEntry>(&json).unwrap(), divider);
    }
}
