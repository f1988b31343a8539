//! Transaction Ledger.
//!
//! Contract events are stored per *storage identity*: an event tagged with
//! an alias display account lands in its execution account's bucket.
//! Buckets are newest first, de-duplicated by the original buy
//! transaction id and written through to the session store on every
//! mutation.
//!
//! A run divider is stored directly below the first contract of a run,
//! so it separates that run from the one before it.

use parking_lot::{Mutex, RwLock};
use runbot_account::IdentityResolver;
use runbot_core::{
    Clock, ContractId, ContractRecord, ContractUpdate, LoginId, RunId, SystemClock, TransactionId,
};
use runbot_persistence::keys::{login_id_from_transactions_key, transactions_key};
use runbot_persistence::{SessionStore, SessionStoreExt};
use runbot_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::entry::{LedgerEntry, RecordOutcome};
use crate::error::LedgerResult;
use crate::stats::LedgerStatistics;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Most recent entries kept per bucket.
    pub max_entries: usize,
    /// Open contracts older than this are not recovered.
    pub recovery_window_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_entries: 5_000,
            recovery_window_secs: 300,
        }
    }
}

pub struct TransactionLedger {
    resolver: Arc<IdentityResolver>,
    store: Arc<dyn SessionStore>,
    buckets: RwLock<HashMap<LoginId, Vec<LedgerEntry>>>,
    recovered: Mutex<HashSet<ContractId>>,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
}

impl TransactionLedger {
    pub fn new(
        resolver: Arc<IdentityResolver>,
        store: Arc<dyn SessionStore>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            buckets: RwLock::new(HashMap::new()),
            recovered: Mutex::new(HashSet::new()),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn load_bucket(&self, login_id: &LoginId) -> Vec<LedgerEntry> {
        match self.store.get::<Vec<LedgerEntry>>(&transactions_key(login_id)) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                warn!(login_id = %login_id, error = %e, "Unreadable ledger bucket, starting empty");
                Vec::new()
            }
        }
    }

    fn with_bucket<R>(&self, login_id: &LoginId, f: impl FnOnce(&mut Vec<LedgerEntry>) -> R) -> R {
        let mut buckets = self.buckets.write();
        let bucket = buckets
            .entry(login_id.clone())
            .or_insert_with(|| self.load_bucket(login_id));
        f(bucket)
    }

    fn persist(&self, login_id: &LoginId, entries: &[LedgerEntry]) -> LedgerResult<()> {
        self.store.set(&transactions_key(login_id), entries)?;
        Metrics::ledger_size(login_id.as_str(), entries.len());
        Ok(())
    }

    /// Record a contract event tagged with `login_id`.
    pub fn record_contract_event(
        &self,
        login_id: &LoginId,
        update: &ContractUpdate,
    ) -> LedgerResult<RecordOutcome> {
        let storage = self.resolver.storage_identity(login_id);
        let max_entries = self.config.max_entries;

        let (outcome, snapshot) = self.with_bucket(&storage, |entries| {
            let buy_id = update.transaction_ids.buy;
            let existing = entries.iter().position(|entry| {
                matches!(entry, LedgerEntry::Contract(record) if record.buy_id() == buy_id)
            });

            let outcome = if let Some(pos) = existing {
                if let LedgerEntry::Contract(record) = &mut entries[pos] {
                    record.apply_update(update);
                }
                RecordOutcome::Updated
            } else {
                let record = ContractRecord::from_update(update);
                if let Some(divider) = divider_for(entries, &record) {
                    entries.insert(0, divider);
                }
                entries.insert(0, LedgerEntry::Contract(record));
                RecordOutcome::Inserted
            };

            if entries.len() > max_entries {
                entries.truncate(max_entries);
                while entries.last().is_some_and(LedgerEntry::is_divider) {
                    entries.pop();
                }
            }
            (outcome, entries.clone())
        });

        self.persist(&storage, &snapshot)?;
        debug!(
            login_id = %login_id,
            storage = %storage,
            buy_id = %update.transaction_ids.buy,
            ?outcome,
            "Contract event recorded"
        );
        Ok(outcome)
    }

    /// Raw stored bucket for `login_id`'s storage identity.
    pub fn entries(&self, login_id: &LoginId) -> Vec<LedgerEntry> {
        let storage = self.resolver.storage_identity(login_id);
        self.with_bucket(&storage, |entries| entries.clone())
    }

    /// Entries to show for `displayed`.
    ///
    /// For an alias display account both its own and its execution
    /// account's buckets are merged. Contracts are de-duplicated by buy id
    /// and sorted newest first; each run divider is placed directly under
    /// the earliest contract of its run.
    pub fn entries_for_display(&self, displayed: &LoginId) -> Vec<LedgerEntry> {
        let alias = self.resolver.alias_entry_for(displayed).cloned();
        let mut sources = vec![self.with_bucket(displayed, |e| e.clone())];
        if let Some(entry) = alias.as_ref() {
            sources.push(self.with_bucket(&entry.execution_account_id, |e| e.clone()));
        }

        let mut contracts: Vec<ContractRecord> = Vec::new();
        let mut index: HashMap<TransactionId, usize> = HashMap::new();
        let mut dividers: HashMap<RunId, LedgerEntry> = HashMap::new();
        for entry in sources.into_iter().flatten() {
            match entry {
                LedgerEntry::Contract(record) => match index.get(&record.buy_id()) {
                    Some(&pos) => {
                        if record.is_completed && !contracts[pos].is_completed {
                            contracts[pos] = record;
                        }
                    }
                    None => {
                        index.insert(record.buy_id(), contracts.len());
                        contracts.push(record);
                    }
                },
                LedgerEntry::Divider { run_id, date_start } => {
                    dividers
                        .entry(run_id.clone())
                        .or_insert(LedgerEntry::Divider { run_id, date_start });
                }
            }
        }

        contracts.sort_by(|a, b| {
            b.date_start
                .cmp(&a.date_start)
                .then_with(|| b.buy_id().cmp(&a.buy_id()))
        });

        let mut earliest: HashMap<&RunId, usize> = HashMap::new();
        for (i, record) in contracts.iter().enumerate() {
            if let Some(run_id) = record.run_id.as_ref() {
                earliest.insert(run_id, i);
            }
        }
        let divider_after: HashMap<usize, RunId> = earliest
            .into_iter()
            .map(|(run_id, i)| (i, run_id.clone()))
            .collect();

        let mut out = Vec::with_capacity(contracts.len() + dividers.len());
        for (i, mut record) in contracts.into_iter().enumerate() {
            if let Some(prefix) = alias.as_ref().and_then(|a| a.id_display_prefix.as_ref()) {
                record.display_buy_id = Some(runbot_account::mask_id(record.buy_id(), prefix));
            }
            out.push(LedgerEntry::Contract(record));
            if let Some(divider) = divider_after.get(&i).and_then(|run| dividers.remove(run)) {
                out.push(divider);
            }
        }
        out
    }

    /// Open contracts worth resuming after a restart.
    pub fn recovery_candidates(&self, login_id: &LoginId) -> Vec<ContractRecord> {
        let now = self.clock.now_secs();
        let window = self.config.recovery_window_secs;
        let recovered = self.recovered.lock().clone();
        self.entries(login_id)
            .into_iter()
            .filter_map(|entry| match entry {
                LedgerEntry::Contract(record) => Some(record),
                LedgerEntry::Divider { .. } => None,
            })
            .filter(|record| record.is_open())
            .filter(|record| !recovered.contains(&record.contract_id))
            .filter(|record| now.saturating_sub(record.date_start) < window)
            .collect()
    }

    pub fn mark_recovered(&self, contract_id: ContractId) {
        self.recovered.lock().insert(contract_id);
    }

    pub fn is_recovered(&self, contract_id: ContractId) -> bool {
        self.recovered.lock().contains(&contract_id)
    }

    /// Accounts with a stored bucket.
    pub fn stored_accounts(&self) -> LedgerResult<Vec<LoginId>> {
        Ok(self
            .store
            .keys()?
            .iter()
            .filter_map(|key| login_id_from_transactions_key(key))
            .collect())
    }

    /// Clear the history shown for `displayed`.
    pub fn clear(&self, displayed: &LoginId) -> LedgerResult<()> {
        let storage = self.resolver.storage_identity(displayed);
        let mut targets = vec![displayed.clone()];
        if storage != *displayed {
            targets.push(storage);
        }
        let mut buckets = self.buckets.write();
        for login_id in targets {
            buckets.remove(&login_id);
            self.store.remove(&transactions_key(&login_id))?;
            Metrics::ledger_size(login_id.as_str(), 0);
        }
        info!(login_id = %displayed, "Ledger cleared");
        Ok(())
    }

    /// Drop every bucket (logout).
    pub fn clear_all(&self) -> LedgerResult<()> {
        let accounts = self.stored_accounts()?;
        let mut buckets = self.buckets.write();
        for login_id in &accounts {
            self.store.remove(&transactions_key(login_id))?;
            Metrics::ledger_size(login_id.as_str(), 0);
        }
        buckets.clear();
        self.recovered.lock().clear();
        info!(accounts = accounts.len(), "All ledgers cleared");
        Ok(())
    }

    /// Totals over what is shown for `displayed`.
    pub fn statistics(&self, displayed: &LoginId) -> LedgerStatistics {
        let entries = self.entries_for_display(displayed);
        LedgerStatistics::from_records(entries.iter().filter_map(LedgerEntry::as_contract))
    }
}

/// Divider to store below `record`, if it starts a new run.
fn divider_for(entries: &[LedgerEntry], record: &ContractRecord) -> Option<LedgerEntry> {
    let run_id = record.run_id.as_ref()?;
    let newest = entries.iter().find_map(LedgerEntry::as_contract)?;
    if newest.run_id.as_ref() == Some(run_id) {
        return None;
    }
    let exists = entries
        .iter()
        .any(|e| matches!(e, LedgerEntry::Divider { run_id: r, .. } if r == run_id));
    if exists {
        return None;
    }
    Some(LedgerEntry::Divider {
        run_id: run_id.clone(),
        date_start: record.date_start,
    })
}
