//! Proposal book.
//!
//! Holds live proposals keyed by the exact intent they were quoted for.
//! A proposal id is single-use: taking it removes it from the book.

use parking_lot::Mutex;
use runbot_core::{Proposal, TradeIntent};
use runbot_ws::{ApiResult, BrokerApi};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ProposalBook {
    entries: Mutex<Vec<(TradeIntent, Proposal)>>,
}

impl ProposalBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `proposal`, replacing any proposal for the same contract type.
    pub fn insert(&self, intent: TradeIntent, proposal: Proposal) {
        let mut entries = self.entries.lock();
        entries.retain(|(i, _)| i.contract_type != intent.contract_type);
        entries.push((intent, proposal));
    }

    /// Remove and return the proposal quoted for exactly `intent`.
    ///
    /// A changed symbol or stake means the quote is stale and is not
    /// returned.
    pub fn take_matching(&self, intent: &TradeIntent) -> Option<Proposal> {
        let mut entries = self.entries.lock();
        let pos = entries.iter().position(|(i, _)| i == intent)?;
        Some(entries.swap_remove(pos).1)
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        if !entries.is_empty() {
            debug!(count = entries.len(), "Proposals cleared");
        }
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Fetch a live proposal for `intent` and store it.
    pub async fn rebuild(&self, api: &dyn BrokerApi, intent: &TradeIntent) -> ApiResult<Proposal> {
        let proposal = api.proposal(intent.clone()).await?;
        debug!(
            id = %proposal.id,
            ask_price = %proposal.ask_price,
            symbol = %proposal.symbol,
            "Proposal rebuilt"
        );
        self.insert(intent.clone(), proposal.clone());
        Ok(proposal)
    }
}
