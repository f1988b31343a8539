//! Run session state enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Contract stage of a run session.
///
/// `NotRunning -> Starting -> PurchaseSent -> PurchaseReceived ->
/// ContractClosed -> (Starting | NotRunning)`, with `IsStopping` entered
/// when a stop is requested while a contract is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStage {
    #[default]
    NotRunning,
    Starting,
    PurchaseSent,
    PurchaseReceived,
    IsStopping,
    ContractClosed,
}

impl ContractStage {
    /// Numeric code for the run stage gauge.
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::NotRunning => 0,
            Self::Starting => 1,
            Self::PurchaseSent => 2,
            Self::PurchaseReceived => 3,
            Self::IsStopping => 4,
            Self::ContractClosed => 5,
        }
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// `NotRunning` is reachable from every stage (forced stop).
    #[must_use]
    pub fn can_transition_to(self, next: ContractStage) -> bool {
        use ContractStage::*;
        if next == NotRunning {
            return true;
        }
        matches!(
            (self, next),
            (NotRunning, Starting)
                | (Starting, PurchaseSent)
                | (Starting, IsStopping)
                | (PurchaseSent, PurchaseReceived)
                | (PurchaseSent, PurchaseSent)
                | (PurchaseSent, IsStopping)
                | (PurchaseSent, ContractClosed)
                | (PurchaseReceived, PurchaseSent)
                | (PurchaseReceived, ContractClosed)
                | (PurchaseReceived, IsStopping)
                | (IsStopping, ContractClosed)
                | (ContractClosed, Starting)
                | (ContractClosed, PurchaseSent)
        )
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        self != Self::NotRunning
    }
}

impl fmt::Display for ContractStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotRunning => "not_running",
            Self::Starting => "starting",
            Self::PurchaseSent => "purchase_sent",
            Self::PurchaseReceived => "purchase_received",
            Self::IsStopping => "is_stopping",
            Self::ContractClosed => "contract_closed",
        };
        f.write_str(s)
    }
}

/// Purchase scope of the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseScope {
    #[default]
    Stopped,
    BeforePurchase,
    DuringPurchase,
}

/// Error class recorded on the run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Recoverable,
    Unrecoverable,
}

impl From<crate::error::ErrorSeverity> for ErrorType {
    fn from(value: crate::error::ErrorSeverity) -> Self {
        match value {
            crate::error::ErrorSeverity::Recoverable => Self::Recoverable,
            crate::error::ErrorSeverity::Unrecoverable => Self::Unrecoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use ContractStage::*;
        let path = [
            NotRunning,
            Starting,
            PurchaseSent,
            PurchaseReceived,
            ContractClosed,
            Starting,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use ContractStage::*;
        assert!(!NotRunning.can_transition_to(PurchaseReceived));
        assert!(!NotRunning.can_transition_to(ContractClosed));
        assert!(!IsStopping.can_transition_to(Starting));
        assert!(!ContractClosed.can_transition_to(PurchaseReceived));
    }

    #[test]
    fn test_forced_stop_always_allowed() {
        use ContractStage::*;
        for stage in [Starting, PurchaseSent, PurchaseReceived, IsStopping, ContractClosed] {
            assert!(stage.can_transition_to(NotRunning));
        }
    }
}
