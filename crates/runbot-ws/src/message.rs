//! Brokerage API message types.
//!
//! Only the subset the trade core consumes is modelled: `authorize`, `buy`,
//! `proposal`, `proposal_open_contract`, `balance`, `transaction` and `ping`.

use runbot_core::{
    AccountBalance, ApiError, BuyParameters, BuyReceipt, BuyRequest, ContractId, ContractType,
    ContractUpdate, LoginId, Money, Proposal, TradeIntent, TransactionId, TransactionIds,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WsError, WsResult};

// ============================================================================
// Requests (Outgoing)
// ============================================================================

/// Outgoing API request body. `req_id` is added by [`RequestEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApiRequest {
    Authorize {
        authorize: String,
    },
    Buy {
        buy: String,
        price: Money,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<BuyParameters>,
    },
    Proposal(ProposalRequest),
    ProposalOpenContract {
        proposal_open_contract: u8,
        contract_id: ContractId,
        subscribe: u8,
    },
    Balance {
        balance: u8,
        subscribe: u8,
    },
    Ping {
        ping: u8,
    },
}

impl ApiRequest {
    pub fn authorize(token: &runbot_core::Token) -> Self {
        Self::Authorize {
            authorize: token.expose().to_string(),
        }
    }

    /// Buy in either purchase mode. Direct mode sends `buy: "1"` with the
    /// full parameter payload.
    pub fn buy(request: &BuyRequest) -> Self {
        match request {
            BuyRequest::Proposal { id, price } => Self::Buy {
                buy: id.clone(),
                price: *price,
                parameters: None,
            },
            BuyRequest::Direct { price, parameters } => Self::Buy {
                buy: "1".to_string(),
                price: *price,
                parameters: Some(parameters.clone()),
            },
        }
    }

    pub fn proposal(intent: &TradeIntent) -> Self {
        Self::Proposal(ProposalRequest::from_intent(intent))
    }

    pub fn subscribe_contract(contract_id: ContractId) -> Self {
        Self::ProposalOpenContract {
            proposal_open_contract: 1,
            contract_id,
            subscribe: 1,
        }
    }

    pub fn subscribe_balance() -> Self {
        Self::Balance {
            balance: 1,
            subscribe: 1,
        }
    }

    pub fn ping() -> Self {
        Self::Ping { ping: 1 }
    }

    /// Name used in logs. Never includes the credential.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::Buy { .. } => "buy",
            Self::Proposal(_) => "proposal",
            Self::ProposalOpenContract { .. } => "proposal_open_contract",
            Self::Balance { .. } => "balance",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Price quote request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalRequest {
    pub proposal: u8,
    #[serde(flatten)]
    pub parameters: BuyParameters,
}

impl ProposalRequest {
    pub fn from_intent(intent: &TradeIntent) -> Self {
        Self {
            proposal: 1,
            parameters: intent.to_parameters(),
        }
    }
}

/// Request body with its correlation id.
#[derive(Debug, Serialize)]
pub struct RequestEnvelope<'a> {
    #[serde(flatten)]
    pub request: &'a ApiRequest,
    pub req_id: u64,
}

impl<'a> RequestEnvelope<'a> {
    pub fn new(request: &'a ApiRequest, req_id: u64) -> Self {
        Self { request, req_id }
    }

    pub fn to_json(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Responses (Incoming)
// ============================================================================

/// Parsed incoming message: the common envelope plus the raw payload under
/// the `msg_type` key.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    pub msg_type: String,
    pub req_id: Option<u64>,
    pub error: Option<ApiError>,
    pub payload: Value,
}

impl IncomingMessage {
    pub fn parse(text: &str) -> WsResult<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| WsError::ParseError("message is not an object".to_string()))?;

        let msg_type = obj
            .get("msg_type")
            .and_then(Value::as_str)
            .ok_or_else(|| WsError::ParseError("missing msg_type".to_string()))?
            .to_string();
        let req_id = obj.get("req_id").and_then(Value::as_u64);
        let error = match obj.remove("error") {
            Some(e) => Some(serde_json::from_value::<ApiError>(e)?),
            None => None,
        };
        let payload = obj.remove(&msg_type).unwrap_or(Value::Null);

        Ok(Self {
            msg_type,
            req_id,
            error,
            payload,
        })
    }

    /// Payload as `T`, or the server error when one is present.
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> Result<T, ApiError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        serde_json::from_value(self.payload).map_err(|e| {
            ApiError::new(
                "ResponseParseError",
                format!("invalid {} payload: {e}", self.msg_type),
            )
        })
    }

    /// Subscription pushes forwarded to the router.
    pub fn to_push(&self) -> Option<PushMessage> {
        if self.error.is_some() {
            return None;
        }
        match self.msg_type.as_str() {
            "proposal_open_contract" => {
                serde_json::from_value::<OpenContractPayload>(self.payload.clone())
                    .ok()
                    .map(|p| PushMessage::Contract(p.into_update()))
            }
            "balance" => serde_json::from_value::<BalancePayload>(self.payload.clone())
                .ok()
                .and_then(|p| p.into_balance())
                .map(PushMessage::Balance),
            "transaction" => serde_json::from_value::<TransactionPush>(self.payload.clone())
                .ok()
                .map(PushMessage::Transaction),
            _ => None,
        }
    }
}

/// `authorize` response payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthorizeInfo {
    #[serde(rename = "loginid")]
    pub login_id: LoginId,
    pub balance: Money,
    pub currency: String,
    #[serde(default)]
    pub is_virtual: u8,
}

/// `buy` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BuyPayload {
    pub contract_id: ContractId,
    pub transaction_id: TransactionId,
    pub buy_price: Money,
    pub payout: Money,
    pub start_time: u64,
    #[serde(default)]
    pub longcode: String,
    #[serde(default)]
    pub balance_after: Option<Money>,
}

impl From<BuyPayload> for BuyReceipt {
    fn from(p: BuyPayload) -> Self {
        Self {
            contract_id: p.contract_id,
            transaction_id: p.transaction_id,
            buy_price: p.buy_price,
            payout: p.payout,
            start_time: p.start_time,
            longcode: p.longcode,
            balance_after: p.balance_after,
        }
    }
}

/// `proposal` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ProposalPayload {
    pub id: String,
    pub ask_price: Money,
    pub payout: Money,
}

impl ProposalPayload {
    pub fn into_proposal(self, intent: &TradeIntent) -> Proposal {
        Proposal {
            id: self.id,
            ask_price: self.ask_price,
            payout: self.payout,
            contract_type: intent.contract_type.clone(),
            symbol: intent.symbol.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireTransactionIds {
    buy: TransactionId,
    #[serde(default)]
    sell: Option<TransactionId>,
}

/// `proposal_open_contract` push payload. The vendor sends flags as 0/1.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenContractPayload {
    contract_id: ContractId,
    transaction_ids: WireTransactionIds,
    buy_price: Money,
    #[serde(default)]
    payout: Money,
    #[serde(default)]
    profit: Money,
    currency: String,
    #[serde(default)]
    is_sold: u8,
    #[serde(default)]
    is_expired: u8,
    #[serde(default)]
    status: Option<String>,
    date_start: u64,
    contract_type: ContractType,
    #[serde(default)]
    underlying: String,
}

impl OpenContractPayload {
    pub fn into_update(self) -> ContractUpdate {
        let settled_status = matches!(
            self.status.as_deref(),
            Some("sold") | Some("won") | Some("lost")
        );
        let is_sold = self.is_sold == 1 || settled_status;
        ContractUpdate {
            contract_id: self.contract_id,
            transaction_ids: TransactionIds {
                buy: self.transaction_ids.buy,
                sell: self.transaction_ids.sell,
            },
            buy_price: self.buy_price,
            payout: self.payout,
            profit: self.profit,
            currency: self.currency,
            is_sold,
            is_completed: is_sold || self.is_expired == 1,
            date_start: self.date_start,
            contract_type: self.contract_type,
            symbol: self.underlying,
            run_id: None,
            display_buy_id: None,
        }
    }
}

/// `balance` push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BalancePayload {
    pub balance: Money,
    pub currency: String,
    #[serde(default)]
    pub loginid: Option<String>,
}

impl BalancePayload {
    fn into_balance(self) -> Option<AccountBalance> {
        let login_id = LoginId::new(self.loginid?).ok()?;
        Some(AccountBalance::new(login_id, self.balance, self.currency))
    }
}

/// `transaction` push payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionPush {
    pub action: String,
    pub amount: Money,
    pub balance: Money,
    #[serde(default)]
    pub contract_id: Option<ContractId>,
    pub transaction_id: TransactionId,
}

/// Push forwarded from the connection to the application router.
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    Contract(ContractUpdate),
    Balance(AccountBalance),
    Transaction(TransactionPush),
    /// Transport re-established and re-authorized as the given account.
    Reconnected(Option<LoginId>),
    Disconnected,
}
