//! Typed message kinds and the message parser.

use crate::ledger::types::{Coin, RawMessage};
use crate::math::{self, DenomAmounts};
use crate::tx::log::LogEntry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A known message type whose body is missing required fields.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed {type_tag} message: {reason}")]
pub struct MalformedInput {
    pub type_tag: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteOption {
    Yes,
    No,
    NoWithVeto,
    Abstain,
}

impl VoteOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOption::Yes => "Yes",
            VoteOption::No => "No",
            VoteOption::NoWithVeto => "NoWithVeto",
            VoteOption::Abstain => "Abstain",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "yes" | "voteoptionyes" => Some(VoteOption::Yes),
            "no" | "voteoptionno" => Some(VoteOption::No),
            "nowithveto" | "voteoptionnowithveto" => Some(VoteOption::NoWithVeto),
            "abstain" | "voteoptionabstain" => Some(VoteOption::Abstain),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiSendIo {
    pub address: String,
    #[serde(default)]
    pub coins: Vec<Coin>,
}

/// Recognized message kinds. `Unknown` keeps the tag of anything not listed so newer on-chain
/// message types parse to a neutral event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Send {
        from_address: String,
        to_address: String,
        amount: Vec<Coin>,
    },
    MultiSend {
        inputs: Vec<MultiSendIo>,
        outputs: Vec<MultiSendIo>,
    },
    Delegate {
        delegator_address: String,
        validator_address: String,
        amount: Coin,
    },
    Undelegate {
        delegator_address: String,
        validator_address: String,
        amount: Coin,
    },
    Redelegate {
        delegator_address: String,
        validator_src_address: String,
        validator_dst_address: String,
        amount: Coin,
    },
    CreateValidator {
        delegator_address: String,
        validator_address: String,
        value: Coin,
    },
    EditValidator {
        address: String,
    },
    WithdrawDelegationReward {
        delegator_address: String,
        validator_address: String,
    },
    WithdrawValidatorCommission {
        validator_address: String,
    },
    ModifyWithdrawAddress {
        delegator_address: String,
        withdraw_address: String,
    },
    Swap {
        trader: String,
        offer_coin: Coin,
        ask_denom: String,
    },
    Vote {
        proposal_id: String,
        voter: String,
        option: VoteOption,
    },
    Deposit {
        proposal_id: String,
        depositor: String,
        amount: Vec<Coin>,
    },
    SubmitProposal {
        proposer: String,
        initial_deposit: Vec<Coin>,
    },
    ExchangeRateVote {
        denom: String,
        feeder: String,
        validator: String,
    },
    ExchangeRatePrevote {
        denom: String,
        feeder: String,
        validator: String,
    },
    DelegateFeedConsent {
        operator: String,
        delegate: String,
    },
    Unjail {
        address: String,
    },
    Unknown {
        type_tag: String,
    },
}

pub const MSG_SEND: &str = "bank/MsgSend";
pub const MSG_MULTI_SEND: &str = "bank/MsgMultiSend";
pub const MSG_DELEGATE: &str = "staking/MsgDelegate";
pub const MSG_UNDELEGATE: &str = "staking/MsgUndelegate";
pub const MSG_REDELEGATE: &str = "staking/MsgBeginRedelegate";
pub const MSG_CREATE_VALIDATOR: &str = "staking/MsgCreateValidator";
pub const MSG_EDIT_VALIDATOR: &str = "staking/MsgEditValidator";
pub const MSG_WITHDRAW_REWARD: &str = "distribution/MsgWithdrawDelegationReward";
pub const MSG_WITHDRAW_COMMISSION: &str = "distribution/MsgWithdrawValidatorCommission";
pub const MSG_MODIFY_WITHDRAW_ADDRESS: &str = "distribution/MsgModifyWithdrawAddress";
pub const MSG_SWAP: &str = "market/MsgSwap";
pub const MSG_VOTE: &str = "gov/MsgVote";
pub const MSG_DEPOSIT: &str = "gov/MsgDeposit";
pub const MSG_SUBMIT_PROPOSAL: &str = "gov/MsgSubmitProposal";
pub const MSG_EXCHANGE_RATE_VOTE: &str = "oracle/MsgExchangeRateVote";
pub const MSG_EXCHANGE_RATE_PREVOTE: &str = "oracle/MsgExchangeRatePrevote";
pub const MSG_DELEGATE_FEED_CONSENT: &str = "oracle/MsgDelegateFeedConsent";
pub const MSG_UNJAIL: &str = "cosmos/MsgUnjail";

/// Field accessors over an untyped message body.
struct Body<'a> {
    tag: &'a str,
    value: &'a serde_json::Value,
}

impl Body<'_> {
    fn malformed(&self, reason: impl Into<String>) -> MalformedInput {
        MalformedInput {
            type_tag: self.tag.to_string(),
            reason: reason.into(),
        }
    }

    fn string(&self, key: &str) -> Result<String, MalformedInput> {
        match self.value.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            _ => Err(self.malformed(format!("missing {key}"))),
        }
    }

    fn typed<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T, MalformedInput> {
        let v = self
            .value
            .get(key)
            .ok_or_else(|| self.malformed(format!("missing {key}")))?;
        serde_json::from_value(v.clone()).map_err(|e| self.malformed(format!("{key}: {e}")))
    }

    fn coin(&self, key: &str) -> Result<Coin, MalformedInput> {
        let coin: Coin = self.typed(key)?;
        if !math::is_numeric(&coin.amount) {
            return Err(self.malformed(format!("{key}: non-numeric amount {:?}", coin.amount)));
        }
        Ok(coin)
    }

    fn coins(&self, key: &str) -> Result<Vec<Coin>, MalformedInput> {
        match self.value.get(key) {
            None | Some(serde_json::Value::Null) => Ok(vec![]),
            Some(_) => self.typed(key),
        }
    }
}

impl MessageKind {
    /// Dispatch on the declared type tag.
    pub fn from_raw(msg: &RawMessage) -> Result<Self, MalformedInput> {
        let b = Body {
            tag: &msg.type_tag,
            value: &msg.value,
        };
        let kind = match msg.type_tag.as_str() {
            MSG_SEND => MessageKind::Send {
                from_address: b.string("from_address")?,
                to_address: b.string("to_address")?,
                amount: b.coins("amount")?,
            },
            MSG_MULTI_SEND => MessageKind::MultiSend {
                inputs: b.typed("inputs")?,
                outputs: b.typed("outputs")?,
            },
            MSG_DELEGATE => MessageKind::Delegate {
                delegator_address: b.string("delegator_address")?,
                validator_address: b.string("validator_address")?,
                amount: b.coin("amount")?,
            },
            MSG_UNDELEGATE => MessageKind::Undelegate {
                delegator_address: b.string("delegator_address")?,
                validator_address: b.string("validator_address")?,
                amount: b.coin("amount")?,
            },
            MSG_REDELEGATE => MessageKind::Redelegate {
                delegator_address: b.string("delegator_address")?,
                validator_src_address: b.string("validator_src_address")?,
                validator_dst_address: b.string("validator_dst_address")?,
                amount: b.coin("amount")?,
            },
            MSG_CREATE_VALIDATOR => MessageKind::CreateValidator {
                delegator_address: b.string("delegator_address")?,
                validator_address: b.string("validator_address")?,
                value: b.coin("value")?,
            },
            MSG_EDIT_VALIDATOR => MessageKind::EditValidator {
                address: b.string("address")?,
            },
            MSG_WITHDRAW_REWARD => MessageKind::WithdrawDelegationReward {
                delegator_address: b.string("delegator_address")?,
                validator_address: b.string("validator_address")?,
            },
            MSG_WITHDRAW_COMMISSION => MessageKind::WithdrawValidatorCommission {
                validator_address: b.string("validator_address")?,
            },
            MSG_MODIFY_WITHDRAW_ADDRESS => MessageKind::ModifyWithdrawAddress {
                delegator_address: b.string("delegator_address")?,
                withdraw_address: b.string("withdraw_address")?,
            },
            MSG_SWAP => MessageKind::Swap {
                trader: b.string("trader")?,
                offer_coin: b.coin("offer_coin")?,
                ask_denom: b.string("ask_denom")?,
            },
            MSG_VOTE => {
                let raw = b.string("option")?;
                MessageKind::Vote {
                    proposal_id: b.string("proposal_id")?,
                    voter: b.string("voter")?,
                    option: VoteOption::parse(&raw)
                        .ok_or_else(|| b.malformed(format!("unknown vote option {raw:?}")))?,
                }
            }
            MSG_DEPOSIT => MessageKind::Deposit {
                proposal_id: b.string("proposal_id")?,
                depositor: b.string("depositor")?,
                amount: b.coins("amount")?,
            },
            MSG_SUBMIT_PROPOSAL => MessageKind::SubmitProposal {
                proposer: b.string("proposer")?,
                initial_deposit: b.coins("initial_deposit")?,
            },
            MSG_EXCHANGE_RATE_VOTE => MessageKind::ExchangeRateVote {
                denom: b.string("denom")?,
                feeder: b.string("feeder")?,
                validator: b.string("validator")?,
            },
            MSG_EXCHANGE_RATE_PREVOTE => MessageKind::ExchangeRatePrevote {
                denom: b.string("denom")?,
                feeder: b.string("feeder")?,
                validator: b.string("validator")?,
            },
            MSG_DELEGATE_FEED_CONSENT => MessageKind::DelegateFeedConsent {
                operator: b.string("operator")?,
                delegate: b.string("delegate")?,
            },
            MSG_UNJAIL => MessageKind::Unjail {
                address: b.string("address")?,
            },
            other => MessageKind::Unknown {
                type_tag: other.to_string(),
            },
        };
        Ok(kind)
    }

    /// Role label used for account indexing; `None` for unknown kinds.
    pub fn role(&self) -> Option<&'static str> {
        let role = match self {
            MessageKind::Send { .. } => "send",
            MessageKind::MultiSend { .. } => "multisend",
            MessageKind::Delegate { .. } => "delegate",
            MessageKind::Undelegate { .. } => "undelegate",
            MessageKind::Redelegate { .. } => "redelegate",
            MessageKind::CreateValidator { .. } => "create_validator",
            MessageKind::EditValidator { .. } => "edit_validator",
            MessageKind::WithdrawDelegationReward { .. } => "withdraw_reward",
            MessageKind::WithdrawValidatorCommission { .. } => "withdraw_commission",
            MessageKind::ModifyWithdrawAddress { .. } => "modify_withdraw_address",
            MessageKind::Swap { .. } => "swap",
            MessageKind::Vote { .. } => "vote",
            MessageKind::Deposit { .. } => "deposit",
            MessageKind::SubmitProposal { .. } => "submit_proposal",
            MessageKind::ExchangeRateVote { .. } => "exchange_rate_vote",
            MessageKind::ExchangeRatePrevote { .. } => "exchange_rate_prevote",
            MessageKind::DelegateFeedConsent { .. } => "feed_consent",
            MessageKind::Unjail { .. } => "unjail",
            MessageKind::Unknown { .. } => return None,
        };
        Some(role)
    }

    /// Every address the message touches.
    pub fn addresses(&self) -> Vec<&str> {
        match self {
            MessageKind::Send {
                from_address,
                to_address,
                ..
            } => vec![from_address, to_address],
            MessageKind::MultiSend { inputs, outputs } => inputs
                .iter()
                .chain(outputs.iter())
                .map(|io| &io.address)
                .collect(),
            MessageKind::Delegate {
                delegator_address,
                validator_address,
                ..
            }
            | MessageKind::Undelegate {
                delegator_address,
                validator_address,
                ..
            }
            | MessageKind::CreateValidator {
                delegator_address,
                validator_address,
                ..
            }
            | MessageKind::WithdrawDelegationReward {
                delegator_address,
                validator_address,
            } => vec![delegator_address, validator_address],
            MessageKind::Redelegate {
                delegator_address,
                validator_src_address,
                validator_dst_address,
                ..
            } => vec![delegator_address, validator_src_address, validator_dst_address],
            MessageKind::EditValidator { address } | MessageKind::Unjail { address } => {
                vec![address]
            }
            MessageKind::WithdrawValidatorCommission { validator_address } => {
                vec![validator_address]
            }
            MessageKind::ModifyWithdrawAddress {
                delegator_address,
                withdraw_address,
            } => vec![delegator_address, withdraw_address],
            MessageKind::Swap { trader, .. } => vec![trader],
            MessageKind::Vote { voter, .. } => vec![voter],
            MessageKind::Deposit { depositor, .. } => vec![depositor],
            MessageKind::SubmitProposal { proposer, .. } => vec![proposer],
            MessageKind::ExchangeRateVote {
                feeder, validator, ..
            }
            | MessageKind::ExchangeRatePrevote {
                feeder, validator, ..
            } => vec![feeder, validator],
            MessageKind::DelegateFeedConsent { operator, delegate } => vec![operator, delegate],
            MessageKind::Unknown { .. } => vec![],
        }
        .into_iter()
        .map(|s: &String| s.as_str())
        .collect()
    }
}

/// Realized output of a swap, read from the paired log's `swap` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapOutcome {
    pub swap_coin: Option<Coin>,
    pub swap_fee: Option<Coin>,
}

impl SwapOutcome {
    pub fn from_log(log: Option<&LogEntry>) -> Self {
        let Some(event) = log.and_then(|l| l.event("swap")) else {
            return Self::default();
        };
        let pick = |key: &str| {
            event
                .attribute(key)
                .and_then(Coin::from_amount_denom)
                .filter(|c| math::is_numeric(&c.amount))
        };
        match (pick("swap_coin"), pick("swap_fee")) {
            (Some(coin), Some(fee)) => Self {
                swap_coin: Some(coin),
                swap_fee: Some(fee),
            },
            _ => Self::default(),
        }
    }
}

/// Normalized output of one message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    pub kind: MessageKind,
    pub success: bool,
    pub tx_succeeded: bool,
    pub participants: BTreeMap<String, BTreeSet<String>>,
    /// Signed amounts. Empty for failed messages.
    #[serde(serialize_with = "ser_amounts", deserialize_with = "de_amounts")]
    pub amounts: DenomAmounts,
    pub swap: Option<SwapOutcome>,
}

impl ParsedEvent {
    pub fn answer(&self) -> Option<&VoteOption> {
        match &self.kind {
            MessageKind::Vote { option, .. } => Some(option),
            _ => None,
        }
    }
}

fn ser_amounts<S: serde::Serializer>(m: &DenomAmounts, s: S) -> Result<S::Ok, S::Error> {
    let strings: BTreeMap<&str, String> = m.iter().map(|(k, v)| (k.as_str(), math::format(v))).collect();
    strings.serialize(s)
}

fn de_amounts<'de, D: serde::Deserializer<'de>>(d: D) -> Result<DenomAmounts, D::Error> {
    let strings = BTreeMap::<String, String>::deserialize(d)?;
    strings
        .into_iter()
        .map(|(k, v)| math::parse(&v).map(|a| (k, a)).map_err(serde::de::Error::custom))
        .collect()
}

fn add_coin(amounts: &mut DenomAmounts, coin: &Coin, negate: bool) {
    let Ok(value) = math::parse(&coin.amount) else {
        return;
    };
    let value = if negate { -value } else { value };
    amounts
        .entry(coin.denom.clone())
        .and_modify(|cur| *cur += &value)
        .or_insert(value);
}

/// Signed amounts a successful message moves, seen from `viewer` where that matters.
fn amounts_of(kind: &MessageKind, viewer: Option<&str>) -> DenomAmounts {
    let mut out = DenomAmounts::new();
    match kind {
        MessageKind::Delegate { amount, .. } => add_coin(&mut out, amount, false),
        MessageKind::CreateValidator { value, .. } => add_coin(&mut out, value, false),
        MessageKind::Undelegate { amount, .. } => add_coin(&mut out, amount, true),
        MessageKind::Redelegate {
            validator_src_address,
            amount,
            ..
        } => add_coin(&mut out, amount, viewer == Some(validator_src_address.as_str())),
        MessageKind::Swap { offer_coin, .. } => add_coin(&mut out, offer_coin, false),
        MessageKind::Send {
            from_address,
            amount,
            ..
        } => {
            let outgoing = viewer == Some(from_address.as_str());
            for c in amount {
                add_coin(&mut out, c, outgoing);
            }
        }
        MessageKind::MultiSend { inputs, outputs } => {
            // Without a viewer the output side is the transferred volume.
            for io in outputs {
                if viewer.is_none() || viewer == Some(io.address.as_str()) {
                    io.coins.iter().for_each(|c| add_coin(&mut out, c, false));
                }
            }
            for io in inputs.iter().filter(|io| viewer == Some(io.address.as_str())) {
                io.coins.iter().for_each(|c| add_coin(&mut out, c, true));
            }
        }
        MessageKind::Deposit { amount, .. } => {
            amount.iter().for_each(|c| add_coin(&mut out, c, false));
        }
        MessageKind::SubmitProposal {
            initial_deposit, ..
        } => initial_deposit.iter().for_each(|c| add_coin(&mut out, c, false)),
        _ => {}
    }
    out
}

/// Parse one message with its correlated log entry.
///
/// Unknown type tags give a neutral event. A known tag with a broken body is `MalformedInput`;
/// callers skip that message. Participants are reported whether or not the message succeeded;
/// amounts only when its log entry reports success.
pub fn parse(
    message: &RawMessage,
    log: Option<&LogEntry>,
    viewer: Option<&str>,
    tx_succeeded: bool,
) -> Result<ParsedEvent, MalformedInput> {
    let kind = MessageKind::from_raw(message)?;
    let success = log.is_some_and(|l| l.success);

    let mut participants = BTreeMap::new();
    if let Some(role) = kind.role() {
        let set: BTreeSet<String> = kind.addresses().into_iter().map(str::to_string).collect();
        if !set.is_empty() {
            participants.insert(role.to_string(), set);
        }
    }

    let amounts = if success {
        amounts_of(&kind, viewer)
    } else {
        DenomAmounts::new()
    };
    let swap = match (&kind, success) {
        (MessageKind::Swap { .. }, true) => Some(SwapOutcome::from_log(log)),
        _ => None,
    };

    Ok(ParsedEvent {
        kind,
        success,
        tx_succeeded,
        participants,
        amounts,
        swap,
    })
}
