use std::fmt::Display;

use cosmos_sdk_proto::{
    cosmos::{bank::v1beta1::MsgSend, base::v1beta1::Coin},
    cosmwasm::wasm::v1::{MsgExecuteContract, MsgInstantiateContract},
    Any,
};
use prost::Message;

use crate::{error::ValidationError, Address, HasAddress};

/// A single message to include in a transaction.
///
/// Keeps a human readable description next to the encoded payload for log
/// and error output.
#[derive(Clone, Debug)]
pub struct TxMessage {
    type_url: String,
    value: Vec<u8>,
    description: String,
}

impl TxMessage {
    /// Construct a message from an already encoded protobuf payload.
    pub fn new(
        type_url: impl Into<String>,
        value: Vec<u8>,
        description: impl Into<String>,
    ) -> Self {
        TxMessage {
            type_url: type_url.into(),
            value,
            description: description.into(),
        }
    }

    /// Type URL of the message, e.g. `/cosmwasm.wasm.v1.MsgExecuteContract`.
    pub fn type_url(&self) -> &str {
        &self.type_url
    }

    /// Description used in logs.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Split into the protobuf payload and the description.
    pub fn into_protobuf(self) -> (Any, String) {
        (
            Any {
                type_url: self.type_url,
                value: self.value,
            },
            self.description,
        )
    }

    pub(crate) fn to_protobuf(&self) -> Any {
        Any {
            type_url: self.type_url.clone(),
            value: self.value.clone(),
        }
    }
}

impl From<MsgExecuteContract> for TxMessage {
    fn from(msg: MsgExecuteContract) -> Self {
        let description = format!(
            "{} executing contract {} with message: {}",
            msg.sender,
            msg.contract,
            String::from_utf8_lossy(&msg.msg)
        );
        TxMessage::new(
            "/cosmwasm.wasm.v1.MsgExecuteContract",
            msg.encode_to_vec(),
            description,
        )
    }
}

impl From<MsgInstantiateContract> for TxMessage {
    fn from(msg: MsgInstantiateContract) -> Self {
        let description = format!(
            "{} instantiating code ID {} with label {}: {}",
            msg.sender,
            msg.code_id,
            msg.label,
            String::from_utf8_lossy(&msg.msg)
        );
        TxMessage::new(
            "/cosmwasm.wasm.v1.MsgInstantiateContract",
            msg.encode_to_vec(),
            description,
        )
    }
}

impl From<MsgSend> for TxMessage {
    fn from(msg: MsgSend) -> Self {
        let description = format!(
            "{} sending {} to {}",
            msg.from_address,
            DisplayCoins(&msg.amount),
            msg.to_address
        );
        TxMessage::new(
            "/cosmos.bank.v1beta1.MsgSend",
            msg.encode_to_vec(),
            description,
        )
    }
}

struct DisplayCoins<'a>(&'a [Coin]);

impl Display for DisplayCoins<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (idx, coin) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}{}", coin.amount, coin.denom)?;
        }
        Ok(())
    }
}

/// Transaction builder
///
/// An ordered list of messages plus an optional memo. Broadcasting is done
/// through [crate::Cosmos::broadcast].
#[derive(Default, Clone, Debug)]
pub struct TxBuilder {
    pub(crate) messages: Vec<TxMessage>,
    pub(crate) memo: Option<String>,
}

impl Display for TxBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (idx, msg) in self.messages.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            f.write_str(&msg.description)?;
        }
        if let Some(memo) = &self.memo {
            write!(f, " (memo: {memo})")?;
        }
        Ok(())
    }
}

impl TxBuilder {
    /// Add a message to this transaction.
    pub fn add_message(&mut self, msg: impl Into<TxMessage>) -> &mut Self {
        self.messages.push(msg.into());
        self
    }

    /// Add an execute message on a contract.
    pub fn add_execute_message(
        &mut self,
        contract: impl HasAddress,
        wallet: impl HasAddress,
        funds: Vec<Coin>,
        msg: impl serde::Serialize,
    ) -> Result<&mut Self, serde_json::Error> {
        Ok(self.add_message(MsgExecuteContract {
            sender: wallet.get_address_string(),
            contract: contract.get_address_string(),
            msg: serde_json::to_vec(&msg)?,
            funds,
        }))
    }

    /// Set the memo field.
    pub fn set_memo(&mut self, memo: impl Into<String>) -> &mut Self {
        self.memo = Some(memo.into());
        self
    }

    /// Clear the memo field
    pub fn clear_memo(&mut self) -> &mut Self {
        self.memo = None;
        self
    }

    /// Either set or clear the memo field.
    pub fn set_optional_memo(&mut self, memo: impl Into<Option<String>>) -> &mut Self {
        self.memo = memo.into();
        self
    }

    /// Messages in broadcast order.
    pub fn messages(&self) -> &[TxMessage] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Does this builder have no messages?
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ensure the builder can be broadcast as a single request.
    pub(crate) fn validate(&self, max_batch_size: usize) -> Result<(), ValidationError> {
        if self.messages.is_empty() {
            Err(ValidationError::EmptyBatch)
        } else if self.messages.len() > max_batch_size {
            Err(ValidationError::TooManyMessages {
                count: self.messages.len(),
                max: max_batch_size,
            })
        } else {
            Ok(())
        }
    }

    /// New builder with the same memo and the given messages.
    pub(crate) fn with_messages(&self, messages: Vec<TxMessage>) -> TxBuilder {
        TxBuilder {
            messages,
            memo: self.memo.clone(),
        }
    }
}

/// Build a contract execution message, rejecting empty payloads.
pub(crate) fn execute_message(
    sender: Address,
    contract: Address,
    msg: Vec<u8>,
    funds: Vec<Coin>,
) -> Result<TxMessage, ValidationError> {
    if msg.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    Ok(MsgExecuteContract {
        sender: sender.get_address_string(),
        contract: contract.get_address_string(),
        msg,
        funds,
    }
    .into())
}

/// Build a contract instantiation message, rejecting empty payloads and labels.
pub(crate) fn instantiate_message(
    sender: Address,
    admin: Option<Address>,
    code_id: u64,
    label: impl Into<String>,
    msg: Vec<u8>,
    funds: Vec<Coin>,
) -> Result<TxMessage, ValidationError> {
    let label = label.into();
    if msg.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if label.is_empty() {
        return Err(ValidationError::EmptyLabel);
    }
    Ok(MsgInstantiateContract {
        sender: sender.get_address_string(),
        admin: admin.map(|a| a.get_address_string()).unwrap_or_default(),
        code_id,
        label,
        msg,
        funds,
    }
    .into())
}
