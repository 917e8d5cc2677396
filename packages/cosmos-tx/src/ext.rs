use chrono::{DateTime, Utc};
use cosmos_sdk_proto::cosmos::base::abci::v1beta1::TxResponse;

use crate::{error::AddressError, Address};

const FAILED_MSGS_KEY: &str = "failed_msgs";

/// Helpers for reading the results of a landed transaction.
pub trait TxResponseExt {
    /// Parse the timestamp of this transaction.
    fn parse_timestamp(&self) -> Result<DateTime<Utc>, chrono::ParseError>;

    /// Return the addresses of all instantiated contracts in this transaction.
    fn parse_instantiated_contracts(&self) -> Result<Vec<Address>, AddressError>;

    /// Value of the `failed_msgs` attribute emitted by the wasm module, if any.
    fn failed_message_indexes(&self) -> Option<&str>;
}

impl TxResponseExt for TxResponse {
    fn parse_timestamp(&self) -> Result<DateTime<Utc>, chrono::ParseError> {
        self.timestamp.parse()
    }

    fn parse_instantiated_contracts(&self) -> Result<Vec<Address>, AddressError> {
        let mut addrs = vec![];

        for log in &self.logs {
            for event in &log.events {
                if event.r#type == "instantiate"
                    || event.r#type == "cosmwasm.wasm.v1.EventContractInstantiated"
                {
                    for attr in &event.attributes {
                        if attr.key == "_contract_address" || attr.key == "contract_address" {
                            let address: Address = strip_quotes(&attr.value).parse()?;
                            addrs.push(address);
                        }
                    }
                }
            }
        }

        Ok(addrs)
    }

    fn failed_message_indexes(&self) -> Option<&str> {
        self.logs
            .iter()
            .flat_map(|log| &log.events)
            .filter(|event| event.r#type == "wasm")
            .flat_map(|event| &event.attributes)
            .filter(|attr| attr.key == FAILED_MSGS_KEY)
            .map(|attr| attr.value.as_str())
            .last()
    }
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('\"')
        .and_then(|s| s.strip_suffix('\"'))
        .unwrap_or(s)
}
