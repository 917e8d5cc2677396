//! The chain-facing operations needed to broadcast a transaction.
//!
//! [crate::Cosmos] provides the gRPC implementation. Tests substitute their
//! own to exercise the broadcast logic without a node.

use crate::{
    error::{Action, Error},
    sequence::AccountState,
    signer::Signer,
    Address, TxBuilder,
};

/// Account details a transaction is signed against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxMeta {
    /// Account number of the signer
    pub account_number: u64,
    /// Sequence assigned to this transaction
    pub sequence: u64,
}

/// The node's synchronous answer to a broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastResponse {
    /// Transaction hash, hex encoded
    pub txhash: String,
    /// Result code from CheckTx, 0 on success
    pub code: u32,
    /// Failure log, empty on success
    pub raw_log: String,
}

impl BroadcastResponse {
    /// Turn the response into a hash, treating any reported failure as an error.
    pub fn into_txhash(self, action: Action) -> Result<String, Error> {
        // SDK 0.45 nodes report an empty JSON list on success
        let raw_log_failed = !self.raw_log.is_empty() && self.raw_log != "[]";
        if self.code != 0 || raw_log_failed {
            Err(Error::Rejected {
                action,
                txhash: self.txhash,
                code: self.code,
                raw_log: self.raw_log,
            })
        } else if self.txhash.is_empty() {
            Err(Error::Protocol {
                action,
                message: "broadcast response has an empty transaction hash".to_owned(),
            })
        } else {
            Ok(self.txhash)
        }
    }
}

/// Chain operations used by the broadcaster.
#[tonic::async_trait]
pub trait TxFactory: Send + Sync {
    /// Load the account number and current sequence for an address.
    async fn account_info(&self, address: Address) -> Result<AccountState, Error>;

    /// Simulate the transaction and return the gas used.
    async fn simulate(&self, signer: &Signer, txbuilder: &TxBuilder, meta: TxMeta)
        -> Result<u64, Error>;

    /// Build and sign the transaction, returning the encoded bytes.
    async fn build_signed(
        &self,
        signer: &Signer,
        txbuilder: &TxBuilder,
        meta: TxMeta,
        gas_limit: u64,
    ) -> Result<Vec<u8>, Error>;

    /// Submit signed bytes in synchronous (CheckTx) mode.
    ///
    /// `None` means the node answered without a transaction response.
    async fn broadcast_sync(
        &self,
        signer: &Signer,
        tx_bytes: Vec<u8>,
    ) -> Result<Option<BroadcastResponse>, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> Action {
        Action::Simulate
    }

    #[test]
    fn success() {
        let res = BroadcastResponse {
            txhash: "ABC".to_owned(),
            code: 0,
            raw_log: String::new(),
        };
        assert_eq!(res.into_txhash(action()).unwrap(), "ABC");
    }

    #[test]
    fn empty_log_list_is_success() {
        let res = BroadcastResponse {
            txhash: "ABC".to_owned(),
            code: 0,
            raw_log: "[]".to_owned(),
        };
        assert_eq!(res.into_txhash(action()).unwrap(), "ABC");
    }

    #[test]
    fn raw_log_is_failure() {
        let res = BroadcastResponse {
            txhash: "ABC".to_owned(),
            code: 0,
            raw_log: "out of gas".to_owned(),
        };
        assert!(matches!(
            res.into_txhash(action()),
            Err(Error::Rejected { raw_log, .. }) if raw_log == "out of gas"
        ));
    }

    #[test]
    fn non_zero_code_is_failure() {
        let res = BroadcastResponse {
            txhash: "ABC".to_owned(),
            code: 5,
            raw_log: String::new(),
        };
        assert!(matches!(
            res.into_txhash(action()),
            Err(Error::Rejected { code: 5, .. })
        ));
    }

    #[test]
    fn empty_hash_is_protocol_error() {
        let res = BroadcastResponse::default();
        assert!(matches!(
            res.into_txhash(action()),
            Err(Error::Protocol { .. })
        ));
    }
}
