use std::{future::Future, time::Duration};

use cosmos_sdk_proto::cosmos::{
    base::abci::v1beta1::TxResponse,
    tx::v1beta1::{GetTxRequest, TxBody},
};

use crate::{
    cancel::CancelSignal,
    error::{Action, Error},
};

use super::node::Connection;

/// Look up a transaction, `None` if the node doesn't know it (yet).
pub(crate) async fn lookup_transaction(
    conn: &Connection,
    txhash: &str,
    cancel: &CancelSignal,
) -> Result<Option<(TxBody, TxResponse)>, Error> {
    let action = Action::GetTransaction(txhash.to_owned());
    let res = conn
        .perform_query(
            GetTxRequest {
                hash: txhash.to_owned(),
            },
            action.clone(),
            cancel,
        )
        .await;
    let txres = match res {
        Ok(txres) => txres,
        Err(Error::Query { source, .. }) if source.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    let missing = |what: &str| Error::Protocol {
        action: action.clone(),
        message: format!("missing {what} for transaction {txhash}"),
    };
    let body = txres
        .tx
        .ok_or_else(|| missing("tx"))?
        .body
        .ok_or_else(|| missing("body"))?;
    let txres = txres.tx_response.ok_or_else(|| missing("tx_response"))?;
    Ok(Some((body, txres)))
}

/// Poll until the transaction lands, giving up after `attempts` lookups.
///
/// A transaction which landed with a non-zero code is an error.
pub(crate) async fn wait_for<F, Fut, T>(
    txhash: &str,
    attempts: usize,
    poll_interval: Duration,
    cancel: &CancelSignal,
    mut lookup: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
    T: AsRef<TxResponse>,
{
    for attempt in 1..=attempts {
        match lookup()
            .await
            .map_err(|e| e.with_action(Action::WaitForTransaction(txhash.to_owned())))?
        {
            Some(found) => {
                let txres = found.as_ref();
                if txres.code != 0 {
                    return Err(Error::TransactionFailed {
                        txhash: txhash.to_owned(),
                        code: txres.code,
                        raw_log: txres.raw_log.clone(),
                    });
                }
                tracing::debug!("Transaction {txhash} landed at height {}", txres.height);
                return Ok(found);
            }
            None => {
                tracing::debug!("Transaction {txhash} not ready, attempt #{attempt}/{attempts}");
                if attempt < attempts {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled {
                            action: Action::WaitForTransaction(txhash.to_owned()),
                        }),
                        _ = tokio::time::sleep(poll_interval) => (),
                    }
                }
            }
        }
    }
    Err(Error::TransactionNotFound {
        txhash: txhash.to_owned(),
        attempts,
    })
}

/// Pairs a body with its response so [wait_for] can inspect the code.
pub(crate) struct FoundTx(pub(crate) TxBody, pub(crate) TxResponse);

impl AsRef<TxResponse> for FoundTx {
    fn as_ref(&self) -> &TxResponse {
        &self.1
    }
}
