//! Replaying the transactions that touched a contract over a height range.

use std::future::Future;

use cosmos_sdk_proto::{
    cosmos::base::abci::v1beta1::TxResponse,
    tendermint::v0_34::abci::{Event, EventAttribute},
};

use crate::{error::Error, Address};

/// Number of blocks searched per query.
pub(crate) const WINDOW_SIZE: i64 = 100_000;

/// Transactions requested per page.
pub(crate) const PAGE_SIZE: u64 = 100;

/// Consecutive `(from, to]` windows of at most `size` blocks covering
/// `(from, to]`. Empty when `from >= to`.
pub(crate) fn height_windows(from: i64, to: i64, size: i64) -> impl Iterator<Item = (i64, i64)> {
    let size = size.max(1);
    let mut start = from;
    std::iter::from_fn(move || {
        if start >= to {
            return None;
        }
        let end = start.saturating_add(size).min(to);
        let window = (start, end);
        start = end;
        Some(window)
    })
}

/// Event conditions selecting `contract`'s transactions in a window.
///
/// Every condition carries exactly one `=`, older SDKs reject anything else.
pub(crate) fn window_events(contract: Address, (from, to): (i64, i64)) -> Vec<String> {
    vec![
        format!("tx.height>={}", from.saturating_add(1)),
        format!("tx.height<={to}"),
        format!("wasm._contract_address='{contract}'"),
    ]
}

/// Append `tx` events carrying the height and the lowercase hash.
pub(crate) fn with_tx_events(mut txres: TxResponse) -> TxResponse {
    let height = txres.height.to_string();
    let hash = txres.txhash.to_ascii_lowercase();
    txres.events.push(tx_event("height", height));
    txres.events.push(tx_event("hash", hash));
    txres
}

fn tx_event(key: &'static str, value: String) -> Event {
    Event {
        r#type: "tx".to_owned(),
        attributes: vec![EventAttribute {
            key: key.into(),
            value: value.into(),
            index: true,
        }],
    }
}

/// Page through every window in order and hand each transaction to `ack`.
///
/// A window is finished once a page comes back with fewer than
/// [PAGE_SIZE] transactions. Returns how many transactions were handled.
pub(crate) async fn replay<Fetch, FetchFut, Ack, AckFut, E>(
    windows: impl Iterator<Item = (i64, i64)>,
    mut fetch: Fetch,
    mut ack: Ack,
) -> Result<usize, E>
where
    Fetch: FnMut((i64, i64), u64) -> FetchFut,
    FetchFut: Future<Output = Result<Vec<TxResponse>, Error>>,
    Ack: FnMut(TxResponse) -> AckFut,
    AckFut: Future<Output = Result<(), E>>,
    E: From<Error>,
{
    let mut handled = 0;
    for window in windows {
        let mut page = 1;
        loop {
            let txs = fetch(window, page).await?;
            let count = txs.len();
            for txres in txs {
                ack(with_tx_events(txres)).await?;
                handled += 1;
            }
            if (count as u64) < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        tracing::debug!(
            "Finished heights ({}, {}] after {page} page(s), {handled} transaction(s) so far",
            window.0,
            window.1
        );
    }
    Ok(handled)
}
