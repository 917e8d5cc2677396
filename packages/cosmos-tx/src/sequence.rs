//! Per-signer account number and sequence tracking.

use crate::{
    error::{Action, Error},
    factory::TxFactory,
    Address,
};

/// Locally tracked account state for one signer.
///
/// Only ever touched while holding the signer's lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccountState {
    /// Chain-assigned account number
    pub account_number: u64,
    /// Next sequence number to use
    pub sequence: u64,
}

/// Result of reloading account state from the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// Sequence was updated. Contains the previous local value.
    Updated {
        /// Local sequence before the resync
        previous: u64,
    },
    /// The chain reported a different account number, local state left untouched.
    AccountNumberChanged {
        /// Account number tracked locally
        local: u64,
        /// Account number reported by the chain
        chain: u64,
    },
}

impl AccountState {
    /// Return the sequence to use for the next transaction and advance the counter.
    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.sequence;
        self.sequence += 1;
        sequence
    }

    /// Replace the sequence with the chain's value if the account number matches.
    pub fn apply_chain(&mut self, chain: AccountState) -> ResyncOutcome {
        if chain.account_number != self.account_number {
            ResyncOutcome::AccountNumberChanged {
                local: self.account_number,
                chain: chain.account_number,
            }
        } else {
            let previous = self.sequence;
            self.sequence = chain.sequence;
            ResyncOutcome::Updated { previous }
        }
    }
}

/// Reload the sequence for `address` from the chain into `state`.
///
/// Must be called with the signer's lock held.
pub(crate) async fn resync<F: TxFactory + ?Sized>(
    factory: &F,
    address: Address,
    state: &mut AccountState,
) -> Result<ResyncOutcome, Error> {
    let chain = factory
        .account_info(address)
        .await
        .map_err(|e| e.with_action(Action::Resync(address)))?;
    let outcome = state.apply_chain(chain);
    match outcome {
        ResyncOutcome::Updated { previous } => tracing::debug!(
            "Resynced sequence for {address}: {previous} -> {}",
            state.sequence
        ),
        ResyncOutcome::AccountNumberChanged { local, chain } => tracing::warn!(
            "Account number for {address} changed from {local} to {chain}, leaving local state untouched"
        ),
    }
    Ok(outcome)
}
