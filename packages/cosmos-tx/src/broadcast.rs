//! Sequence-safe broadcasting with bounded retries.

use futures::future::BoxFuture;

use crate::{
    batch::split_in_half,
    cancel::CancelSignal,
    error::{Action, Error, FailureKind},
    factory::{TxFactory, TxMeta},
    sequence::{resync, AccountState},
    signer::Signer,
    TxBuilder,
};

/// Retry and sizing policy for [Broadcaster].
#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    /// Multiplier applied to simulated gas
    pub gas_adjustment: f64,
    /// How many resync-and-retry rounds to allow after a sequence mismatch
    pub max_retries: usize,
    /// Largest number of messages accepted in one call
    pub max_batch_size: usize,
    /// Batches of this size or smaller are never split on a gas ceiling error
    pub min_split_size: usize,
    /// Reload the sequence from the chain on a mismatch. When disabled a
    /// mismatch is surfaced immediately.
    pub resync_on_mismatch: bool,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            gas_adjustment: 1.1,
            max_retries: 5,
            max_batch_size: 100,
            min_split_size: 2,
            resync_on_mismatch: true,
        }
    }
}

impl BroadcastConfig {
    /// Gas limit to request for a simulated gas usage.
    pub fn adjusted_gas(&self, simulated: u64) -> u64 {
        (simulated as f64 * self.gas_adjustment) as u64
    }
}

/// Drives simulate, sign and submit for a signer, recovering from sequence
/// drift and gas ceiling errors.
pub struct Broadcaster<F> {
    factory: F,
    config: BroadcastConfig,
}

impl<F: TxFactory> Broadcaster<F> {
    /// Combine a chain collaborator with a retry policy.
    pub fn new(factory: F, config: BroadcastConfig) -> Self {
        Broadcaster { factory, config }
    }

    /// The chain collaborator.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The retry policy.
    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Broadcast all messages in `txbuilder` from `signer` and return the hash.
    ///
    /// When the batch is split because of a gas ceiling, the hash of the last
    /// chunk is returned.
    pub async fn broadcast(
        &self,
        signer: &Signer,
        txbuilder: &TxBuilder,
        cancel: &CancelSignal,
    ) -> Result<String, Error> {
        txbuilder.validate(self.config.max_batch_size)?;
        let action = Action::Broadcast(signer.address());
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { action });
        }

        // Dropping the losing branch releases the signer lock
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Broadcast from {signer} cancelled");
                Err(Error::Cancelled { action })
            }
            res = async {
                let mut state = signer.lock().await;
                self.broadcast_locked(signer, &mut state, txbuilder).await
            } => res,
        }
    }

    fn broadcast_locked<'a>(
        &'a self,
        signer: &'a Signer,
        state: &'a mut AccountState,
        txbuilder: &'a TxBuilder,
    ) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let mut retries = 0;
            loop {
                let sequence = state.sequence;
                let err = match self.attempt(signer, state, txbuilder).await {
                    Ok(txhash) => return Ok(txhash),
                    Err(err) => err,
                };
                match FailureKind::classify(&err) {
                    FailureKind::SequenceMismatch { expected } if self.config.resync_on_mismatch => {
                        if retries >= self.config.max_retries {
                            tracing::warn!(
                                "Giving up on {signer} after {retries} sequence resyncs: {err}"
                            );
                            return Err(err);
                        }
                        retries += 1;
                        tracing::warn!(
                            "Sequence mismatch for {signer} (chain expects {expected:?}), resync attempt {retries}/{}",
                            self.config.max_retries
                        );
                        resync(&self.factory, signer.address(), state).await?;
                    }
                    FailureKind::GasExceeded if txbuilder.len() > self.config.min_split_size => {
                        // Rejected before reaching the mempool, the first chunk reuses the sequence
                        state.sequence = sequence;
                        let (first, second) = split_in_half(txbuilder.messages());
                        tracing::info!(
                            "Batch of {} messages from {signer} exceeds the gas ceiling, splitting into {} and {}",
                            txbuilder.len(),
                            first.len(),
                            second.len()
                        );
                        let first = txbuilder.with_messages(first);
                        let second = txbuilder.with_messages(second);
                        let first_hash = self.broadcast_locked(signer, state, &first).await?;
                        tracing::debug!("First chunk from {signer} landed as {first_hash}");
                        return self.broadcast_locked(signer, state, &second).await;
                    }
                    kind => {
                        tracing::debug!("Broadcast from {signer} failed with {kind:?}: {err}");
                        return Err(err);
                    }
                }
            }
        })
    }

    async fn attempt(
        &self,
        signer: &Signer,
        state: &mut AccountState,
        txbuilder: &TxBuilder,
    ) -> Result<String, Error> {
        let meta = TxMeta {
            account_number: state.account_number,
            sequence: state.next_sequence(),
        };
        let simulated = self.factory.simulate(signer, txbuilder, meta).await?;
        let gas_limit = self.config.adjusted_gas(simulated);
        tracing::debug!(
            "Sequence {} for {signer}: simulated gas {simulated}, requesting {gas_limit}",
            meta.sequence
        );
        let tx_bytes = self
            .factory
            .build_signed(signer, txbuilder, meta, gas_limit)
            .await?;
        let action = Action::Broadcast(signer.address());
        let res = self
            .factory
            .broadcast_sync(signer, tx_bytes)
            .await?
            .ok_or_else(|| Error::Protocol {
                action: action.clone(),
                message: "broadcast returned no transaction response".to_owned(),
            })?;
        let txhash = res.into_txhash(action)?;
        tracing::info!("Broadcast {txhash} from {signer} with sequence {}", meta.sequence);
        Ok(txhash)
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, time::Duration};

    use parking_lot::Mutex;

    use crate::{
        cancel::cancel_pair,
        error::{QueryError, ValidationError},
        factory::BroadcastResponse,
        sequence::ResyncOutcome,
        signer::tests::test_wallet,
        Address, TxMessage,
    };

    use super::*;

    #[derive(Clone, Copy)]
    enum SimMode {
        /// Behave like a chain enforcing sequence numbers
        Chain,
        AlwaysMismatch,
        /// Reject batches larger than the given size
        GasCeiling(usize),
        Fail(&'static str),
        Hang,
    }

    #[derive(Clone, Copy)]
    enum BroadcastMode {
        Accept,
        RawLog(&'static str),
        Missing,
    }

    #[derive(Default)]
    struct Recorded {
        chain_sequence: u64,
        account_queries: usize,
        simulations: Vec<u64>,
        built: Vec<(u64, Vec<String>)>,
        landed: Vec<(u64, Vec<String>)>,
    }

    struct MockFactory {
        sim: SimMode,
        broadcast: BroadcastMode,
        fail_account_query: bool,
        /// Account number reported by account queries
        chain_account_number: u64,
        recorded: Mutex<Recorded>,
    }

    impl MockFactory {
        fn new(chain_sequence: u64, sim: SimMode, broadcast: BroadcastMode) -> Self {
            MockFactory {
                sim,
                broadcast,
                fail_account_query: false,
                chain_account_number: 3,
                recorded: Mutex::new(Recorded {
                    chain_sequence,
                    ..Recorded::default()
                }),
            }
        }
    }

    fn query_err(message: String) -> Error {
        Error::Query {
            action: Action::Simulate,
            source: QueryError::Tonic(tonic::Status::unknown(message)),
        }
    }

    #[tonic::async_trait]
    impl TxFactory for MockFactory {
        async fn account_info(&self, _: Address) -> Result<AccountState, Error> {
            let mut recorded = self.recorded.lock();
            recorded.account_queries += 1;
            if self.fail_account_query {
                return Err(query_err("connection refused".to_owned()));
            }
            Ok(AccountState {
                account_number: self.chain_account_number,
                sequence: recorded.chain_sequence,
            })
        }

        async fn simulate(&self, _: &Signer, txbuilder: &TxBuilder, meta: TxMeta) -> Result<u64, Error> {
            if let SimMode::Hang = self.sim {
                futures::future::pending::<()>().await;
            }
            let mut recorded = self.recorded.lock();
            recorded.simulations.push(meta.sequence);
            match self.sim {
                SimMode::Chain | SimMode::GasCeiling(_) if meta.sequence != recorded.chain_sequence => {
                    Err(query_err(format!(
                        "account sequence mismatch, expected {}, got {}: incorrect account sequence",
                        recorded.chain_sequence, meta.sequence
                    )))
                }
                SimMode::AlwaysMismatch => Err(query_err(format!(
                    "account sequence mismatch, expected {}, got {}: incorrect account sequence",
                    meta.sequence + 1,
                    meta.sequence
                ))),
                SimMode::GasCeiling(max) if txbuilder.len() > max => Err(query_err(
                    "out of gas: tx gas limit 90000000 exceeds max gas 50000000".to_owned(),
                )),
                SimMode::Fail(message) => Err(query_err(message.to_owned())),
                _ => Ok(100_000 * txbuilder.len() as u64),
            }
        }

        async fn build_signed(
            &self,
            _: &Signer,
            txbuilder: &TxBuilder,
            meta: TxMeta,
            gas_limit: u64,
        ) -> Result<Vec<u8>, Error> {
            assert_eq!(gas_limit, 110_000 * txbuilder.len() as u64);
            let mut recorded = self.recorded.lock();
            let descriptions = txbuilder
                .messages()
                .iter()
                .map(|msg| msg.description().to_owned())
                .collect();
            recorded.built.push((meta.sequence, descriptions));
            Ok(((recorded.built.len() - 1) as u64).to_be_bytes().to_vec())
        }

        async fn broadcast_sync(
            &self,
            _: &Signer,
            tx_bytes: Vec<u8>,
        ) -> Result<Option<BroadcastResponse>, Error> {
            let idx = u64::from_be_bytes(tx_bytes.try_into().unwrap()) as usize;
            let mut recorded = self.recorded.lock();
            let (sequence, messages) = recorded.built[idx].clone();
            match self.broadcast {
                BroadcastMode::Missing => Ok(None),
                BroadcastMode::RawLog(raw_log) => Ok(Some(BroadcastResponse {
                    txhash: format!("HASH{sequence}"),
                    code: 0,
                    raw_log: raw_log.to_owned(),
                })),
                BroadcastMode::Accept => {
                    assert_eq!(sequence, recorded.chain_sequence);
                    recorded.chain_sequence += 1;
                    recorded.landed.push((sequence, messages));
                    Ok(Some(BroadcastResponse {
                        txhash: format!("HASH{sequence}"),
                        code: 0,
                        raw_log: String::new(),
                    }))
                }
            }
        }
    }

    fn signer(sequence: u64) -> Signer {
        Signer::new(
            "alice".to_owned(),
            test_wallet(),
            AccountState {
                account_number: 3,
                sequence,
            },
        )
    }

    fn builder(count: usize) -> TxBuilder {
        let mut builder = TxBuilder::default();
        for i in 0..count {
            builder.add_message(TxMessage::new("/test.Msg", vec![i as u8], format!("msg-{i}")));
        }
        builder
    }

    fn names(range: std::ops::Range<usize>) -> Vec<String> {
        range.map(|i| format!("msg-{i}")).collect()
    }

    fn broadcaster(factory: MockFactory) -> Broadcaster<MockFactory> {
        Broadcaster::new(factory, BroadcastConfig::default())
    }

    #[tokio::test]
    async fn happy_path() {
        let b = broadcaster(MockFactory::new(7, SimMode::Chain, BroadcastMode::Accept));
        let signer = signer(7);
        let txhash = b
            .broadcast(&signer, &builder(2), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(txhash, "HASH7");
        assert_eq!(signer.current_state().await.sequence, 8);
        assert_eq!(b.factory().recorded.lock().account_queries, 0);
    }

    #[tokio::test]
    async fn concurrent_broadcasts_use_unique_sequences() {
        let b = Arc::new(broadcaster(MockFactory::new(
            0,
            SimMode::Chain,
            BroadcastMode::Accept,
        )));
        let signer = signer(0);
        let mut handles = vec![];
        for _ in 0..25 {
            let b = b.clone();
            let signer = signer.clone();
            handles.push(tokio::spawn(async move {
                b.broadcast(&signer, &builder(1), &CancelSignal::never())
                    .await
            }));
        }
        let mut hashes = HashSet::new();
        for handle in handles {
            assert!(hashes.insert(handle.await.unwrap().unwrap()));
        }
        let recorded = b.factory().recorded.lock();
        let sequences: HashSet<u64> = recorded.landed.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(sequences, (0..25).collect());
        assert_eq!(recorded.account_queries, 0);
    }

    #[tokio::test]
    async fn single_mismatch_resyncs_once() {
        let b = broadcaster(MockFactory::new(9, SimMode::Chain, BroadcastMode::Accept));
        let signer = signer(4);
        let txhash = b
            .broadcast(&signer, &builder(1), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(txhash, "HASH9");
        let recorded = b.factory().recorded.lock();
        assert_eq!(recorded.account_queries, 1);
        assert_eq!(recorded.simulations, vec![4, 9]);
        drop(recorded);
        assert_eq!(signer.current_state().await.sequence, 10);
    }

    #[tokio::test]
    async fn retry_budget_exhausted() {
        let b = broadcaster(MockFactory::new(
            0,
            SimMode::AlwaysMismatch,
            BroadcastMode::Accept,
        ));
        let signer = signer(0);
        let err = b
            .broadcast(&signer, &builder(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            FailureKind::classify(&err),
            FailureKind::SequenceMismatch { .. }
        ));
        let recorded = b.factory().recorded.lock();
        assert_eq!(recorded.account_queries, 5);
        assert_eq!(recorded.simulations.len(), 6);
        // Last error is the one from the final attempt
        assert!(err.to_string().contains("expected 1, got 0"));
    }

    #[tokio::test]
    async fn resync_disabled_surfaces_mismatch() {
        let b = Broadcaster::new(
            MockFactory::new(9, SimMode::Chain, BroadcastMode::Accept),
            BroadcastConfig {
                resync_on_mismatch: false,
                ..BroadcastConfig::default()
            },
        );
        let err = b
            .broadcast(&signer(4), &builder(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            FailureKind::classify(&err),
            FailureKind::SequenceMismatch { expected: Some(9) }
        ));
        assert_eq!(b.factory().recorded.lock().account_queries, 0);
    }

    #[tokio::test]
    async fn failed_resync_is_surfaced() {
        let mut factory = MockFactory::new(9, SimMode::Chain, BroadcastMode::Accept);
        factory.fail_account_query = true;
        let b = broadcaster(factory);
        let err = b
            .broadcast(&signer(4), &builder(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query {
                action: Action::Resync(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn changed_account_number_leaves_state_alone() {
        let mut factory = MockFactory::new(50, SimMode::AlwaysMismatch, BroadcastMode::Accept);
        factory.chain_account_number = 99;
        let b = broadcaster(factory);
        let signer = signer(0);

        let mut state = signer.current_state().await;
        let outcome = resync(b.factory(), signer.address(), &mut state)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ResyncOutcome::AccountNumberChanged { local: 3, chain: 99 }
        );
        assert_eq!(
            state,
            AccountState {
                account_number: 3,
                sequence: 0
            }
        );

        let err = b
            .broadcast(&signer, &builder(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            FailureKind::classify(&err),
            FailureKind::SequenceMismatch { expected: Some(6) }
        ));
        let recorded = b.factory().recorded.lock();
        // One direct resync above plus the full budget
        assert_eq!(recorded.account_queries, 6);
        assert_eq!(recorded.simulations, vec![0, 1, 2, 3, 4, 5]);
        drop(recorded);
        // Only the attempts moved the sequence, never the chain's value
        assert_eq!(
            signer.current_state().await,
            AccountState {
                account_number: 3,
                sequence: 6
            }
        );
    }

    #[tokio::test]
    async fn oversized_batch_rejected_without_network() {
        let b = broadcaster(MockFactory::new(0, SimMode::Chain, BroadcastMode::Accept));
        let err = b
            .broadcast(&signer(0), &builder(120), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::TooManyMessages {
                count: 120,
                max: 100
            })
        ));
        let recorded = b.factory().recorded.lock();
        assert!(recorded.simulations.is_empty());
        assert_eq!(recorded.account_queries, 0);
    }

    #[tokio::test]
    async fn empty_batch_rejected() {
        let b = broadcaster(MockFactory::new(0, SimMode::Chain, BroadcastMode::Accept));
        let err = b
            .broadcast(&signer(0), &builder(0), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::EmptyBatch)
        ));
    }

    #[tokio::test]
    async fn gas_ceiling_splits_in_order() {
        let b = broadcaster(MockFactory::new(
            0,
            SimMode::GasCeiling(2),
            BroadcastMode::Accept,
        ));
        let signer = signer(0);
        let txhash = b
            .broadcast(&signer, &builder(4), &CancelSignal::never())
            .await
            .unwrap();
        let recorded = b.factory().recorded.lock();
        assert_eq!(
            recorded.landed,
            vec![(0, names(0..2)), (1, names(2..4))]
        );
        assert_eq!(txhash, "HASH1");
        assert_eq!(recorded.account_queries, 0);
        assert_eq!(recorded.simulations, vec![0, 0, 1]);
    }

    #[tokio::test]
    async fn gas_ceiling_split_without_resync() {
        let b = Broadcaster::new(
            MockFactory::new(0, SimMode::GasCeiling(2), BroadcastMode::Accept),
            BroadcastConfig {
                resync_on_mismatch: false,
                ..BroadcastConfig::default()
            },
        );
        let signer = signer(0);
        let txhash = b
            .broadcast(&signer, &builder(4), &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(txhash, "HASH1");
        let recorded = b.factory().recorded.lock();
        assert_eq!(
            recorded.landed,
            vec![(0, names(0..2)), (1, names(2..4))]
        );
        assert_eq!(recorded.account_queries, 0);
        drop(recorded);
        assert_eq!(signer.current_state().await.sequence, 2);
    }

    #[tokio::test]
    async fn gas_ceiling_splits_recursively() {
        let b = broadcaster(MockFactory::new(
            0,
            SimMode::GasCeiling(1),
            BroadcastMode::Accept,
        ));
        let err = b
            .broadcast(&signer(0), &builder(5), &CancelSignal::never())
            .await
            .unwrap_err();
        // Two message chunks can't be split any further
        assert_eq!(FailureKind::classify(&err), FailureKind::GasExceeded);

        let b = broadcaster(MockFactory::new(
            0,
            SimMode::GasCeiling(3),
            BroadcastMode::Accept,
        ));
        b.broadcast(&signer(0), &builder(7), &CancelSignal::never())
            .await
            .unwrap();
        let landed: Vec<String> = b
            .factory()
            .recorded
            .lock()
            .landed
            .iter()
            .flat_map(|(_, msgs)| msgs.clone())
            .collect();
        assert_eq!(landed, names(0..7));
    }

    #[tokio::test]
    async fn gas_ceiling_small_batch_is_terminal() {
        let b = broadcaster(MockFactory::new(
            0,
            SimMode::GasCeiling(1),
            BroadcastMode::Accept,
        ));
        let err = b
            .broadcast(&signer(0), &builder(2), &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(FailureKind::classify(&err), FailureKind::GasExceeded);
        assert_eq!(b.factory().recorded.lock().simulations.len(), 1);
    }

    #[tokio::test]
    async fn raw_log_with_hash_is_error() {
        let b = broadcaster(MockFactory::new(
            0,
            SimMode::Chain,
            BroadcastMode::RawLog("insufficient fees"),
        ));
        let err = b
            .broadcast(&signer(0), &builder(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Rejected { ref txhash, ref raw_log, .. } if txhash == "HASH0" && raw_log == "insufficient fees"
        ));
    }

    #[tokio::test]
    async fn missing_response_is_protocol_error() {
        let b = broadcaster(MockFactory::new(0, SimMode::Chain, BroadcastMode::Missing));
        let err = b
            .broadcast(&signer(0), &builder(1), &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn other_errors_are_terminal() {
        let b = broadcaster(MockFactory::new(
            0,
            SimMode::Fail("failed to execute message; message index: 0: Unauthorized"),
            BroadcastMode::Accept,
        ));
        let signer = signer(0);
        let err = b
            .broadcast(&signer, &builder(3), &CancelSignal::never())
            .await
            .unwrap_err();
        assert_eq!(FailureKind::classify(&err), FailureKind::Transport);
        let recorded = b.factory().recorded.lock();
        assert_eq!(recorded.simulations.len(), 1);
        assert_eq!(recorded.account_queries, 0);
        drop(recorded);
        // The attempt still consumed its sequence number
        assert_eq!(signer.current_state().await.sequence, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_in_flight_releases_lock() {
        let b = broadcaster(MockFactory::new(0, SimMode::Hang, BroadcastMode::Accept));
        let signer = signer(0);
        let (handle, cancel) = cancel_pair();
        let task = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.cancel();
        };
        let txbuilder = builder(1);
        let (res, ()) = tokio::join!(b.broadcast(&signer, &txbuilder, &cancel), task);
        assert!(matches!(res, Err(Error::Cancelled { .. })));
        // Lock must be free again
        assert_eq!(signer.current_state().await.sequence, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_while_waiting_for_lock() {
        let b = broadcaster(MockFactory::new(0, SimMode::Chain, BroadcastMode::Accept));
        let signer = signer(0);
        let guard = signer.lock().await;
        let cancel = CancelSignal::never().with_timeout(Duration::from_secs(5));
        let err = b
            .broadcast(&signer, &builder(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { .. }));
        drop(guard);
        assert!(b.factory().recorded.lock().simulations.is_empty());
    }

    #[test]
    fn gas_adjustment() {
        let config = BroadcastConfig::default();
        assert_eq!(config.adjusted_gas(100_000), 110_000);
        assert_eq!(config.adjusted_gas(0), 0);
    }
}
