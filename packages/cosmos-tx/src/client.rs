mod factory;
mod node;
mod poller;
mod query;
mod timeout_height;
mod tx_search;

use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, TimeZone, Utc};
use cosmos_sdk_proto::{
    cosmos::{
        bank::v1beta1::QueryBalanceRequest,
        base::{abci::v1beta1::TxResponse, tendermint::v1beta1::GetLatestBlockRequest},
        tx::v1beta1::{GetTxsEventRequest, OrderBy, TxBody},
    },
    cosmwasm::wasm::v1::{
        ContractInfo, QueryContractInfoRequest, QueryRawContractStateRequest,
        QuerySmartContractStateRequest,
    },
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    broadcast::Broadcaster,
    cancel::CancelSignal,
    error::{Action, BuilderError, Error, ValidationError},
    factory::TxFactory,
    sequence::AccountState,
    signer::{Signer, SignerRegistry},
    txbuilder::{execute_message, instantiate_message},
    Address, Coin, CosmosBuilder, HasAddress, TxBuilder, TxMessage, Wallet,
};

use self::{
    factory::GrpcFactory,
    node::Connection,
    poller::FoundTx,
    timeout_height::{HeightSource, TimeoutHeightTask},
};

/// A connection to a Cosmos chain plus the signers using it.
///
/// Cheap to clone, all clones share the connection, signers and sequence
/// state. Each clone carries its own [CancelSignal], see [Cosmos::with_cancel].
#[derive(Clone)]
pub struct Cosmos {
    inner: Arc<CosmosInner>,
    cancel: CancelSignal,
}

struct CosmosInner {
    builder: Arc<CosmosBuilder>,
    broadcaster: Broadcaster<GrpcFactory>,
    signers: SignerRegistry,
    timeout_height: Arc<AtomicU64>,
    timeout_task: Option<TimeoutHeightTask>,
}

impl std::fmt::Debug for Cosmos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cosmos")
            .field("chain_id", &self.inner.builder.chain_id())
            .field("grpc_url", &self.conn().node().grpc_url())
            .field("signers", &self.inner.signers.names())
            .finish()
    }
}

/// Information on a block.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// Block height
    pub height: i64,
    /// Block timestamp
    pub timestamp: DateTime<Utc>,
    /// Chain ID reported in the block header
    pub chain_id: String,
}

impl CosmosBuilder {
    /// Validate the settings, connect and check we reached the expected chain.
    ///
    /// Also starts the timeout height task unless the offset is 0.
    pub async fn build(self) -> Result<Cosmos, Error> {
        self.validate()?;
        let gas_price = self.parsed_gas_price()?;
        let conn = Connection::new(&self)?;
        let builder = Arc::new(self);

        let block = latest_block_info(&conn, &CancelSignal::never()).await?;
        if block.chain_id != builder.chain_id() {
            return Err(BuilderError::MismatchedChainIds {
                actual: block.chain_id,
                expected: builder.chain_id().to_owned(),
            }
            .into());
        }

        let offset = builder.timeout_height_offset();
        let timeout_height = Arc::new(AtomicU64::new(0));
        let timeout_task = if offset > 0 {
            timeout_height.store(height_to_u64(block.height)? + offset, Ordering::SeqCst);
            Some(TimeoutHeightTask::spawn(
                height_source(conn.clone()),
                offset,
                builder.timeout_height_interval(),
                timeout_height.clone(),
            ))
        } else {
            None
        };

        let factory = GrpcFactory::new(
            conn,
            builder.chain_id().to_owned(),
            gas_price,
            timeout_height.clone(),
        );
        let broadcaster = Broadcaster::new(factory, builder.broadcast_config());
        tracing::info!(
            "Connected to {} at height {}",
            builder.chain_id(),
            block.height
        );

        Ok(Cosmos {
            inner: Arc::new(CosmosInner {
                builder,
                broadcaster,
                signers: SignerRegistry::default(),
                timeout_height,
                timeout_task,
            }),
            cancel: CancelSignal::never(),
        })
    }
}

fn height_to_u64(height: i64) -> Result<u64, Error> {
    u64::try_from(height).map_err(|_| Error::Protocol {
        action: Action::GetLatestBlock,
        message: format!("negative block height {height}"),
    })
}

fn height_source(conn: Connection) -> HeightSource {
    Box::new(move |cancel| {
        let conn = conn.clone();
        Box::pin(async move {
            let block = latest_block_info(&conn, &cancel).await?;
            height_to_u64(block.height)
        })
    })
}

async fn latest_block_info(conn: &Connection, cancel: &CancelSignal) -> Result<BlockInfo, Error> {
    let action = Action::GetLatestBlock;
    let res = conn
        .perform_query(GetLatestBlockRequest {}, action.clone(), cancel)
        .await?;
    let missing = |what: &str| Error::Protocol {
        action: action.clone(),
        message: format!("{what} is None"),
    };
    let header = res
        .block
        .ok_or_else(|| missing("block"))?
        .header
        .ok_or_else(|| missing("header"))?;
    let time = header.time.ok_or_else(|| missing("time"))?;
    Ok(BlockInfo {
        height: header.height,
        timestamp: Utc.timestamp_nanos(time.seconds * 1_000_000_000 + i64::from(time.nanos)),
        chain_id: header.chain_id,
    })
}

impl Cosmos {
    /// A handle whose operations all observe `cancel`.
    ///
    /// Shares everything else with `self`.
    pub fn with_cancel(&self, cancel: CancelSignal) -> Cosmos {
        Cosmos {
            inner: self.inner.clone(),
            cancel,
        }
    }

    /// The settings this client was built from.
    pub fn get_builder(&self) -> &Arc<CosmosBuilder> {
        &self.inner.builder
    }

    fn conn(&self) -> &Connection {
        &self.inner.broadcaster.factory().conn
    }

    async fn cancellable<T>(
        &self,
        action: Action,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled { action }),
            res = fut => res,
        }
    }

    /// Register a signer from a mnemonic phrase.
    ///
    /// Loads the account number and sequence from the chain. Fails if the
    /// name is empty or already taken.
    pub async fn add_signer(&self, name: &str, phrase: &str) -> Result<Signer, Error> {
        let wallet = Wallet::from_phrase(phrase, self.inner.builder.hrp())?;
        self.add_signer_wallet(name, wallet).await
    }

    /// Register a signer from an existing wallet.
    pub async fn add_signer_wallet(&self, name: &str, wallet: Wallet) -> Result<Signer, Error> {
        self.cancellable(
            Action::AddSigner(name.to_owned()),
            self.inner
                .signers
                .register(self.inner.broadcaster.factory(), name, wallet),
        )
        .await
    }

    /// Look up a registered signer.
    pub fn get_signer(&self, name: &str) -> Result<Signer, Error> {
        self.inner.signers.get(name).map_err(Error::from)
    }

    /// Names of all registered signers, sorted.
    pub fn signer_names(&self) -> Vec<String> {
        self.inner.signers.names()
    }

    /// Broadcast the messages in `txbuilder` from `signer`.
    ///
    /// See [Broadcaster::broadcast].
    pub async fn broadcast(&self, signer: &Signer, txbuilder: &TxBuilder) -> Result<String, Error> {
        self.inner
            .broadcaster
            .broadcast(signer, txbuilder, &self.cancel)
            .await
    }

    /// Broadcast from the signer registered as `name`.
    pub async fn broadcast_as(&self, name: &str, txbuilder: &TxBuilder) -> Result<String, Error> {
        let signer = self.get_signer(name)?;
        self.broadcast(&signer, txbuilder).await
    }

    /// Execute a contract with a raw JSON payload.
    pub async fn execute(
        &self,
        signer: &Signer,
        contract: Address,
        msg: impl Into<Vec<u8>>,
        funds: Vec<Coin>,
    ) -> Result<String, Error> {
        let mut txbuilder = TxBuilder::default();
        txbuilder.add_message(execute_message(
            signer.get_address(),
            contract,
            msg.into(),
            funds,
        )?);
        self.broadcast(signer, &txbuilder).await
    }

    /// Execute a contract with a message serialized to JSON.
    pub async fn execute_json(
        &self,
        signer: &Signer,
        contract: Address,
        msg: &impl Serialize,
        funds: Vec<Coin>,
    ) -> Result<String, Error> {
        self.execute(signer, contract, serde_json::to_vec(msg)?, funds)
            .await
    }

    /// Execute a contract once per payload, all in one transaction.
    ///
    /// The batch is checked against the configured maximum before anything
    /// else happens.
    pub async fn execute_batch(
        &self,
        signer: &Signer,
        contract: Address,
        msgs: Vec<Vec<u8>>,
    ) -> Result<String, Error> {
        let max = self.inner.builder.max_batch_size();
        if msgs.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        if msgs.len() > max {
            return Err(ValidationError::TooManyMessages {
                count: msgs.len(),
                max,
            }
            .into());
        }
        let mut txbuilder = TxBuilder::default();
        for msg in msgs {
            txbuilder.add_message(execute_message(
                signer.get_address(),
                contract,
                msg,
                vec![],
            )?);
        }
        self.broadcast(signer, &txbuilder).await
    }

    /// Instantiate a contract with the signer as admin.
    pub async fn instantiate(
        &self,
        signer: &Signer,
        code_id: u64,
        label: impl Into<String>,
        msg: impl Into<Vec<u8>>,
        funds: Vec<Coin>,
    ) -> Result<String, Error> {
        let mut txbuilder = TxBuilder::default();
        txbuilder.add_message(instantiate_message(
            signer.get_address(),
            Some(signer.get_address()),
            code_id,
            label,
            msg.into(),
            funds,
        )?);
        self.broadcast(signer, &txbuilder).await
    }

    /// Like [Self::instantiate], serializing the message to JSON.
    pub async fn instantiate_json(
        &self,
        signer: &Signer,
        code_id: u64,
        label: impl Into<String>,
        msg: &impl Serialize,
        funds: Vec<Coin>,
    ) -> Result<String, Error> {
        self.instantiate(signer, code_id, label, serde_json::to_vec(msg)?, funds)
            .await
    }

    /// Send coins from the signer to `dest`.
    pub async fn send_coins(
        &self,
        signer: &Signer,
        dest: Address,
        amount: Vec<Coin>,
    ) -> Result<String, Error> {
        let mut txbuilder = TxBuilder::default();
        txbuilder.add_message(TxMessage::from(
            cosmos_sdk_proto::cosmos::bank::v1beta1::MsgSend {
                from_address: signer.get_address_string(),
                to_address: dest.get_address_string(),
                amount,
            },
        ));
        self.broadcast(signer, &txbuilder).await
    }

    /// Balance of a single denom.
    pub async fn bank_balance(&self, address: Address, denom: &str) -> Result<Coin, Error> {
        let action = Action::BankBalance(address, denom.to_owned());
        let res = self
            .conn()
            .perform_query(
                QueryBalanceRequest {
                    address: address.get_address_string(),
                    denom: denom.to_owned(),
                },
                action.clone(),
                &self.cancel,
            )
            .await?;
        res.balance.ok_or_else(|| Error::Protocol {
            action,
            message: "no balance in response".to_owned(),
        })
    }

    /// Smart query returning the raw response bytes.
    pub async fn wasm_smart_query(
        &self,
        contract: Address,
        query: impl Into<Vec<u8>>,
    ) -> Result<Vec<u8>, Error> {
        Ok(self
            .conn()
            .perform_query(
                QuerySmartContractStateRequest {
                    address: contract.get_address_string(),
                    query_data: query.into(),
                },
                Action::SmartQuery(contract),
                &self.cancel,
            )
            .await?
            .data)
    }

    /// Smart query with JSON serialization on both sides.
    pub async fn wasm_smart_query_json<T: DeserializeOwned>(
        &self,
        contract: Address,
        query: &impl Serialize,
    ) -> Result<T, Error> {
        let res = self
            .wasm_smart_query(contract, serde_json::to_vec(query)?)
            .await?;
        Ok(serde_json::from_slice(&res)?)
    }

    /// Raw query on a contract's storage.
    pub async fn wasm_raw_query(
        &self,
        contract: Address,
        key: impl Into<Vec<u8>>,
    ) -> Result<Vec<u8>, Error> {
        Ok(self
            .conn()
            .perform_query(
                QueryRawContractStateRequest {
                    address: contract.get_address_string(),
                    query_data: key.into(),
                },
                Action::RawQuery(contract),
                &self.cancel,
            )
            .await?
            .data)
    }

    /// Code ID, admin and label of a contract.
    pub async fn contract_info(&self, contract: Address) -> Result<ContractInfo, Error> {
        let action = Action::ContractInfo(contract);
        self.conn()
            .perform_query(
                QueryContractInfoRequest {
                    address: contract.get_address_string(),
                },
                action.clone(),
                &self.cancel,
            )
            .await?
            .contract_info
            .ok_or_else(|| Error::Protocol {
                action,
                message: "no contract_info in response".to_owned(),
            })
    }

    /// Account number and sequence as currently stored on chain.
    pub async fn account_info(&self, address: Address) -> Result<AccountState, Error> {
        self.cancellable(
            Action::QueryAccount(address),
            self.inner.broadcaster.factory().account_info(address),
        )
        .await
    }

    /// Information on the most recent block.
    pub async fn get_latest_block_info(&self) -> Result<BlockInfo, Error> {
        latest_block_info(self.conn(), &self.cancel).await
    }

    /// Height of the most recent block.
    pub async fn latest_height(&self) -> Result<i64, Error> {
        Ok(self.get_latest_block_info().await?.height)
    }

    /// Check that the node reports the configured chain ID.
    pub async fn sanity_check(&self) -> Result<(), Error> {
        let actual = self.get_latest_block_info().await?.chain_id;
        let expected = self.inner.builder.chain_id();
        if actual == expected {
            Ok(())
        } else {
            Err(BuilderError::MismatchedChainIds {
                actual,
                expected: expected.to_owned(),
            }
            .into())
        }
    }

    /// Timeout height attached to new transactions, `None` when disabled.
    pub fn current_timeout_height(&self) -> Option<u64> {
        match self.inner.timeout_height.load(Ordering::SeqCst) {
            0 => None,
            height => Some(height),
        }
    }

    /// Get a transaction, `Ok(None)` if the node doesn't have it.
    pub async fn get_transaction(
        &self,
        txhash: &str,
    ) -> Result<Option<(TxBody, TxResponse)>, Error> {
        poller::lookup_transaction(self.conn(), txhash, &self.cancel).await
    }

    /// Poll until the transaction lands.
    ///
    /// Fails if it landed with a non-zero code or never showed up within the
    /// configured number of attempts.
    pub async fn wait_for_transaction(&self, txhash: &str) -> Result<TxResponse, Error> {
        self.wait_for_transaction_body(txhash)
            .await
            .map(|(_, txres)| txres)
    }

    /// Like [Self::wait_for_transaction], also returning the body.
    pub async fn wait_for_transaction_body(
        &self,
        txhash: &str,
    ) -> Result<(TxBody, TxResponse), Error> {
        let builder = &self.inner.builder;
        let FoundTx(body, txres) = poller::wait_for(
            txhash,
            builder.transaction_attempts(),
            builder.transaction_poll_interval(),
            &self.cancel,
            move || async move {
                Ok(self
                    .get_transaction(txhash)
                    .await?
                    .map(|(body, txres)| FoundTx(body, txres)))
            },
        )
        .await?;
        Ok((body, txres))
    }

    /// Feed every transaction touching `contract` with a height in
    /// `(height_from, height_to]` to `acknowledge`, oldest first.
    ///
    /// Heights are searched in windows of 100,000 blocks, 100 transactions
    /// per page. Each response gets two extra `tx` events carrying its height
    /// and hash. Stops at the first error from `acknowledge` and returns the
    /// number of transactions handled.
    pub async fn handle_txs_by_height<Ack, Fut, E>(
        &self,
        contract: Address,
        height_from: i64,
        height_to: i64,
        acknowledge: Ack,
    ) -> Result<usize, E>
    where
        Ack: FnMut(TxResponse) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<Error>,
    {
        let conn = self.conn();
        let cancel = &self.cancel;
        tx_search::replay(
            tx_search::height_windows(height_from, height_to, tx_search::WINDOW_SIZE),
            move |window, page| async move {
                let (from, to) = window;
                let res = conn
                    .perform_query(
                        GetTxsEventRequest {
                            events: tx_search::window_events(contract, window),
                            order_by: OrderBy::Asc as i32,
                            page,
                            limit: tx_search::PAGE_SIZE,
                            ..Default::default()
                        },
                        Action::SearchTransactions { contract, from, to },
                        cancel,
                    )
                    .await?;
                Ok(res.tx_responses)
            },
            acknowledge,
        )
        .await
    }

    /// Stop the background timeout height task.
    ///
    /// Queries and broadcasts keep working, new transactions are sent without
    /// a timeout height.
    pub async fn shutdown(&self) {
        if let Some(task) = &self.inner.timeout_task {
            task.shutdown().await;
            self.inner.timeout_height.store(0, Ordering::SeqCst);
        }
    }
}
