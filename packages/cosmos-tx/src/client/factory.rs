use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use cosmos_sdk_proto::{
    cosmos::{
        auth::v1beta1::{BaseAccount, QueryAccountRequest},
        tx::{
            signing::v1beta1::SignMode,
            v1beta1::{
                mode_info, AuthInfo, BroadcastMode, BroadcastTxRequest, Fee, ModeInfo, SignDoc,
                SignerInfo, SimulateRequest, Tx, TxBody,
            },
        },
    },
    Any,
};
use prost::Message;

use crate::{
    cancel::CancelSignal,
    error::{Action, Error},
    factory::{BroadcastResponse, TxFactory, TxMeta},
    sequence::AccountState,
    signer::Signer,
    Address, GasPrice, TxBuilder,
};

use super::node::Connection;

const BASE_ACCOUNT_TYPE_URL: &str = "/cosmos.auth.v1beta1.BaseAccount";

/// [TxFactory] talking to a node over gRPC.
pub(crate) struct GrpcFactory {
    pub(crate) conn: Connection,
    chain_id: String,
    gas_price: GasPrice,
    /// 0 means no timeout height
    timeout_height: Arc<AtomicU64>,
}

impl GrpcFactory {
    pub(crate) fn new(
        conn: Connection,
        chain_id: String,
        gas_price: GasPrice,
        timeout_height: Arc<AtomicU64>,
    ) -> Self {
        GrpcFactory {
            conn,
            chain_id,
            gas_price,
            timeout_height,
        }
    }

    fn make_tx_body(&self, txbuilder: &TxBuilder) -> TxBody {
        TxBody {
            messages: txbuilder
                .messages()
                .iter()
                .map(|msg| msg.to_protobuf())
                .collect(),
            memo: txbuilder.memo.as_deref().unwrap_or_default().to_owned(),
            timeout_height: self.timeout_height.load(Ordering::SeqCst),
            ..Default::default()
        }
    }

    fn make_signer_infos(&self, sequence: u64, public_key: Option<&[u8]>) -> Vec<SignerInfo> {
        vec![SignerInfo {
            public_key: Some(Any {
                type_url: "/cosmos.crypto.secp256k1.PubKey".to_owned(),
                value: cosmos_sdk_proto::cosmos::crypto::secp256k1::PubKey {
                    key: public_key.map(|key| key.to_owned()).unwrap_or_default(),
                }
                .encode_to_vec(),
            }),
            mode_info: Some(ModeInfo {
                sum: Some(mode_info::Sum::Single(mode_info::Single {
                    mode: SignMode::Direct as i32,
                })),
            }),
            sequence,
        }]
    }
}

#[tonic::async_trait]
impl TxFactory for GrpcFactory {
    async fn account_info(&self, address: Address) -> Result<AccountState, Error> {
        let action = Action::QueryAccount(address);
        let res = self
            .conn
            .perform_query(
                QueryAccountRequest {
                    address: address.to_string(),
                },
                action.clone(),
                &CancelSignal::never(),
            )
            .await?;
        let account = res.account.ok_or_else(|| Error::Protocol {
            action: action.clone(),
            message: "no account in response".to_owned(),
        })?;
        if account.type_url != BASE_ACCOUNT_TYPE_URL {
            return Err(Error::Protocol {
                action,
                message: format!("unsupported account type {}", account.type_url),
            });
        }
        let base_account =
            BaseAccount::decode(account.value.as_slice()).map_err(|e| Error::Protocol {
                action,
                message: format!("unable to decode BaseAccount: {e}"),
            })?;
        Ok(AccountState {
            account_number: base_account.account_number,
            sequence: base_account.sequence,
        })
    }

    async fn simulate(
        &self,
        signer: &Signer,
        txbuilder: &TxBuilder,
        meta: TxMeta,
    ) -> Result<u64, Error> {
        // Unsigned, with no fee. Only the gas usage is of interest.
        let simulate_tx = Tx {
            body: Some(self.make_tx_body(txbuilder)),
            auth_info: Some(AuthInfo {
                fee: Some(Fee {
                    gas_limit: 0,
                    ..Default::default()
                }),
                signer_infos: self
                    .make_signer_infos(meta.sequence, Some(signer.wallet().public_key_bytes())),
                ..Default::default()
            }),
            signatures: vec![vec![]],
        };

        let simres = self
            .conn
            .perform_query(
                SimulateRequest {
                    tx_bytes: simulate_tx.encode_to_vec(),
                    ..Default::default()
                },
                Action::Simulate,
                &CancelSignal::never(),
            )
            .await?;

        simres
            .gas_info
            .map(|gas_info| gas_info.gas_used)
            .ok_or_else(|| Error::Protocol {
                action: Action::Simulate,
                message: "missing gas_info in SimulateResponse".to_owned(),
            })
    }

    async fn build_signed(
        &self,
        signer: &Signer,
        txbuilder: &TxBuilder,
        meta: TxMeta,
        gas_limit: u64,
    ) -> Result<Vec<u8>, Error> {
        let wallet = signer.wallet();
        let body = self.make_tx_body(txbuilder);
        let auth_info = AuthInfo {
            signer_infos: self.make_signer_infos(meta.sequence, Some(wallet.public_key_bytes())),
            fee: Some(Fee {
                amount: vec![self.gas_price.fee_for(gas_limit)],
                gas_limit,
                ..Default::default()
            }),
            ..Default::default()
        };

        let sign_doc = SignDoc {
            body_bytes: body.encode_to_vec(),
            auth_info_bytes: auth_info.encode_to_vec(),
            chain_id: self.chain_id.clone(),
            account_number: meta.account_number,
        };
        let signature = wallet
            .sign_bytes(&sign_doc.encode_to_vec())
            .map_err(Error::from)?;

        let tx = Tx {
            body: Some(body),
            auth_info: Some(auth_info),
            signatures: vec![signature],
        };
        Ok(tx.encode_to_vec())
    }

    async fn broadcast_sync(
        &self,
        signer: &Signer,
        tx_bytes: Vec<u8>,
    ) -> Result<Option<BroadcastResponse>, Error> {
        let res = self
            .conn
            .perform_query(
                BroadcastTxRequest {
                    tx_bytes,
                    mode: BroadcastMode::Sync as i32,
                },
                Action::Broadcast(signer.address()),
                &CancelSignal::never(),
            )
            .await?;
        tracing::debug!("BroadcastTxResponse: {res:?}");
        Ok(res.tx_response.map(|res| BroadcastResponse {
            txhash: res.txhash,
            code: res.code,
            raw_log: res.raw_log,
        }))
    }
}
