use cosmos_sdk_proto::{
    cosmos::{
        auth::v1beta1::{QueryAccountRequest, QueryAccountResponse},
        bank::v1beta1::{QueryBalanceRequest, QueryBalanceResponse},
        base::tendermint::v1beta1::{GetLatestBlockRequest, GetLatestBlockResponse},
        tx::v1beta1::{
            BroadcastTxRequest, BroadcastTxResponse, GetTxRequest, GetTxResponse,
            GetTxsEventRequest, GetTxsEventResponse, SimulateRequest, SimulateResponse,
        },
    },
    cosmwasm::wasm::v1::{
        QueryContractInfoRequest, QueryContractInfoResponse, QueryRawContractStateRequest,
        QueryRawContractStateResponse, QuerySmartContractStateRequest,
        QuerySmartContractStateResponse,
    },
};
use tonic::async_trait;

use super::node::Node;

#[async_trait]
pub(crate) trait GrpcRequest: Clone + Send + Sync + 'static {
    type Response: Send;

    /// Whether a failed call may be repeated.
    ///
    /// False for anything touching the mempool or account sequence.
    fn should_retry() -> bool {
        true
    }

    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status>;
}

#[async_trait]
impl GrpcRequest for QueryAccountRequest {
    type Response = QueryAccountResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.auth_query_client().account(self).await
    }
}

#[async_trait]
impl GrpcRequest for QueryBalanceRequest {
    type Response = QueryBalanceResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.bank_query_client().balance(self).await
    }
}

#[async_trait]
impl GrpcRequest for QuerySmartContractStateRequest {
    type Response = QuerySmartContractStateResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.wasm_query_client().smart_contract_state(self).await
    }
}

#[async_trait]
impl GrpcRequest for QueryRawContractStateRequest {
    type Response = QueryRawContractStateResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.wasm_query_client().raw_contract_state(self).await
    }
}

#[async_trait]
impl GrpcRequest for QueryContractInfoRequest {
    type Response = QueryContractInfoResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.wasm_query_client().contract_info(self).await
    }
}

#[async_trait]
impl GrpcRequest for GetLatestBlockRequest {
    type Response = GetLatestBlockResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.tendermint_client().get_latest_block(self).await
    }
}

#[async_trait]
impl GrpcRequest for GetTxRequest {
    type Response = GetTxResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.tx_service_client().get_tx(self).await
    }
}

#[async_trait]
impl GrpcRequest for GetTxsEventRequest {
    type Response = GetTxsEventResponse;
    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.tx_service_client().get_txs_event(self).await
    }
}

#[async_trait]
impl GrpcRequest for SimulateRequest {
    type Response = SimulateResponse;

    fn should_retry() -> bool {
        false
    }

    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.tx_service_client().simulate(self).await
    }
}

#[async_trait]
impl GrpcRequest for BroadcastTxRequest {
    type Response = BroadcastTxResponse;

    fn should_retry() -> bool {
        false
    }

    async fn perform(self, node: &Node) -> Result<tonic::Response<Self::Response>, tonic::Status> {
        node.tx_service_client().broadcast_tx(self).await
    }
}
