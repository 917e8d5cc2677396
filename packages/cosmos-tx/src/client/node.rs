use std::{sync::Arc, time::Duration};

use base64::Engine;
use tonic::{
    codegen::InterceptedService,
    metadata::{Ascii, MetadataValue},
    service::Interceptor,
    transport::{Channel, ClientTlsConfig, Endpoint},
    Status,
};

use crate::{
    cancel::CancelSignal,
    error::{Action, BuilderError, Error, QueryError},
    CosmosBuilder,
};

use super::query::GrpcRequest;

/// Adds the referer and basic auth headers to every request.
#[derive(Clone, Default)]
pub(crate) struct CosmosInterceptor {
    referer: Option<MetadataValue<Ascii>>,
    authorization: Option<MetadataValue<Ascii>>,
}

impl Interceptor for CosmosInterceptor {
    fn call(&mut self, mut request: tonic::Request<()>) -> Result<tonic::Request<()>, Status> {
        let req = request.metadata_mut();
        if let Some(value) = &self.referer {
            req.insert("referer", value.clone());
        }
        if let Some(value) = &self.authorization {
            req.insert("authorization", value.clone());
        }
        Ok(request)
    }
}

pub(crate) type CosmosChannel = InterceptedService<Channel, CosmosInterceptor>;

/// Shared gRPC channel plus typed client constructors.
#[derive(Clone)]
pub(crate) struct Node {
    grpc_url: Arc<String>,
    channel: CosmosChannel,
}

/// Connection target and credentials derived from a basic auth URL.
#[derive(Debug, PartialEq, Eq)]
struct BasicAuthTarget {
    grpc_url: String,
    username: String,
    password: Option<String>,
}

fn basic_auth_target(grpc_url: &Arc<String>) -> Result<BasicAuthTarget, BuilderError> {
    let endpoint = Endpoint::from_shared(grpc_url.to_string()).map_err(|source| {
        BuilderError::InvalidGrpcUrl {
            grpc_url: grpc_url.clone(),
            source: source.into(),
        }
    })?;
    let uri = endpoint.uri();
    let host = uri.host().unwrap_or_default();
    let username = host.split('.').next().unwrap_or_default().to_owned();
    let password = uri.path().trim_matches('/');
    Ok(BasicAuthTarget {
        grpc_url: format!("https://{host}:9090"),
        username,
        password: if password.is_empty() {
            None
        } else {
            Some(password.to_owned())
        },
    })
}

fn header_value(name: &str, value: &str) -> Option<MetadataValue<Ascii>> {
    match value.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring invalid {name} header: {e}");
            None
        }
    }
}

impl CosmosBuilder {
    pub(crate) fn make_node(&self) -> Result<Node, BuilderError> {
        let configured = Arc::new(self.grpc_url().to_owned());
        let (grpc_url, authorization) = if self.basic_auth() {
            let target = basic_auth_target(&configured)?;
            let authorization = target.password.and_then(|password| {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{password}", target.username));
                header_value("authorization", &format!("Basic {encoded}"))
            });
            (Arc::new(target.grpc_url), authorization)
        } else {
            (configured, None)
        };

        let grpc_endpoint =
            grpc_url
                .parse::<Endpoint>()
                .map_err(|source| BuilderError::InvalidGrpcUrl {
                    grpc_url: grpc_url.clone(),
                    source: source.into(),
                })?;

        let grpc_endpoint = if grpc_url.starts_with("https://") {
            grpc_endpoint
                .tls_config(ClientTlsConfig::new())
                .map_err(|source| BuilderError::TlsConfig {
                    grpc_url: grpc_url.clone(),
                    source: source.into(),
                })?
        } else {
            grpc_endpoint
        };

        let grpc_channel = grpc_endpoint.connect_lazy();

        let interceptor = CosmosInterceptor {
            referer: self
                .referer_header()
                .and_then(|value| header_value("referer", value)),
            authorization,
        };
        let channel = InterceptedService::new(grpc_channel, interceptor);

        Ok(Node { grpc_url, channel })
    }
}

impl Node {
    pub(crate) fn grpc_url(&self) -> &Arc<String> {
        &self.grpc_url
    }

    pub(crate) fn auth_query_client(
        &self,
    ) -> cosmos_sdk_proto::cosmos::auth::v1beta1::query_client::QueryClient<CosmosChannel> {
        cosmos_sdk_proto::cosmos::auth::v1beta1::query_client::QueryClient::new(
            self.channel.clone(),
        )
    }

    pub(crate) fn bank_query_client(
        &self,
    ) -> cosmos_sdk_proto::cosmos::bank::v1beta1::query_client::QueryClient<CosmosChannel> {
        cosmos_sdk_proto::cosmos::bank::v1beta1::query_client::QueryClient::new(
            self.channel.clone(),
        )
    }

    pub(crate) fn wasm_query_client(
        &self,
    ) -> cosmos_sdk_proto::cosmwasm::wasm::v1::query_client::QueryClient<CosmosChannel> {
        cosmos_sdk_proto::cosmwasm::wasm::v1::query_client::QueryClient::new(self.channel.clone())
    }

    pub(crate) fn tx_service_client(
        &self,
    ) -> cosmos_sdk_proto::cosmos::tx::v1beta1::service_client::ServiceClient<CosmosChannel> {
        cosmos_sdk_proto::cosmos::tx::v1beta1::service_client::ServiceClient::new(
            self.channel.clone(),
        )
    }

    pub(crate) fn tendermint_client(
        &self,
    ) -> cosmos_sdk_proto::cosmos::base::tendermint::v1beta1::service_client::ServiceClient<
        CosmosChannel,
    > {
        cosmos_sdk_proto::cosmos::base::tendermint::v1beta1::service_client::ServiceClient::new(
            self.channel.clone(),
        )
    }
}

/// A node plus the query timeout and retry policy.
#[derive(Clone)]
pub(crate) struct Connection {
    node: Node,
    query_timeout: Duration,
    query_retries: u32,
}

impl Connection {
    pub(crate) fn new(builder: &CosmosBuilder) -> Result<Self, BuilderError> {
        Ok(Connection {
            node: builder.make_node()?,
            query_timeout: Duration::from_secs(builder.query_timeout_seconds().into()),
            query_retries: builder.query_retries(),
        })
    }

    pub(crate) fn node(&self) -> &Node {
        &self.node
    }

    /// Run a request with the configured timeout, retrying read-only requests.
    pub(crate) async fn perform_query<Request: GrpcRequest>(
        &self,
        req: Request,
        action: Action,
        cancel: &CancelSignal,
    ) -> Result<Request::Response, Error> {
        let mut attempt = 0;
        loop {
            let query = tokio::time::timeout(self.query_timeout, req.clone().perform(&self.node));
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled { action }),
                res = query => res,
            };
            let err = match res {
                Ok(Ok(res)) => return Ok(res.into_inner()),
                Ok(Err(status)) => QueryError::Tonic(status),
                Err(_) => QueryError::Timeout(self.query_timeout),
            };
            if !Request::should_retry() || err.is_not_found() || attempt >= self.query_retries {
                return Err(Error::Query {
                    action,
                    source: err,
                });
            }
            attempt += 1;
            tracing::debug!(
                "Error during {action} against {}, retrying. Attempt {attempt} of {}. {err}",
                self.node.grpc_url(),
                self.query_retries
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_from_url() {
        let url = Arc::new("https://alice.grpc.example.com/s3cret/".to_owned());
        assert_eq!(
            basic_auth_target(&url).unwrap(),
            BasicAuthTarget {
                grpc_url: "https://alice.grpc.example.com:9090".to_owned(),
                username: "alice".to_owned(),
                password: Some("s3cret".to_owned()),
            }
        );
    }

    #[test]
    fn basic_auth_without_password() {
        let url = Arc::new("https://grpc.example.com".to_owned());
        let target = basic_auth_target(&url).unwrap();
        assert_eq!(target.password, None);
        assert_eq!(target.grpc_url, "https://grpc.example.com:9090");
    }

    #[tokio::test]
    async fn interceptor_adds_headers() {
        let mut builder = CosmosBuilder::new(
            "pacific-1",
            crate::AddressHrp::from_static("sei"),
            "https://alice.grpc.example.com/s3cret",
        );
        builder.set_basic_auth(Some(true));
        builder.set_referer_header(Some("https://example.com".to_owned()));
        let node = builder.make_node().unwrap();
        assert_eq!(node.grpc_url().as_str(), "https://alice.grpc.example.com:9090");

        let mut interceptor = CosmosInterceptor {
            referer: header_value("referer", "https://example.com"),
            authorization: header_value("authorization", "Basic YWxpY2U6czNjcmV0"),
        };
        let req = interceptor.call(tonic::Request::new(())).unwrap();
        assert_eq!(req.metadata().get("referer").unwrap(), "https://example.com");
        assert_eq!(
            req.metadata().get("authorization").unwrap(),
            "Basic YWxpY2U6czNjcmV0"
        );
    }
}
