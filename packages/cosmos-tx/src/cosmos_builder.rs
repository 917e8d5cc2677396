use std::time::Duration;

use crate::{broadcast::BroadcastConfig, error::BuilderError, AddressHrp, GasPrice};

/// Used to build a [crate::Cosmos].
#[derive(Clone, Debug)]
pub struct CosmosBuilder {
    grpc_url: String,
    chain_id: String,
    hrp: AddressHrp,

    // Values with defaults
    gas_price: Option<String>,
    gas_adjustment: Option<f64>,
    max_retries: Option<usize>,
    max_batch_size: Option<usize>,
    min_split_size: Option<usize>,
    resync_on_mismatch: Option<bool>,
    timeout_height_offset: Option<u64>,
    timeout_height_interval: Option<Duration>,
    query_timeout_seconds: Option<u32>,
    query_retries: Option<u32>,
    transaction_attempts: Option<usize>,
    transaction_poll_interval: Option<Duration>,
    basic_auth: Option<bool>,
    referer_header: Option<String>,
}

impl CosmosBuilder {
    /// Create a new [CosmosBuilder] with default options where possible.
    pub fn new(
        chain_id: impl Into<String>,
        hrp: AddressHrp,
        grpc_url: impl Into<String>,
    ) -> CosmosBuilder {
        Self {
            grpc_url: grpc_url.into(),
            chain_id: chain_id.into(),
            hrp,
            gas_price: None,
            gas_adjustment: None,
            max_retries: None,
            max_batch_size: None,
            min_split_size: None,
            resync_on_mismatch: None,
            timeout_height_offset: None,
            timeout_height_interval: None,
            query_timeout_seconds: None,
            query_retries: None,
            transaction_attempts: None,
            transaction_poll_interval: None,
            basic_auth: None,
            referer_header: None,
        }
    }

    /// gRPC endpoint to connect to
    pub fn grpc_url(&self) -> &str {
        self.grpc_url.as_ref()
    }

    /// See [Self::grpc_url]
    pub fn set_grpc_url(&mut self, grpc_url: impl Into<String>) {
        self.grpc_url = grpc_url.into();
    }

    /// Chain ID we want to communicate with
    pub fn chain_id(&self) -> &str {
        self.chain_id.as_ref()
    }

    /// See [Self::chain_id]
    pub fn set_chain_id(&mut self, chain_id: String) {
        self.chain_id = chain_id;
    }

    /// Human-readable part (HRP) of chain addresses
    pub fn hrp(&self) -> AddressHrp {
        self.hrp
    }

    /// See [Self::hrp]
    pub fn set_hrp(&mut self, hrp: AddressHrp) {
        self.hrp = hrp;
    }

    /// Gas price in `<amount><denom>` form.
    ///
    /// Default: `0.1usei`
    pub fn gas_price(&self) -> &str {
        self.gas_price.as_deref().unwrap_or("0.1usei")
    }

    /// See [Self::gas_price]
    pub fn set_gas_price(&mut self, gas_price: Option<String>) {
        self.gas_price = gas_price;
    }

    /// Multiplier applied to simulated gas usage.
    ///
    /// Default: 1.1
    pub fn gas_adjustment(&self) -> f64 {
        self.gas_adjustment.unwrap_or(1.1)
    }

    /// See [Self::gas_adjustment]
    pub fn set_gas_adjustment(&mut self, gas_adjustment: Option<f64>) {
        self.gas_adjustment = gas_adjustment;
    }

    /// How many resync-and-retry rounds after a sequence mismatch.
    ///
    /// Default: 5
    pub fn max_retries(&self) -> usize {
        self.max_retries.unwrap_or(5)
    }

    /// See [Self::max_retries]
    pub fn set_max_retries(&mut self, max_retries: Option<usize>) {
        self.max_retries = max_retries;
    }

    /// Maximum number of messages in one broadcast call.
    ///
    /// Default: 100
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.unwrap_or(100)
    }

    /// See [Self::max_batch_size]
    pub fn set_max_batch_size(&mut self, max_batch_size: Option<usize>) {
        self.max_batch_size = max_batch_size;
    }

    /// Batches this size or smaller are not split on a gas ceiling error.
    ///
    /// Default: 2
    pub fn min_split_size(&self) -> usize {
        self.min_split_size.unwrap_or(2)
    }

    /// See [Self::min_split_size]
    pub fn set_min_split_size(&mut self, min_split_size: Option<usize>) {
        self.min_split_size = min_split_size;
    }

    /// Reload the sequence from the chain after a mismatch.
    ///
    /// Default: true
    pub fn resync_on_mismatch(&self) -> bool {
        self.resync_on_mismatch.unwrap_or(true)
    }

    /// See [Self::resync_on_mismatch]
    pub fn set_resync_on_mismatch(&mut self, resync_on_mismatch: Option<bool>) {
        self.resync_on_mismatch = resync_on_mismatch;
    }

    /// Number of blocks past the latest height a transaction stays valid for.
    ///
    /// 0 disables timeout heights and the background refresh. Default: 20
    pub fn timeout_height_offset(&self) -> u64 {
        self.timeout_height_offset.unwrap_or(20)
    }

    /// See [Self::timeout_height_offset]
    pub fn set_timeout_height_offset(&mut self, timeout_height_offset: Option<u64>) {
        self.timeout_height_offset = timeout_height_offset;
    }

    /// How often the latest height is refreshed.
    ///
    /// Default: 10 seconds
    pub fn timeout_height_interval(&self) -> Duration {
        self.timeout_height_interval
            .unwrap_or_else(|| Duration::from_secs(10))
    }

    /// See [Self::timeout_height_interval]
    pub fn set_timeout_height_interval(&mut self, timeout_height_interval: Option<Duration>) {
        self.timeout_height_interval = timeout_height_interval;
    }

    /// Sets the number of seconds before timing out a gRPC query
    ///
    /// Defaults to 5 seconds
    pub fn query_timeout_seconds(&self) -> u32 {
        self.query_timeout_seconds.unwrap_or(5)
    }

    /// See [Self::query_timeout_seconds]
    pub fn set_query_timeout_seconds(&mut self, query_timeout_seconds: Option<u32>) {
        self.query_timeout_seconds = query_timeout_seconds;
    }

    /// Number of retries for a read-only query before giving up.
    ///
    /// Simulate and broadcast are never retried here.
    ///
    /// Defaults to 3
    pub fn query_retries(&self) -> u32 {
        self.query_retries.unwrap_or(3)
    }

    /// See [Self::query_retries]
    pub fn set_query_retries(&mut self, query_retries: Option<u32>) {
        self.query_retries = query_retries;
    }

    /// How many lookups to make while waiting for a transaction
    ///
    /// Default: 20
    pub fn transaction_attempts(&self) -> usize {
        self.transaction_attempts.unwrap_or(20)
    }

    /// See [Self::transaction_attempts]
    pub fn set_transaction_attempts(&mut self, transaction_attempts: Option<usize>) {
        self.transaction_attempts = transaction_attempts;
    }

    /// Delay between transaction lookups
    ///
    /// Default: 1 second
    pub fn transaction_poll_interval(&self) -> Duration {
        self.transaction_poll_interval
            .unwrap_or_else(|| Duration::from_secs(1))
    }

    /// See [Self::transaction_poll_interval]
    pub fn set_transaction_poll_interval(&mut self, transaction_poll_interval: Option<Duration>) {
        self.transaction_poll_interval = transaction_poll_interval;
    }

    /// Derive basic auth credentials from the gRPC URL.
    ///
    /// With `https://user.example.com/secret` the username is `user`, the
    /// password is `secret` and the connection goes to `user.example.com`
    /// port 9090 over TLS. Default: false
    pub fn basic_auth(&self) -> bool {
        self.basic_auth.unwrap_or(false)
    }

    /// See [Self::basic_auth]
    pub fn set_basic_auth(&mut self, basic_auth: Option<bool>) {
        self.basic_auth = basic_auth;
    }

    /// Referrer header sent to the server
    pub fn referer_header(&self) -> Option<&str> {
        self.referer_header.as_deref()
    }

    /// See [Self::referer_header]
    pub fn set_referer_header(&mut self, referer_header: Option<String>) {
        self.referer_header = referer_header;
    }

    /// Check all settings before connecting.
    pub fn validate(&self) -> Result<(), BuilderError> {
        if self.chain_id.is_empty() {
            return Err(BuilderError::EmptyChainId);
        }
        if self.grpc_url.is_empty() {
            return Err(BuilderError::EmptyGrpcUrl);
        }
        self.parsed_gas_price()?;
        let gas_adjustment = self.gas_adjustment();
        if !(gas_adjustment.is_finite() && gas_adjustment > 0.0) {
            return Err(BuilderError::InvalidGasAdjustment(gas_adjustment));
        }
        if self.max_batch_size() == 0 {
            return Err(BuilderError::ZeroBatchSize);
        }
        if self.timeout_height_offset() > 0 && self.timeout_height_interval().is_zero() {
            return Err(BuilderError::ZeroInterval {
                setting: "timeout height interval",
            });
        }
        if self.transaction_poll_interval().is_zero() {
            return Err(BuilderError::ZeroInterval {
                setting: "transaction poll interval",
            });
        }
        Ok(())
    }

    /// The gas price parsed into amount and denom.
    pub fn parsed_gas_price(&self) -> Result<GasPrice, BuilderError> {
        self.gas_price().parse()
    }

    /// Retry policy handed to the broadcaster.
    pub fn broadcast_config(&self) -> BroadcastConfig {
        BroadcastConfig {
            gas_adjustment: self.gas_adjustment(),
            max_retries: self.max_retries(),
            max_batch_size: self.max_batch_size(),
            min_split_size: self.min_split_size(),
            resync_on_mismatch: self.resync_on_mismatch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> CosmosBuilder {
        CosmosBuilder::new(
            "pacific-1",
            AddressHrp::from_static("sei"),
            "https://grpc.sei-apis.com",
        )
    }

    #[test]
    fn defaults() {
        let builder = builder();
        builder.validate().unwrap();
        let config = builder.broadcast_config();
        assert_eq!(config.gas_adjustment, 1.1);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.min_split_size, 2);
        assert!(config.resync_on_mismatch);
        assert_eq!(builder.timeout_height_offset(), 20);
        assert_eq!(builder.parsed_gas_price().unwrap().denom(), "usei");
    }

    #[test]
    fn validation_failures() {
        let mut b = builder();
        b.set_chain_id(String::new());
        assert!(matches!(b.validate(), Err(BuilderError::EmptyChainId)));

        let mut b = builder();
        b.set_grpc_url("");
        assert!(matches!(b.validate(), Err(BuilderError::EmptyGrpcUrl)));

        let mut b = builder();
        b.set_gas_price(Some("cheap".to_owned()));
        assert!(matches!(
            b.validate(),
            Err(BuilderError::InvalidGasPrice { .. })
        ));

        let mut b = builder();
        b.set_gas_adjustment(Some(0.0));
        assert!(matches!(
            b.validate(),
            Err(BuilderError::InvalidGasAdjustment(_))
        ));

        let mut b = builder();
        b.set_max_batch_size(Some(0));
        assert!(matches!(b.validate(), Err(BuilderError::ZeroBatchSize)));

        let mut b = builder();
        b.set_transaction_poll_interval(Some(Duration::ZERO));
        assert!(matches!(
            b.validate(),
            Err(BuilderError::ZeroInterval {
                setting: "transaction poll interval"
            })
        ));
    }

    #[test]
    fn zero_timeout_height_interval() {
        let mut b = builder();
        b.set_timeout_height_interval(Some(Duration::ZERO));
        assert!(matches!(
            b.validate(),
            Err(BuilderError::ZeroInterval {
                setting: "timeout height interval"
            })
        ));

        // Without a timeout height the task never runs
        b.set_timeout_height_offset(Some(0));
        b.validate().unwrap();
    }

    #[test]
    fn gas_estimate_multiplier() {
        let mut builder = builder();
        let config = builder.broadcast_config();
        assert_eq!(config.adjusted_gas(1234), 1357);
        builder.set_gas_adjustment(Some(4.2));
        assert_eq!(builder.broadcast_config().adjusted_gas(1234), 5182);
    }
}
