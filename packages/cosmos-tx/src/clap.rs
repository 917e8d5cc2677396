use crate::{error::BuilderError, Cosmos, CosmosBuilder, CosmosNetwork};

/// Command line options for connecting to a Cosmos network
#[derive(clap::Parser, Clone, Debug)]
pub struct CosmosOpt {
    /// Which network to connect to
    #[clap(long, env = "COSMOS_NETWORK", global = true, default_value_t = CosmosNetwork::SeiMainnet)]
    pub network: CosmosNetwork,
    /// Optional gRPC endpoint override
    #[clap(long, env = "COSMOS_GRPC", global = true)]
    pub cosmos_grpc: Option<String>,
    /// Optional chain ID override
    #[clap(long, env = "COSMOS_CHAIN_ID", global = true)]
    pub chain_id: Option<String>,
    /// Optional gas price override, e.g. 0.1usei
    #[clap(long, env = "COSMOS_GAS_PRICE", global = true)]
    pub gas_price: Option<String>,
    /// Optional gas adjustment override
    #[clap(long, env = "COSMOS_GAS_ADJUSTMENT", global = true)]
    pub gas_adjustment: Option<f64>,
    /// Derive basic auth credentials from the gRPC URL
    #[clap(long, env = "COSMOS_BASIC_AUTH", global = true)]
    pub basic_auth: bool,
    /// Referer header
    #[clap(long, short, global = true, env = "COSMOS_REFERER_HEADER")]
    referer_header: Option<String>,
}

impl CosmosOpt {
    /// Builder from these options, validated.
    pub fn builder(&self) -> Result<CosmosBuilder, BuilderError> {
        self.clone().into_builder()
    }

    /// Like [Self::builder], consuming the options.
    pub fn into_builder(self) -> Result<CosmosBuilder, BuilderError> {
        let CosmosOpt {
            network,
            cosmos_grpc,
            chain_id,
            gas_price,
            gas_adjustment,
            basic_auth,
            referer_header,
        } = self;

        let mut builder = network.builder();
        if let Some(grpc) = cosmos_grpc {
            builder.set_grpc_url(grpc);
        }
        if let Some(chain_id) = chain_id {
            builder.set_chain_id(chain_id);
        }
        if gas_price.is_some() {
            builder.set_gas_price(gas_price);
        }
        builder.set_gas_adjustment(gas_adjustment);
        builder.set_basic_auth(Some(basic_auth));
        builder.set_referer_header(referer_header);
        builder.validate()?;

        Ok(builder)
    }

    /// Connect using these options.
    pub async fn build(&self) -> Result<Cosmos, crate::Error> {
        self.builder()?.build().await
    }
}
