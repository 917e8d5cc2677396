use std::{fmt::Display, str::FromStr};

use serde::de::Visitor;

use crate::{error::BuilderError, AddressHrp, Cosmos, CosmosBuilder};

/// A known network with default connection settings.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CosmosNetwork {
    /// Sei mainnet, `pacific-1`
    SeiMainnet,
    /// Sei testnet, `atlantic-2`
    SeiTestnet,
    /// A local wasmd node
    WasmdLocal,
}

impl CosmosNetwork {
    fn as_str(self) -> &'static str {
        match self {
            CosmosNetwork::SeiMainnet => "sei-mainnet",
            CosmosNetwork::SeiTestnet => "sei-testnet",
            CosmosNetwork::WasmdLocal => "wasmd-local",
        }
    }

    /// Builder with this network's defaults.
    pub fn builder(self) -> CosmosBuilder {
        match self {
            CosmosNetwork::SeiMainnet => CosmosBuilder::new(
                "pacific-1",
                AddressHrp::from_static("sei"),
                "https://grpc.sei-apis.com",
            ),
            CosmosNetwork::SeiTestnet => CosmosBuilder::new(
                "atlantic-2",
                AddressHrp::from_static("sei"),
                "https://test-sei-grpc.kingnodes.com",
            ),
            CosmosNetwork::WasmdLocal => {
                let mut builder = CosmosBuilder::new(
                    "localwasmd",
                    AddressHrp::from_static("wasm"),
                    "http://localhost:9090",
                );
                builder.set_gas_price(Some("0.025uwasm".to_owned()));
                builder
            }
        }
    }

    /// Connect using the default settings.
    pub async fn connect(self) -> Result<Cosmos, crate::Error> {
        self.builder().build().await
    }
}

impl Display for CosmosNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CosmosNetwork {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sei-mainnet" | "pacific-1" => Ok(CosmosNetwork::SeiMainnet),
            "sei-testnet" | "atlantic-2" => Ok(CosmosNetwork::SeiTestnet),
            "wasmd-local" => Ok(CosmosNetwork::WasmdLocal),
            _ => Err(BuilderError::UnknownNetwork(s.to_owned())),
        }
    }
}

impl serde::Serialize for CosmosNetwork {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for CosmosNetwork {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(CosmosNetworkVisitor)
    }
}

struct CosmosNetworkVisitor;

impl<'de> Visitor<'de> for CosmosNetworkVisitor {
    type Value = CosmosNetwork;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("CosmosNetwork")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        CosmosNetwork::from_str(v).map_err(E::custom)
    }
}
