//! Static gas price in the `<amount><denom>` form used by the SDK, e.g. `0.1usei`.

use std::{fmt::Display, str::FromStr};

use cosmos_sdk_proto::cosmos::base::v1beta1::Coin;

use crate::error::BuilderError;

/// Price paid per unit of gas.
#[derive(Clone, Debug, PartialEq)]
pub struct GasPrice {
    amount: f64,
    denom: String,
}

impl GasPrice {
    /// Price per unit of gas.
    pub fn amount(&self) -> f64 {
        self.amount
    }

    /// Fee denomination.
    pub fn denom(&self) -> &str {
        &self.denom
    }

    /// Fee charged for the given gas limit, rounded up to a whole unit.
    pub fn fee_for(&self, gas_limit: u64) -> Coin {
        let amount = (gas_limit as f64 * self.amount).ceil() as u128;
        Coin {
            denom: self.denom.clone(),
            amount: amount.to_string(),
        }
    }
}

impl Display for GasPrice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for GasPrice {
    type Err = BuilderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| BuilderError::InvalidGasPrice {
            gas_price: s.to_owned(),
            reason: reason.to_owned(),
        };
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| invalid("missing denom"))?;
        let (amount, denom) = s.split_at(split);
        if amount.is_empty() {
            return Err(invalid("missing amount"));
        }
        let amount: f64 = amount.parse().map_err(|_| invalid("amount is not a number"))?;
        if !amount.is_finite() || amount < 0.0 {
            return Err(invalid("amount must be non-negative"));
        }
        if !denom
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '/' || c == '-' || c == '.' || c == '_')
        {
            return Err(invalid("denom contains invalid characters"));
        }
        Ok(GasPrice {
            amount,
            denom: denom.to_owned(),
        })
    }
}
