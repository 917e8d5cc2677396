use std::str::FromStr;

use anyhow::Context;
use cosmos_tx::Coin;

#[derive(PartialEq, Eq, Debug, Clone)]
pub(super) struct ParsedCoin {
    denom: String,
    amount: u128,
}

impl From<ParsedCoin> for Coin {
    fn from(ParsedCoin { denom, amount }: ParsedCoin) -> Self {
        Coin {
            denom,
            amount: amount.to_string(),
        }
    }
}

impl FromStr for ParsedCoin {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        (|| {
            anyhow::ensure!(!s.is_empty(), "Cannot parse empty string");
            let idx = s
                .find(|c: char| !c.is_ascii_digit())
                .context("All characters are ASCII digits")?;
            let (amount, denom) = s.split_at(idx);
            anyhow::ensure!(!amount.is_empty(), "Must not have an empty amount");
            anyhow::ensure!(is_valid_denom(denom), "Invalid denom {denom:?}");
            Ok(ParsedCoin {
                denom: denom.to_owned(),
                amount: amount.parse()?,
            })
        })()
        .with_context(|| format!("Could not parse coin value {s:?}"))
    }
}

/// Lowercase letter first, then lowercase letters, digits or `/` (IBC denoms).
fn is_valid_denom(denom: &str) -> bool {
    let mut chars = denom.chars();
    chars.next().map_or(false, |c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/')
}

/// Parse a comma separated list such as `100usei,5uatom`.
pub(super) fn parse_coins(s: &str) -> anyhow::Result<Vec<Coin>> {
    s.split(',')
        .map(|coin| coin.trim().parse::<ParsedCoin>().map(Coin::from))
        .collect()
}
