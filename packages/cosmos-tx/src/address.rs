use std::{
    collections::HashSet,
    fmt::{Debug, Display},
    str::FromStr,
};

use bech32::{FromBase32, ToBase32};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::de::Visitor;

use crate::error::AddressError;

/// A raw address value not connected to a specific blockchain. You usually want [Address].
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum RawAddress {
    /// 20-byte address, used by regular accounts
    Twenty {
        /// Raw bytes
        raw_address: [u8; 20],
    },
    /// 32-byte address, used by contracts
    ThirtyTwo {
        /// Raw bytes
        raw_address: [u8; 32],
    },
}

/// The human-readable part (HRP) of a bech32 address, e.g. `sei`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddressHrp(&'static str);

impl AddressHrp {
    /// Use a compile-time known prefix.
    ///
    /// The caller is responsible for only passing in lowercase ASCII.
    pub const fn from_static(hrp: &'static str) -> Self {
        AddressHrp(hrp)
    }

    /// Validate and intern a prefix.
    pub fn from_string(hrp: &str) -> Result<Self, AddressError> {
        if hrp.is_empty()
            || !hrp
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(AddressError::InvalidHrp {
                hrp: hrp.to_owned(),
            });
        }

        // Interned so that Address can stay Copy.
        static INTERNED: Lazy<Mutex<HashSet<&'static str>>> =
            Lazy::new(|| Mutex::new(HashSet::new()));
        let mut guard = INTERNED.lock();
        let interned = match guard.get(hrp) {
            Some(s) => *s,
            None => {
                let leaked: &'static str = Box::leak(hrp.to_owned().into_boxed_str());
                guard.insert(leaked);
                leaked
            }
        };
        Ok(AddressHrp(interned))
    }

    /// The prefix as a string slice.
    pub fn as_str(self) -> &'static str {
        self.0
    }
}

impl Display for AddressHrp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl Debug for AddressHrp {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for AddressHrp {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AddressHrp::from_string(s)
    }
}

/// Parse a raw address and its HRP from a string. Supports any Cosmos-compatible blockchain.
pub fn parse_raw_address(s: &str) -> Result<(AddressHrp, RawAddress), AddressError> {
    let invalid = |reason: String| AddressError::InvalidBech32 {
        address: s.to_owned(),
        reason,
    };
    let (hrp, data, variant) = bech32::decode(s).map_err(|e| invalid(e.to_string()))?;
    match variant {
        bech32::Variant::Bech32 => (),
        bech32::Variant::Bech32m => return Err(invalid("must use Bech32 variant".to_owned())),
    }
    let data = Vec::<u8>::from_base32(&data).map_err(|e| invalid(e.to_string()))?;
    let raw_address =
        RawAddress::try_from(data.as_slice()).map_err(|_| AddressError::InvalidByteCount {
            address: s.to_owned(),
            actual: data.len(),
        })?;
    Ok((AddressHrp::from_string(&hrp)?, raw_address))
}

/// Is this a valid bech32 address using the given prefix?
pub fn is_valid_address(s: &str, hrp: AddressHrp) -> bool {
    matches!(parse_raw_address(s), Ok((actual, _)) if actual == hrp)
}

/// Re-encode an address with a different prefix.
pub fn convert_address(s: &str, hrp: AddressHrp) -> Result<String, AddressError> {
    let (_, raw_address) = parse_raw_address(s)?;
    Ok(raw_address.with_hrp(hrp).to_string())
}

impl AsRef<[u8]> for RawAddress {
    fn as_ref(&self) -> &[u8] {
        match self {
            RawAddress::Twenty { raw_address } => raw_address,
            RawAddress::ThirtyTwo { raw_address } => raw_address,
        }
    }
}

impl From<[u8; 20]> for RawAddress {
    fn from(raw_address: [u8; 20]) -> Self {
        RawAddress::Twenty { raw_address }
    }
}

impl From<[u8; 32]> for RawAddress {
    fn from(raw_address: [u8; 32]) -> Self {
        RawAddress::ThirtyTwo { raw_address }
    }
}

impl TryFrom<&[u8]> for RawAddress {
    type Error = usize;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if let Ok(raw_address) = <[u8; 20]>::try_from(value) {
            Ok(RawAddress::Twenty { raw_address })
        } else if let Ok(raw_address) = <[u8; 32]>::try_from(value) {
            Ok(RawAddress::ThirtyTwo { raw_address })
        } else {
            Err(value.len())
        }
    }
}

impl RawAddress {
    /// Attach a prefix to this raw address.
    pub fn with_hrp(self, hrp: AddressHrp) -> Address {
        Address {
            raw_address: self,
            hrp,
        }
    }
}

/// An address on a Cosmos blockchain
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    raw_address: RawAddress,
    hrp: AddressHrp,
}

impl Address {
    /// The underlying bytes.
    pub fn raw(&self) -> &RawAddress {
        &self.raw_address
    }

    /// The prefix of this address.
    pub fn hrp(&self) -> AddressHrp {
        self.hrp
    }
}

impl Display for Address {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        // HRPs are validated on construction, so encoding only fails on a
        // formatter error.
        bech32::encode_to_fmt(
            fmt,
            self.hrp.as_str(),
            self.raw_address.to_base32(),
            bech32::Variant::Bech32,
        )
        .unwrap_or(Err(std::fmt::Error))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, raw_address) = parse_raw_address(s)?;
        Ok(Address { raw_address, hrp })
    }
}

/// Anything which has an on-chain address.
pub trait HasAddress {
    /// The address
    fn get_address(&self) -> Address;

    /// The address rendered as bech32
    fn get_address_string(&self) -> String {
        self.get_address().to_string()
    }
}

impl HasAddress for Address {
    fn get_address(&self) -> Address {
        *self
    }
}

impl<T: HasAddress> HasAddress for &T {
    fn get_address(&self) -> Address {
        HasAddress::get_address(*self)
    }
}

impl serde::Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_str(AddressVisitor)
    }
}

struct AddressVisitor;

impl<'de> Visitor<'de> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("Cosmos address")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(E::custom)
    }
}
