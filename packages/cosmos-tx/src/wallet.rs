use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::hashes::{ripemd160, sha256, Hash};
use bitcoin::secp256k1::{All, Message, Secp256k1};
use bitcoin::util::bip32::{DerivationPath, ExtendedPrivKey, ExtendedPubKey};
use once_cell::sync::{Lazy, OnceCell};
use rand::Rng;

use crate::address::RawAddress;
use crate::error::WalletError;
use crate::{Address, AddressHrp, HasAddress};

/// Standard Cosmos derivation path for the first account.
static COSMOS_PATH: Lazy<Result<Arc<DerivationPath>, String>> = Lazy::new(|| {
    "m/44'/118'/0'/0/0"
        .parse()
        .map(Arc::new)
        .map_err(|e: bitcoin::util::bip32::Error| e.to_string())
});

/// A seed phrase for a wallet
#[derive(Clone)]
pub struct SeedPhrase {
    mnemonic: bip39::Mnemonic,
}

impl SeedPhrase {
    /// Generate a random 24 word phrase.
    pub fn random() -> Result<SeedPhrase, WalletError> {
        let mut rng = rand::thread_rng();
        let mut entropy: [u8; 32] = [0; 32];
        for b in &mut entropy {
            *b = rng.gen();
        }
        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| WalletError::InvalidPhrase(e.to_string()))?;
        Ok(SeedPhrase { mnemonic })
    }

    /// The words of this phrase, space separated.
    pub fn phrase(&self) -> String {
        self.mnemonic.to_string()
    }
}

impl From<bip39::Mnemonic> for SeedPhrase {
    fn from(mnemonic: bip39::Mnemonic) -> Self {
        SeedPhrase { mnemonic }
    }
}

impl FromStr for SeedPhrase {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mnemonic = bip39::Mnemonic::parse_normalized(s.trim())
            .map_err(|e| WalletError::InvalidPhrase(e.to_string()))?;
        Ok(SeedPhrase { mnemonic })
    }
}

/// A private key for a wallet, before a prefix has been chosen.
#[derive(Clone)]
pub struct RawWallet {
    seed_phrase: SeedPhrase,
    derivation_path: Option<Arc<DerivationPath>>,
}

impl FromStr for RawWallet {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RawWallet::from_phrase(s)
    }
}

impl RawWallet {
    /// Parse a mnemonic, optionally prefixed by a derivation path such as
    /// `m/44'/118'/0'/0/1 word word ...`.
    pub fn from_phrase(phrase: &str) -> Result<Self, WalletError> {
        let (derivation_path, phrase) = if phrase.starts_with("m/44") {
            match phrase.split_once(' ') {
                Some((path, phrase)) => {
                    let path = path
                        .parse()
                        .map_err(|e: bitcoin::util::bip32::Error| {
                            WalletError::Derivation(e.to_string())
                        })?;
                    (Some(Arc::new(path)), phrase)
                }
                None => (None, phrase),
            }
        } else {
            (None, phrase)
        };

        let seed_phrase = SeedPhrase::from_str(phrase)?;
        Ok(RawWallet {
            seed_phrase,
            derivation_path,
        })
    }

    /// Derive the signing key and address for the given prefix.
    pub fn for_chain(&self, hrp: AddressHrp) -> Result<Wallet, WalletError> {
        let secp = global_secp();
        let derivation_path = match &self.derivation_path {
            Some(path) => path.clone(),
            None => COSMOS_PATH.clone().map_err(WalletError::Derivation)?,
        };

        let root_private_key = ExtendedPrivKey::new_master(
            bitcoin::Network::Bitcoin,
            &self.seed_phrase.mnemonic.to_seed(""),
        )
        .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let privkey = root_private_key
            .derive_priv(secp, &*derivation_path)
            .map_err(|e| WalletError::Derivation(e.to_string()))?;
        let public_key = ExtendedPubKey::from_priv(secp, &privkey);

        let public_key_bytes = public_key.public_key.serialize();
        let raw_address = address_from_public_key(&public_key_bytes);
        let address = RawAddress::from(raw_address).with_hrp(hrp);

        Ok(Wallet {
            address,
            privkey,
            public_key_bytes,
        })
    }
}

/// A wallet capable of signing on a specific blockchain
#[derive(Clone)]
// Not deriving Copy since this is a pretty large data structure.
pub struct Wallet {
    address: Address,
    privkey: ExtendedPrivKey,
    public_key_bytes: [u8; 33],
}

fn global_secp() -> &'static Secp256k1<All> {
    static CELL: OnceCell<Secp256k1<All>> = OnceCell::new();
    CELL.get_or_init(Secp256k1::new)
}

impl Wallet {
    /// The bech32 address of this wallet.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Generate a random wallet, returning the phrase alongside it.
    pub fn generate(hrp: AddressHrp) -> Result<(SeedPhrase, Self), WalletError> {
        let seed_phrase = SeedPhrase::random()?;
        let wallet = RawWallet {
            seed_phrase: seed_phrase.clone(),
            derivation_path: None,
        }
        .for_chain(hrp)?;
        Ok((seed_phrase, wallet))
    }

    /// Parse a mnemonic and derive the wallet for the given prefix.
    pub fn from_phrase(phrase: &str, hrp: AddressHrp) -> Result<Self, WalletError> {
        RawWallet::from_phrase(phrase)?.for_chain(hrp)
    }

    /// Compressed secp256k1 public key.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    /// Sign the SHA-256 digest of the message, returning the compact 64 byte signature.
    pub fn sign_bytes(&self, msg: &[u8]) -> Result<Vec<u8>, WalletError> {
        let msg = sha256::Hash::hash(msg);
        let msg = Message::from_slice(msg.as_ref())
            .map_err(|e| WalletError::Signing(e.to_string()))?;
        let signature = global_secp().sign_ecdsa(&msg, &self.privkey.private_key);
        Ok(signature.serialize_compact().to_vec())
    }
}

fn address_from_public_key(public_key: &[u8]) -> [u8; 20] {
    let sha = sha256::Hash::hash(public_key);
    ripemd160::Hash::hash(sha.as_ref()).into_inner()
}

impl Display for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl HasAddress for Wallet {
    fn get_address(&self) -> Address {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "clip hire initial neck maid actor venue client foam budget lock catalog sweet steak waste crater broccoli pipe steak sister coyote moment obvious choose";
    const SEI: AddressHrp = AddressHrp::from_static("sei");

    #[test]
    fn deterministic_derivation() {
        let w1 = Wallet::from_phrase(PHRASE, SEI).unwrap();
        let w2 = Wallet::from_phrase(PHRASE, SEI).unwrap();
        assert_eq!(w1.address(), w2.address());
        assert_eq!(w1.address().hrp(), SEI);
        assert_eq!(w1.public_key_bytes().len(), 33);
    }

    #[test]
    fn prefix_only_changes_hrp() {
        let sei = Wallet::from_phrase(PHRASE, SEI).unwrap();
        let juno = Wallet::from_phrase(PHRASE, AddressHrp::from_static("juno")).unwrap();
        assert_eq!(sei.address().raw(), juno.address().raw());
        assert_eq!(
            crate::convert_address(&juno.to_string(), SEI).unwrap(),
            sei.to_string()
        );
    }

    #[test]
    fn explicit_path_changes_address() {
        let default = Wallet::from_phrase(PHRASE, SEI).unwrap();
        let other = Wallet::from_phrase(&format!("m/44'/118'/0'/0/1 {PHRASE}"), SEI).unwrap();
        assert_ne!(default.address(), other.address());
    }

    #[test]
    fn random_wallets_differ() {
        let (phrase1, w1) = Wallet::generate(SEI).unwrap();
        let (_, w2) = Wallet::generate(SEI).unwrap();
        assert_ne!(w1.address(), w2.address());
        assert_eq!(phrase1.phrase().split_whitespace().count(), 24);
        let again = Wallet::from_phrase(&phrase1.phrase(), SEI).unwrap();
        assert_eq!(again.address(), w1.address());
    }

    #[test]
    fn invalid_phrase() {
        assert!(matches!(
            Wallet::from_phrase("not a real phrase", SEI),
            Err(WalletError::InvalidPhrase(_))
        ));
    }

    #[test]
    fn signature_is_compact() {
        let wallet = Wallet::from_phrase(PHRASE, SEI).unwrap();
        assert_eq!(wallet.sign_bytes(b"hello").unwrap().len(), 64);
    }
}
