use std::{collections::HashMap, fmt::Display, sync::Arc};

use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    error::{Action, Error, ValidationError},
    factory::TxFactory,
    sequence::AccountState,
    Address, HasAddress, Wallet,
};

/// A named wallet together with its locally tracked sequence.
///
/// Cloning gives another handle to the same signer. All broadcasts for one
/// signer are serialized through its lock.
#[derive(Clone)]
pub struct Signer {
    inner: Arc<SignerInner>,
}

struct SignerInner {
    name: String,
    wallet: Wallet,
    state: Mutex<AccountState>,
}

impl Signer {
    pub(crate) fn new(name: String, wallet: Wallet, state: AccountState) -> Self {
        Signer {
            inner: Arc::new(SignerInner {
                name,
                wallet,
                state: Mutex::new(state),
            }),
        }
    }

    /// Name this signer was registered under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Signing wallet.
    pub fn wallet(&self) -> &Wallet {
        &self.inner.wallet
    }

    /// Address of the signing wallet.
    pub fn address(&self) -> Address {
        *self.inner.wallet.address()
    }

    /// Take the signer's lock. Held for the whole of a broadcast.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, AccountState> {
        self.inner.state.lock().await
    }

    /// Reserve the next sequence number.
    ///
    /// Waits for any in-flight broadcast for this signer to finish.
    pub async fn next_sequence(&self) -> u64 {
        self.lock().await.next_sequence()
    }

    /// Snapshot of the locally tracked account state.
    pub async fn current_state(&self) -> AccountState {
        *self.lock().await
    }
}

impl Display for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.inner.name, self.inner.wallet)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("name", &self.inner.name)
            .field("address", &self.address())
            .finish()
    }
}

impl HasAddress for Signer {
    fn get_address(&self) -> Address {
        self.address()
    }
}

/// Name to signer map shared by all clones of a client.
///
/// The map lock is never held across an await point.
#[derive(Default)]
pub(crate) struct SignerRegistry {
    signers: RwLock<HashMap<String, Signer>>,
}

impl SignerRegistry {
    /// Load the account from the chain and register a new signer.
    pub(crate) async fn register<F: TxFactory + ?Sized>(
        &self,
        factory: &F,
        name: &str,
        wallet: Wallet,
    ) -> Result<Signer, Error> {
        if name.is_empty() {
            return Err(ValidationError::EmptySignerName.into());
        }
        self.ensure_absent(name)?;

        let address = *wallet.address();
        let state = factory
            .account_info(address)
            .await
            .map_err(|e| e.with_action(Action::AddSigner(name.to_owned())))?;

        // Check again, another registration may have raced us during the query
        let mut guard = self.signers.write();
        if guard.contains_key(name) {
            return Err(ValidationError::DuplicateSigner {
                name: name.to_owned(),
            }
            .into());
        }
        let signer = Signer::new(name.to_owned(), wallet, state);
        guard.insert(name.to_owned(), signer.clone());
        tracing::info!(
            "Registered signer {name} for {address} with account number {} and sequence {}",
            state.account_number,
            state.sequence
        );
        Ok(signer)
    }

    fn ensure_absent(&self, name: &str) -> Result<(), ValidationError> {
        if self.signers.read().contains_key(name) {
            Err(ValidationError::DuplicateSigner {
                name: name.to_owned(),
            })
        } else {
            Ok(())
        }
    }

    pub(crate) fn get(&self, name: &str) -> Result<Signer, ValidationError> {
        self.signers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownSigner {
                name: name.to_owned(),
            })
    }

    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.signers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;

    use crate::{
        error::QueryError,
        factory::{BroadcastResponse, TxMeta},
        AddressHrp, TxBuilder,
    };

    use super::*;

    const PHRASE: &str = "notice oak worry limit wrap speak medal online prefer cluster roof addict wrist behave treat actual wasp year salad speed social layer crew genius";

    pub(crate) fn test_wallet() -> Wallet {
        Wallet::from_phrase(PHRASE, AddressHrp::from_static("sei")).unwrap()
    }

    struct AccountOnly {
        fail: bool,
    }

    #[tonic::async_trait]
    impl TxFactory for AccountOnly {
        async fn account_info(&self, _: Address) -> Result<AccountState, Error> {
            if self.fail {
                Err(Error::Query {
                    action: Action::Simulate,
                    source: QueryError::Tonic(tonic::Status::not_found("account not found")),
                })
            } else {
                Ok(AccountState {
                    account_number: 12,
                    sequence: 40,
                })
            }
        }

        async fn simulate(&self, _: &Signer, _: &TxBuilder, _: TxMeta) -> Result<u64, Error> {
            unreachable!()
        }

        async fn build_signed(
            &self,
            _: &Signer,
            _: &TxBuilder,
            _: TxMeta,
            _: u64,
        ) -> Result<Vec<u8>, Error> {
            unreachable!()
        }

        async fn broadcast_sync(
            &self,
            _: &Signer,
            _: Vec<u8>,
        ) -> Result<Option<BroadcastResponse>, Error> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = SignerRegistry::default();
        let signer = registry
            .register(&AccountOnly { fail: false }, "alice", test_wallet())
            .await
            .unwrap();
        assert_eq!(
            signer.current_state().await,
            AccountState {
                account_number: 12,
                sequence: 40
            }
        );
        assert_eq!(registry.get("alice").unwrap().address(), signer.address());
        assert_eq!(registry.names(), vec!["alice".to_owned()]);
    }

    #[tokio::test]
    async fn duplicate_and_unknown() {
        let registry = SignerRegistry::default();
        let factory = AccountOnly { fail: false };
        registry
            .register(&factory, "alice", test_wallet())
            .await
            .unwrap();
        let err = registry
            .register(&factory, "alice", test_wallet())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::DuplicateSigner { .. })
        ));
        assert_eq!(
            registry.get("bob").unwrap_err(),
            ValidationError::UnknownSigner {
                name: "bob".to_owned()
            }
        );
        let err = registry
            .register(&factory, "", test_wallet())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::EmptySignerName)
        ));
    }

    #[tokio::test]
    async fn failed_account_query_registers_nothing() {
        let registry = SignerRegistry::default();
        let err = registry
            .register(&AccountOnly { fail: true }, "alice", test_wallet())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Query {
                action: Action::AddSigner(_),
                ..
            }
        ));
        assert!(registry.get("alice").is_err());
    }

    #[tokio::test]
    async fn concurrent_reservations_are_unique() {
        let signer = Signer::new(
            "alice".to_owned(),
            test_wallet(),
            AccountState {
                account_number: 1,
                sequence: 100,
            },
        );
        let mut handles = vec![];
        for _ in 0..50 {
            let signer = signer.clone();
            handles.push(tokio::spawn(async move { signer.next_sequence().await }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen, (100..150).collect::<HashSet<_>>());
        assert_eq!(signer.current_state().await.sequence, 150);
    }
}
