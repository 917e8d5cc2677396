//! Error types exposed by this package.

use std::{fmt::Display, sync::Arc, time::Duration};

use crate::{Address, AddressHrp};

/// Any error which can occur while talking to the chain or broadcasting.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Request rejected before any network call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Invalid client configuration.
    #[error(transparent)]
    Builder(#[from] BuilderError),
    /// Network or gRPC level failure.
    #[error("Error during {action}: {source}")]
    Query {
        /// What we were doing
        action: Action,
        /// Underlying cause
        source: QueryError,
    },
    /// The node accepted the request but reported a failure for the transaction.
    #[error("Transaction rejected during {action} with code {code} (txhash {txhash:?}). Raw log: {raw_log}")]
    Rejected {
        /// What we were doing
        action: Action,
        /// Hash reported by the node, possibly empty
        txhash: String,
        /// Error code reported by the node
        code: u32,
        /// Raw failure log reported by the node
        raw_log: String,
    },
    /// The node returned a response which doesn't match the expected shape.
    #[error("Unexpected response during {action}: {message}")]
    Protocol {
        /// What we were doing
        action: Action,
        /// Description of the violation
        message: String,
    },
    /// The caller cancelled the operation or its deadline passed.
    #[error("Cancelled during {action}")]
    Cancelled {
        /// What we were doing
        action: Action,
    },
    /// A transaction landed on chain with a non-zero code.
    #[error("Transaction {txhash} failed with code {code}. Raw log: {raw_log}")]
    TransactionFailed {
        /// Transaction hash
        txhash: String,
        /// Error code
        code: u32,
        /// Raw failure log
        raw_log: String,
    },
    /// The transaction never showed up while polling.
    #[error("Transaction {txhash} not found after {attempts} attempts")]
    TransactionNotFound {
        /// Transaction hash
        txhash: String,
        /// How many lookups were made
        attempts: usize,
    },
    /// Key material problems.
    #[error(transparent)]
    Wallet(#[from] WalletError),
    /// Invalid address string.
    #[error(transparent)]
    Address(#[from] AddressError),
    /// Serializing a contract message failed.
    #[error("Unable to serialize message to JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Re-tag the operation an error occurred during.
    pub(crate) fn with_action(self, action: Action) -> Self {
        match self {
            Error::Query { source, .. } => Error::Query { action, source },
            Error::Protocol { message, .. } => Error::Protocol { action, message },
            Error::Cancelled { .. } => Error::Cancelled { action },
            other => other,
        }
    }
}

/// Errors found by request validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Message payload was empty.
    #[error("message is empty")]
    EmptyMessage,
    /// No messages were provided.
    #[error("no messages provided")]
    EmptyBatch,
    /// More messages than allowed in a single call.
    #[error("too many messages: {count} exceeds the maximum of {max}")]
    TooManyMessages {
        /// Messages provided
        count: usize,
        /// Configured maximum
        max: usize,
    },
    /// Contract label was empty.
    #[error("label is empty")]
    EmptyLabel,
    /// Signer name was empty.
    #[error("signer name is empty")]
    EmptySignerName,
    /// A signer with this name already exists.
    #[error("signer {name} is already registered")]
    DuplicateSigner {
        /// Signer name
        name: String,
    },
    /// No signer with this name exists.
    #[error("unknown signer {name}")]
    UnknownSigner {
        /// Signer name
        name: String,
    },
}

/// Problems with the [crate::CosmosBuilder] settings.
#[derive(thiserror::Error, Debug, Clone)]
pub enum BuilderError {
    /// Chain ID missing.
    #[error("empty chain ID")]
    EmptyChainId,
    /// gRPC URL missing.
    #[error("empty gRPC URL")]
    EmptyGrpcUrl,
    /// Gas price could not be parsed.
    #[error("invalid gas price {gas_price:?}: {reason}")]
    InvalidGasPrice {
        /// Value provided
        gas_price: String,
        /// Why it failed
        reason: String,
    },
    /// Gas adjustment must be positive.
    #[error("gas adjustment must be positive, got {0}")]
    InvalidGasAdjustment(f64),
    /// Max batch size must be at least one.
    #[error("max batch size must be at least 1")]
    ZeroBatchSize,
    /// A periodic interval was set to zero.
    #[error("{setting} must be greater than zero")]
    ZeroInterval {
        /// Name of the setting
        setting: &'static str,
    },
    /// Unknown network name.
    #[error("unknown network {0:?}")]
    UnknownNetwork(String),
    /// The gRPC URL could not be parsed.
    #[error("invalid gRPC URL {grpc_url}: {source}")]
    InvalidGrpcUrl {
        /// URL provided
        grpc_url: Arc<String>,
        /// Parse failure
        source: Arc<tonic::transport::Error>,
    },
    /// TLS setup failed.
    #[error("unable to configure TLS for {grpc_url}: {source}")]
    TlsConfig {
        /// URL provided
        grpc_url: Arc<String>,
        /// Underlying failure
        source: Arc<tonic::transport::Error>,
    },
    /// The chain we connected to reported a different chain ID.
    #[error("mismatched chain IDs: connected to {actual}, expected {expected}")]
    MismatchedChainIds {
        /// Chain ID reported by the node
        actual: String,
        /// Configured chain ID
        expected: String,
    },
}

/// Failure of a single gRPC call.
#[derive(thiserror::Error, Debug, Clone)]
pub enum QueryError {
    /// Error status returned by the endpoint.
    #[error("gRPC status {code:?}: {message}", code = .0.code(), message = .0.message())]
    Tonic(tonic::Status),
    /// The query took too long.
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

impl QueryError {
    /// Textual message reported by the chain, used for failure classification.
    pub(crate) fn message(&self) -> &str {
        match self {
            QueryError::Tonic(status) => status.message(),
            QueryError::Timeout(_) => "",
        }
    }

    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            // Some nodes don't return NotFound, check the message as well
            QueryError::Tonic(status) => {
                status.code() == tonic::Code::NotFound || status.message().contains("not found")
            }
            QueryError::Timeout(_) => false,
        }
    }
}

/// Problems deriving or using key material.
#[derive(thiserror::Error, Debug, Clone)]
pub enum WalletError {
    /// Mnemonic could not be parsed.
    #[error("unable to parse mnemonic phrase: {0}")]
    InvalidPhrase(String),
    /// HD derivation failed.
    #[error("unable to derive key: {0}")]
    Derivation(String),
    /// Signing failed.
    #[error("unable to sign: {0}")]
    Signing(String),
}

/// Problems parsing addresses.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Not valid bech32.
    #[error("invalid bech32 address {address:?}: {reason}")]
    InvalidBech32 {
        /// Input
        address: String,
        /// Underlying cause
        reason: String,
    },
    /// Wrong payload length.
    #[error("invalid byte count {actual} in address {address:?}, need 20 or 32")]
    InvalidByteCount {
        /// Input
        address: String,
        /// Bytes found
        actual: usize,
    },
    /// HRP not usable.
    #[error("invalid address prefix {hrp:?}")]
    InvalidHrp {
        /// Prefix
        hrp: String,
    },
    /// Address has a different prefix than required.
    #[error("address {address} has prefix {actual}, expected {expected}")]
    WrongHrp {
        /// Input
        address: String,
        /// Actual prefix
        actual: AddressHrp,
        /// Expected prefix
        expected: AddressHrp,
    },
}

/// The operation which produced an error.
#[derive(Debug, Clone)]
pub enum Action {
    /// Loading account number and sequence
    QueryAccount(Address),
    /// Reloading the sequence after a mismatch
    Resync(Address),
    /// Simulating a transaction
    Simulate,
    /// Signing a transaction
    Sign(Address),
    /// Broadcasting a transaction
    Broadcast(Address),
    /// Looking up a transaction by hash
    GetTransaction(String),
    /// Waiting for a transaction to land
    WaitForTransaction(String),
    /// Loading the latest block
    GetLatestBlock,
    /// Bank balance query
    BankBalance(Address, String),
    /// Smart contract query
    SmartQuery(Address),
    /// Raw contract storage query
    RawQuery(Address),
    /// Contract metadata query
    ContractInfo(Address),
    /// Registering a new signer
    AddSigner(String),
    /// Searching a contract's transactions in a `(from, to]` height window
    SearchTransactions {
        /// Contract address
        contract: Address,
        /// Exclusive lower height
        from: i64,
        /// Inclusive upper height
        to: i64,
    },
}

impl Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::QueryAccount(address) => write!(f, "query account {address}"),
            Action::Resync(address) => write!(f, "resync sequence for {address}"),
            Action::Simulate => f.write_str("simulate transaction"),
            Action::Sign(address) => write!(f, "sign transaction for {address}"),
            Action::Broadcast(address) => write!(f, "broadcast transaction from {address}"),
            Action::GetTransaction(txhash) => write!(f, "get transaction {txhash}"),
            Action::WaitForTransaction(txhash) => write!(f, "wait for transaction {txhash}"),
            Action::GetLatestBlock => f.write_str("get latest block"),
            Action::BankBalance(address, denom) => {
                write!(f, "bank balance of {denom} for {address}")
            }
            Action::SmartQuery(address) => write!(f, "smart query on {address}"),
            Action::RawQuery(address) => write!(f, "raw query on {address}"),
            Action::ContractInfo(address) => write!(f, "contract info for {address}"),
            Action::AddSigner(name) => write!(f, "add signer {name}"),
            Action::SearchTransactions { contract, from, to } => {
                write!(f, "search transactions for {contract} in heights ({from}, {to}]")
            }
        }
    }
}

/// Classified reason a broadcast attempt failed.
///
/// The chain only reports these conditions as free text, so all string
/// matching happens in [FailureKind::classify].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The chain expected a different account sequence.
    SequenceMismatch {
        /// Sequence number the chain says it expected, if reported
        expected: Option<u64>,
    },
    /// The transaction requires more gas than the chain allows.
    GasExceeded,
    /// The node rejected the transaction for any other reason.
    Rejected,
    /// Network level failure.
    Transport,
    /// Local or protocol failure which can never succeed on retry.
    Other,
}

const SEQUENCE_MISMATCH_NEEDLES: [&str; 2] =
    ["account sequence mismatch", "incorrect account sequence"];
const GAS_EXCEEDED_NEEDLES: [&str; 2] = ["exceeds max gas", "exceeds block max gas"];

impl FailureKind {
    /// Classify an error received from the transaction factory.
    pub fn classify(err: &Error) -> FailureKind {
        let (text, fallback) = match err {
            Error::Query { source, .. } => (source.message(), FailureKind::Transport),
            Error::Rejected { raw_log, .. } => (raw_log.as_str(), FailureKind::Rejected),
            _ => return FailureKind::Other,
        };
        if SEQUENCE_MISMATCH_NEEDLES
            .iter()
            .any(|needle| text.contains(needle))
        {
            FailureKind::SequenceMismatch {
                expected: get_expected_sequence(text),
            }
        } else if GAS_EXCEEDED_NEEDLES.iter().any(|needle| text.contains(needle)) {
            FailureKind::GasExceeded
        } else {
            fallback
        }
    }
}

/// Returns the expected account sequence from an error message, if present
fn get_expected_sequence(message: &str) -> Option<u64> {
    message.lines().find_map(get_expected_sequence_single)
}

fn get_expected_sequence_single(message: &str) -> Option<u64> {
    let start = message.find("account sequence mismatch, expected ")?;
    let s = &message[start + "account sequence mismatch, expected ".len()..];
    let comma = s.find(',')?;
    s[..comma].trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tonic_err(message: &str) -> Error {
        Error::Query {
            action: Action::Simulate,
            source: QueryError::Tonic(tonic::Status::unknown(message)),
        }
    }

    fn rejected(raw_log: &str) -> Error {
        Error::Rejected {
            action: Action::Simulate,
            txhash: "ABCD".to_owned(),
            code: 32,
            raw_log: raw_log.to_owned(),
        }
    }

    #[test]
    fn get_expected_sequence_good() {
        assert_eq!(
            get_expected_sequence("account sequence mismatch, expected 5, got 0"),
            Some(5)
        );
        assert_eq!(
            get_expected_sequence("account sequence mismatch, expected 20000001, got 7"),
            Some(20000001)
        );
    }

    #[test]
    fn get_expected_sequence_extra_prelude() {
        assert_eq!(
            get_expected_sequence("blah blah blah\n\naccount sequence mismatch, expected 5, got 0"),
            Some(5)
        );
        assert_eq!(
            get_expected_sequence(
                "failed to execute message; account sequence mismatch, expected 2, got 7: incorrect account sequence"
            ),
            Some(2)
        );
    }

    #[test]
    fn get_expected_sequence_bad() {
        assert_eq!(get_expected_sequence("Totally different error message"), None);
        assert_eq!(
            get_expected_sequence("account sequence mismatch, expected XXXXX, got 7"),
            None
        );
    }

    #[test]
    fn classify_sequence_mismatch() {
        assert_eq!(
            FailureKind::classify(&tonic_err("account sequence mismatch, expected 9, got 4")),
            FailureKind::SequenceMismatch { expected: Some(9) }
        );
        assert_eq!(
            FailureKind::classify(&rejected("incorrect account sequence")),
            FailureKind::SequenceMismatch { expected: None }
        );
    }

    #[test]
    fn classify_gas_exceeded() {
        assert_eq!(
            FailureKind::classify(&tonic_err("tx gas limit 90000000 exceeds block max gas 50000000")),
            FailureKind::GasExceeded
        );
        assert_eq!(
            FailureKind::classify(&rejected("exceeds max gas")),
            FailureKind::GasExceeded
        );
    }

    #[test]
    fn classify_fallbacks() {
        assert_eq!(
            FailureKind::classify(&tonic_err("connection reset")),
            FailureKind::Transport
        );
        assert_eq!(
            FailureKind::classify(&rejected("insufficient fees")),
            FailureKind::Rejected
        );
        assert_eq!(
            FailureKind::classify(&Error::Protocol {
                action: Action::Simulate,
                message: "account sequence mismatch".to_owned()
            }),
            FailureKind::Other
        );
        assert_eq!(
            FailureKind::classify(&Error::Query {
                action: Action::Simulate,
                source: QueryError::Timeout(Duration::from_secs(5)),
            }),
            FailureKind::Transport
        );
    }
}
