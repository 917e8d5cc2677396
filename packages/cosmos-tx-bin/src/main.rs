mod parsed_coin;

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use cosmos_tx::{
    convert_address, Address, AddressHrp, CosmosOpt, HasAddress, RawWallet, TxResponseExt,
    Wallet,
};
use tracing_subscriber::EnvFilter;

/// Command line tool for broadcasting to and querying CosmWasm chains
#[derive(clap::Parser)]
struct Cmd {
    #[clap(flatten)]
    opt: Opt,
    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(clap::Parser)]
struct Opt {
    #[clap(flatten)]
    network_opt: CosmosOpt,
    /// Turn on verbose output
    #[clap(long, short, global = true)]
    verbose: bool,
}

impl Opt {
    fn init_logger(&self) {
        let filter = if self.verbose {
            format!("{}=debug,cosmos_tx=debug,info", env!("CARGO_CRATE_NAME"))
        } else {
            "info".to_owned()
        };
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

#[derive(clap::Parser)]
struct TxOpt {
    /// Mnemonic phrase
    #[clap(long, env = "COSMOS_WALLET")]
    wallet: RawWallet,
    /// Wait for the transaction to land and print the result
    #[clap(long)]
    wait: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cmd::parse();
    cmd.opt.init_logger();

    cmd.subcommand.go(cmd.opt).await
}

#[derive(clap::Parser)]
enum Subcommand {
    /// Show config
    ShowConfig {},
    /// Print the latest block height
    LatestHeight {},
    /// Print the balance of a single denom
    Balance {
        /// Address to check
        address: Address,
        /// Denom, defaults to the gas denom
        #[clap(long)]
        denom: Option<String>,
    },
    /// Query contract
    QueryContract {
        /// Contract address
        address: Address,
        /// Query (in JSON)
        query: String,
    },
    /// Look up a raw value in the contract's storage
    RawQueryContract {
        /// Contract address
        address: Address,
        /// Key
        key: String,
    },
    /// Get contract metadata
    ContractInfo { contract: Address },
    /// Execute contract
    Execute {
        #[clap(flatten)]
        tx_opt: TxOpt,
        /// Contract address
        address: Address,
        /// Execute messages (JSON), all sent in one transaction
        #[clap(required = true)]
        msgs: Vec<String>,
        /// Funds for a single message. Example 100usei
        #[clap(long)]
        funds: Option<String>,
    },
    /// Instantiate contract, with the sender as admin
    Instantiate {
        #[clap(flatten)]
        tx_opt: TxOpt,
        /// Code to deploy
        code_id: u64,
        /// Label to display
        label: String,
        /// Instantiate message (JSON)
        msg: String,
        /// Funds. Example 100usei
        #[clap(long)]
        funds: Option<String>,
    },
    /// Send coins to the given address
    SendCoins {
        #[clap(flatten)]
        tx_opt: TxOpt,
        /// Destination address
        dest: Address,
        /// Coins to send, comma separated
        coins: String,
    },
    /// Wait for a transaction to land
    WaitTx {
        /// Transaction hash
        txhash: String,
    },
    /// List the transactions touching a contract within a height range
    ContractTxs {
        /// Contract address
        contract: Address,
        /// Exclusive lower height
        from: i64,
        /// Inclusive upper height
        to: i64,
    },
    /// Show the on-chain account number and sequence
    Sequence {
        /// Account address
        address: Address,
    },
    /// Generate wallet
    GenWallet {
        /// Human readable part, e.g. sei or wasm
        hrp: AddressHrp,
    },
    /// Print the address for the given phrase
    PrintAddress {
        /// Human readable part, e.g. sei or wasm
        hrp: AddressHrp,
        /// Phrase
        phrase: RawWallet,
    },
    /// Print the address for a different chain
    ChangeAddressType {
        /// Original address
        orig: String,
        /// Destination human readable part
        hrp: AddressHrp,
    },
}

impl Subcommand {
    pub(crate) async fn go(self, opt: Opt) -> Result<()> {
        match self {
            Subcommand::ShowConfig {} => {
                let builder = opt.network_opt.builder()?;
                println!("{builder:#?}");
                println!("{:#?}", builder.broadcast_config());
            }
            Subcommand::LatestHeight {} => {
                let cosmos = opt.network_opt.build().await?;
                let block = cosmos.get_latest_block_info().await?;
                println!("Chain ID: {}", block.chain_id);
                println!("Height: {}", block.height);
                println!("Timestamp: {}", block.timestamp);
            }
            Subcommand::Balance { address, denom } => {
                let cosmos = opt.network_opt.build().await?;
                let denom = match denom {
                    Some(denom) => denom,
                    None => cosmos.get_builder().parsed_gas_price()?.denom().to_owned(),
                };
                let coin = cosmos.bank_balance(address, &denom).await?;
                println!("{}{}", coin.amount, coin.denom);
            }
            Subcommand::QueryContract { address, query } => {
                let cosmos = opt.network_opt.build().await?;
                let x = cosmos.wasm_smart_query(address, query).await?;
                let stdout = std::io::stdout();
                let mut stdout = stdout.lock();
                stdout.write_all(&x)?;
                stdout.write_all(b"\n")?;
            }
            Subcommand::RawQueryContract { address, key } => {
                let cosmos = opt.network_opt.build().await?;
                let x = cosmos.wasm_raw_query(address, key).await?;
                let stdout = std::io::stdout();
                let mut stdout = stdout.lock();
                stdout.write_all(&x)?;
                stdout.write_all(b"\n")?;
            }
            Subcommand::ContractInfo { contract } => {
                let cosmos = opt.network_opt.build().await?;
                let info = cosmos.contract_info(contract).await?;
                println!("code_id: {}", info.code_id);
                println!("creator: {}", info.creator);
                println!("admin: {}", info.admin);
                println!("label: {}", info.label);
            }
            Subcommand::Execute {
                tx_opt,
                address,
                msgs,
                funds,
            } => {
                let cosmos = opt.network_opt.build().await?;
                let signer = add_signer(&cosmos, &tx_opt).await?;
                let txhash = if msgs.len() == 1 {
                    let funds = funds
                        .as_deref()
                        .map(parsed_coin::parse_coins)
                        .transpose()?
                        .unwrap_or_default();
                    let msg = msgs.into_iter().next().unwrap_or_default();
                    cosmos.execute(&signer, address, msg, funds).await?
                } else {
                    anyhow::ensure!(
                        funds.is_none(),
                        "Funds are only supported with a single message"
                    );
                    cosmos
                        .execute_batch(
                            &signer,
                            address,
                            msgs.into_iter().map(String::into_bytes).collect(),
                        )
                        .await?
                };
                report(&cosmos, &txhash, tx_opt.wait).await?;
            }
            Subcommand::Instantiate {
                tx_opt,
                code_id,
                label,
                msg,
                funds,
            } => {
                let cosmos = opt.network_opt.build().await?;
                let signer = add_signer(&cosmos, &tx_opt).await?;
                let funds = funds
                    .as_deref()
                    .map(parsed_coin::parse_coins)
                    .transpose()?
                    .unwrap_or_default();
                let txhash = cosmos
                    .instantiate(&signer, code_id, label, msg, funds)
                    .await?;
                println!("Transaction hash: {txhash}");
                let txres = cosmos.wait_for_transaction(&txhash).await?;
                for contract in txres.parse_instantiated_contracts()? {
                    println!("Contract: {contract}");
                }
            }
            Subcommand::SendCoins {
                tx_opt,
                dest,
                coins,
            } => {
                let cosmos = opt.network_opt.build().await?;
                let signer = add_signer(&cosmos, &tx_opt).await?;
                let txhash = cosmos
                    .send_coins(&signer, dest, parsed_coin::parse_coins(&coins)?)
                    .await?;
                report(&cosmos, &txhash, tx_opt.wait).await?;
            }
            Subcommand::WaitTx { txhash } => {
                let cosmos = opt.network_opt.build().await?;
                report(&cosmos, &txhash, true).await?;
            }
            Subcommand::ContractTxs { contract, from, to } => {
                let cosmos = opt.network_opt.build().await?;
                let count = cosmos
                    .handle_txs_by_height(contract, from, to, |txres| async move {
                        println!("{} {} code={}", txres.height, txres.txhash, txres.code);
                        Ok::<_, anyhow::Error>(())
                    })
                    .await?;
                tracing::info!("Found {count} transaction(s)");
            }
            Subcommand::Sequence { address } => {
                let cosmos = opt.network_opt.build().await?;
                let state = cosmos.account_info(address).await?;
                println!("Account number: {}", state.account_number);
                println!("Sequence: {}", state.sequence);
            }
            Subcommand::GenWallet { hrp } => {
                let (phrase, wallet) = Wallet::generate(hrp)?;
                println!("Mnemonic: {}", phrase.phrase());
                println!("Address: {wallet}");
            }
            Subcommand::PrintAddress { hrp, phrase } => {
                println!("{}", phrase.for_chain(hrp)?);
            }
            Subcommand::ChangeAddressType { orig, hrp } => {
                println!("{}", convert_address(&orig, hrp)?);
            }
        }

        Ok(())
    }
}

async fn add_signer(cosmos: &cosmos_tx::Cosmos, tx_opt: &TxOpt) -> Result<cosmos_tx::Signer> {
    let wallet = tx_opt.wallet.for_chain(cosmos.get_builder().hrp())?;
    tracing::debug!("Signing as {}", wallet.get_address());
    Ok(cosmos.add_signer_wallet("cli", wallet).await?)
}

async fn report(cosmos: &cosmos_tx::Cosmos, txhash: &str, wait: bool) -> Result<()> {
    println!("Transaction hash: {txhash}");
    if wait {
        let txres = cosmos.wait_for_transaction(txhash).await?;
        println!("Height: {}", txres.height);
        println!("Gas used: {}", txres.gas_used);
        if let Some(failed) = txres.failed_message_indexes() {
            println!("Failed messages: {failed}");
        }
        tracing::debug!("{txres:?}");
    }
    Ok(())
}
