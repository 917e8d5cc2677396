//! Fire many concurrent sends from one signer. Every broadcast should get a
//! distinct sequence number without any account sequence mismatch surfacing.

use clap::Parser;
use cosmos_tx::{Coin, CosmosOpt, HasAddress, RawWallet};
use tokio::task::JoinSet;

#[derive(clap::Parser)]
struct Opt {
    #[clap(flatten)]
    cosmos: CosmosOpt,
    #[clap(long, env = "COSMOS_WALLET")]
    wallet: RawWallet,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), cosmos_tx::Error> {
    let Opt { cosmos, wallet } = Opt::parse();
    let cosmos = cosmos.build().await?;
    let wallet = wallet.for_chain(cosmos.get_builder().hrp())?;
    let dest = wallet.get_address();
    let denom = cosmos.get_builder().parsed_gas_price()?.denom().to_owned();
    let signer = cosmos.add_signer_wallet("example", wallet).await?;

    let mut set = JoinSet::new();
    for amount in 1..10 {
        for _ in 0..5 {
            let cosmos = cosmos.clone();
            let signer = signer.clone();
            let coin = Coin {
                denom: denom.clone(),
                amount: amount.to_string(),
            };
            set.spawn(async move { cosmos.send_coins(&signer, dest, vec![coin]).await });
        }
    }

    while let Some(res) = set.join_next().await {
        match res {
            Ok(Ok(txhash)) => println!("Success: {txhash}"),
            Ok(Err(e)) => println!("Error: {e}"),
            Err(e) => println!("Panic: {e}"),
        }
    }

    cosmos.shutdown().await;
    Ok(())
}
