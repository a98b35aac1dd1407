// Entry point for the ledger CLI. Each subcommand opens what it needs from
// the node's data directory, does one thing and exits.
use clap::Parser;
use data_encoding::HEXLOWER;
use ledger_chain::core::monetary::conversions::format_coins;
use ledger_chain::{
    convert_address, decode_address, hash_pub_key, send_tx, validate_address, Blockchain,
    Command, Config, Opt, ProofOfWork, Server, Transaction, UtxoView, Wallets,
};
use log::{error, LevelFilter};
use std::process;

fn main() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    let config = match Config::load(opt.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_command(opt.command, config) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command, mut config: Config) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let blockchain = Blockchain::create_blockchain(&config, &address)?;
            let count = blockchain.utxo_set().count_entries()?;
            println!("Done! Genesis pays {address}; {count} unspent output indexed.");
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load(&config.wallet_path())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = decode_address(&address)?;
            let blockchain = Blockchain::open(&config)?;
            let balance = blockchain.utxo_set().balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance} ({} coins)", format_coins(balance));
        }
        Command::ListAddresses => {
            let wallets = Wallets::load(&config.wallet_path())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send {
            from,
            to,
            amount,
            mine,
        } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::load(&config.wallet_path())?;
            let wallet = wallets
                .get_wallet(&from)
                .ok_or_else(|| format!("No local wallet for {from}"))?;

            let blockchain = Blockchain::open(&config)?;
            let utxo_set = blockchain.utxo_set();
            let transaction = Transaction::new_utxo_transaction(wallet, &to, amount, &utxo_set)?;

            if mine {
                let block = blockchain.mine_block_with_reward(&[transaction], &from)?;
                println!("Mined block {}", HEXLOWER.encode(block.get_hash()));
            } else {
                send_tx(&config.node_addr, &config.central_node, &transaction)?;
                println!(
                    "Sent transaction {} to {}",
                    HEXLOWER.encode(transaction.get_id()),
                    config.central_node
                );
            }
            println!("Success!")
        }
        Command::Printchain => {
            let blockchain = Blockchain::open(&config)?;
            for block in blockchain.iterator() {
                let block = block?;
                println!("Height: {}", block.get_height());
                println!("Pre block hash: {}", HEXLOWER.encode(block.get_prev_hash()));
                println!("Cur block hash: {}", HEXLOWER.encode(block.get_hash()));
                println!("Cur block Timestamp: {}", block.get_timestamp());
                println!(
                    "Nonce: {} (difficulty {})",
                    block.get_nonce(),
                    block.get_difficulty()
                );
                println!("PoW: {}", ProofOfWork::validate(&block));

                for tx in block.get_transactions() {
                    println!("- Transaction txid_hex: {}", HEXLOWER.encode(tx.get_id()));
                    if !tx.is_coinbase() {
                        for input in tx.get_vin() {
                            let address = convert_address(&hash_pub_key(input.get_pub_key()));
                            println!(
                                "-- Input txid = {}, vout = {}, from = {address}",
                                HEXLOWER.encode(input.get_txid()),
                                input.get_vout(),
                            )
                        }
                    }
                    for output in tx.get_vout() {
                        let address = convert_address(output.get_pub_key_hash());
                        println!("-- Output value = {}, to = {address}", output.get_value())
                    }
                }
                println!()
            }
            match blockchain.verify_chain() {
                Ok(count) => println!("Chain of {count} blocks verified."),
                Err(e) => println!("Chain verification failed: {e}"),
            }
        }
        Command::Reindexutxo => {
            let blockchain = Blockchain::open(&config)?;
            let utxo_set = blockchain.utxo_set();
            let outputs = utxo_set.reindex()?;
            let count = utxo_set.count_transactions()?;
            println!(
                "Done! There are {count} transactions with {outputs} unspent outputs in the UTXO set."
            );
        }
        Command::StartNode { miner } => {
            if let Some(addr) = miner {
                if !validate_address(&addr) {
                    return Err(format!("Invalid miner address: {addr}").into());
                }
                config.mining_address = Some(addr);
            }
            if let Some(addr) = &config.mining_address {
                println!("Mining is on. Address to receive rewards: {addr}");
            }

            let blockchain = Blockchain::open(&config)?;
            let server = Server::new(blockchain, config);
            server.run()?
        }
    }
    Ok(())
}
