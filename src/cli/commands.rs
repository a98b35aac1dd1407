use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledger-chain")]
pub struct Opt {
    #[arg(
        long = "config",
        global = true,
        help = "TOML file with node settings; environment variables override it"
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "createblockchain", about = "Create a new blockchain")]
    Createblockchain {
        #[arg(help = "The address to send genesis block reward to")]
        address: String,
    },
    #[command(name = "createwallet", about = "Create a new wallet")]
    Createwallet,
    #[command(
        name = "getbalance",
        about = "Get the wallet balance of the target address"
    )]
    GetBalance {
        #[arg(help = "The wallet address")]
        address: String,
    },
    #[command(name = "listaddresses", about = "Print local wallet addresses")]
    ListAddresses,
    #[command(name = "send", about = "Send transaction between addresses")]
    Send {
        #[arg(help = "Source wallet address")]
        from: String,
        #[arg(help = "Destination wallet address")]
        to: String,
        #[arg(help = "Amount to send (in satoshis)")]
        amount: u64,
        #[arg(long, help = "Mine immediately on the same node")]
        mine: bool,
    },
    #[command(name = "printchain", about = "Print all blocks in the blockchain")]
    Printchain,
    #[command(name = "reindexutxo", about = "Rebuild UTXO index set")]
    Reindexutxo,
    #[command(name = "startnode", about = "Start a blockchain node")]
    StartNode {
        #[arg(long, help = "Enable mining mode and send reward to ADDRESS")]
        miner: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_flags() {
        let opt = Opt::parse_from(["ledger-chain", "send", "a", "b", "10", "--mine"]);
        match opt.command {
            Command::Send {
                from,
                to,
                amount,
                mine,
            } => {
                assert_eq!((from.as_str(), to.as_str(), amount, mine), ("a", "b", 10, true));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(opt.config.is_none());
    }

    #[test]
    fn test_config_is_global() {
        let opt = Opt::parse_from(["ledger-chain", "printchain", "--config", "node.toml"]);
        assert_eq!(opt.config, Some(PathBuf::from("node.toml")));
        assert!(matches!(opt.command, Command::Printchain));
    }
}
