use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ledger-core")]
pub struct Opt {
    #[arg(
        long = "config",
        global = true,
        help = "TOML config file; LEDGER_* environment variables override it"
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(
        name = "createchain",
        about = "Create the genesis block and the configured allocations"
    )]
    Createchain,
    #[command(name = "getbalance", about = "Get the confirmed balance of an account")]
    GetBalance {
        #[arg(help = "The account address")]
        address: String,
    },
    #[command(name = "send", about = "Create a sealed transfer between accounts")]
    Send {
        #[arg(help = "Sender address")]
        from: String,
        #[arg(help = "Receiver address")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long = "fee", help = "Fee to pay; suggested from current load if omitted")]
        fee: Option<u64>,
        #[arg(long = "mine", help = "Mine a block with the transaction right away")]
        mine: bool,
    },
    #[command(name = "mine", about = "Mine one block on the current tip")]
    Mine,
    #[command(name = "printchain", about = "Print all blocks in the chain")]
    Printchain,
    #[command(
        name = "validate",
        about = "Check linkage, proof-of-work and replayed state of the whole chain"
    )]
    Validate,
    #[command(
        name = "estimatefee",
        about = "Suggest a fee for a transaction of the given size"
    )]
    EstimateFee {
        #[arg(help = "Transaction size in bytes")]
        size: usize,
    },
    #[command(name = "handle", about = "Process one JSON message and print the response")]
    Handle {
        #[arg(help = "Message such as {\"type\":\"chain_request\"}")]
        message: String,
    },
}
