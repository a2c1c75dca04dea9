// This is my main entry point for the ledger CLI
// Every command opens the node on its sled directory, does one thing and exits
use clap::Parser;
use ledger_core::{Command, LedgerConfig, Message, Node, Opt, Transaction};
use log::{error, LevelFilter};
use std::process;

fn main() {
    // Info level shows appends, rejections and persistence without the per-attempt noise
    env_logger::builder().filter_level(LevelFilter::Info).init();

    let opt = Opt::parse();

    if let Err(e) = run_command(opt) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(opt: Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &opt.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::from_env()?,
    };
    let node = Node::open(config)?;
    match opt.command {
        Command::Createchain => {
            let genesis = node.get_block_by_index(0)?;
            println!("Chain ready at height {}", node.chain().height());
            println!("Genesis hash: {}", genesis.get_hash());
        }
        Command::GetBalance { address } => {
            let balance = node.get_balance(&address);
            println!("Balance of {address}: {balance}");
        }
        Command::Send {
            from,
            to,
            amount,
            fee,
            mine,
        } => {
            let nonce = node.get_nonce(&from) + 1;
            let fee = match fee {
                Some(fee) => fee,
                None => {
                    // Size barely depends on the fee, so price a draft
                    let draft = Transaction::new(&from, &to, amount, 0, nonce)?;
                    node.suggest_fee(draft.serialized_size())
                }
            };
            let mut transaction = Transaction::new(&from, &to, amount, fee, nonce)?;
            transaction.seal();

            if mine {
                let id = node.submit_transaction(transaction)?;
                match node.mine_once()? {
                    Some(block) => println!(
                        "Transaction {id} confirmed in block {} ({})",
                        block.get_index(),
                        block.get_hash()
                    ),
                    None => println!("Mining cancelled, {id} is still pending"),
                }
            } else {
                // Hand the message to whoever relays it to the network
                println!("{}", Message::Transaction(transaction).to_json()?);
            }
        }
        Command::Mine => match node.mine_once()? {
            Some(block) => println!(
                "Mined block {} ({}) with {} transactions",
                block.get_index(),
                block.get_hash(),
                block.get_transactions().len()
            ),
            None => println!("Mining cancelled"),
        },
        Command::Printchain => {
            for block in node.chain().blocks() {
                println!("Block {}", block.get_index());
                println!("Prev hash: {}", block.get_previous_hash());
                println!("Hash: {}", block.get_hash());
                println!("Merkle root: {}", block.get_merkle_root());
                println!("Timestamp: {}", block.get_timestamp());
                println!("Nonce: {}", block.get_nonce());
                for tx in block.get_transactions() {
                    println!(
                        "- Transaction {}: {} -> {} amount {} fee {} nonce {}",
                        tx.get_id(),
                        tx.get_sender(),
                        tx.get_receiver(),
                        tx.get_amount(),
                        tx.get_fee(),
                        tx.get_nonce()
                    );
                }
                println!()
            }
        }
        Command::Validate => {
            node.chain().audit(node.get_difficulty())?;
            println!(
                "Chain of {} blocks is valid and its state replays exactly",
                node.chain().len()
            );
        }
        Command::EstimateFee { size } => {
            let fee = node.suggest_fee(size);
            println!("Suggested fee for {size} bytes: {fee}");
        }
        Command::Handle { message } => {
            let response = node.handle_message(&message);
            println!("{}", response.to_json()?);
            if !response.is_success() {
                return Err(response.message.into());
            }
        }
    }
    Ok(())
}
