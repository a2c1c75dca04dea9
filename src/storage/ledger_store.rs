// Persistence for the chain: blocks keyed by big-endian index so sled's
// ordered iteration returns them in chain order, plus one state snapshot

use crate::core::{Block, StateSnapshot};
use crate::error::{LedgerError, Result};
use crate::utils::{deserialize, serialize};
use log::{debug, info};
use sled::{Batch, Db, Tree};
use std::path::Path;

const BLOCKS_TREE: &str = "blocks";
const META_TREE: &str = "meta";
const SNAPSHOT_KEY: &str = "state_snapshot";

pub struct LedgerStore {
    db: Db,
}

impl LedgerStore {
    pub fn open(path: &Path) -> Result<LedgerStore> {
        let db = sled::open(path)
            .map_err(|e| LedgerError::Database(format!("Failed to open database: {e}")))?;
        info!("Opened ledger store at {}", path.display());
        Ok(LedgerStore { db })
    }

    fn blocks_tree(&self) -> Result<Tree> {
        self.db
            .open_tree(BLOCKS_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open blocks tree: {e}")))
    }

    fn meta_tree(&self) -> Result<Tree> {
        self.db
            .open_tree(META_TREE)
            .map_err(|e| LedgerError::Database(format!("Failed to open meta tree: {e}")))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.blocks_tree()?.is_empty())
    }

    /// Replace the stored chain with `blocks` in one atomic batch.
    ///
    /// Only blocks past the longest prefix already on disk are written, so an
    /// append costs one insert. Returns how many blocks were written.
    pub fn put_chain(&self, blocks: &[Block]) -> Result<usize> {
        let tree = self.blocks_tree()?;
        let stored_len = match tree.last()? {
            Some((key, _)) => index_from_key(&key)? + 1,
            None => 0,
        };
        let new_len = blocks.len() as u64;

        // Blocks commit to their parent's hash, so one matching hash means
        // everything below it matches too
        let mut common = stored_len.min(new_len);
        while common > 0 {
            let index = common - 1;
            let matches = match tree.get(block_key(index))? {
                Some(bytes) => {
                    Block::deserialize(&bytes)?.get_hash() == blocks[index as usize].get_hash()
                }
                None => false,
            };
            if matches {
                break;
            }
            common -= 1;
        }

        let mut batch = Batch::default();
        for block in &blocks[common as usize..] {
            batch.insert(block_key(block.get_index()), block.serialize()?);
        }
        for index in new_len..stored_len {
            batch.remove(block_key(index));
        }
        tree.apply_batch(batch)?;

        let written = blocks.len() - common as usize;
        debug!(
            "Stored {written} of {} blocks, removed {}",
            blocks.len(),
            stored_len.saturating_sub(new_len)
        );
        Ok(written)
    }

    /// Blocks in index order
    pub fn load_blocks(&self) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for item in self.blocks_tree()?.iter() {
            let (key, value) = item?;
            let block = Block::deserialize(&value)?;
            if index_from_key(&key)? != block.get_index() {
                return Err(LedgerError::Database(format!(
                    "Block {} stored under the wrong key",
                    block.get_index()
                )));
            }
            blocks.push(block);
        }
        Ok(blocks)
    }

    pub fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.meta_tree()?.insert(SNAPSHOT_KEY, serialize(snapshot)?)?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<StateSnapshot>> {
        match self.meta_tree()?.get(SNAPSHOT_KEY)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Store blocks and the matching snapshot, then flush to disk
    pub fn persist(&self, blocks: &[Block], snapshot: &StateSnapshot) -> Result<()> {
        self.put_chain(blocks)?;
        self.save_snapshot(snapshot)?;
        self.flush()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn block_key(index: u64) -> Vec<u8> {
    index.to_be_bytes().to_vec()
}

fn index_from_key(key: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = key
        .try_into()
        .map_err(|_| LedgerError::Database(format!("Malformed block key of {} bytes", key.len())))?;
    Ok(u64::from_be_bytes(bytes))
}
