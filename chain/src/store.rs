// Copyright 2018 The Cinder Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Implements storage primitives required by the chain: block and header
//! records behind the storage traits, and the unspent-set store with its
//! exclusive transactional cursor.

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::transaction::{OutPoint, TxOutput};
use crate::core::core::{ChainedHeader, Transaction};
use crate::error::{Error, ErrorKind};
use crate::types::{
	BlockStorage, BlockTx, BlockTxesStorage, SpentTx, Tip, UnmintedTx, UnspentTx,
};
use cinder_store::{to_key, to_key_u64, u64_to_key, Batch, Store};

const CHAINED_HEADER_PREFIX: u8 = b'h';
const INVALID_BLOCK_PREFIX: u8 = b'i';
const BLOCK_TXS_PREFIX: u8 = b'b';
const UNSPENT_TX_PREFIX: u8 = b'u';
const UNSPENT_OUTPUT_PREFIX: u8 = b'o';
const BLOCK_SPENT_TXS_PREFIX: u8 = b's';
const BLOCK_UNMINTED_TXS_PREFIX: u8 = b'm';
const COUNTER_PREFIX: u8 = b'c';
const TIP_PREFIX: u8 = b'T';

/// Number of transactions with at least one unspent output.
pub const UNSPENT_TX_COUNT: &str = "unspent_tx_count";
/// Number of outputs not yet spent.
pub const UNSPENT_OUTPUT_COUNT: &str = "unspent_output_count";
/// Number of transactions ever connected, genesis excluded.
pub const TOTAL_TX_COUNT: &str = "total_tx_count";
/// Number of inputs ever spent.
pub const TOTAL_INPUT_COUNT: &str = "total_input_count";
/// Number of outputs ever minted.
pub const TOTAL_OUTPUT_COUNT: &str = "total_output_count";
/// Next height the pruning engine will consider.
pub const PRUNED_HEIGHT: &str = "pruned_height";

fn header_key(hash: &Hash) -> Vec<u8> {
	to_key(CHAINED_HEADER_PREFIX, &mut hash.to_vec())
}

fn invalid_key(hash: &Hash) -> Vec<u8> {
	to_key(INVALID_BLOCK_PREFIX, &mut hash.to_vec())
}

fn block_txs_key(hash: &Hash) -> Vec<u8> {
	to_key(BLOCK_TXS_PREFIX, &mut hash.to_vec())
}

fn unspent_tx_key(hash: &Hash) -> Vec<u8> {
	to_key(UNSPENT_TX_PREFIX, &mut hash.to_vec())
}

fn unspent_output_key(outpoint: &OutPoint) -> Vec<u8> {
	to_key_u64(
		UNSPENT_OUTPUT_PREFIX,
		&mut outpoint.tx_hash.to_vec(),
		outpoint.index as u64,
	)
}

fn counter_key(name: &str) -> Vec<u8> {
	to_key(COUNTER_PREFIX, &mut name.as_bytes().to_vec())
}

/// An implementation of the block storage traits backed by the simple
/// key-value store.
pub struct ChainKVStore {
	db: Store,
}

impl ChainKVStore {
	/// Wraps the given key-value store.
	pub fn new(db: Store) -> ChainKVStore {
		ChainKVStore { db }
	}
}

impl BlockStorage for ChainKVStore {
	fn try_add_chained_header(&self, header: &ChainedHeader) -> Result<bool, Error> {
		let key = header_key(&header.hash());
		if self.db.exists(&key)? {
			return Ok(false);
		}
		let mut batch = self.db.batch()?;
		batch.put_ser(&key, header)?;
		batch.commit()?;
		Ok(true)
	}

	fn try_get_chained_header(&self, hash: &Hash) -> Result<Option<ChainedHeader>, Error> {
		Ok(self.db.get_ser(&header_key(hash))?)
	}

	fn read_chained_headers(&self) -> Result<Vec<ChainedHeader>, Error> {
		let prefix = to_key(CHAINED_HEADER_PREFIX, &mut vec![]);
		let headers = self
			.db
			.iter::<ChainedHeader>(&prefix)?
			.map(|(_, h)| h)
			.collect();
		Ok(headers)
	}

	fn find_max_total_work(&self) -> Result<Option<ChainedHeader>, Error> {
		let mut best: Option<ChainedHeader> = None;
		for header in self.read_chained_headers()? {
			if self.is_block_invalid(&header.hash())? {
				continue;
			}
			best = match best {
				None => Some(header),
				Some(b) => {
					if header.total_work > b.total_work
						|| (header.total_work == b.total_work && header.hash() < b.hash())
					{
						Some(header)
					} else {
						Some(b)
					}
				}
			};
		}
		Ok(best)
	}

	fn mark_block_invalid(&self, hash: &Hash) -> Result<(), Error> {
		let mut batch = self.db.batch()?;
		batch.put_ser(&invalid_key(hash), &1u8)?;
		batch.commit()?;
		Ok(())
	}

	fn is_block_invalid(&self, hash: &Hash) -> Result<bool, Error> {
		Ok(self.db.exists(&invalid_key(hash))?)
	}
}

impl BlockTxesStorage for ChainKVStore {
	fn try_add_block_transactions(
		&self,
		block_hash: Hash,
		transactions: &[Transaction],
	) -> Result<bool, Error> {
		let key = block_txs_key(&block_hash);
		if self.db.exists(&key)? {
			return Ok(false);
		}
		let slots: Vec<BlockTx> = transactions
			.iter()
			.map(|tx| BlockTx::Full(tx.clone()))
			.collect();
		let mut batch = self.db.batch()?;
		batch.put_ser(&key, &slots)?;
		batch.commit()?;
		Ok(true)
	}

	fn try_read_block_transactions(
		&self,
		block_hash: &Hash,
	) -> Result<Option<Vec<BlockTx>>, Error> {
		Ok(self.db.get_ser(&block_txs_key(block_hash))?)
	}

	fn contains_block(&self, block_hash: &Hash) -> Result<bool, Error> {
		Ok(self.db.exists(&block_txs_key(block_hash))?)
	}

	fn try_get_transaction(
		&self,
		block_hash: &Hash,
		tx_index: u32,
	) -> Result<Option<BlockTx>, Error> {
		let slots: Option<Vec<BlockTx>> = self.db.get_ser(&block_txs_key(block_hash))?;
		Ok(slots.and_then(|s| s.get(tx_index as usize).cloned()))
	}

	fn try_prune_block_transactions(
		&self,
		block_hash: &Hash,
		tx_indices: &[u32],
	) -> Result<bool, Error> {
		let key = block_txs_key(block_hash);
		let slots: Option<Vec<BlockTx>> = self.db.get_ser(&key)?;
		let mut slots = match slots {
			Some(s) => s,
			None => return Ok(false),
		};
		for index in tx_indices {
			if let Some(slot) = slots.get_mut(*index as usize) {
				*slot = BlockTx::Pruned;
			}
		}
		let mut batch = self.db.batch()?;
		batch.put_ser(&key, &slots)?;
		batch.commit()?;
		Ok(true)
	}

	fn try_remove_block_transactions(&self, block_hash: &Hash) -> Result<bool, Error> {
		let key = block_txs_key(block_hash);
		if !self.db.exists(&key)? {
			return Ok(false);
		}
		let mut batch = self.db.batch()?;
		batch.delete(&key)?;
		batch.commit()?;
		Ok(true)
	}

	fn block_count(&self) -> Result<u64, Error> {
		let prefix = to_key(BLOCK_TXS_PREFIX, &mut vec![]);
		Ok(self.db.iter::<Vec<BlockTx>>(&prefix)?.count() as u64)
	}
}

/// Read access to the unspent set and its indices, reflecting the last
/// committed state. All mutations go through a cursor.
#[derive(Clone)]
pub struct UtxoStore {
	db: Store,
}

impl UtxoStore {
	/// Wraps the given key-value store.
	pub fn new(db: Store) -> UtxoStore {
		UtxoStore { db }
	}

	/// Builds a cursor over this store. The cursor claims the store's
	/// single write transaction lazily, on its first operation.
	pub fn cursor(&self) -> UtxoCursor {
		UtxoCursor {
			db: self.db.clone(),
			batch: None,
		}
	}

	/// Reads an unspent-transaction record from the committed state.
	pub fn try_get_unspent_tx(&self, tx_hash: &Hash) -> Result<Option<UnspentTx>, Error> {
		Ok(self.db.get_ser(&unspent_tx_key(tx_hash))?)
	}

	/// Reads an unspent output from the committed state.
	pub fn try_get_unspent_output(&self, outpoint: &OutPoint) -> Result<Option<TxOutput>, Error> {
		Ok(self.db.get_ser(&unspent_output_key(outpoint))?)
	}

	/// Reads the rollback records stored when the block at this height was
	/// connected.
	pub fn try_get_unminted_txs(&self, height: u64) -> Result<Option<Vec<UnmintedTx>>, Error> {
		Ok(self
			.db
			.get_ser(&u64_to_key(BLOCK_UNMINTED_TXS_PREFIX, height))?)
	}

	/// Reads the fully-spent summaries recorded against this height.
	pub fn try_get_block_spent_txs(&self, height: u64) -> Result<Option<Vec<SpentTx>>, Error> {
		Ok(self.db.get_ser(&u64_to_key(BLOCK_SPENT_TXS_PREFIX, height))?)
	}

	/// Reads a named counter from the committed state, zero when unset.
	pub fn counter(&self, name: &str) -> Result<u64, Error> {
		Ok(self.db.get_ser(&counter_key(name))?.unwrap_or(0))
	}

	/// The tip of the validated chain, None before the genesis block has
	/// been applied.
	pub fn validated_tip(&self) -> Result<Option<Tip>, Error> {
		Ok(self.db.get_ser(&[TIP_PREFIX])?)
	}
}

/// An owned exclusive transaction on the unspent-set store. All mutations
/// performed through the cursor are observed atomically by other readers
/// after commit, and not at all after rollback; dropping the cursor without
/// committing rolls back.
pub struct UtxoCursor {
	db: Store,
	batch: Option<Batch>,
}

impl UtxoCursor {
	fn batch(&mut self) -> Result<&mut Batch, Error> {
		if self.batch.is_none() {
			self.batch = Some(self.db.batch()?);
		}
		Ok(self.batch.as_mut().expect("batch just created"))
	}

	/// Reads an unspent-transaction record, seeing this cursor's own writes.
	pub fn try_get_unspent_tx(&mut self, tx_hash: &Hash) -> Result<Option<UnspentTx>, Error> {
		Ok(self.batch()?.get_ser(&unspent_tx_key(tx_hash))?)
	}

	/// Adds an unspent-transaction record. Returns false if one is already
	/// present under the same hash.
	pub fn try_add_unspent_tx(&mut self, unspent: &UnspentTx) -> Result<bool, Error> {
		let key = unspent_tx_key(&unspent.tx_hash);
		let batch = self.batch()?;
		if batch.exists(&key)? {
			return Ok(false);
		}
		batch.put_ser(&key, unspent)?;
		Ok(true)
	}

	/// Overwrites an existing unspent-transaction record. Returns false if
	/// no record is present.
	pub fn try_update_unspent_tx(&mut self, unspent: &UnspentTx) -> Result<bool, Error> {
		let key = unspent_tx_key(&unspent.tx_hash);
		let batch = self.batch()?;
		if !batch.exists(&key)? {
			return Ok(false);
		}
		batch.put_ser(&key, unspent)?;
		Ok(true)
	}

	/// Removes an unspent-transaction record. Returns false if none was
	/// present.
	pub fn try_remove_unspent_tx(&mut self, tx_hash: &Hash) -> Result<bool, Error> {
		let key = unspent_tx_key(tx_hash);
		let batch = self.batch()?;
		if !batch.exists(&key)? {
			return Ok(false);
		}
		batch.delete(&key)?;
		Ok(true)
	}

	/// Reads an unspent output, seeing this cursor's own writes.
	pub fn try_get_unspent_output(
		&mut self,
		outpoint: &OutPoint,
	) -> Result<Option<TxOutput>, Error> {
		Ok(self.batch()?.get_ser(&unspent_output_key(outpoint))?)
	}

	/// Adds an unspent output. Returns false if one is already present
	/// under the same outpoint.
	pub fn try_add_unspent_output(
		&mut self,
		outpoint: &OutPoint,
		output: &TxOutput,
	) -> Result<bool, Error> {
		let key = unspent_output_key(outpoint);
		let batch = self.batch()?;
		if batch.exists(&key)? {
			return Ok(false);
		}
		batch.put_ser(&key, output)?;
		Ok(true)
	}

	/// Removes an unspent output. Returns false if none was present.
	pub fn try_remove_unspent_output(&mut self, outpoint: &OutPoint) -> Result<bool, Error> {
		let key = unspent_output_key(outpoint);
		let batch = self.batch()?;
		if !batch.exists(&key)? {
			return Ok(false);
		}
		batch.delete(&key)?;
		Ok(true)
	}

	/// Reads a named counter, zero when unset.
	pub fn counter(&mut self, name: &str) -> Result<u64, Error> {
		Ok(self.batch()?.get_ser(&counter_key(name))?.unwrap_or(0))
	}

	/// Sets a named counter.
	pub fn set_counter(&mut self, name: &str, value: u64) -> Result<(), Error> {
		self.batch()?.put_ser(&counter_key(name), &value)?;
		Ok(())
	}

	/// Moves a named counter by the given delta. A negative delta larger
	/// than the counter indicates a bookkeeping bug somewhere upstream.
	pub fn bump_counter(&mut self, name: &str, delta: i64) -> Result<(), Error> {
		let current = self.counter(name)?;
		let next = if delta >= 0 {
			current
				.checked_add(delta as u64)
				.ok_or_else(|| ErrorKind::Corruption(format!("counter {} overflow", name)))?
		} else {
			current.checked_sub(delta.unsigned_abs()).ok_or_else(|| {
				ErrorKind::Corruption(format!("counter {} underflow", name))
			})?
		};
		self.set_counter(name, next)
	}

	/// Records the fully-spent summaries for a connected block. Returns
	/// false if summaries are already recorded for the height.
	pub fn try_add_block_spent_txs(
		&mut self,
		height: u64,
		spent_txs: &[SpentTx],
	) -> Result<bool, Error> {
		let key = u64_to_key(BLOCK_SPENT_TXS_PREFIX, height);
		let batch = self.batch()?;
		if batch.exists(&key)? {
			return Ok(false);
		}
		batch.put_ser(&key, &spent_txs.to_vec())?;
		Ok(true)
	}

	/// Reads the fully-spent summaries recorded against a height.
	pub fn try_get_block_spent_txs(&mut self, height: u64) -> Result<Option<Vec<SpentTx>>, Error> {
		Ok(self
			.batch()?
			.get_ser(&u64_to_key(BLOCK_SPENT_TXS_PREFIX, height))?)
	}

	/// Drops the fully-spent summaries recorded against a height. Returns
	/// false if none were recorded.
	pub fn try_remove_block_spent_txs(&mut self, height: u64) -> Result<bool, Error> {
		let key = u64_to_key(BLOCK_SPENT_TXS_PREFIX, height);
		let batch = self.batch()?;
		if !batch.exists(&key)? {
			return Ok(false);
		}
		batch.delete(&key)?;
		Ok(true)
	}

	/// Records the rollback records for a connected block. Returns false if
	/// records already exist for the height.
	pub fn try_add_block_unminted_txs(
		&mut self,
		height: u64,
		unminted: &[UnmintedTx],
	) -> Result<bool, Error> {
		let key = u64_to_key(BLOCK_UNMINTED_TXS_PREFIX, height);
		let batch = self.batch()?;
		if batch.exists(&key)? {
			return Ok(false);
		}
		batch.put_ser(&key, &unminted.to_vec())?;
		Ok(true)
	}

	/// Reads the rollback records stored against a height.
	pub fn try_get_block_unminted_txs(
		&mut self,
		height: u64,
	) -> Result<Option<Vec<UnmintedTx>>, Error> {
		Ok(self
			.batch()?
			.get_ser(&u64_to_key(BLOCK_UNMINTED_TXS_PREFIX, height))?)
	}

	/// Drops the rollback records stored against a height. Returns false
	/// if none were stored.
	pub fn try_remove_block_unminted_txs(&mut self, height: u64) -> Result<bool, Error> {
		let key = u64_to_key(BLOCK_UNMINTED_TXS_PREFIX, height);
		let batch = self.batch()?;
		if !batch.exists(&key)? {
			return Ok(false);
		}
		batch.delete(&key)?;
		Ok(true)
	}

	/// Saves the validated tip inside the current transaction so it commits
	/// atomically with the step that produced it.
	pub fn save_validated_tip(&mut self, tip: &Tip) -> Result<(), Error> {
		self.batch()?.put_ser(&[TIP_PREFIX], tip)?;
		Ok(())
	}

	/// Commits the in-flight transaction, making all of its mutations
	/// visible at once. A cursor with no writes commits trivially.
	pub fn commit(&mut self) -> Result<(), Error> {
		if let Some(batch) = self.batch.take() {
			batch.commit()?;
		}
		Ok(())
	}

	/// Discards the in-flight transaction.
	pub fn rollback(&mut self) {
		self.batch.take();
	}

	/// Restores the cursor to a take-ready state, discarding any in-flight
	/// transaction. Used as the pool prepare hook.
	pub fn reset(&mut self) {
		self.batch.take();
	}
}
