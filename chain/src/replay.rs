// Copyright 2019 The Cinder Developers
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

//! Loads the transactions of a block as an ordered lazy sequence for
//! replay. Going forward, previous outputs are resolved from the unspent
//! snapshot taken at replay start, falling back to earlier transactions of
//! the same block; in reverse they come from the rollback records stored
//! when the block was connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{ChainedHeader, Transaction};
use crate::error::{Error, ErrorKind};
use crate::store::UtxoStore;
use crate::types::{BlockTxesStorage, Direction, LoadedTx, UnmintedTx};

/// Loads block transactions with their previous outputs resolved, in block
/// order going forward and reverse block order when disconnecting.
pub struct BlockReplayer {
	txes: Arc<dyn BlockTxesStorage>,
	utxo: UtxoStore,
}

impl BlockReplayer {
	/// Builds a replayer over the given collaborators.
	pub fn new(txes: Arc<dyn BlockTxesStorage>, utxo: UtxoStore) -> BlockReplayer {
		BlockReplayer { txes, utxo }
	}

	/// Opens the replay sequence for one block. Data that is absent or
	/// pruned fails the sequence with MissingData; the cancel flag is
	/// honored at every transaction boundary.
	pub fn replay_block(
		&self,
		header: &ChainedHeader,
		direction: Direction,
		cancel: Arc<AtomicBool>,
	) -> Result<ReplayStream, Error> {
		let block_hash = header.hash();
		let inner = match direction {
			Direction::Forward => {
				let slots = self
					.txes
					.try_read_block_transactions(&block_hash)?
					.ok_or_else(|| missing(&block_hash))?;
				let mut txs = Vec::with_capacity(slots.len());
				for slot in slots {
					match slot.into_tx() {
						Some(tx) => txs.push(tx),
						None => return Err(missing(&block_hash)),
					}
				}
				let by_hash: HashMap<Hash, u32> = txs
					.iter()
					.enumerate()
					.map(|(index, tx)| (tx.hash(), index as u32))
					.collect();
				StreamInner::Forward {
					txs,
					by_hash,
					utxo: self.utxo.clone(),
					next: 0,
				}
			}
			Direction::Reverse => {
				let mut records = self
					.utxo
					.try_get_unminted_txs(header.height)?
					.ok_or_else(|| {
						error!(
							"replay: no rollback records for {} at {}, pruned past the horizon?",
							block_hash, header.height
						);
						Error::from(ErrorKind::CannotRollback)
					})?;
				// disconnects iterate transactions in reverse block order
				records.reverse();
				StreamInner::Reverse {
					records,
					txes: self.txes.clone(),
					next: 0,
				}
			}
		};
		Ok(ReplayStream {
			block_hash,
			cancel,
			done: false,
			inner,
		})
	}
}

fn missing(block_hash: &Hash) -> Error {
	ErrorKind::MissingData(*block_hash).into()
}

enum StreamInner {
	Forward {
		txs: Vec<Transaction>,
		by_hash: HashMap<Hash, u32>,
		utxo: UtxoStore,
		next: usize,
	},
	Reverse {
		records: Vec<UnmintedTx>,
		txes: Arc<dyn BlockTxesStorage>,
		next: usize,
	},
}

/// The ordered lazy sequence of loaded transactions for one block. Ends
/// after the first error.
pub struct ReplayStream {
	block_hash: Hash,
	cancel: Arc<AtomicBool>,
	done: bool,
	inner: StreamInner,
}

impl ReplayStream {
	fn next_forward(&mut self) -> Option<Result<LoadedTx, Error>> {
		let (txs, by_hash, utxo, next) = match &mut self.inner {
			StreamInner::Forward {
				txs,
				by_hash,
				utxo,
				next,
			} => (txs, by_hash, utxo, next),
			_ => return None,
		};
		if *next >= txs.len() {
			return None;
		}
		let index = *next;
		*next += 1;

		let tx = txs[index].clone();
		let is_coinbase = tx.is_coinbase();
		let mut prev_outputs = Vec::with_capacity(tx.inputs.len());
		if !is_coinbase {
			for input in &tx.inputs {
				let outpoint = &input.prev_output;
				let resolved = match utxo.try_get_unspent_output(outpoint) {
					Err(e) => return Some(Err(e)),
					Ok(Some(output)) => Some(output),
					Ok(None) => {
						// an output created earlier in this very block
						// isn't in the snapshot yet
						by_hash
							.get(&outpoint.tx_hash)
							.filter(|prev_index| (**prev_index as usize) < index)
							.and_then(|prev_index| {
								txs[*prev_index as usize]
									.outputs
									.get(outpoint.index as usize)
									.cloned()
							})
					}
				};
				match resolved {
					Some(output) => prev_outputs.push(output),
					None => return Some(Err(missing(&self.block_hash))),
				}
			}
		}
		Some(Ok(LoadedTx {
			tx,
			tx_index: index as u32,
			is_coinbase,
			prev_outputs,
		}))
	}

	fn next_reverse(&mut self) -> Option<Result<LoadedTx, Error>> {
		let (records, txes, next) = match &mut self.inner {
			StreamInner::Reverse {
				records,
				txes,
				next,
			} => (records, txes, next),
			_ => return None,
		};
		if *next >= records.len() {
			return None;
		}
		let record = records[*next].clone();
		*next += 1;

		let slot = match txes.try_get_transaction(&self.block_hash, record.tx_index) {
			Err(e) => return Some(Err(e)),
			Ok(slot) => slot,
		};
		let tx = match slot.and_then(|s| s.into_tx()) {
			Some(tx) => tx,
			None => return Some(Err(missing(&self.block_hash))),
		};
		let is_coinbase = tx.is_coinbase();
		Some(Ok(LoadedTx {
			tx,
			tx_index: record.tx_index,
			is_coinbase,
			prev_outputs: record.prev_outputs,
		}))
	}
}

impl Iterator for ReplayStream {
	type Item = Result<LoadedTx, Error>;

	fn next(&mut self) -> Option<Result<LoadedTx, Error>> {
		if self.done {
			return None;
		}
		if self.cancel.load(Ordering::Relaxed) {
			self.done = true;
			return Some(Err(ErrorKind::Cancelled.into()));
		}
		let item = match self.inner {
			StreamInner::Forward { .. } => self.next_forward(),
			StreamInner::Reverse { .. } => self.next_reverse(),
		};
		match item {
			None => {
				self.done = true;
				None
			}
			Some(Err(e)) => {
				self.done = true;
				Some(Err(e))
			}
			some => some,
		}
	}
}
