// Copyright 2020 The Cinder Developers
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

//! Trails the validated tip by a safety horizon and discards block data
//! that can no longer influence validation: transactions fully spent by
//! old blocks, or every old transaction outright, along with the per-height
//! rollback indices that made disconnecting them possible.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::core::hash::Hashed;
use crate::core::core::Chain;
use crate::error::{Error, ErrorKind};
use crate::store::{UtxoStore, PRUNED_HEIGHT};
use crate::types::{BlockTxesStorage, PruneMode};

/// Prunes data beyond the safety horizon. Runs after each successful tip
/// advancement; idempotent, and safe to interleave with replay since it
/// never touches heights within the horizon.
pub struct PruningEngine {
	utxo: UtxoStore,
	txes: Arc<dyn BlockTxesStorage>,
	mode: PruneMode,
	safety_buffer: u64,
}

impl PruningEngine {
	/// Builds a pruning engine over the given collaborators.
	pub fn new(
		utxo: UtxoStore,
		txes: Arc<dyn BlockTxesStorage>,
		mode: PruneMode,
		safety_buffer: u64,
	) -> PruningEngine {
		PruningEngine {
			utxo,
			txes,
			mode,
			safety_buffer,
		}
	}

	/// Prunes every height that has fallen behind the horizon since the
	/// last pass. Returns the number of heights processed.
	pub fn prune_to(&self, chain: &Chain) -> Result<u64, Error> {
		if self.mode == PruneMode::Archive {
			return Ok(0);
		}
		let tip_height = chain.height();
		if tip_height < self.safety_buffer {
			return Ok(0);
		}
		let horizon = tip_height - self.safety_buffer;

		let start = self.utxo.counter(PRUNED_HEIGHT)?;
		if start > horizon {
			return Ok(0);
		}

		// transaction-level drops first, against the committed state
		let mut pruned = 0;
		for height in start..=horizon {
			let header = chain.ancestor(height).ok_or_else(|| {
				ErrorKind::Corruption(format!("validated chain is missing height {}", height))
			})?;

			if self.mode == PruneMode::Full {
				// the unspent set suffices going forward
				self.txes.try_remove_block_transactions(&header.hash())?;
			} else if let Some(spent_txs) = self.utxo.try_get_block_spent_txs(height)? {
				// drop only what later blocks fully spent, grouped by the
				// block that minted each transaction
				let mut by_block: HashMap<u64, Vec<u32>> = HashMap::new();
				for spent in &spent_txs {
					by_block
						.entry(spent.block_height)
						.or_insert_with(Vec::new)
						.push(spent.tx_index);
				}
				for (mint_height, tx_indices) in by_block {
					let mint_hash = chain
						.ancestor(mint_height)
						.ok_or_else(|| {
							ErrorKind::Corruption(format!(
								"validated chain is missing height {}",
								mint_height
							))
						})?
						.hash();
					self.txes
						.try_prune_block_transactions(&mint_hash, &tx_indices)?;
				}
			}
			pruned += 1;
		}

		// then the per-height indices, atomically with the watermark
		let mut cursor = self.utxo.cursor();
		for height in start..=horizon {
			cursor.try_remove_block_spent_txs(height)?;
			cursor.try_remove_block_unminted_txs(height)?;
		}
		cursor.set_counter(PRUNED_HEIGHT, horizon + 1)?;
		cursor.commit()?;
		if pruned > 0 {
			debug!(
				"pruned {} heights up to horizon {} ({:?})",
				pruned, horizon, self.mode
			);
		}
		Ok(pruned)
	}
}
