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

//! The unspent-set state machine. Applies one block's effects to a cursor,
//! transaction by transaction: minting outputs and spending inputs going
//! forward, unminting and unspending in reverse. All failures leave the
//! cursor to be rolled back by the caller; no partial effects escape.

use crate::core::consensus;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::transaction::{OutPoint, TxInput, TxOutput};
use crate::core::core::ChainedHeader;
use crate::error::{Error, ErrorKind};
use crate::store::{
	UtxoCursor, TOTAL_INPUT_COUNT, TOTAL_OUTPUT_COUNT, TOTAL_TX_COUNT, UNSPENT_OUTPUT_COUNT,
	UNSPENT_TX_COUNT,
};
use crate::types::{Direction, LoadedTx, PrevTxOutput, SpentTx, UnmintedTx, UnspentTx, ValidatableTx};

/// Applies one block's effects to a cursor, one transaction at a time. The
/// genesis block is excluded from the unspent set entirely: applying it
/// moves no counters and mints nothing.
pub struct UtxoEngine<'a> {
	cursor: &'a mut UtxoCursor,
	height: u64,
	block_hash: Hash,
	direction: Direction,
	duplicate_coinbases: Vec<(u64, Hash)>,
	// summaries of txs fully spent by this block, written per height
	spent_txs: Vec<SpentTx>,
	// rollback records for this block, written per height
	unminted_txs: Vec<UnmintedTx>,
}

impl<'a> UtxoEngine<'a> {
	/// Starts a replay step over the given cursor. In the reverse direction
	/// the records of transactions fully spent by the block are resurrected
	/// first, so their outputs can be unspent one by one.
	pub fn new(
		cursor: &'a mut UtxoCursor,
		header: &ChainedHeader,
		direction: Direction,
		duplicate_coinbases: &[(u64, Hash)],
	) -> Result<UtxoEngine<'a>, Error> {
		let mut engine = UtxoEngine {
			cursor,
			height: header.height,
			block_hash: header.hash(),
			direction,
			duplicate_coinbases: duplicate_coinbases.to_vec(),
			spent_txs: vec![],
			unminted_txs: vec![],
		};
		if direction == Direction::Reverse && engine.height > 0 {
			engine.restore_spent_txs()?;
		}
		Ok(engine)
	}

	// Transactions fully spent by the block being disconnected had their
	// records destroyed; rebuild them, all outputs marked spent, from the
	// summaries recorded at connect time.
	fn restore_spent_txs(&mut self) -> Result<(), Error> {
		let spent_txs = self
			.cursor
			.try_get_block_spent_txs(self.height)?
			.ok_or_else(|| {
				error!(
					"rollback: no spent-tx summaries for height {}, pruned?",
					self.height
				);
				Error::from(ErrorKind::CannotRollback)
			})?;
		for spent in &spent_txs {
			let record = UnspentTx::from_spent(spent);
			if !self.cursor.try_add_unspent_tx(&record)? {
				return Err(ErrorKind::Corruption(format!(
					"fully spent tx {} still has an unspent record",
					spent.tx_hash
				))
				.into());
			}
		}
		Ok(())
	}

	/// Applies one loaded transaction in the step's direction, producing
	/// the validatable form with authoritative previous outputs.
	pub fn apply(&mut self, loaded: &LoadedTx) -> Result<ValidatableTx, Error> {
		let prev_outputs = match self.direction {
			Direction::Forward => self.connect_tx(loaded)?,
			Direction::Reverse => self.rollback_tx(loaded)?,
		};
		Ok(ValidatableTx {
			block_hash: self.block_hash,
			height: self.height,
			loaded: loaded.clone(),
			prev_outputs,
		})
	}

	/// Closes the step: going forward, records the per-height spent and
	/// rollback indices; in reverse, drops them. The cursor itself is
	/// committed or rolled back by the caller.
	pub fn finish(mut self) -> Result<(), Error> {
		match self.direction {
			Direction::Forward => {
				let spent_txs = std::mem::replace(&mut self.spent_txs, vec![]);
				if !self.cursor.try_add_block_spent_txs(self.height, &spent_txs)? {
					return Err(ErrorKind::Corruption(format!(
						"spent-tx summaries already recorded for height {}",
						self.height
					))
					.into());
				}
				let unminted_txs = std::mem::replace(&mut self.unminted_txs, vec![]);
				if !self
					.cursor
					.try_add_block_unminted_txs(self.height, &unminted_txs)?
				{
					return Err(ErrorKind::Corruption(format!(
						"rollback records already present for height {}",
						self.height
					))
					.into());
				}
			}
			Direction::Reverse => {
				self.cursor.try_remove_block_spent_txs(self.height)?;
				self.cursor.try_remove_block_unminted_txs(self.height)?;
			}
		}
		Ok(())
	}

	fn connect_tx(&mut self, loaded: &LoadedTx) -> Result<Vec<PrevTxOutput>, Error> {
		if self.height == 0 {
			return Ok(vec![]);
		}
		let tx = &loaded.tx;
		let mut prev_outputs = Vec::with_capacity(tx.inputs.len());
		if !loaded.is_coinbase {
			for input in &tx.inputs {
				prev_outputs.push(self.spend(input)?);
			}
		}
		if consensus::is_duplicate_coinbase(&self.duplicate_coinbases, self.height, &tx.hash()) {
			info!(
				"connect: skipping mint of duplicate coinbase {} at {}",
				tx.hash(),
				self.height
			);
		} else {
			self.mint(loaded)?;
		}
		self.cursor.bump_counter(TOTAL_TX_COUNT, 1)?;
		self.unminted_txs.push(UnmintedTx {
			tx_hash: tx.hash(),
			tx_index: loaded.tx_index,
			prev_outputs: prev_outputs.iter().map(|p| p.output.clone()).collect(),
		});
		Ok(prev_outputs)
	}

	fn rollback_tx(&mut self, loaded: &LoadedTx) -> Result<Vec<PrevTxOutput>, Error> {
		if self.height == 0 {
			return Ok(vec![]);
		}
		let tx = &loaded.tx;
		if consensus::is_duplicate_coinbase(&self.duplicate_coinbases, self.height, &tx.hash()) {
			info!(
				"rollback: skipping unmint of duplicate coinbase {} at {}",
				tx.hash(),
				self.height
			);
		} else {
			self.unmint(loaded)?;
		}
		let mut prev_outputs = Vec::with_capacity(tx.inputs.len());
		if !loaded.is_coinbase {
			if loaded.prev_outputs.len() != tx.inputs.len() {
				return Err(ErrorKind::Corruption(format!(
					"rollback record for {} has {} outputs for {} inputs",
					tx.hash(),
					loaded.prev_outputs.len(),
					tx.inputs.len()
				))
				.into());
			}
			for (input, prev) in tx.inputs.iter().zip(loaded.prev_outputs.iter()).rev() {
				prev_outputs.push(self.unspend(input, prev)?);
			}
		}
		// restore input order before handing the buffer to consumers
		prev_outputs.reverse();
		self.cursor.bump_counter(TOTAL_TX_COUNT, -1)?;
		Ok(prev_outputs)
	}

	fn spend(&mut self, input: &TxInput) -> Result<PrevTxOutput, Error> {
		let outpoint = &input.prev_output;
		let mut unspent = self
			.cursor
			.try_get_unspent_tx(&outpoint.tx_hash)?
			.ok_or_else(|| {
				self.validation(format_args!("input spends unknown tx {}", outpoint.tx_hash))
			})?;
		if outpoint.index >= unspent.output_states.len() {
			return Err(self.validation(format_args!(
				"input spends {}:{} beyond its {} outputs",
				outpoint.tx_hash,
				outpoint.index,
				unspent.output_states.len()
			)));
		}
		if !unspent.output_states.is_unspent(outpoint.index) {
			return Err(self.validation(format_args!(
				"double spend of {}:{}",
				outpoint.tx_hash, outpoint.index
			)));
		}

		// snapshot of the record as consumers saw it before this spend
		let snapshot = unspent.clone();

		let output = self
			.cursor
			.try_get_unspent_output(outpoint)?
			.ok_or_else(|| {
				ErrorKind::Corruption(format!(
					"no stored output for {}:{}",
					outpoint.tx_hash, outpoint.index
				))
			})?;

		unspent.output_states.spend(outpoint.index);
		self.cursor.bump_counter(UNSPENT_OUTPUT_COUNT, -1)?;
		self.cursor.bump_counter(TOTAL_INPUT_COUNT, 1)?;
		if unspent.output_states.none_unspent() {
			// the last output is gone: the record and its stored outputs go
			// with it, leaving only the per-height summary behind
			self.spent_txs.push(SpentTx::from(&snapshot));
			if !self.cursor.try_remove_unspent_tx(&outpoint.tx_hash)? {
				return Err(ErrorKind::Corruption(format!(
					"unspent record for {} vanished mid-spend",
					outpoint.tx_hash
				))
				.into());
			}
			for index in 0..unspent.output_states.len() {
				if !self
					.cursor
					.try_remove_unspent_output(&OutPoint::new(outpoint.tx_hash, index))?
				{
					return Err(ErrorKind::Corruption(format!(
						"stored output {}:{} vanished mid-spend",
						outpoint.tx_hash, index
					))
					.into());
				}
			}
			self.cursor.bump_counter(UNSPENT_TX_COUNT, -1)?;
		} else if !self.cursor.try_update_unspent_tx(&unspent)? {
			return Err(ErrorKind::Corruption(format!(
				"unspent record for {} vanished mid-spend",
				outpoint.tx_hash
			))
			.into());
		}

		Ok(PrevTxOutput {
			output,
			unspent_tx: snapshot,
		})
	}

	fn mint(&mut self, loaded: &LoadedTx) -> Result<(), Error> {
		let tx = &loaded.tx;
		if tx.outputs.is_empty() {
			// nothing spendable, no record to keep
			return Ok(());
		}
		let unspent = UnspentTx::new(
			tx.hash(),
			self.height,
			loaded.tx_index,
			tx.version,
			loaded.is_coinbase,
			tx.outputs.len() as u32,
		);
		if !self.cursor.try_add_unspent_tx(&unspent)? {
			error!(
				"connect: transaction {} at height {} duplicates an unspent tx",
				tx.hash(),
				self.height
			);
			return Err(ErrorKind::Validation(self.block_hash).into());
		}
		self.cursor.bump_counter(UNSPENT_TX_COUNT, 1)?;
		for (index, output) in tx.outputs.iter().enumerate() {
			let outpoint = OutPoint::new(tx.hash(), index as u32);
			if !self.cursor.try_add_unspent_output(&outpoint, output)? {
				error!(
					"connect: output {}:{} duplicates an unspent output",
					tx.hash(),
					index
				);
				return Err(ErrorKind::Validation(self.block_hash).into());
			}
			self.cursor.bump_counter(UNSPENT_OUTPUT_COUNT, 1)?;
			self.cursor.bump_counter(TOTAL_OUTPUT_COUNT, 1)?;
		}
		Ok(())
	}

	fn unmint(&mut self, loaded: &LoadedTx) -> Result<(), Error> {
		let tx = &loaded.tx;
		if tx.outputs.is_empty() {
			return Ok(());
		}
		let unspent = self.cursor.try_get_unspent_tx(&tx.hash())?.ok_or_else(|| {
			error!(
				"rollback: unspent record for {} is gone, pruned past the horizon?",
				tx.hash()
			);
			Error::from(ErrorKind::CannotRollback)
		})?;
		if !unspent.output_states.all_unspent() {
			return Err(ErrorKind::Corruption(format!(
				"unminting {} while some outputs are still spent",
				tx.hash()
			))
			.into());
		}
		if !self.cursor.try_remove_unspent_tx(&tx.hash())? {
			return Err(ErrorKind::Corruption(format!(
				"unspent record for {} vanished mid-unmint",
				tx.hash()
			))
			.into());
		}
		self.cursor.bump_counter(UNSPENT_TX_COUNT, -1)?;
		for index in 0..tx.outputs.len() as u32 {
			let outpoint = OutPoint::new(tx.hash(), index);
			if !self.cursor.try_remove_unspent_output(&outpoint)? {
				return Err(ErrorKind::Corruption(format!(
					"stored output {}:{} vanished mid-unmint",
					tx.hash(),
					index
				))
				.into());
			}
			self.cursor.bump_counter(UNSPENT_OUTPUT_COUNT, -1)?;
			self.cursor.bump_counter(TOTAL_OUTPUT_COUNT, -1)?;
		}
		Ok(())
	}

	fn unspend(&mut self, input: &TxInput, prev: &TxOutput) -> Result<PrevTxOutput, Error> {
		let outpoint = &input.prev_output;
		let mut unspent = self
			.cursor
			.try_get_unspent_tx(&outpoint.tx_hash)?
			.ok_or_else(|| {
				error!(
					"rollback: referenced tx {} is gone, pruned past the horizon?",
					outpoint.tx_hash
				);
				Error::from(ErrorKind::CannotRollback)
			})?;
		if outpoint.index >= unspent.output_states.len() {
			return Err(ErrorKind::Corruption(format!(
				"unspending {}:{} beyond its {} outputs",
				outpoint.tx_hash,
				outpoint.index,
				unspent.output_states.len()
			))
			.into());
		}
		if unspent.output_states.is_unspent(outpoint.index) {
			return Err(ErrorKind::Corruption(format!(
				"unspending {}:{} which is not spent",
				outpoint.tx_hash, outpoint.index
			))
			.into());
		}
		let was_fully_spent = unspent.output_states.none_unspent();
		unspent.output_states.unspend(outpoint.index);
		if !self.cursor.try_update_unspent_tx(&unspent)? {
			return Err(ErrorKind::Corruption(format!(
				"unspent record for {} vanished mid-unspend",
				outpoint.tx_hash
			))
			.into());
		}
		self.cursor.bump_counter(UNSPENT_OUTPUT_COUNT, 1)?;
		self.cursor.bump_counter(TOTAL_INPUT_COUNT, -1)?;
		if was_fully_spent {
			self.cursor.bump_counter(UNSPENT_TX_COUNT, 1)?;
		}
		// the stored output was dropped when the tx went fully spent;
		// restore it from the rollback record if so
		self.cursor.try_add_unspent_output(outpoint, prev)?;
		Ok(PrevTxOutput {
			output: prev.clone(),
			unspent_tx: unspent.clone(),
		})
	}

	fn validation(&self, msg: std::fmt::Arguments<'_>) -> Error {
		warn!("block {}: {}", self.block_hash, msg);
		ErrorKind::Validation(self.block_hash).into()
	}
}
