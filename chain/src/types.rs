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

//! Base types that the chain-state engine requires.

use std::time::Duration;

use bit_vec::BitVec;
use num_bigint::BigUint;

use crate::core::consensus;
use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, ChainedHeader, Transaction, TxOutput};
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::error::Error;

/// The direction of a single replay step along the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	/// Connecting a block, applying its effects to the unspent set
	Forward,
	/// Disconnecting a block, undoing its effects from the unspent set
	Reverse,
}

impl Direction {
	/// Whether this is the connecting direction.
	pub fn is_forward(self) -> bool {
		self == Direction::Forward
	}

	/// The step as a signed unit, +1 connecting and -1 disconnecting.
	pub fn as_step(self) -> i8 {
		match self {
			Direction::Forward => 1,
			Direction::Reverse => -1,
		}
	}
}

/// The tip of a fork. A handle to the fork ancestry from its leaf in the
/// blockchain tree. References the max height, the latest and previous
/// blocks for convenience and the total work.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tip {
	/// Height of the tip (max height of the fork)
	pub height: u64,
	/// Last block pushed to the fork
	pub last_block_h: Hash,
	/// Block previous to last
	pub prev_block_h: Hash,
	/// Total work accumulated on that fork
	pub total_work: BigUint,
}

impl Tip {
	/// Creates a tip pointing at the given chained header.
	pub fn from_header(header: &ChainedHeader) -> Tip {
		Tip {
			height: header.height,
			last_block_h: header.hash(),
			prev_block_h: header.header.prev,
			total_work: header.total_work.clone(),
		}
	}
}

impl Writeable for Tip {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.height)?;
		self.last_block_h.write(writer)?;
		self.prev_block_h.write(writer)?;
		ser::write_biguint256(writer, &self.total_work)
	}
}

impl Readable for Tip {
	fn read(reader: &mut dyn Reader) -> Result<Tip, ser::Error> {
		Ok(Tip {
			height: reader.read_u64()?,
			last_block_h: Hash::read(reader)?,
			prev_block_h: Hash::read(reader)?,
			total_work: ser::read_biguint256(reader)?,
		})
	}
}

/// Per-output spentness of a transaction, one bit per output in creation
/// order. A set bit means the output is still unspent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputStates {
	states: BitVec,
}

impl OutputStates {
	/// States for a freshly minted transaction, all outputs unspent.
	pub fn new_all_unspent(count: u32) -> OutputStates {
		OutputStates {
			states: BitVec::from_elem(count as usize, true),
		}
	}

	/// States for a fully spent transaction, used when resurrecting a
	/// record during reverse replay.
	pub fn new_all_spent(count: u32) -> OutputStates {
		OutputStates {
			states: BitVec::from_elem(count as usize, false),
		}
	}

	/// Number of outputs tracked, spent or not.
	pub fn len(&self) -> u32 {
		self.states.len() as u32
	}

	/// Whether no outputs are tracked at all.
	pub fn is_empty(&self) -> bool {
		self.states.is_empty()
	}

	/// Whether the output at the given index is still unspent. Out of
	/// bounds reads as spent.
	pub fn is_unspent(&self, index: u32) -> bool {
		self.states.get(index as usize).unwrap_or(false)
	}

	/// Marks the output at the given index as spent.
	pub fn spend(&mut self, index: u32) {
		self.states.set(index as usize, false);
	}

	/// Marks the output at the given index as unspent again.
	pub fn unspend(&mut self, index: u32) {
		self.states.set(index as usize, true);
	}

	/// Number of outputs still unspent.
	pub fn unspent_count(&self) -> u64 {
		self.states.iter().filter(|b| *b).count() as u64
	}

	/// Whether every tracked output is unspent.
	pub fn all_unspent(&self) -> bool {
		self.states.all()
	}

	/// Whether every tracked output is spent.
	pub fn none_unspent(&self) -> bool {
		self.states.none()
	}
}

impl Writeable for OutputStates {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.len())?;
		writer.write_bytes(&self.states.to_bytes())
	}
}

impl Readable for OutputStates {
	fn read(reader: &mut dyn Reader) -> Result<OutputStates, ser::Error> {
		let len = reader.read_u32()? as usize;
		let bytes = reader.read_bytes_len_prefix()?;
		if bytes.len() != (len + 7) / 8 {
			return Err(ser::Error::CorruptedData);
		}
		let mut states = BitVec::from_bytes(&bytes);
		states.truncate(len);
		Ok(OutputStates { states })
	}
}

/// A transaction with at least one unspent output, together with the state
/// of each of its outputs. The record is destroyed once every output has
/// been spent, or when the minting block is disconnected.
#[derive(Debug, Clone, PartialEq)]
pub struct UnspentTx {
	/// Hash of the transaction
	pub tx_hash: Hash,
	/// Height of the block that confirmed the transaction
	pub block_height: u64,
	/// Index of the transaction within that block
	pub tx_index: u32,
	/// Transaction version
	pub version: u32,
	/// Whether the transaction is a coinbase
	pub is_coinbase: bool,
	/// Per-output spentness, sized to the original output count
	pub output_states: OutputStates,
}

impl UnspentTx {
	/// Record for a freshly minted transaction, all outputs unspent.
	pub fn new(
		tx_hash: Hash,
		block_height: u64,
		tx_index: u32,
		version: u32,
		is_coinbase: bool,
		output_count: u32,
	) -> UnspentTx {
		UnspentTx {
			tx_hash,
			block_height,
			tx_index,
			version,
			is_coinbase,
			output_states: OutputStates::new_all_unspent(output_count),
		}
	}

	/// Resurrects the record of a fully spent transaction from its summary,
	/// every output marked spent. Reverse replay then unspends them one by
	/// one.
	pub fn from_spent(spent: &SpentTx) -> UnspentTx {
		UnspentTx {
			tx_hash: spent.tx_hash,
			block_height: spent.block_height,
			tx_index: spent.tx_index,
			version: spent.version,
			is_coinbase: spent.is_coinbase,
			output_states: OutputStates::new_all_spent(spent.output_count),
		}
	}
}

impl Writeable for UnspentTx {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx_hash.write(writer)?;
		writer.write_u64(self.block_height)?;
		writer.write_u32(self.tx_index)?;
		writer.write_u32(self.version)?;
		writer.write_u8(self.is_coinbase as u8)?;
		self.output_states.write(writer)
	}
}

impl Readable for UnspentTx {
	fn read(reader: &mut dyn Reader) -> Result<UnspentTx, ser::Error> {
		Ok(UnspentTx {
			tx_hash: Hash::read(reader)?,
			block_height: reader.read_u64()?,
			tx_index: reader.read_u32()?,
			version: reader.read_u32()?,
			is_coinbase: reader.read_u8()? == 1,
			output_states: OutputStates::read(reader)?,
		})
	}
}

/// Summary of a transaction whose outputs have all been spent, recorded
/// against the height of the block that spent the last one. Carries enough
/// to resurrect the unspent record during reverse replay.
#[derive(Debug, Clone, PartialEq)]
pub struct SpentTx {
	/// Hash of the transaction
	pub tx_hash: Hash,
	/// Height of the block that confirmed the transaction
	pub block_height: u64,
	/// Index of the transaction within that block
	pub tx_index: u32,
	/// Transaction version
	pub version: u32,
	/// Number of outputs the transaction created
	pub output_count: u32,
	/// Whether the transaction is a coinbase
	pub is_coinbase: bool,
}

impl<'a> From<&'a UnspentTx> for SpentTx {
	fn from(unspent: &'a UnspentTx) -> SpentTx {
		SpentTx {
			tx_hash: unspent.tx_hash,
			block_height: unspent.block_height,
			tx_index: unspent.tx_index,
			version: unspent.version,
			output_count: unspent.output_states.len(),
			is_coinbase: unspent.is_coinbase,
		}
	}
}

impl Writeable for SpentTx {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx_hash.write(writer)?;
		writer.write_u64(self.block_height)?;
		writer.write_u32(self.tx_index)?;
		writer.write_u32(self.version)?;
		writer.write_u32(self.output_count)?;
		writer.write_u8(self.is_coinbase as u8)
	}
}

impl Readable for SpentTx {
	fn read(reader: &mut dyn Reader) -> Result<SpentTx, ser::Error> {
		Ok(SpentTx {
			tx_hash: Hash::read(reader)?,
			block_height: reader.read_u64()?,
			tx_index: reader.read_u32()?,
			version: reader.read_u32()?,
			output_count: reader.read_u32()?,
			is_coinbase: reader.read_u8()? == 1,
		})
	}
}

/// Rollback record for one transaction of a connected block: the previous
/// outputs its inputs consumed, resolved at connect time. Reverse replay
/// reads these instead of the unspent set, which has moved on since.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmintedTx {
	/// Hash of the transaction
	pub tx_hash: Hash,
	/// Index of the transaction within its block
	pub tx_index: u32,
	/// The outputs consumed by the transaction's inputs, in input order.
	/// Empty for a coinbase.
	pub prev_outputs: Vec<TxOutput>,
}

impl Writeable for UnmintedTx {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx_hash.write(writer)?;
		writer.write_u32(self.tx_index)?;
		self.prev_outputs.write(writer)
	}
}

impl Readable for UnmintedTx {
	fn read(reader: &mut dyn Reader) -> Result<UnmintedTx, ser::Error> {
		Ok(UnmintedTx {
			tx_hash: Hash::read(reader)?,
			tx_index: reader.read_u32()?,
			prev_outputs: Readable::read(reader)?,
		})
	}
}

/// A previous output resolved during replay, together with a snapshot of
/// the unspent record it belongs to. Fed to validators and wallet sinks.
#[derive(Debug, Clone)]
pub struct PrevTxOutput {
	/// The output being spent or unspent
	pub output: TxOutput,
	/// Snapshot of the owning unspent-transaction record
	pub unspent_tx: UnspentTx,
}

/// A transaction loaded for replay, with its previous outputs resolved
/// from the unspent snapshot (forward) or the stored rollback records
/// (reverse).
#[derive(Debug, Clone)]
pub struct LoadedTx {
	/// The decoded transaction
	pub tx: Transaction,
	/// Index of the transaction within its block
	pub tx_index: u32,
	/// Whether the transaction is a coinbase
	pub is_coinbase: bool,
	/// The outputs consumed by the transaction's inputs, in input order.
	/// Empty for a coinbase.
	pub prev_outputs: Vec<TxOutput>,
}

/// A replayed transaction after the state engine has applied it: the loaded
/// form plus the authoritative previous outputs, each with its owning
/// unspent-record snapshot.
#[derive(Debug)]
pub struct ValidatableTx {
	/// Hash of the block being replayed
	pub block_hash: Hash,
	/// Height of the block being replayed
	pub height: u64,
	/// The transaction as loaded for replay
	pub loaded: LoadedTx,
	/// Final previous outputs, one per input, in input order
	pub prev_outputs: Vec<PrevTxOutput>,
}

/// A transaction slot inside a stored block: either the full transaction or
/// a marker left behind once the transaction has been pruned.
#[derive(Debug, Clone)]
pub enum BlockTx {
	/// The full transaction
	Full(Transaction),
	/// The transaction has been pruned away
	Pruned,
}

impl BlockTx {
	/// The full transaction, or None for a pruned slot.
	pub fn into_tx(self) -> Option<Transaction> {
		match self {
			BlockTx::Full(tx) => Some(tx),
			BlockTx::Pruned => None,
		}
	}

	/// Whether the slot has been pruned.
	pub fn is_pruned(&self) -> bool {
		match self {
			BlockTx::Full(_) => false,
			BlockTx::Pruned => true,
		}
	}
}

impl Writeable for BlockTx {
	/// Write first byte representing the variant, followed by variant
	/// specific data.
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		match self {
			BlockTx::Full(tx) => {
				writer.write_u8(0)?;
				tx.write(writer)?;
			}
			BlockTx::Pruned => {
				writer.write_u8(1)?;
			}
		}
		Ok(())
	}
}

impl Readable for BlockTx {
	/// Read the first byte to determine what needs to be read beyond that.
	fn read(reader: &mut dyn Reader) -> Result<BlockTx, ser::Error> {
		match reader.read_u8()? {
			0 => Ok(BlockTx::Full(Transaction::read(reader)?)),
			1 => Ok(BlockTx::Pruned),
			_ => Err(ser::Error::CorruptedData),
		}
	}
}

/// How aggressively old block data is discarded once it falls behind the
/// safety horizon.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum PruneMode {
	/// Keep everything, reorganizations of any depth stay possible
	Archive,
	/// Drop only transactions fully spent by later blocks, unspent data
	/// remains queryable
	PreserveUnspent,
	/// Drop all transactions beyond the horizon, the unspent set suffices
	/// going forward
	Full,
}

/// Chain-state engine configuration.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChainConfig {
	/// Pruning behavior past the safety horizon
	pub prune_mode: PruneMode,
	/// How many blocks the pruning horizon lags the validated tip
	pub safety_buffer: u64,
	/// How long a replay step may hold one chain-state snapshot before
	/// committing progress and re-entering the walker, in seconds
	pub snapshot_budget_secs: u64,
	/// Bound on each replay pipeline channel
	pub pipeline_capacity: usize,
	/// How many idle storage cursors the cursor pool caches
	pub cursor_pool_capacity: usize,
	/// How long to wait for a pooled cursor before giving up, in seconds
	pub cursor_timeout_secs: u64,
	/// The (height, coinbase hash) pairs exempt from duplicate-mint
	/// rejection. Defaults to the two frozen historical identities.
	pub duplicate_coinbases: Vec<(u64, Hash)>,
}

impl Default for ChainConfig {
	fn default() -> ChainConfig {
		ChainConfig {
			prune_mode: PruneMode::PreserveUnspent,
			safety_buffer: consensus::PRUNE_HORIZON,
			snapshot_budget_secs: 15,
			pipeline_capacity: 32,
			cursor_pool_capacity: 1,
			cursor_timeout_secs: 30,
			duplicate_coinbases: consensus::DUPLICATE_COINBASES.clone(),
		}
	}
}

impl ChainConfig {
	/// The snapshot time budget as a duration.
	pub fn snapshot_budget(&self) -> Duration {
		Duration::from_secs(self.snapshot_budget_secs)
	}

	/// The cursor acquisition timeout as a duration.
	pub fn cursor_timeout(&self) -> Duration {
		Duration::from_secs(self.cursor_timeout_secs)
	}
}

/// Bridge between the chain-state engine and the rest of the system.
/// Handles downstream processing of state changes, most importantly
/// notifying other components of connected and disconnected blocks.
/// Callbacks fire after the corresponding state change has committed and
/// must not re-enter the engine.
pub trait ChainAdapter: Send + Sync {
	/// A block has been connected to the validated chain.
	fn block_connected(&self, _header: &ChainedHeader) {}

	/// A block has been disconnected from the validated chain.
	fn block_disconnected(&self, _header: &ChainedHeader) {}

	/// The validated tip moved.
	fn tip_updated(&self, _tip: &Tip) {}

	/// A replay step needed block transactions that storage doesn't hold;
	/// a re-fetch may be warranted.
	fn block_txes_missed(&self, _block_hash: &Hash) {}
}

/// An adapter that ignores everything.
pub struct NoopAdapter;

impl ChainAdapter for NoopAdapter {}

/// The consensus rules oracle. The engine calls out for header hashing,
/// proof-of-work checks and structural validation but never inspects
/// script semantics itself.
pub trait Rules: Send + Sync {
	/// Checks the proof of work carried by a header.
	fn check_proof_of_work(&self, header: &BlockHeader) -> Result<(), Error>;

	/// Structural validation of a full block before it is stored.
	fn validate_block_structure(&self, block: &Block) -> Result<(), Error>;

	/// Validation of a replayed transaction given its resolved previous
	/// outputs.
	fn validate_transaction(&self, tx: &ValidatableTx) -> Result<(), Error>;
}

/// A rules oracle accepting everything, for tests and trusted replay.
pub struct NoopRules;

impl Rules for NoopRules {
	fn check_proof_of_work(&self, _header: &BlockHeader) -> Result<(), Error> {
		Ok(())
	}
	fn validate_block_structure(&self, _block: &Block) -> Result<(), Error> {
		Ok(())
	}
	fn validate_transaction(&self, _tx: &ValidatableTx) -> Result<(), Error> {
		Ok(())
	}
}

/// Storage of chained headers and their invalidation marks.
pub trait BlockStorage: Send + Sync {
	/// Persists a chained header. Returns false if it was already present.
	fn try_add_chained_header(&self, header: &ChainedHeader) -> Result<bool, Error>;

	/// Reads a chained header back by its hash.
	fn try_get_chained_header(&self, hash: &Hash) -> Result<Option<ChainedHeader>, Error>;

	/// Reads all chained headers known to storage.
	fn read_chained_headers(&self) -> Result<Vec<ChainedHeader>, Error>;

	/// The valid header carrying the most cumulative work, ties broken by
	/// lowest hash.
	fn find_max_total_work(&self) -> Result<Option<ChainedHeader>, Error>;

	/// Marks a block as consensus-invalid.
	fn mark_block_invalid(&self, hash: &Hash) -> Result<(), Error>;

	/// Whether a block has been marked consensus-invalid.
	fn is_block_invalid(&self, hash: &Hash) -> Result<bool, Error>;
}

/// Storage of the transactions belonging to each block.
pub trait BlockTxesStorage: Send + Sync {
	/// Stores the transactions of a block. Returns false if the block was
	/// already present.
	fn try_add_block_transactions(
		&self,
		block_hash: Hash,
		transactions: &[Transaction],
	) -> Result<bool, Error>;

	/// Reads the transaction slots of a block, pruned markers included.
	fn try_read_block_transactions(&self, block_hash: &Hash)
		-> Result<Option<Vec<BlockTx>>, Error>;

	/// Whether transactions are stored for the given block.
	fn contains_block(&self, block_hash: &Hash) -> Result<bool, Error>;

	/// Reads a single transaction slot of a block.
	fn try_get_transaction(&self, block_hash: &Hash, tx_index: u32)
		-> Result<Option<BlockTx>, Error>;

	/// Replaces the given transaction slots of a block with pruned markers.
	/// Returns false if the block isn't stored.
	fn try_prune_block_transactions(
		&self,
		block_hash: &Hash,
		tx_indices: &[u32],
	) -> Result<bool, Error>;

	/// Drops a block's transactions entirely. Returns false if the block
	/// isn't stored.
	fn try_remove_block_transactions(&self, block_hash: &Hash) -> Result<bool, Error>;

	/// Number of blocks with stored transactions.
	fn block_count(&self) -> Result<u64, Error>;
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn output_states_transitions() {
		let mut states = OutputStates::new_all_unspent(3);
		assert!(states.all_unspent());
		assert_eq!(states.unspent_count(), 3);

		states.spend(1);
		assert!(!states.is_unspent(1));
		assert!(states.is_unspent(0));
		assert_eq!(states.unspent_count(), 2);

		states.spend(0);
		states.spend(2);
		assert!(states.none_unspent());

		states.unspend(1);
		assert!(states.is_unspent(1));
		assert_eq!(states.unspent_count(), 1);

		// out of bounds reads as spent
		assert!(!states.is_unspent(7));
	}

	#[test]
	fn output_states_ser_round_trip() {
		let mut states = OutputStates::new_all_unspent(11);
		states.spend(0);
		states.spend(7);
		states.spend(10);
		let bytes = ser::ser_vec(&states).unwrap();
		let back: OutputStates = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(back, states);
	}

	#[test]
	fn spent_tx_resurrection() {
		let unspent = UnspentTx::new(Hash::double_sha256(b"tx"), 5, 1, 1, false, 4);
		let spent = SpentTx::from(&unspent);
		assert_eq!(spent.output_count, 4);
		let back = UnspentTx::from_spent(&spent);
		assert_eq!(back.tx_hash, unspent.tx_hash);
		assert!(back.output_states.none_unspent());
		assert_eq!(back.output_states.len(), 4);
	}
}
