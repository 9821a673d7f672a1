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

//! Transactions

use crate::core::hash::{Hash, Hashed, ZERO_HASH};
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// The maximum number of inputs or outputs a transaction may have
/// and be deserializable.
pub const MAX_IN_OUT_LEN: u64 = 50_000;

/// Reference to a specific output of an earlier transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
	/// Hash of the transaction that created the output
	pub tx_hash: Hash,
	/// Index of the output within that transaction
	pub index: u32,
}

impl OutPoint {
	/// Builds an outpoint from a transaction hash and output index.
	pub fn new(tx_hash: Hash, index: u32) -> OutPoint {
		OutPoint { tx_hash, index }
	}

	/// The null outpoint, only ever present on a coinbase input.
	pub fn null() -> OutPoint {
		OutPoint {
			tx_hash: ZERO_HASH,
			index: u32::max_value(),
		}
	}

	/// Whether this is the null outpoint.
	pub fn is_null(&self) -> bool {
		self.tx_hash == ZERO_HASH && self.index == u32::max_value()
	}
}

impl Writeable for OutPoint {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.tx_hash.write(writer)?;
		writer.write_u32(self.index)
	}
}

impl Readable for OutPoint {
	fn read(reader: &mut dyn Reader) -> Result<OutPoint, ser::Error> {
		let tx_hash = Hash::read(reader)?;
		let index = reader.read_u32()?;
		Ok(OutPoint { tx_hash, index })
	}
}

/// A transaction input, spending an output of an earlier transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TxInput {
	/// The output being spent
	pub prev_output: OutPoint,
	/// Script satisfying the spending conditions, opaque to the engine
	pub script_sig: Vec<u8>,
	/// Input sequence number
	pub sequence: u32,
}

impl Writeable for TxInput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.prev_output.write(writer)?;
		writer.write_bytes(&self.script_sig)?;
		writer.write_u32(self.sequence)
	}
}

impl Readable for TxInput {
	fn read(reader: &mut dyn Reader) -> Result<TxInput, ser::Error> {
		let prev_output = OutPoint::read(reader)?;
		let script_sig = reader.read_bytes_len_prefix()?;
		let sequence = reader.read_u32()?;
		Ok(TxInput {
			prev_output,
			script_sig,
			sequence,
		})
	}
}

/// A transaction output, assigning value to a locking script.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutput {
	/// Amount carried by the output
	pub value: u64,
	/// Script encumbering the output, opaque to the engine
	pub script_pubkey: Vec<u8>,
}

impl Writeable for TxOutput {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u64(self.value)?;
		writer.write_bytes(&self.script_pubkey)
	}
}

impl Readable for TxOutput {
	fn read(reader: &mut dyn Reader) -> Result<TxOutput, ser::Error> {
		let value = reader.read_u64()?;
		let script_pubkey = reader.read_bytes_len_prefix()?;
		Ok(TxOutput {
			value,
			script_pubkey,
		})
	}
}

/// A transaction. The hash of its canonical encoding is computed at
/// construction and cached, the fields are immutable from then on.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
	/// Transaction version
	pub version: u32,
	/// Set of inputs spending earlier outputs
	pub inputs: Vec<TxInput>,
	/// Set of new outputs created by this transaction
	pub outputs: Vec<TxOutput>,
	/// Earliest time or height at which the transaction is final
	pub lock_time: u32,
	hash: Hash,
}

impl Transaction {
	/// Builds a new transaction, computing and caching its hash.
	pub fn new(
		version: u32,
		inputs: Vec<TxInput>,
		outputs: Vec<TxOutput>,
		lock_time: u32,
	) -> Transaction {
		let mut tx = Transaction {
			version,
			inputs,
			outputs,
			lock_time,
			hash: ZERO_HASH,
		};
		tx.hash = Hash::of(&tx);
		tx
	}

	/// A transaction is a coinbase if and only if it has a single input
	/// carrying the null outpoint.
	pub fn is_coinbase(&self) -> bool {
		self.inputs.len() == 1 && self.inputs[0].prev_output.is_null()
	}
}

impl Hashed for Transaction {
	fn hash(&self) -> Hash {
		self.hash
	}
}

impl Writeable for Transaction {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.version)?;
		self.inputs.write(writer)?;
		self.outputs.write(writer)?;
		writer.write_u32(self.lock_time)
	}
}

impl Readable for Transaction {
	fn read(reader: &mut dyn Reader) -> Result<Transaction, ser::Error> {
		let version = reader.read_u32()?;
		let inputs: Vec<TxInput> = Readable::read(reader)?;
		let outputs: Vec<TxOutput> = Readable::read(reader)?;
		let lock_time = reader.read_u32()?;
		if inputs.len() as u64 > MAX_IN_OUT_LEN || outputs.len() as u64 > MAX_IN_OUT_LEN {
			return Err(ser::Error::TooLargeReadErr(
				"too many inputs or outputs".to_string(),
			));
		}
		Ok(Transaction::new(version, inputs, outputs, lock_time))
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ser;

	fn coinbase() -> Transaction {
		Transaction::new(
			1,
			vec![TxInput {
				prev_output: OutPoint::null(),
				script_sig: b"reward".to_vec(),
				sequence: 0xffff_ffff,
			}],
			vec![TxOutput {
				value: 50,
				script_pubkey: vec![],
			}],
			0,
		)
	}

	#[test]
	fn coinbase_detection() {
		let cb = coinbase();
		assert!(cb.is_coinbase());

		let spend = Transaction::new(
			1,
			vec![TxInput {
				prev_output: OutPoint::new(cb.hash(), 0),
				script_sig: vec![],
				sequence: 0xffff_ffff,
			}],
			vec![],
			0,
		);
		assert!(!spend.is_coinbase());
	}

	#[test]
	fn tx_ser_deser_preserves_hash() {
		let tx = coinbase();
		let bytes = ser::ser_vec(&tx).unwrap();
		let tx2: Transaction = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(tx2, tx);
		assert_eq!(tx2.hash(), tx.hash());
	}
}
