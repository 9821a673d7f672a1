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

//! Blocks and block headers

use crate::core::hash::{Hash, Hashed, ZERO_HASH};
use crate::core::transaction::Transaction;
use crate::ser::{self, Readable, Reader, Writeable, Writer};

/// A block header, carrying the proof-of-work material and the link to the
/// previous block. Its double SHA-256 hash is computed at construction and
/// cached, the fields are immutable from then on.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockHeader {
	/// Header version
	pub version: u32,
	/// Hash of the previous block header
	pub prev: Hash,
	/// Root of the merkle tree over the block's transactions
	pub merkle_root: Hash,
	/// Block timestamp, seconds since the unix epoch
	pub time: u32,
	/// Proof-of-work target in compact form
	pub bits: u32,
	/// Nonce ground by the miner
	pub nonce: u32,
	hash: Hash,
}

impl BlockHeader {
	/// Builds a new header, computing and caching its hash.
	pub fn new(
		version: u32,
		prev: Hash,
		merkle_root: Hash,
		time: u32,
		bits: u32,
		nonce: u32,
	) -> BlockHeader {
		let mut header = BlockHeader {
			version,
			prev,
			merkle_root,
			time,
			bits,
			nonce,
			hash: ZERO_HASH,
		};
		header.hash = Hash::of(&header);
		header
	}
}

impl Hashed for BlockHeader {
	fn hash(&self) -> Hash {
		self.hash
	}
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_u32(self.version)?;
		self.prev.write(writer)?;
		self.merkle_root.write(writer)?;
		writer.write_u32(self.time)?;
		writer.write_u32(self.bits)?;
		writer.write_u32(self.nonce)
	}
}

impl Readable for BlockHeader {
	fn read(reader: &mut dyn Reader) -> Result<BlockHeader, ser::Error> {
		let version = reader.read_u32()?;
		let prev = Hash::read(reader)?;
		let merkle_root = Hash::read(reader)?;
		let time = reader.read_u32()?;
		let bits = reader.read_u32()?;
		let nonce = reader.read_u32()?;
		Ok(BlockHeader::new(
			version,
			prev,
			merkle_root,
			time,
			bits,
			nonce,
		))
	}
}

/// A full block: a header and the ordered transactions it confirms, the
/// first of which must be the coinbase.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
	/// The block header
	pub header: BlockHeader,
	/// The transactions confirmed by this block, in consensus order
	pub transactions: Vec<Transaction>,
}

impl Block {
	/// Builds a block out of a header and a set of transactions.
	pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Block {
		Block {
			header,
			transactions,
		}
	}
}

impl Hashed for Block {
	fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Writeable for Block {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		self.transactions.write(writer)
	}
}

impl Readable for Block {
	fn read(reader: &mut dyn Reader) -> Result<Block, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let transactions: Vec<Transaction> = Readable::read(reader)?;
		Ok(Block {
			header,
			transactions,
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::ser;

	#[test]
	fn header_hash_is_stable() {
		let header = BlockHeader::new(1, ZERO_HASH, ZERO_HASH, 1_500_000_000, 0x207f_ffff, 42);
		let bytes = ser::ser_vec(&header).unwrap();
		let header2: BlockHeader = ser::deserialize(&mut &bytes[..]).unwrap();
		assert_eq!(header2.hash(), header.hash());

		let other = BlockHeader::new(1, ZERO_HASH, ZERO_HASH, 1_500_000_000, 0x207f_ffff, 43);
		assert_ne!(other.hash(), header.hash());
	}
}
