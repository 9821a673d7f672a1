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

//! Chained headers, carrying their height and cumulative proof of work, and
//! ordered sequences of them from genesis to a tip.

use num_bigint::BigUint;

use crate::consensus;
use crate::core::block::BlockHeader;
use crate::core::hash::{Hash, Hashed};
use crate::ser::{self, read_biguint256, write_biguint256, Readable, Reader, Writeable, Writer};

/// A block header that has been connected to its parent, giving it a height
/// and a cumulative amount of proof of work. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainedHeader {
	/// The underlying header
	pub header: BlockHeader,
	/// Height of the header, the genesis block being at height 0
	pub height: u64,
	/// Total work on the chain ending at this header, included
	pub total_work: BigUint,
}

impl ChainedHeader {
	/// Builds a chained header from raw parts, used when reading back from
	/// storage. The caller is responsible for height and work consistency.
	pub fn new(header: BlockHeader, height: u64, total_work: BigUint) -> ChainedHeader {
		ChainedHeader {
			header,
			height,
			total_work,
		}
	}

	/// Chains a header at height 0. Returns None if the compact bits encode
	/// an unusable target.
	pub fn genesis(header: BlockHeader) -> Option<ChainedHeader> {
		let work = consensus::work_for_bits(header.bits)?;
		Some(ChainedHeader::new(header, 0, work))
	}

	/// Chains a header onto its parent, computing height and cumulative
	/// work. Returns None if the header doesn't reference the parent or its
	/// compact bits encode an unusable target.
	pub fn from_parent(header: BlockHeader, parent: &ChainedHeader) -> Option<ChainedHeader> {
		if header.prev != parent.hash() {
			return None;
		}
		let work = consensus::work_for_bits(header.bits)?;
		let total_work = parent.total_work.clone() + work;
		Some(ChainedHeader::new(header, parent.height + 1, total_work))
	}
}

impl Hashed for ChainedHeader {
	fn hash(&self) -> Hash {
		self.header.hash()
	}
}

impl Writeable for ChainedHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_u64(self.height)?;
		write_biguint256(writer, &self.total_work)
	}
}

impl Readable for ChainedHeader {
	fn read(reader: &mut dyn Reader) -> Result<ChainedHeader, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let height = reader.read_u64()?;
		let total_work = read_biguint256(reader)?;
		Ok(ChainedHeader::new(header, height, total_work))
	}
}

/// An ordered sequence of chained headers from genesis to a tip, with
/// contiguous heights. Always contains at least the genesis header.
#[derive(Debug, Clone)]
pub struct Chain {
	headers: Vec<ChainedHeader>,
}

impl Chain {
	/// Starts a chain from a genesis header. Returns None if the header
	/// isn't at height 0.
	pub fn from_genesis(genesis: ChainedHeader) -> Option<Chain> {
		if genesis.height != 0 {
			return None;
		}
		Some(Chain {
			headers: vec![genesis],
		})
	}

	/// Builds a chain from a contiguous sequence of headers starting at
	/// genesis. Returns None if the sequence breaks any chain invariant.
	pub fn from_headers(headers: Vec<ChainedHeader>) -> Option<Chain> {
		let mut iter = headers.iter();
		let genesis = iter.next()?;
		if genesis.height != 0 {
			return None;
		}
		let mut prev = genesis;
		for header in iter {
			if header.height != prev.height + 1 || header.header.prev != prev.hash() {
				return None;
			}
			prev = header;
		}
		Some(Chain { headers })
	}

	/// Appends a header to the tip. Returns false and leaves the chain
	/// untouched if the header doesn't extend the current tip.
	pub fn push(&mut self, header: ChainedHeader) -> bool {
		let tip = self.tip();
		if header.height != tip.height + 1 || header.header.prev != tip.hash() {
			return false;
		}
		self.headers.push(header);
		true
	}

	/// Removes and returns the tip. Refuses to pop the genesis header.
	pub fn pop(&mut self) -> Option<ChainedHeader> {
		if self.headers.len() <= 1 {
			return None;
		}
		self.headers.pop()
	}

	/// The current tip of the chain.
	pub fn tip(&self) -> &ChainedHeader {
		// a chain always holds at least its genesis
		self.headers.last().expect("empty chain")
	}

	/// Height of the chain tip.
	pub fn height(&self) -> u64 {
		self.tip().height
	}

	/// The header at the given height, if within the chain.
	pub fn ancestor(&self, height: u64) -> Option<&ChainedHeader> {
		self.headers.get(height as usize)
	}

	/// Number of headers in the chain, genesis included.
	pub fn len(&self) -> usize {
		self.headers.len()
	}

	/// Whether the chain is empty. Never true for a constructed chain.
	pub fn is_empty(&self) -> bool {
		self.headers.is_empty()
	}

	/// Iterator over the headers from genesis to tip.
	pub fn iter(&self) -> std::slice::Iter<'_, ChainedHeader> {
		self.headers.iter()
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::hash::ZERO_HASH;

	fn header(prev: Hash, nonce: u32) -> BlockHeader {
		BlockHeader::new(1, prev, ZERO_HASH, 1_500_000_000, 0x207f_ffff, nonce)
	}

	#[test]
	fn chaining_accumulates_work() {
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let next = ChainedHeader::from_parent(header(genesis.hash(), 1), &genesis).unwrap();
		assert_eq!(next.height, 1);
		assert!(next.total_work > genesis.total_work);
		assert_eq!(
			next.total_work,
			genesis.total_work.clone() + consensus::work_for_bits(0x207f_ffff).unwrap()
		);
	}

	#[test]
	fn chaining_rejects_wrong_parent() {
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		assert!(ChainedHeader::from_parent(header(ZERO_HASH, 1), &genesis).is_none());
	}

	#[test]
	fn chain_push_pop() {
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let next = ChainedHeader::from_parent(header(genesis.hash(), 1), &genesis).unwrap();
		let mut chain = Chain::from_genesis(genesis.clone()).unwrap();
		assert!(chain.push(next.clone()));
		assert_eq!(chain.height(), 1);
		assert_eq!(chain.pop().unwrap().hash(), next.hash());
		// the genesis can never be popped
		assert!(chain.pop().is_none());
		assert_eq!(chain.tip().hash(), genesis.hash());

		// a header skipping a height is refused
		let skip = ChainedHeader::new(header(genesis.hash(), 7), 5, genesis.total_work.clone());
		assert!(!chain.push(skip));
	}
}
