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

//! Plans the path between two chains: the ordered disconnect and connect
//! steps transforming the current chain into the target via their lowest
//! common ancestor.

use crate::core::core::hash::Hashed;
use crate::core::core::{Chain, ChainedHeader};
use crate::error::{Error, ErrorKind};
use crate::types::Direction;

/// Computes reorganization paths between chains.
pub struct ChainWalker;

impl ChainWalker {
	/// Yields the ordered steps transforming `current` into `target`:
	/// disconnects from the current tip down to the lowest common ancestor
	/// (ancestor exclusive), then connects from the ancestor up to the
	/// target tip (ancestor exclusive). Fails with NoCommonAncestor only
	/// when the chains share no root, a programmer error for forks of one
	/// genesis.
	pub fn navigate(
		current: &Chain,
		target: &Chain,
	) -> Result<Vec<(Direction, ChainedHeader)>, Error> {
		let mut fork_height = std::cmp::min(current.height(), target.height());
		loop {
			let ours = Self::ancestor(current, fork_height)?;
			let theirs = Self::ancestor(target, fork_height)?;
			if ours.hash() == theirs.hash() {
				break;
			}
			if fork_height == 0 {
				return Err(ErrorKind::NoCommonAncestor.into());
			}
			fork_height -= 1;
		}

		let down = current.height() - fork_height;
		let up = target.height() - fork_height;
		let mut steps = Vec::with_capacity((down + up) as usize);
		let mut height = current.height();
		while height > fork_height {
			steps.push((Direction::Reverse, Self::ancestor(current, height)?.clone()));
			height -= 1;
		}
		for height in fork_height + 1..=target.height() {
			steps.push((Direction::Forward, Self::ancestor(target, height)?.clone()));
		}
		Ok(steps)
	}

	fn ancestor(chain: &Chain, height: u64) -> Result<&ChainedHeader, Error> {
		chain.ancestor(height).ok_or_else(|| {
			ErrorKind::Corruption(format!("chain is missing its header at {}", height)).into()
		})
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::consensus::EASY_POW_BITS;
	use crate::core::core::hash::{Hash, ZERO_HASH};
	use crate::core::core::BlockHeader;

	fn header(prev: Hash, nonce: u32) -> BlockHeader {
		BlockHeader::new(1, prev, ZERO_HASH, 1_500_000_000, EASY_POW_BITS, nonce)
	}

	fn extend(chain: &mut Chain, nonce: u32) -> ChainedHeader {
		let chained =
			ChainedHeader::from_parent(header(chain.tip().hash(), nonce), chain.tip()).unwrap();
		assert!(chain.push(chained.clone()));
		chained
	}

	#[test]
	fn navigate_same_chain_is_empty() {
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let mut chain = Chain::from_genesis(genesis).unwrap();
		extend(&mut chain, 1);
		let steps = ChainWalker::navigate(&chain, &chain).unwrap();
		assert!(steps.is_empty());
	}

	#[test]
	fn navigate_extension_is_all_connects() {
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let current = Chain::from_genesis(genesis.clone()).unwrap();
		let mut target = current.clone();
		let block_1 = extend(&mut target, 1);
		let block_2 = extend(&mut target, 2);

		let steps = ChainWalker::navigate(&current, &target).unwrap();
		assert_eq!(steps.len(), 2);
		assert_eq!(steps[0].0, Direction::Forward);
		assert_eq!(steps[0].1.hash(), block_1.hash());
		assert_eq!(steps[1].0, Direction::Forward);
		assert_eq!(steps[1].1.hash(), block_2.hash());
	}

	#[test]
	fn navigate_reorg_disconnects_then_connects() {
		// current:  G - X - Y
		// target:   G - X - Z - W
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let mut base = Chain::from_genesis(genesis).unwrap();
		extend(&mut base, 1); // X

		let mut current = base.clone();
		let block_y = extend(&mut current, 2);
		let mut target = base.clone();
		let block_z = extend(&mut target, 3);
		let block_w = extend(&mut target, 4);

		let steps = ChainWalker::navigate(&current, &target).unwrap();
		let shape: Vec<(i8, Hash)> = steps
			.iter()
			.map(|(d, h)| (d.as_step(), h.hash()))
			.collect();
		assert_eq!(
			shape,
			vec![
				(-1, block_y.hash()),
				(1, block_z.hash()),
				(1, block_w.hash()),
			]
		);
	}

	#[test]
	fn navigate_path_length_and_ordering() {
		// fork at height 2, current goes to 6, target goes to 4
		let genesis = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let mut base = Chain::from_genesis(genesis).unwrap();
		extend(&mut base, 1);
		extend(&mut base, 2);

		let mut current = base.clone();
		for nonce in 10..14 {
			extend(&mut current, nonce);
		}
		let mut target = base.clone();
		for nonce in 20..22 {
			extend(&mut target, nonce);
		}

		let steps = ChainWalker::navigate(&current, &target).unwrap();
		assert_eq!(steps.len() as u64, (6 - 2) + (4 - 2));
		// all disconnects first, then all connects
		let first_connect = steps
			.iter()
			.position(|(d, _)| d.is_forward())
			.unwrap();
		assert!(steps[..first_connect]
			.iter()
			.all(|(d, _)| !d.is_forward()));
		assert!(steps[first_connect..].iter().all(|(d, _)| d.is_forward()));
		assert_eq!(first_connect as u64, 4);
	}

	#[test]
	fn navigate_no_common_ancestor() {
		let genesis_a = ChainedHeader::genesis(header(ZERO_HASH, 0)).unwrap();
		let genesis_b = ChainedHeader::genesis(header(ZERO_HASH, 99)).unwrap();
		let chain_a = Chain::from_genesis(genesis_a).unwrap();
		let chain_b = Chain::from_genesis(genesis_b).unwrap();
		let err = ChainWalker::navigate(&chain_a, &chain_b).err().unwrap();
		assert_eq!(err.kind(), ErrorKind::NoCommonAncestor);
	}
}
