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

//! Definition of the genesis block. Placeholder for now until a solid chain
//! is launched; the dev genesis is deterministic so tests and local networks
//! all agree on it.

use crate::consensus::{COIN, EASY_POW_BITS};
use crate::core::block::{Block, BlockHeader};
use crate::core::hash::{Hashed, ZERO_HASH};
use crate::core::transaction::{OutPoint, Transaction, TxInput, TxOutput};

/// Genesis timestamp, does not commemorate anything in particular.
const GENESIS_TIME: u32 = 1_514_764_800;

/// The genesis block for development and testing. Its coinbase is excluded
/// from the unspent set, as the first spendable coin appears at height 1.
pub fn genesis_dev() -> Block {
	let coinbase = Transaction::new(
		1,
		vec![TxInput {
			prev_output: OutPoint::null(),
			script_sig: b"cinder dev genesis".to_vec(),
			sequence: 0xffff_ffff,
		}],
		vec![TxOutput {
			value: 50 * COIN,
			script_pubkey: vec![],
		}],
		0,
	);
	let header = BlockHeader::new(1, ZERO_HASH, coinbase.hash(), GENESIS_TIME, EASY_POW_BITS, 0);
	Block::new(header, vec![coinbase])
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn dev_genesis_is_deterministic() {
		let one = genesis_dev();
		let two = genesis_dev();
		assert_eq!(one.hash(), two.hash());
		assert_eq!(one.transactions.len(), 1);
		assert!(one.transactions[0].is_coinbase());
		assert_eq!(one.header.prev, ZERO_HASH);
	}
}
