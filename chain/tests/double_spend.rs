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

mod chain_test_helper;

use chain_test_helper::*;
use cinder_core::core::hash::Hashed;
use cinder_core::core::transaction::OutPoint;
use cinder_core::core::{Transaction, TxInput, TxOutput};

#[test]
fn double_spend_within_one_block_marks_it_invalid() {
	let chain = init_chain();
	let genesis = chain.current_chain().tip().header.clone();

	let reward = coinbase(b"b1", &[10 * one_coin()]);
	let block_1 = block_on(&genesis, vec![reward.clone()]);
	process(&chain, &block_1);
	assert_eq!(chain.tip().height, 1);

	// two inputs referencing the same outpoint inside one transaction
	let double = Transaction::new(
		1,
		vec![
			TxInput {
				prev_output: OutPoint::new(reward.hash(), 0),
				script_sig: vec![],
				sequence: 0xffff_ffff,
			},
			TxInput {
				prev_output: OutPoint::new(reward.hash(), 0),
				script_sig: vec![],
				sequence: 0xffff_ffff,
			},
		],
		vec![TxOutput {
			value: 10 * one_coin(),
			script_pubkey: vec![],
		}],
		0,
	);
	let block_2 = block_on(&block_1.header, vec![coinbase(b"b2", &[one_coin()]), double]);
	// the block is accepted into storage but fails replay
	process(&chain, &block_2);

	// the step rolled back: tip and counters are untouched
	assert_eq!(chain.tip().height, 1);
	assert_eq!(chain.tip().last_block_h, block_1.hash());
	assert!(chain.is_block_invalid(&block_2.hash()).unwrap());
	assert!(chain.graph().is_invalid(&block_2.hash()));
	assert_eq!(chain.unspent_tx_count().unwrap(), 1);
	assert_eq!(chain.unspent_output_count().unwrap(), 1);
	assert!(chain
		.utxo()
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap()
		.output_states
		.all_unspent());

	// descendants of the invalid block are ignored for tip selection too
	let block_3 = block_on(&block_2.header, vec![coinbase(b"b3", &[one_coin()])]);
	process(&chain, &block_3);
	assert_eq!(chain.tip().height, 1);
	assert!(chain.graph().is_invalid(&block_3.hash()));
}
