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
use cinder_chain::ChainState;
use cinder_core::core::hash::Hashed;
use cinder_core::core::Block;

// G - X - Y        the initial chain
// G - X - Z - W    the heavier fork we reorganize onto
fn fork_blocks(chain: &ChainState) -> (Block, Block, Block, Block) {
	let genesis = chain.current_chain().tip().header.clone();
	let block_x = block_on(&genesis, vec![coinbase(b"x", &[10 * one_coin(), one_coin()])]);
	let block_y = block_on(
		&block_x.header,
		vec![
			coinbase(b"y", &[2 * one_coin()]),
			spend(&block_x.transactions[0], &[0], &[9 * one_coin()]),
		],
	);
	let block_z = block_on(
		&block_x.header,
		vec![
			coinbase(b"z", &[3 * one_coin()]),
			spend(&block_x.transactions[0], &[1], &[one_coin() / 2]),
		],
	);
	let block_w = block_on(&block_z.header, vec![coinbase(b"w", &[4 * one_coin()])]);
	(block_x, block_y, block_z, block_w)
}

#[test]
fn reorg_to_the_heavier_fork() {
	let chain = init_chain();
	let (block_x, block_y, block_z, block_w) = fork_blocks(&chain);

	process(&chain, &block_x);
	process(&chain, &block_y);
	assert_eq!(chain.tip().height, 2);

	// feed the fork; W carries more cumulative work than Y
	process(&chain, &block_z);
	process(&chain, &block_w);

	assert_eq!(chain.tip().height, 3);
	assert_eq!(chain.tip().last_block_h, block_w.hash());
	let validated = chain.current_chain();
	assert_eq!(validated.ancestor(2).unwrap().hash(), block_z.hash());

	// Y's effects are fully unwound
	let reward_y = &block_y.transactions[0];
	assert!(chain
		.utxo()
		.try_get_unspent_tx(&reward_y.hash())
		.unwrap()
		.is_none());
	// X's output 0, spent by Y, is unspent again; output 1 is now spent by Z
	let reward_x = chain
		.utxo()
		.try_get_unspent_tx(&block_x.transactions[0].hash())
		.unwrap()
		.unwrap();
	assert!(reward_x.output_states.is_unspent(0));
	assert!(!reward_x.output_states.is_unspent(1));
}

#[test]
fn reorg_state_matches_a_fresh_replay_of_the_fork() {
	let reorged = init_chain();
	let (block_x, block_y, block_z, block_w) = fork_blocks(&reorged);
	process(&reorged, &block_x);
	process(&reorged, &block_y);
	process(&reorged, &block_z);
	process(&reorged, &block_w);

	// a second chain that never saw Y
	let fresh = init_chain();
	process(&fresh, &block_x);
	process(&fresh, &block_z);
	process(&fresh, &block_w);

	assert_eq!(reorged.tip(), fresh.tip());
	assert_eq!(
		reorged.unspent_tx_count().unwrap(),
		fresh.unspent_tx_count().unwrap()
	);
	assert_eq!(
		reorged.unspent_output_count().unwrap(),
		fresh.unspent_output_count().unwrap()
	);
	assert_eq!(
		reorged.total_tx_count().unwrap(),
		fresh.total_tx_count().unwrap()
	);
	assert_eq!(
		reorged.total_input_count().unwrap(),
		fresh.total_input_count().unwrap()
	);
	assert_eq!(
		reorged.total_output_count().unwrap(),
		fresh.total_output_count().unwrap()
	);

	// record-level equality across every transaction of the fork
	for block in [&block_x, &block_y, &block_z, &block_w] {
		for tx in &block.transactions {
			assert_eq!(
				reorged.utxo().try_get_unspent_tx(&tx.hash()).unwrap(),
				fresh.utxo().try_get_unspent_tx(&tx.hash()).unwrap(),
				"diverging record for {}",
				tx.hash()
			);
		}
	}
}

#[test]
fn orphan_fork_connects_once_its_parent_arrives() {
	let chain = init_chain();
	let (block_x, _, block_z, block_w) = fork_blocks(&chain);

	process(&chain, &block_x);
	// W arrives before Z: its header can't chain yet
	let res = chain
		.process_block(block_w.clone(), cinder_chain::Options::SKIP_POW)
		.unwrap();
	assert!(res.is_none());
	assert_eq!(chain.tip().height, 1);

	// once Z shows up the re-submitted W extends the chain
	process(&chain, &block_z);
	process(&chain, &block_w);
	assert_eq!(chain.tip().height, 3);
	assert_eq!(chain.tip().last_block_h, block_w.hash());
}
