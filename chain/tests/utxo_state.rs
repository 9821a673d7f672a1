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

mod chain_test_helper;

use chain_test_helper::*;
use cinder_chain::ErrorKind;
use cinder_core::core::hash::Hashed;
use cinder_core::core::transaction::OutPoint;

#[test]
fn genesis_only_leaves_all_counters_at_zero() {
	let chain = init_chain();
	assert_eq!(chain.tip().height, 0);
	assert_eq!(chain.unspent_tx_count().unwrap(), 0);
	assert_eq!(chain.unspent_output_count().unwrap(), 0);
	assert_eq!(chain.total_tx_count().unwrap(), 0);
	assert_eq!(chain.total_input_count().unwrap(), 0);
	assert_eq!(chain.total_output_count().unwrap(), 0);
}

#[test]
fn single_block_with_two_output_coinbase() {
	let chain = init_chain();
	let genesis = chain.current_chain().tip().header.clone();
	let reward = coinbase(b"b1", &[10 * one_coin(), 5 * one_coin()]);
	let block = block_on(&genesis, vec![reward.clone()]);
	process(&chain, &block);

	assert_eq!(chain.tip().height, 1);
	assert_eq!(chain.tip().last_block_h, block.hash());
	assert_eq!(chain.unspent_tx_count().unwrap(), 1);
	assert_eq!(chain.unspent_output_count().unwrap(), 2);
	assert_eq!(chain.total_tx_count().unwrap(), 1);
	assert_eq!(chain.total_input_count().unwrap(), 0);
	assert_eq!(chain.total_output_count().unwrap(), 2);

	let unspent = chain
		.utxo()
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap();
	assert_eq!(unspent.block_height, 1);
	assert_eq!(unspent.tx_index, 0);
	assert!(unspent.is_coinbase);
	assert!(unspent.output_states.all_unspent());
}

#[test]
fn spend_then_rollback_restores_the_unspent_record() {
	let fixture = UtxoFixture::new();
	let reward = coinbase(b"b1", &[10, 5]);
	let block_1 = fixture.store_block(1, vec![reward.clone()]);
	fixture.connect(&block_1).unwrap();
	assert_eq!(fixture.counters(), (1, 2, 1, 0, 2));

	// a bare spend of output 0, no new outputs
	let burn = spend(&reward, &[0], &[]);
	let block_2 = fixture.store_block(2, vec![burn]);
	fixture.connect(&block_2).unwrap();
	assert_eq!(fixture.utxo.counter("unspent_output_count").unwrap(), 1);
	let mid = fixture
		.utxo
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap();
	assert!(!mid.output_states.is_unspent(0));
	assert!(mid.output_states.is_unspent(1));

	fixture.disconnect(&block_2).unwrap();
	assert_eq!(fixture.counters(), (1, 2, 1, 0, 2));
	let restored = fixture
		.utxo
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap();
	assert!(restored.output_states.is_unspent(0));
	assert!(restored.output_states.is_unspent(1));
	assert_eq!(restored.output_states.len(), 2);
}

#[test]
fn rollback_restores_a_fully_spent_tx() {
	let fixture = UtxoFixture::new();
	let reward = coinbase(b"b1", &[10]);
	let block_1 = fixture.store_block(1, vec![reward.clone()]);
	fixture.connect(&block_1).unwrap();

	let burn = spend(&reward, &[0], &[]);
	let block_2 = fixture.store_block(2, vec![burn]);
	fixture.connect(&block_2).unwrap();

	// fully spent, the record and its stored outputs are destroyed
	assert!(fixture
		.utxo
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.is_none());
	assert!(fixture
		.utxo
		.try_get_unspent_output(&OutPoint::new(reward.hash(), 0))
		.unwrap()
		.is_none());
	assert_eq!(fixture.utxo.counter("unspent_tx_count").unwrap(), 0);
	// ...but its summary is recorded against the spending height
	let spent = fixture
		.utxo
		.try_get_block_spent_txs(2)
		.unwrap()
		.unwrap();
	assert_eq!(spent.len(), 1);
	assert_eq!(spent[0].tx_hash, reward.hash());
	assert_eq!(spent[0].block_height, 1);

	fixture.disconnect(&block_2).unwrap();
	let restored = fixture
		.utxo
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap();
	assert!(restored.output_states.all_unspent());
	assert!(fixture
		.utxo
		.try_get_unspent_output(&OutPoint::new(reward.hash(), 0))
		.unwrap()
		.is_some());
	assert_eq!(fixture.counters(), (1, 1, 1, 0, 1));
}

#[test]
fn duplicate_coinbase_mint_is_skipped_at_frozen_heights() {
	let fixture = UtxoFixture::new();
	let reward = coinbase(b"frozen", &[50]);
	let dupes = vec![(91_722u64, reward.hash())];

	let early = fixture.store_block(5, vec![reward.clone()]);
	fixture.replay(&early, cinder_chain::Direction::Forward, &dupes).unwrap();
	assert_eq!(fixture.utxo.counter("unspent_tx_count").unwrap(), 1);

	// the same coinbase reappears at the frozen height: minting is
	// skipped, the earlier instance stays intact, no error
	let late = fixture.store_block(91_722, vec![reward.clone()]);
	fixture.replay(&late, cinder_chain::Direction::Forward, &dupes).unwrap();
	assert_eq!(fixture.utxo.counter("unspent_tx_count").unwrap(), 1);
	let unspent = fixture
		.utxo
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap();
	assert_eq!(unspent.block_height, 5);
	assert_eq!(fixture.utxo.counter("total_output_count").unwrap(), 1);

	// rolling the duplicate back skips the unmint symmetrically
	fixture.replay(&late, cinder_chain::Direction::Reverse, &dupes).unwrap();
	let still = fixture
		.utxo
		.try_get_unspent_tx(&reward.hash())
		.unwrap()
		.unwrap();
	assert_eq!(still.block_height, 5);
	assert_eq!(fixture.utxo.counter("unspent_tx_count").unwrap(), 1);
}

#[test]
fn duplicate_mint_outside_the_frozen_table_is_a_validation_failure() {
	let fixture = UtxoFixture::new();
	let reward = coinbase(b"dup", &[50]);

	let first = fixture.store_block(1, vec![reward.clone()]);
	fixture.connect(&first).unwrap();

	let second = fixture.store_block(2, vec![reward.clone()]);
	let err = fixture.connect(&second).err().unwrap();
	assert_eq!(err.kind(), ErrorKind::Validation(second.hash()));
	// the failed step left no effects behind
	assert_eq!(fixture.counters(), (1, 1, 1, 0, 1));
}

#[test]
fn conservation_full_rollback_restores_the_initial_state() {
	let fixture = UtxoFixture::new();

	let reward_1 = coinbase(b"b1", &[10, 20]);
	let reward_2 = coinbase(b"b2", &[30]);
	let pay = spend(&reward_1, &[0], &[6, 4]);
	let reward_3 = coinbase(b"b3", &[40]);
	let sweep = spend(&pay, &[0, 1], &[9]);

	let block_1 = fixture.store_block(1, vec![reward_1.clone()]);
	let block_2 = fixture.store_block(2, vec![reward_2.clone(), pay.clone()]);
	let block_3 = fixture.store_block(3, vec![reward_3.clone(), sweep.clone()]);

	fixture.connect(&block_1).unwrap();
	fixture.connect(&block_2).unwrap();
	fixture.connect(&block_3).unwrap();

	// sanity along the way: pay is now fully spent
	assert!(fixture
		.utxo
		.try_get_unspent_tx(&pay.hash())
		.unwrap()
		.is_none());

	fixture.disconnect(&block_3).unwrap();
	fixture.disconnect(&block_2).unwrap();
	fixture.disconnect(&block_1).unwrap();

	assert_eq!(fixture.counters(), (0, 0, 0, 0, 0));
	for tx in [&reward_1, &reward_2, &reward_3, &pay, &sweep] {
		assert!(fixture.utxo.try_get_unspent_tx(&tx.hash()).unwrap().is_none());
		assert!(fixture
			.utxo
			.try_get_unspent_output(&OutPoint::new(tx.hash(), 0))
			.unwrap()
			.is_none());
	}
	for height in 1..=3 {
		assert!(fixture.utxo.try_get_block_spent_txs(height).unwrap().is_none());
		assert!(fixture.utxo.try_get_unminted_txs(height).unwrap().is_none());
	}
}

#[test]
fn counter_coherence_and_mint_spend_bijection() {
	let fixture = UtxoFixture::new();

	let reward_1 = coinbase(b"b1", &[10, 20, 30]);
	let pay = spend(&reward_1, &[1], &[5, 5]);
	let reward_2 = coinbase(b"b2", &[40]);
	let sweep = spend(&pay, &[0, 1], &[9]);

	let block_1 = fixture.store_block(1, vec![reward_1.clone()]);
	let block_2 = fixture.store_block(2, vec![reward_2.clone(), pay.clone()]);
	let block_3 = fixture.store_block(3, vec![sweep.clone()]);
	fixture.connect(&block_1).unwrap();
	fixture.connect(&block_2).unwrap();
	fixture.connect(&block_3).unwrap();

	// coherence: the counters match what the records say
	let mut unspent_txs = 0;
	let mut unspent_outputs = 0;
	for tx in [&reward_1, &reward_2, &pay, &sweep] {
		if let Some(unspent) = fixture.utxo.try_get_unspent_tx(&tx.hash()).unwrap() {
			assert!(!unspent.output_states.none_unspent());
			unspent_txs += 1;
			unspent_outputs += unspent.output_states.unspent_count();
		}
	}
	assert_eq!(fixture.utxo.counter("unspent_tx_count").unwrap(), unspent_txs);
	assert_eq!(
		fixture.utxo.counter("unspent_output_count").unwrap(),
		unspent_outputs
	);

	// bijection: every minted outpoint is either still stored or its tx is
	// listed in some spent summary; never both, never neither
	let mut spent_hashes = vec![];
	for height in 1..=3 {
		if let Some(spent) = fixture.utxo.try_get_block_spent_txs(height).unwrap() {
			spent_hashes.extend(spent.into_iter().map(|s| s.tx_hash));
		}
	}
	// pay got fully swept at height 3
	assert!(spent_hashes.contains(&pay.hash()));
	for tx in [&reward_1, &reward_2, &pay, &sweep] {
		for index in 0..tx.outputs.len() as u32 {
			let outpoint = OutPoint::new(tx.hash(), index);
			let stored = fixture
				.utxo
				.try_get_unspent_output(&outpoint)
				.unwrap()
				.is_some();
			let summarized = spent_hashes.contains(&tx.hash());
			assert!(
				stored ^ summarized,
				"outpoint {}:{} must be stored or summarized, exclusively",
				tx.hash(),
				index
			);
		}
	}
}
